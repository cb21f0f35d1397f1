// Position sizing and protective exit levels
pub mod budget;

pub use budget::{BudgetCalculator, ProtectiveLevels};
