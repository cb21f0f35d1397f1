// Market data normalization, session clock and reference prices
pub mod closing_price;
pub mod session;
pub mod snapshot;

pub use closing_price::{resolve_closing_price, ClosingPriceBook, ClosingPriceSource};
pub use session::MarketSession;
pub use snapshot::{format_quote_line, normalize_snapshot, SNAPSHOT_FIELDS};
