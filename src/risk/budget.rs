use crate::config::TradingSettings;
use crate::models::round2;

/// Stop-loss and take-profit prices for a fill
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Turns the trading settings into a share count and exit levels
#[derive(Debug, Clone)]
pub struct BudgetCalculator {
    budget_per_trade: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
}

impl BudgetCalculator {
    pub fn new(settings: &TradingSettings) -> Self {
        let budget_per_trade = if settings.next_investment > 0.0 && settings.ops_per_day > 0 {
            settings.next_investment / settings.ops_per_day as f64
        } else {
            0.0
        };

        Self {
            budget_per_trade,
            stop_loss_pct: settings.stop_loss_pct,
            take_profit_pct: settings.take_profit_pct,
        }
    }

    pub fn budget_per_trade(&self) -> f64 {
        self.budget_per_trade
    }

    /// Whole shares affordable at `price`.
    ///
    /// Falls back to a single share when there is no budget or no usable
    /// price, and never goes below one share.
    pub fn quantity(&self, price: f64) -> u32 {
        if self.budget_per_trade <= 0.0 || !price.is_finite() || price <= 0.0 {
            return 1;
        }

        let shares = (self.budget_per_trade / price).floor();
        if shares < 1.0 {
            1
        } else if shares >= u32::MAX as f64 {
            u32::MAX
        } else {
            shares as u32
        }
    }

    pub fn protective_levels(&self, buy_price: f64) -> ProtectiveLevels {
        ProtectiveLevels {
            stop_loss: round2(buy_price * (1.0 - self.stop_loss_pct / 100.0)),
            take_profit: round2(buy_price * (1.0 + self.take_profit_pct / 100.0)),
        }
    }
}
