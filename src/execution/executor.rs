use std::fmt;

use crate::execution::PositionBook;
use crate::models::Quote;
use crate::risk::BudgetCalculator;

/// Lower edge of the buy band, percent above the close
pub const BUY_BAND_LOW_PCT: f64 = 0.8;
/// Upper edge of the buy band, inclusive
pub const BUY_BAND_HIGH_PCT: f64 = 0.95;
/// At or above this the move is considered already gone
pub const TOO_HIGH_PCT: f64 = 1.0;

/// Where the current price sits relative to the closing price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceBand {
    BelowClose,
    TooHigh,
    BuyOpportunity,
    Neutral,
}

impl PriceBand {
    /// First match wins: below close, too high, buy band, otherwise neutral
    pub fn classify(pct: f64) -> Self {
        if pct < 0.0 {
            PriceBand::BelowClose
        } else if pct >= TOO_HIGH_PCT {
            PriceBand::TooHigh
        } else if (BUY_BAND_LOW_PCT..=BUY_BAND_HIGH_PCT).contains(&pct) {
            PriceBand::BuyOpportunity
        } else {
            PriceBand::Neutral
        }
    }
}

impl fmt::Display for PriceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceBand::BelowClose => write!(f, "below close"),
            PriceBand::TooHigh => write!(f, "too high"),
            PriceBand::BuyOpportunity => write!(f, "buy opportunity"),
            PriceBand::Neutral => write!(f, "neutral"),
        }
    }
}

/// Percent change from the close, rounded to 6 decimals so band edges compare exactly
pub fn percent_from_close(current: f64, close: f64) -> f64 {
    let pct = (current - close) / close * 100.0;
    (pct * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Buy {
        quantity: u32,
        price: f64,
        stop_loss_price: f64,
        take_profit_price: f64,
    },
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub band: Option<PriceBand>,
    pub pct: Option<f64>,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            band: None,
            pct: None,
            reason: reason.into(),
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self.action, ExecutionAction::Buy { .. })
    }
}

/// Applies the fixed percentage band rule to a quote
pub struct Executor {
    budget: BudgetCalculator,
}

impl Executor {
    pub fn new(budget: BudgetCalculator) -> Self {
        Self { budget }
    }

    /// Decide what to do with one ticker this cycle
    pub fn evaluate(
        &self,
        quote: &Quote,
        closing_price: Option<f64>,
        positions: &PositionBook,
    ) -> ExecutionDecision {
        if quote.is_market_closed {
            return ExecutionDecision::skip("Market closed");
        }

        let Some(close) = closing_price.filter(|c| *c > 0.0) else {
            return ExecutionDecision::skip("No closing price");
        };

        let Some(current) = quote.last_price else {
            return ExecutionDecision::skip("No current price");
        };

        let pct = percent_from_close(current, close);
        let band = PriceBand::classify(pct);

        let (action, reason) = match band {
            PriceBand::BuyOpportunity if positions.has_open_position(&quote.ticker) => (
                ExecutionAction::Skip,
                "Already have open position".to_string(),
            ),
            PriceBand::BuyOpportunity => {
                let quantity = self.budget.quantity(current);
                let levels = self.budget.protective_levels(current);
                (
                    ExecutionAction::Buy {
                        quantity,
                        price: current,
                        stop_loss_price: levels.stop_loss,
                        take_profit_price: levels.take_profit,
                    },
                    format!("{:.2}% above close ${:.2}", pct, close),
                )
            }
            other => (
                ExecutionAction::Skip,
                format!("{} ({:.2}% vs close ${:.2})", other, pct, close),
            ),
        };

        ExecutionDecision {
            action,
            band: Some(band),
            pct: Some(pct),
            reason,
        }
    }
}
