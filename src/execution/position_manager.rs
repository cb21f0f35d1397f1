use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::models::{format_pnl, round2, ClosedPositionRecord, Position};

/// Open and closed positions for one trading day
#[derive(Debug, Clone)]
pub struct PositionBook {
    date: NaiveDate,
    open: BTreeMap<String, Position>,
    closed: Vec<ClosedPositionRecord>,
}

/// Unrealized view of one open position
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSummary {
    pub ticker: String,
    pub quantity: u32,
    pub buy_price: f64,
    pub current_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
}

impl fmt::Display for PositionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} shares @ ${:.2}",
            self.ticker, self.quantity, self.buy_price
        )?;
        match (self.current_price, self.unrealized_pnl) {
            (Some(price), Some(pnl)) => {
                write!(f, " (Now: ${:.2}, P/L: {})", price, format_pnl(pnl))
            }
            _ => write!(f, " (no current price)"),
        }
    }
}

impl PositionBook {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            open: BTreeMap::new(),
            closed: Vec::new(),
        }
    }

    /// Rebuild the day from persisted positions and closed records
    pub fn with_positions(
        date: NaiveDate,
        open: Vec<Position>,
        closed: Vec<ClosedPositionRecord>,
    ) -> Self {
        let realized: f64 = closed.iter().map(|r| r.profit).sum();

        tracing::info!(
            "Restored {} open and {} closed positions for {} (realized P&L: {})",
            open.len(),
            closed.len(),
            date,
            format_pnl(realized)
        );

        Self {
            date,
            open: open.into_iter().map(|p| (p.ticker.clone(), p)).collect(),
            closed,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Add a position; a second one for the same ticker is ignored.
    ///
    /// Returns true if the position was inserted.
    pub fn open_position(&mut self, position: Position) -> bool {
        if self.open.contains_key(&position.ticker) {
            tracing::debug!(ticker = %position.ticker, "Position already open, ignoring");
            return false;
        }

        tracing::info!(
            ticker = %position.ticker,
            "Opened {} x{} @ ${:.2} (SL ${:.2}, TP ${:.2})",
            position.ticker,
            position.quantity,
            position.buy_price,
            position.stop_loss_price,
            position.take_profit_price
        );
        self.open.insert(position.ticker.clone(), position);
        true
    }

    pub fn has_open_position(&self, ticker: &str) -> bool {
        self.open.contains_key(ticker)
    }

    pub fn get_open_position(&self, ticker: &str) -> Option<&Position> {
        self.open.get(ticker)
    }

    /// Open positions ordered by ticker
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn closed_positions(&self) -> &[ClosedPositionRecord] {
        &self.closed
    }

    /// Total realized profit for the day
    pub fn realized_pnl(&self) -> f64 {
        round2(self.closed.iter().map(|r| r.profit).sum())
    }

    /// Close the ticker's position at `sell_price`
    ///
    /// Returns the closed record, or `None` if nothing was open.
    pub fn realize(&mut self, ticker: &str, sell_price: f64) -> Option<ClosedPositionRecord> {
        let position = self.open.remove(ticker)?;
        let record = closed_record(&position, sell_price);

        tracing::info!(
            ticker = %ticker,
            "💰 Closed {} x{} @ ${:.2} (bought ${:.2}): {} ({:.2}%)",
            ticker,
            record.quantity,
            record.sell_price,
            record.buy_price,
            format_pnl(record.profit),
            record.return_pct
        );

        self.closed.push(record.clone());
        Some(record)
    }

    /// Unrealized P/L for every open position against the given prices
    pub fn summary(&self, prices: &HashMap<String, f64>) -> Vec<PositionSummary> {
        self.open
            .values()
            .map(|p| {
                let current_price = prices.get(&p.ticker).copied();
                PositionSummary {
                    ticker: p.ticker.clone(),
                    quantity: p.quantity,
                    buy_price: p.buy_price,
                    current_price,
                    unrealized_pnl: current_price
                        .map(|price| round2((price - p.buy_price) * p.quantity as f64)),
                }
            })
            .collect()
    }

    pub fn reset_for_new_day(&mut self, date: NaiveDate) {
        if !self.open.is_empty() {
            tracing::warn!(
                "Dropping {} open positions carried over from {}",
                self.open.len(),
                self.date
            );
        }
        self.date = date;
        self.open.clear();
        self.closed.clear();
    }
}

fn closed_record(position: &Position, sell_price: f64) -> ClosedPositionRecord {
    let profit = round2((sell_price - position.buy_price) * position.quantity as f64);
    let return_pct = if position.buy_price > 0.0 {
        round2((sell_price - position.buy_price) / position.buy_price * 100.0)
    } else {
        0.0
    };

    ClosedPositionRecord {
        symbol: position.ticker.clone(),
        buy_date: position.buy_date,
        buy_price: position.buy_price,
        sell_price,
        quantity: position.quantity,
        profit,
        return_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn position(ticker: &str, buy_price: f64, quantity: u32) -> Position {
        Position {
            ticker: ticker.to_string(),
            conid: 1,
            quantity,
            buy_price,
            buy_date: Utc.with_ymd_and_hms(2024, 7, 15, 14, 0, 0).unwrap(),
            stop_loss_price: round2(buy_price * 0.98),
            take_profit_price: round2(buy_price * 1.05),
        }
    }

    #[test]
    fn test_duplicate_open_is_noop() {
        let mut book = PositionBook::new(date());
        assert!(book.open_position(position("AAPL", 100.0, 9)));
        assert!(!book.open_position(position("AAPL", 120.0, 3)));

        let open = book.get_open_position("AAPL").unwrap();
        assert_eq!(open.buy_price, 100.0);
        assert_eq!(open.quantity, 9);
        assert_eq!(book.open_count(), 1);
    }

    #[test]
    fn test_realize_profit_and_return() {
        let mut book = PositionBook::new(date());
        book.open_position(position("AAPL", 100.0, 9));

        let record = book.realize("AAPL", 105.0).unwrap();
        assert_eq!(record.symbol, "AAPL");
        assert_eq!(record.profit, 45.0);
        assert_eq!(record.return_pct, 5.0);
        assert!(!book.has_open_position("AAPL"));
        assert_eq!(book.closed_positions().len(), 1);
        assert_eq!(book.realized_pnl(), 45.0);
    }

    #[test]
    fn test_realize_loss() {
        let mut book = PositionBook::new(date());
        book.open_position(position("MSFT", 50.0, 4));

        let record = book.realize("MSFT", 49.0).unwrap();
        assert_eq!(record.profit, -4.0);
        assert_eq!(record.return_pct, -2.0);
    }

    #[test]
    fn test_realize_unknown_ticker() {
        let mut book = PositionBook::new(date());
        assert!(book.realize("NOPE", 1.0).is_none());
        assert!(book.closed_positions().is_empty());
    }

    #[test]
    fn test_summary_with_and_without_price() {
        let mut book = PositionBook::new(date());
        book.open_position(position("AAPL", 100.0, 9));
        book.open_position(position("MSFT", 50.0, 2));

        let prices = HashMap::from([("AAPL".to_string(), 105.0)]);
        let summary = book.summary(&prices);

        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].unrealized_pnl, Some(45.0));
        assert_eq!(
            summary[0].to_string(),
            "AAPL: 9 shares @ $100.00 (Now: $105.00, P/L: +$45.00)"
        );
        assert_eq!(summary[1].unrealized_pnl, None);
        assert_eq!(
            summary[1].to_string(),
            "MSFT: 2 shares @ $50.00 (no current price)"
        );
    }

    #[test]
    fn test_restore_and_reset() {
        let closed = vec![closed_record(&position("TSLA", 10.0, 1), 11.0)];
        let mut book = PositionBook::with_positions(date(), vec![position("AAPL", 100.0, 9)], closed);

        assert!(book.has_open_position("AAPL"));
        assert_eq!(book.realized_pnl(), 1.0);

        let next = date().succ_opt().unwrap();
        book.reset_for_new_day(next);
        assert_eq!(book.date(), next);
        assert_eq!(book.open_count(), 0);
        assert!(book.closed_positions().is_empty());
    }
}
