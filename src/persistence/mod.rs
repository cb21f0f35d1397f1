// Day-scoped durable state: closing prices and positions
pub mod redis_store;

pub use redis_store::RedisStore;

use crate::error::StoreError;
use crate::models::{ClosedPositionRecord, ClosingPriceRecord, Position};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Durable key-value storage keyed by trading date (and ticker)
///
/// Everything the engine must remember across a restart on the same day
/// goes through here.
#[allow(async_fn_in_trait)]
pub trait DailyStore {
    /// Cheap reachability check, run once per cycle
    async fn ping(&self) -> Result<(), StoreError>;

    async fn load_closing_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, StoreError>;

    /// Store the record unless one already exists for (ticker, date).
    /// Returns true if this call wrote it.
    async fn save_closing_price_if_absent(
        &self,
        record: &ClosingPriceRecord,
    ) -> Result<bool, StoreError>;

    async fn save_position(&self, date: NaiveDate, position: &Position) -> Result<(), StoreError>;

    async fn remove_position(&self, date: NaiveDate, ticker: &str) -> Result<(), StoreError>;

    async fn load_positions(&self, date: NaiveDate) -> Result<Vec<Position>, StoreError>;

    async fn append_closed_position(
        &self,
        date: NaiveDate,
        record: &ClosedPositionRecord,
    ) -> Result<(), StoreError>;

    async fn load_closed_positions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ClosedPositionRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    closing_prices: HashMap<(String, NaiveDate), f64>,
    positions: HashMap<NaiveDate, BTreeMap<String, Position>>,
    closed: HashMap<NaiveDate, Vec<ClosedPositionRecord>>,
    unavailable: bool,
}

/// Process-local store, for tests and for running without Redis
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backend were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-write
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(state)
    }
}

impl DailyStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check().map(|_| ())
    }

    async fn load_closing_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, StoreError> {
        let state = self.check()?;
        Ok(state.closing_prices.get(&(ticker.to_string(), date)).copied())
    }

    async fn save_closing_price_if_absent(
        &self,
        record: &ClosingPriceRecord,
    ) -> Result<bool, StoreError> {
        let mut state = self.check()?;
        let key = (record.ticker.clone(), record.date);
        if state.closing_prices.contains_key(&key) {
            return Ok(false);
        }
        state.closing_prices.insert(key, record.closing_price);
        Ok(true)
    }

    async fn save_position(&self, date: NaiveDate, position: &Position) -> Result<(), StoreError> {
        let mut state = self.check()?;
        state
            .positions
            .entry(date)
            .or_default()
            .insert(position.ticker.clone(), position.clone());
        Ok(())
    }

    async fn remove_position(&self, date: NaiveDate, ticker: &str) -> Result<(), StoreError> {
        let mut state = self.check()?;
        if let Some(day) = state.positions.get_mut(&date) {
            day.remove(ticker);
        }
        Ok(())
    }

    async fn load_positions(&self, date: NaiveDate) -> Result<Vec<Position>, StoreError> {
        let state = self.check()?;
        Ok(state
            .positions
            .get(&date)
            .map(|day| day.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn append_closed_position(
        &self,
        date: NaiveDate,
        record: &ClosedPositionRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.check()?;
        state.closed.entry(date).or_default().push(record.clone());
        Ok(())
    }

    async fn load_closed_positions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ClosedPositionRecord>, StoreError> {
        let state = self.check()?;
        Ok(state.closed.get(&date).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn position(ticker: &str) -> Position {
        Position {
            ticker: ticker.to_string(),
            conid: 1,
            quantity: 9,
            buy_price: 100.85,
            buy_date: Utc.with_ymd_and_hms(2024, 7, 15, 14, 0, 0).unwrap(),
            stop_loss_price: 98.83,
            take_profit_price: 105.89,
        }
    }

    #[tokio::test]
    async fn test_closing_price_is_written_once() {
        let store = MemoryStore::new();
        let first = ClosingPriceRecord {
            ticker: "AAPL".to_string(),
            date: date(),
            closing_price: 100.0,
        };
        let second = ClosingPriceRecord {
            closing_price: 120.0,
            ..first.clone()
        };

        assert!(store.save_closing_price_if_absent(&first).await.unwrap());
        assert!(!store.save_closing_price_if_absent(&second).await.unwrap());
        assert_eq!(
            store.load_closing_price("AAPL", date()).await.unwrap(),
            Some(100.0)
        );
    }

    #[tokio::test]
    async fn test_closing_prices_are_scoped_by_date() {
        let store = MemoryStore::new();
        let record = ClosingPriceRecord {
            ticker: "AAPL".to_string(),
            date: date(),
            closing_price: 100.0,
        };
        store.save_closing_price_if_absent(&record).await.unwrap();

        let next_day = date().succ_opt().unwrap();
        assert_eq!(store.load_closing_price("AAPL", next_day).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_positions_roundtrip_and_removal() {
        let store = MemoryStore::new();
        store.save_position(date(), &position("AAPL")).await.unwrap();
        store.save_position(date(), &position("MSFT")).await.unwrap();

        assert_eq!(store.load_positions(date()).await.unwrap().len(), 2);

        store.remove_position(date(), "AAPL").await.unwrap();
        let remaining = store.load_positions(date()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ticker, "MSFT");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(store.ping().await.is_err());
        assert!(store.load_positions(date()).await.is_err());

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
