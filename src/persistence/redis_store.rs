use super::DailyStore;
use crate::error::StoreError;
use crate::models::{ClosedPositionRecord, ClosingPriceRecord, Position};
use chrono::NaiveDate;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use std::collections::HashMap;
use std::future::Future;
use tokio::time::{timeout, Duration};

const KEY_PREFIX: &str = "daytrader";
const CONNECT_TIMEOUT_SECS: u64 = 5;
// Day-scoped keys outlive the day itself so a late restart can still read them
const KEY_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Redis persistence for day-scoped trading state
///
/// Keys:
/// - `daytrader:closing:{date}:{ticker}` - closing price record, written with SET NX
/// - `daytrader:positions:{date}` - hash of ticker -> open position
/// - `daytrader:closed:{date}` - list of closed position records, append only
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout_secs: u64,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `op_timeout_secs` - Upper bound on every individual command
    pub async fn new(redis_url: &str, op_timeout_secs: u64) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;

        let conn = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| StoreError::Timeout(CONNECT_TIMEOUT_SECS))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            op_timeout_secs,
        })
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        timeout(Duration::from_secs(self.op_timeout_secs), fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout_secs))?
            .map_err(StoreError::from)
    }
}

fn closing_key(ticker: &str, date: NaiveDate) -> String {
    format!("{}:closing:{}:{}", KEY_PREFIX, date, ticker)
}

fn positions_key(date: NaiveDate) -> String {
    format!("{}:positions:{}", KEY_PREFIX, date)
}

fn closed_key(date: NaiveDate) -> String {
    format!("{}:closed:{}", KEY_PREFIX, date)
}

impl DailyStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = format!("{}:health", KEY_PREFIX);
        let _: bool = self.guarded(conn.exists(&key)).await?;
        Ok(())
    }

    async fn load_closing_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, StoreError> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = self.guarded(conn.get(closing_key(ticker, date))).await?;

        match stored {
            Some(json) => {
                let record: ClosingPriceRecord = serde_json::from_str(&json)?;
                Ok(Some(record.closing_price))
            }
            None => Ok(None),
        }
    }

    async fn save_closing_price_if_absent(
        &self,
        record: &ClosingPriceRecord,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let key = closing_key(&record.ticker, record.date);
        let value = serde_json::to_string(record)?;

        let written: bool = self.guarded(conn.set_nx(&key, value)).await?;
        if written {
            let _: bool = self.guarded(conn.expire(&key, KEY_TTL_SECS)).await?;
            tracing::debug!(
                ticker = %record.ticker,
                "Stored closing price {:.2} for {}",
                record.closing_price,
                record.date
            );
        }

        Ok(written)
    }

    async fn save_position(&self, date: NaiveDate, position: &Position) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = positions_key(date);
        let value = serde_json::to_string(position)?;

        let _: () = self.guarded(conn.hset(&key, &position.ticker, value)).await?;
        let _: bool = self.guarded(conn.expire(&key, KEY_TTL_SECS)).await?;
        Ok(())
    }

    async fn remove_position(&self, date: NaiveDate, ticker: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = self.guarded(conn.hdel(positions_key(date), ticker)).await?;
        Ok(())
    }

    async fn load_positions(&self, date: NaiveDate) -> Result<Vec<Position>, StoreError> {
        let mut conn = self.conn.clone();
        let stored: HashMap<String, String> =
            self.guarded(conn.hgetall(positions_key(date))).await?;

        let mut positions = stored
            .values()
            .map(|json| serde_json::from_str::<Position>(json))
            .collect::<Result<Vec<_>, _>>()?;
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        Ok(positions)
    }

    async fn append_closed_position(
        &self,
        date: NaiveDate,
        record: &ClosedPositionRecord,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = closed_key(date);
        let value = serde_json::to_string(record)?;

        let _: () = self.guarded(conn.rpush(&key, value)).await?;
        let _: bool = self.guarded(conn.expire(&key, KEY_TTL_SECS)).await?;
        Ok(())
    }

    async fn load_closed_positions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ClosedPositionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let stored: Vec<String> = self.guarded(conn.lrange(closed_key(date), 0, -1)).await?;

        let records = stored
            .iter()
            .map(|json| serde_json::from_str::<ClosedPositionRecord>(json))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
