use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};

use crate::api::BrokerGateway;
use crate::error::GatewayError;
use crate::market::snapshot::has_market_data;
use crate::market::{format_quote_line, normalize_snapshot, MarketSession, SNAPSHOT_FIELDS};
use crate::models::Quote;

/// Fetches normalized quotes, one ticker at a time
///
/// Contract ids are looked up once and cached for the life of the feed.
pub struct QuoteFeed {
    conids: HashMap<String, i64>,
    warmup_delay: Duration,
}

impl QuoteFeed {
    pub fn new(warmup_delay: Duration) -> Self {
        Self {
            conids: HashMap::new(),
            warmup_delay,
        }
    }

    /// Forget cached contract ids at the day boundary
    pub fn reset_for_new_day(&mut self) {
        self.conids.clear();
    }

    pub async fn conid<G: BrokerGateway>(
        &mut self,
        gateway: &G,
        ticker: &str,
    ) -> Result<i64, GatewayError> {
        if let Some(conid) = self.conids.get(ticker) {
            return Ok(*conid);
        }

        let conid = gateway.search_contract(ticker).await?;
        tracing::debug!(ticker = %ticker, conid, "Resolved contract");
        self.conids.insert(ticker.to_string(), conid);
        Ok(conid)
    }

    /// Latest quote for the ticker
    ///
    /// The first snapshot after subscribing often carries no fields, so an
    /// empty answer is retried once after the warm-up delay.
    pub async fn fetch_quote<G: BrokerGateway>(
        &mut self,
        gateway: &G,
        ticker: &str,
        session: &MarketSession,
        now: DateTime<Utc>,
    ) -> Result<Quote, GatewayError> {
        let conid = self.conid(gateway, ticker).await?;

        let mut raw = gateway.snapshot(conid, SNAPSHOT_FIELDS).await?;
        if !raw.as_ref().is_some_and(has_market_data) {
            tracing::debug!(ticker = %ticker, "Snapshot empty, waiting for subscription");
            sleep(self.warmup_delay).await;
            raw = gateway.snapshot(conid, SNAPSHOT_FIELDS).await?;
        }

        let quote = match raw {
            Some(fields) => normalize_snapshot(ticker, conid, &fields, session, now),
            None => Quote::empty(ticker, conid),
        };

        tracing::info!("{}", format_quote_line(&quote));
        Ok(quote)
    }
}
