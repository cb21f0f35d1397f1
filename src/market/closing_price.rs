use crate::error::StoreError;
use crate::models::{ClosingPriceRecord, PriceType, Quote};
use crate::persistence::DailyStore;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Where a resolved closing price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingPriceSource {
    /// Already recorded for the day; never replaced
    Existing,
    /// Official close printed by the exchange (`C` prefixed last price)
    Official,
    /// Backfilled from last price minus change
    PreviousClose,
}

/// Pick the reference close for a quote.
///
/// An existing value always wins, so a re-poll near the open cannot clobber
/// the close that was recorded earlier in the day.
pub fn resolve_closing_price(
    quote: &Quote,
    existing: Option<f64>,
) -> Option<(f64, ClosingPriceSource)> {
    if let Some(price) = existing {
        return Some((price, ClosingPriceSource::Existing));
    }

    if quote.price_type == Some(PriceType::ClosingPrice) {
        if let Some(price) = quote.last_price.filter(|p| is_usable(*p)) {
            return Some((price, ClosingPriceSource::Official));
        }
    }

    quote
        .previous_close
        .filter(|p| is_usable(*p))
        .map(|price| (price, ClosingPriceSource::PreviousClose))
}

fn is_usable(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Closing prices for one trading date, cached in memory and backed by the store
#[derive(Debug, Clone)]
pub struct ClosingPriceBook {
    date: NaiveDate,
    prices: HashMap<String, f64>,
}

impl ClosingPriceBook {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            prices: HashMap::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.prices.get(ticker).copied()
    }

    pub fn reset_for_new_day(&mut self, date: NaiveDate) {
        self.date = date;
        self.prices.clear();
    }

    /// Resolve and record the closing price for the quote's ticker.
    ///
    /// Looks in memory, then the store, then the quote itself. A newly adopted
    /// value is written set-if-absent; if another writer got there first,
    /// theirs is used.
    pub async fn resolve<S: DailyStore>(
        &mut self,
        quote: &Quote,
        store: &S,
    ) -> Result<Option<f64>, StoreError> {
        if let Some(price) = self.get(&quote.ticker) {
            return Ok(Some(price));
        }

        let stored = store.load_closing_price(&quote.ticker, self.date).await?;

        let Some((price, source)) = resolve_closing_price(quote, stored) else {
            tracing::debug!(ticker = %quote.ticker, "No closing price available yet");
            return Ok(None);
        };

        let price = match source {
            ClosingPriceSource::Existing => price,
            ClosingPriceSource::Official | ClosingPriceSource::PreviousClose => {
                let record = ClosingPriceRecord {
                    ticker: quote.ticker.clone(),
                    date: self.date,
                    closing_price: price,
                };

                if store.save_closing_price_if_absent(&record).await? {
                    tracing::info!(
                        ticker = %quote.ticker,
                        "Closing price for {} set to ${:.2} ({:?})",
                        self.date,
                        price,
                        source
                    );
                    price
                } else {
                    store
                        .load_closing_price(&quote.ticker, self.date)
                        .await?
                        .unwrap_or(price)
                }
            }
        };

        self.prices.insert(quote.ticker.clone(), price);
        Ok(Some(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn quote(last: Option<f64>, kind: Option<PriceType>, previous_close: Option<f64>) -> Quote {
        let mut quote = Quote::empty("AAPL", 265598);
        quote.last_price = last;
        quote.price_type = kind;
        quote.previous_close = previous_close;
        quote
    }

    #[test]
    fn test_existing_price_wins() {
        let q = quote(Some(150.0), Some(PriceType::ClosingPrice), Some(149.0));
        assert_eq!(
            resolve_closing_price(&q, Some(100.0)),
            Some((100.0, ClosingPriceSource::Existing))
        );
    }

    #[test]
    fn test_official_close_adopted() {
        let q = quote(Some(150.25), Some(PriceType::ClosingPrice), Some(149.0));
        assert_eq!(
            resolve_closing_price(&q, None),
            Some((150.25, ClosingPriceSource::Official))
        );
    }

    #[test]
    fn test_previous_close_backfill() {
        let q = quote(Some(101.0), Some(PriceType::LastTrade), Some(100.0));
        assert_eq!(
            resolve_closing_price(&q, None),
            Some((100.0, ClosingPriceSource::PreviousClose))
        );
    }

    #[test]
    fn test_nothing_to_resolve() {
        let q = quote(Some(101.0), Some(PriceType::LastTrade), None);
        assert_eq!(resolve_closing_price(&q, None), None);
    }

    #[test]
    fn test_non_positive_prices_are_ignored() {
        let q = quote(Some(0.0), Some(PriceType::ClosingPrice), Some(-1.0));
        assert_eq!(resolve_closing_price(&q, None), None);
    }

    #[tokio::test]
    async fn test_resolved_price_is_immutable_for_the_day() {
        let store = MemoryStore::new();
        let mut book = ClosingPriceBook::new(date());

        let first = quote(Some(101.0), Some(PriceType::LastTrade), Some(100.0));
        assert_eq!(book.resolve(&first, &store).await.unwrap(), Some(100.0));

        // A later official close for the same day does not replace it
        let later = quote(Some(103.5), Some(PriceType::ClosingPrice), Some(102.0));
        assert_eq!(book.resolve(&later, &store).await.unwrap(), Some(100.0));
        assert_eq!(
            store.load_closing_price("AAPL", date()).await.unwrap(),
            Some(100.0)
        );
    }

    #[tokio::test]
    async fn test_survives_restart_through_store() {
        let store = MemoryStore::new();

        let mut before = ClosingPriceBook::new(date());
        let first = quote(Some(150.25), Some(PriceType::ClosingPrice), None);
        before.resolve(&first, &store).await.unwrap();

        // Fresh in-memory book, same store
        let mut after = ClosingPriceBook::new(date());
        let other = quote(Some(155.0), Some(PriceType::LastTrade), Some(154.0));
        assert_eq!(after.resolve(&other, &store).await.unwrap(), Some(150.25));
    }

    #[tokio::test]
    async fn test_new_day_starts_empty() {
        let store = MemoryStore::new();
        let mut book = ClosingPriceBook::new(date());
        let q = quote(Some(101.0), Some(PriceType::LastTrade), Some(100.0));
        book.resolve(&q, &store).await.unwrap();

        let next = date().succ_opt().unwrap();
        book.reset_for_new_day(next);
        assert_eq!(book.get("AAPL"), None);

        let q = quote(Some(106.0), Some(PriceType::LastTrade), Some(105.0));
        assert_eq!(book.resolve(&q, &store).await.unwrap(), Some(105.0));
    }

    #[tokio::test]
    async fn test_unresolved_is_not_cached() {
        let store = MemoryStore::new();
        let mut book = ClosingPriceBook::new(date());

        let bare = quote(Some(101.0), Some(PriceType::LastTrade), None);
        assert_eq!(book.resolve(&bare, &store).await.unwrap(), None);

        let with_close = quote(Some(101.0), Some(PriceType::LastTrade), Some(100.0));
        assert_eq!(book.resolve(&with_close, &store).await.unwrap(), Some(100.0));
    }
}
