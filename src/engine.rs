use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::time::Duration;

use crate::api::BrokerGateway;
use crate::config::TradingInputs;
use crate::error::StoreError;
use crate::execution::{ExecutionAction, Executor, OrderProtocol, PositionBook, QuoteFeed};
use crate::market::{ClosingPriceBook, MarketSession};
use crate::models::{OrderSide, OrderTicket, Position, Quote};
use crate::persistence::DailyStore;
use crate::risk::BudgetCalculator;

/// Everything that belongs to one exchange-local trading date
#[derive(Debug, Clone)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub positions: PositionBook,
    pub closing_prices: ClosingPriceBook,
    /// Traded prices seen during the current cycle
    pub last_prices: HashMap<String, f64>,
    /// Set once the day's positions have been loaded from the store
    pub restored: bool,
}

impl TradingDay {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            positions: PositionBook::new(date),
            closing_prices: ClosingPriceBook::new(date),
            last_prices: HashMap::new(),
            restored: false,
        }
    }

    pub fn reset_for_new_day(&mut self, date: NaiveDate) {
        tracing::info!("📅 New trading day {} (was {})", date, self.date);
        self.date = date;
        self.positions.reset_for_new_day(date);
        self.closing_prices.reset_for_new_day(date);
        self.last_prices.clear();
        self.restored = false;
    }
}

/// What happened during one polling cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Set when the whole cycle was skipped
    pub skipped: Option<String>,
    pub quotes: usize,
    pub buys: usize,
    pub rejected: usize,
    pub sells: usize,
    pub failed_sells: usize,
    pub errors: usize,
}

impl CycleReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Runs polling cycles against a broker gateway and a daily store
pub struct TradingEngine<G, S, I> {
    gateway: G,
    store: S,
    inputs: I,
    session: MarketSession,
    feed: QuoteFeed,
    orders: OrderProtocol,
    day: TradingDay,
}

impl<G, S, I> TradingEngine<G, S, I>
where
    G: BrokerGateway,
    S: DailyStore,
    I: TradingInputs,
{
    pub fn new(
        gateway: G,
        store: S,
        inputs: I,
        session: MarketSession,
        warmup_delay: Duration,
    ) -> Self {
        let day = TradingDay::new(session.trading_date(Utc::now()));
        Self {
            gateway,
            store,
            inputs,
            session,
            feed: QuoteFeed::new(warmup_delay),
            orders: OrderProtocol::new(),
            day,
        }
    }

    pub fn day(&self) -> &TradingDay {
        &self.day
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn inputs(&self) -> &I {
        &self.inputs
    }

    /// Load the day's open and closed positions from the store
    pub async fn restore_day(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let date = self.session.trading_date(now);
        let open = self.store.load_positions(date).await?;
        let closed = self.store.load_closed_positions(date).await?;

        self.day = TradingDay::new(date);
        self.day.positions = PositionBook::with_positions(date, open, closed);
        self.day.restored = true;
        Ok(())
    }

    /// One pass over the day's company list
    ///
    /// Never fails: anything that goes wrong is logged and counted, and the
    /// loop carries on with the next ticker or the next cycle.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let date = self.session.trading_date(now);
        if date != self.day.date {
            self.day.reset_for_new_day(date);
            self.feed.reset_for_new_day();
        }

        // Never trade on a book that has not been loaded for the day
        if !self.day.restored {
            if let Err(e) = self.restore_day(now).await {
                tracing::error!("❌ Cannot restore positions for {}, skipping cycle: {}", date, e);
                return CycleReport::skipped(format!("store unavailable: {}", e));
            }
        }
        self.day.last_prices.clear();

        if let Err(e) = self.store.ping().await {
            tracing::error!("❌ Store unreachable, skipping cycle: {}", e);
            return CycleReport::skipped(format!("store unavailable: {}", e));
        }

        let settings = match self.inputs.trading_settings() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("❌ Cannot read trading settings, skipping cycle: {}", e);
                return CycleReport::skipped(format!("settings unavailable: {}", e));
            }
        };

        let tickers = match self.inputs.company_list(date) {
            Ok(tickers) => tickers,
            Err(e) => {
                tracing::error!("❌ Cannot read company list, skipping cycle: {}", e);
                return CycleReport::skipped(format!("company list unavailable: {}", e));
            }
        };

        let executor = Executor::new(BudgetCalculator::new(&settings));
        let closing_window = self.session.in_closing_window(now);
        let regular_hours = self.session.is_regular_hours(now);
        let mut report = CycleReport::default();

        tracing::info!(
            "🔄 Cycle {} - {} tickers, {} open positions{}",
            self.session.local_time(now).format("%Y-%m-%d %H:%M:%S %Z"),
            tickers.len(),
            self.day.positions.open_count(),
            if closing_window { " (closing window)" } else { "" }
        );

        for ticker in &tickers {
            let no_new_buys = closing_window || !regular_hours;
            self.process_ticker(ticker, &executor, now, no_new_buys, &mut report)
                .await;
        }

        if closing_window {
            self.liquidate_all(now, &mut report).await;
        }

        for line in self.day.positions.summary(&self.day.last_prices) {
            tracing::info!("📊 {}", line);
        }
        tracing::info!(
            "Cycle done: {} quotes, {} buys, {} rejected, {} sells, {} failed sells, {} errors",
            report.quotes,
            report.buys,
            report.rejected,
            report.sells,
            report.failed_sells,
            report.errors
        );

        report
    }

    async fn process_ticker(
        &mut self,
        ticker: &str,
        executor: &Executor,
        now: DateTime<Utc>,
        no_new_buys: bool,
        report: &mut CycleReport,
    ) {
        let quote = match self
            .feed
            .fetch_quote(&self.gateway, ticker, &self.session, now)
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(ticker = %ticker, "Quote failed: {}", e);
                report.errors += 1;
                return;
            }
        };
        report.quotes += 1;

        if let Some(price) = quote.last_price {
            self.day.last_prices.insert(ticker.to_string(), price);
        }

        let closing_price = match self.day.closing_prices.resolve(&quote, &self.store).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(ticker = %ticker, "Closing price lookup failed: {}", e);
                report.errors += 1;
                return;
            }
        };

        if no_new_buys {
            return;
        }

        let decision = executor.evaluate(&quote, closing_price, &self.day.positions);
        tracing::debug!(ticker = %ticker, "{:?}: {}", decision.band, decision.reason);

        let ExecutionAction::Buy {
            quantity,
            price,
            stop_loss_price,
            take_profit_price,
        } = decision.action
        else {
            return;
        };

        tracing::info!(ticker = %ticker, "🎯 Buy signal: {}", decision.reason);

        let ticket = OrderTicket::market(quote.conid, OrderSide::Buy, quantity);
        let result = self.orders.place_order(&self.gateway, &ticket).await;
        if !result.success {
            report.rejected += 1;
            return;
        }

        let position = Position {
            ticker: ticker.to_string(),
            conid: quote.conid,
            quantity,
            buy_price: price,
            buy_date: now,
            stop_loss_price,
            take_profit_price,
        };

        if let Err(e) = self.store.save_position(self.day.date, &position).await {
            tracing::error!(ticker = %ticker, "Position bought but not persisted: {}", e);
        }
        self.day.positions.open_position(position);
        report.buys += 1;
    }

    /// Market-sell every open position; failures stay open for the next pass
    async fn liquidate_all(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        let open: Vec<Position> = self.day.positions.open_positions().cloned().collect();
        if open.is_empty() {
            return;
        }

        tracing::info!("🔔 Closing window: liquidating {} positions", open.len());

        for position in open {
            let ticket = OrderTicket::market(position.conid, OrderSide::Sell, position.quantity);
            let result = self.orders.place_order(&self.gateway, &ticket).await;
            if !result.success {
                tracing::warn!(
                    ticker = %position.ticker,
                    "Sell failed, will retry next cycle: {}",
                    result.error.unwrap_or_default()
                );
                report.failed_sells += 1;
                continue;
            }

            let sell_price = self.sell_price(&position, now).await;
            let Some(record) = self.day.positions.realize(&position.ticker, sell_price) else {
                continue;
            };
            report.sells += 1;

            if let Err(e) = self.store.append_closed_position(self.day.date, &record).await {
                tracing::error!(ticker = %position.ticker, "Closed record not persisted: {}", e);
            }
            if let Err(e) = self.store.remove_position(self.day.date, &position.ticker).await {
                tracing::error!(ticker = %position.ticker, "Open position not removed from store: {}", e);
            }
        }
    }

    /// Price used to book a sale: this cycle's quote, a fresh quote, or the buy price
    async fn sell_price(&mut self, position: &Position, now: DateTime<Utc>) -> f64 {
        if let Some(price) = self.day.last_prices.get(&position.ticker) {
            return *price;
        }

        match self
            .feed
            .fetch_quote(&self.gateway, &position.ticker, &self.session, now)
            .await
        {
            Ok(Quote {
                last_price: Some(price),
                ..
            }) => price,
            _ => {
                tracing::warn!(
                    ticker = %position.ticker,
                    "No price available, booking sale at buy price ${:.2}",
                    position.buy_price
                );
                position.buy_price
            }
        }
    }
}
