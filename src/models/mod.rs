use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Round to cents, the precision every price and P/L figure is reported in
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Signed dollar amount, e.g. `+$45.00` or `-$3.10`
pub fn format_pnl(amount: f64) -> String {
    if amount >= 0.0 {
        format!("+${:.2}", amount)
    } else {
        format!("-${:.2}", amount.abs())
    }
}

/// Where the last price of a snapshot came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PriceType {
    LastTrade,
    OpeningPrice,
    ClosingPrice,
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceType::LastTrade => write!(f, "Last Trade"),
            PriceType::OpeningPrice => write!(f, "Opening Price"),
            PriceType::ClosingPrice => write!(f, "Closing Price"),
        }
    }
}

/// Canonical quote built from one market data snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub ticker: String,
    pub conid: i64,
    pub last_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub change_from_close: Option<f64>,
    pub change_from_close_percent: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<String>, // Display form, e.g. "1.25M"
    pub volume_raw: Option<f64>,
    pub spread: Option<f64>,
    pub spread_percent: Option<f64>,
    pub price_type: Option<PriceType>,
    pub is_market_closed: bool,
    pub exchange_code: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Quote {
    /// Quote with nothing but identity filled in
    pub fn empty(ticker: &str, conid: i64) -> Self {
        Self {
            ticker: ticker.to_string(),
            conid,
            last_price: None,
            previous_close: None,
            change_from_close: None,
            change_from_close_percent: None,
            bid: None,
            ask: None,
            volume: None,
            volume_raw: None,
            spread: None,
            spread_percent: None,
            price_type: None,
            is_market_closed: false,
            exchange_code: None,
            timestamp: None,
        }
    }
}

/// Reference close for a ticker on a trading date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosingPriceRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub closing_price: f64,
}

/// Shares held in one ticker, opened by a placed buy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub conid: i64,
    pub quantity: u32,
    pub buy_price: f64,
    pub buy_date: DateTime<Utc>,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
}

/// Realized position, appended once and never touched again
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedPositionRecord {
    pub symbol: String,
    pub buy_date: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: u32,
    pub profit: f64,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum OrderType {
    Market,
    Limit(f64),
}

impl OrderType {
    /// Gateway code for the order type
    pub fn code(&self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::Limit(_) => "LMT",
        }
    }
}

/// Order as the engine asks for it, before an account is attached
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub conid: i64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: u32,
}

impl OrderTicket {
    pub fn market(conid: i64, side: OrderSide, quantity: u32) -> Self {
        Self {
            conid,
            side,
            order_type: OrderType::Market,
            quantity,
        }
    }
}
