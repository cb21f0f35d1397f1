//! Market data snapshot normalization
//!
//! The gateway answers `iserver/marketdata/snapshot` with a flat object keyed
//! by numeric field codes. Values arrive as strings (sometimes with a one-letter
//! provenance prefix) or numbers, and any of them may be missing.

use super::MarketSession;
use crate::models::{round2, PriceType, Quote};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const FIELD_LAST_PRICE: &str = "31";
pub const FIELD_CHANGE: &str = "82";
pub const FIELD_CHANGE_PERCENT: &str = "83";
pub const FIELD_BID: &str = "84";
pub const FIELD_ASK: &str = "86";
pub const FIELD_VOLUME: &str = "87";
pub const FIELD_VOLUME_RAW: &str = "87_raw";
pub const FIELD_MARKET_DATA_AVAILABILITY: &str = "6509";
pub const FIELD_UPDATED: &str = "_updated";

/// Fields requested on every snapshot call
pub const SNAPSHOT_FIELDS: &[&str] = &[
    FIELD_LAST_PRICE,
    FIELD_CHANGE,
    FIELD_CHANGE_PERCENT,
    FIELD_BID,
    FIELD_ASK,
    FIELD_VOLUME,
    FIELD_MARKET_DATA_AVAILABILITY,
];

const CLOSING_PRICE_PREFIX: char = 'C';
const OPENING_PRICE_PREFIX: char = 'O';
const DELAYED_PAST_CLOSE_CODE: &str = "DPB";

/// True when the snapshot carries any market data beyond the contract id.
/// The first call after subscribing usually does not.
pub fn has_market_data(raw: &Map<String, Value>) -> bool {
    SNAPSHOT_FIELDS.iter().any(|field| raw.contains_key(*field))
}

/// Build a `Quote` from raw snapshot fields. Never fails; unparseable values
/// are left as `None`.
pub fn normalize_snapshot(
    ticker: &str,
    conid: i64,
    raw: &Map<String, Value>,
    session: &MarketSession,
    now: DateTime<Utc>,
) -> Quote {
    let mut quote = Quote::empty(ticker, conid);

    quote.exchange_code = raw
        .get(FIELD_MARKET_DATA_AVAILABILITY)
        .and_then(Value::as_str)
        .map(str::to_string);
    if quote.exchange_code.as_deref() == Some(DELAYED_PAST_CLOSE_CODE) {
        quote.is_market_closed = true;
    }

    if let Some(value) = raw.get(FIELD_LAST_PRICE) {
        apply_last_price(value, &mut quote);
    }

    apply_change_from_close(raw, &mut quote);

    quote.bid = raw.get(FIELD_BID).and_then(value_as_f64);
    quote.ask = raw.get(FIELD_ASK).and_then(value_as_f64);
    quote.volume = raw.get(FIELD_VOLUME).and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    quote.volume_raw = raw.get(FIELD_VOLUME_RAW).and_then(value_as_f64);
    quote.timestamp = raw
        .get(FIELD_UPDATED)
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    if let (Some(bid), Some(ask)) = (quote.bid, quote.ask) {
        let (spread, spread_percent) = calculate_spread(bid, ask);
        quote.spread = Some(spread);
        quote.spread_percent = spread_percent;
    }

    // A last-trade print during regular hours means the market is open,
    // whatever flag came with it.
    if session.is_regular_hours(now) && quote.price_type == Some(PriceType::LastTrade) {
        quote.is_market_closed = false;
    }

    quote
}

fn apply_last_price(value: &Value, quote: &mut Quote) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return;
            }

            if let Some(rest) = s.strip_prefix(CLOSING_PRICE_PREFIX) {
                quote.price_type = Some(PriceType::ClosingPrice);
                quote.is_market_closed = true;
                quote.last_price = parse_number(rest);
            } else if let Some(rest) = s.strip_prefix(OPENING_PRICE_PREFIX) {
                quote.price_type = Some(PriceType::OpeningPrice);
                quote.last_price = parse_number(rest);
            } else {
                quote.price_type = Some(PriceType::LastTrade);
                quote.last_price = parse_number(s);
            }

            if quote.last_price.is_none() {
                tracing::warn!(ticker = %quote.ticker, "Unparseable last price {:?}", s);
            }
        }
        Value::Number(n) => {
            quote.price_type = Some(PriceType::LastTrade);
            quote.last_price = n.as_f64();
        }
        _ => {}
    }
}

fn apply_change_from_close(raw: &Map<String, Value>, quote: &mut Quote) {
    quote.change_from_close_percent = raw.get(FIELD_CHANGE_PERCENT).and_then(value_as_f64);

    let Some(change) = raw.get(FIELD_CHANGE).and_then(value_as_f64) else {
        return;
    };
    quote.change_from_close = Some(change);

    if let Some(last) = quote.last_price {
        quote.previous_close = Some(round2(last - change));
    }
}

/// Spread in price units and as a percent of the bid
pub fn calculate_spread(bid: f64, ask: f64) -> (f64, Option<f64>) {
    let spread = round2(ask - bid);
    let spread_percent = if bid > 0.0 {
        Some(round2(spread / bid * 100.0))
    } else {
        None
    };
    (spread, spread_percent)
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned = s.trim().trim_start_matches('+').replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// One-line human readable quote, e.g.
/// `AAPL OPEN - Price: $150.25 (Last Trade), Bid: $150.2, Ask: $150.3 | Spread: $0.1 (0.07%) | Vol: 1.2M`
pub fn format_quote_line(quote: &Quote) -> String {
    let status = if quote.is_market_closed { "CLOSED" } else { "OPEN" };

    let price_info = match (quote.last_price, quote.price_type) {
        (Some(price), Some(kind)) => format!("${} ({})", price, kind),
        (Some(price), None) => format!("${}", price),
        (None, _) => "N/A".to_string(),
    };
    let bid_info = quote
        .bid
        .map(|b| format!("${}", b))
        .unwrap_or_else(|| "N/A".to_string());
    let ask_info = quote
        .ask
        .map(|a| format!("${}", a))
        .unwrap_or_else(|| "N/A".to_string());
    let spread_info = match (quote.spread, quote.spread_percent) {
        (Some(spread), Some(pct)) => format!(" | Spread: ${} ({}%)", spread, pct),
        (Some(spread), None) => format!(" | Spread: ${}", spread),
        _ => String::new(),
    };
    let volume_info = quote
        .volume
        .as_ref()
        .map(|v| format!(" | Vol: {}", v))
        .unwrap_or_default();

    format!(
        "{} {} - Price: {}, Bid: {}, Ask: {}{}{}",
        quote.ticker, status, price_info, bid_info, ask_info, spread_info, volume_info
    )
}
