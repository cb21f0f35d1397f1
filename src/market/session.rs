use crate::config::AppConfig;
use crate::error::ConfigError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Regular trading session of the exchange, evaluated on its local clock
#[derive(Debug, Clone)]
pub struct MarketSession {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    closing_window: Duration,
}

impl MarketSession {
    pub fn new(timezone: Tz, open: NaiveTime, close: NaiveTime, closing_window: Duration) -> Self {
        Self {
            timezone,
            open,
            close,
            closing_window,
        }
    }

    /// NYSE/NASDAQ regular hours, 09:30-16:00 America/New_York
    pub fn new_york() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            Duration::minutes(10),
        )
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let timezone: Tz = config
            .exchange_timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(config.exchange_timezone.clone()))?;

        let open = parse_session_time(&config.market_open)?;
        let close = parse_session_time(&config.market_close)?;
        let minutes = config.closing_window_minutes;
        let closing_window = Duration::try_minutes(minutes)
            .filter(|window| minutes >= 0 && open < close && *window <= close - open)
            .ok_or(ConfigError::ClosingWindow(minutes))?;

        Ok(Self::new(timezone, open, close, closing_window))
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&self.timezone)
    }

    /// Calendar date on the exchange clock; day-scoped state is keyed by it
    pub fn trading_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_time(now).date_naive()
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.local_time(now).weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Strictly between the open and the close of a weekday session
    pub fn is_regular_hours(&self, now: DateTime<Utc>) -> bool {
        let time = self.local_time(now).time();
        self.is_trading_day(now) && time > self.open && time < self.close
    }

    /// Final minutes before the close, when open positions get flattened
    pub fn in_closing_window(&self, now: DateTime<Utc>) -> bool {
        let time = self.local_time(now).time();
        let window_start = self.close - self.closing_window;
        self.is_trading_day(now) && time >= window_start && time < self.close
    }
}

fn parse_session_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ConfigError::SessionTime(value.to_string()))
}
