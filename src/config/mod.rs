use crate::error::ConfigError;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const DEFAULT_STOP_LOSS_PCT: f64 = 2.0;
const DEFAULT_TAKE_PROFIT_PCT: f64 = 5.0;
const COMPANY_LIST_FILE: &str = "selected_companies.txt";

/// Application configuration
///
/// Layered from an optional TOML file and `DAYTRADER__*` environment
/// variables, e.g. `DAYTRADER__REDIS_URL=redis://cache:6379`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Client Portal gateway base URL
    pub gateway_url: String,
    /// The local gateway ships a self-signed certificate
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
    pub poll_interval_secs: u64,
    /// Delay before the second snapshot call of a fresh subscription
    pub snapshot_warmup_ms: u64,
    pub redis_url: String,
    pub store_timeout_secs: u64,
    /// Root of the day-partitioned input files (`{files_dir}/YYYY/MM/DD/...`)
    pub files_dir: PathBuf,
    pub settings_path: PathBuf,
    pub exchange_timezone: String,
    pub market_open: String,
    pub market_close: String,
    pub closing_window_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://localhost:5001/v1/api".to_string(),
            accept_invalid_certs: true,
            request_timeout_secs: 15,
            requests_per_second: 10,
            poll_interval_secs: 60,
            snapshot_warmup_ms: 1000,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_timeout_secs: 5,
            files_dir: PathBuf::from("./files"),
            settings_path: PathBuf::from("./files/settings.json"),
            exchange_timezone: "America/New_York".to_string(),
            market_open: "09:30".to_string(),
            market_close: "16:00".to_string(),
            closing_window_minutes: 10,
        }
    }
}

impl AppConfig {
    /// Load config from `{path}.toml` (if present) and the environment
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("DAYTRADER").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Account-level trading settings (`settings.json`)
///
/// Individual fields that are missing or malformed fall back to defaults
/// rather than failing the load.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingSettings {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub next_investment: f64,
    pub ops_per_day: u32,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            next_investment: 0.0,
            ops_per_day: 0,
        }
    }
}

impl TradingSettings {
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();

        let stop_loss_pct = non_negative_field(value, "stopLoss").unwrap_or(defaults.stop_loss_pct);
        let take_profit_pct =
            non_negative_field(value, "takeProfit").unwrap_or(defaults.take_profit_pct);
        let next_investment = non_negative_field(value, "nextInvestment").unwrap_or(0.0);
        let ops_per_day = non_negative_field(value, "opsPerDay")
            .map(|ops| ops.floor().min(u32::MAX as f64) as u32)
            .unwrap_or(0);

        Self {
            stop_loss_pct,
            take_profit_pct,
            next_investment,
            ops_per_day,
        }
    }

    /// Read the settings file. A missing or non-JSON file is an error; the
    /// caller must not trade on an unknown budget.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let settings = Self::from_value(&value);
        tracing::debug!(?settings, "Loaded trading settings");
        Ok(settings)
    }
}

fn non_negative_field(value: &Value, key: &str) -> Option<f64> {
    let raw = value.get(key)?;
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => {
            tracing::warn!("Ignoring malformed setting {}: {}", key, raw);
            None
        }
    }
}

/// Path of the company list for a trading date
pub fn company_list_path(files_dir: &Path, date: NaiveDate) -> PathBuf {
    files_dir
        .join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(date.format("%d").to_string())
        .join(COMPANY_LIST_FILE)
}

/// Parse a newline-separated ticker list, skipping blank lines
pub fn parse_company_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Source of the per-cycle inputs the engine does not own
pub trait TradingInputs {
    fn trading_settings(&self) -> Result<TradingSettings, ConfigError>;
    fn company_list(&self, date: NaiveDate) -> Result<Vec<String>, ConfigError>;
}

/// Inputs read from the local files directory, refreshed externally each day
#[derive(Debug, Clone)]
pub struct FileInputs {
    pub files_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl FileInputs {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            files_dir: config.files_dir.clone(),
            settings_path: config.settings_path.clone(),
        }
    }
}

impl TradingInputs for FileInputs {
    fn trading_settings(&self) -> Result<TradingSettings, ConfigError> {
        TradingSettings::load(&self.settings_path)
    }

    fn company_list(&self, date: NaiveDate) -> Result<Vec<String>, ConfigError> {
        let path = company_list_path(&self.files_dir, date);
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(parse_company_list(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_from_complete_payload() {
        let settings = TradingSettings::from_value(&json!({
            "stopLoss": 3.0,
            "takeProfit": 6.5,
            "nextInvestment": 5000,
            "opsPerDay": 5
        }));

        assert_eq!(settings.stop_loss_pct, 3.0);
        assert_eq!(settings.take_profit_pct, 6.5);
        assert_eq!(settings.next_investment, 5000.0);
        assert_eq!(settings.ops_per_day, 5);
    }

    #[test]
    fn test_settings_accept_numeric_strings() {
        let settings = TradingSettings::from_value(&json!({
            "stopLoss": "1.5",
            "nextInvestment": " 2000 ",
            "opsPerDay": "4"
        }));

        assert_eq!(settings.stop_loss_pct, 1.5);
        assert_eq!(settings.take_profit_pct, 5.0);
        assert_eq!(settings.next_investment, 2000.0);
        assert_eq!(settings.ops_per_day, 4);
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let settings = TradingSettings::from_value(&json!({
            "stopLoss": "abc",
            "takeProfit": null,
            "nextInvestment": -100,
            "opsPerDay": [1, 2]
        }));

        assert_eq!(settings, TradingSettings::default());
    }

    #[test]
    fn test_non_object_payload_gives_defaults() {
        assert_eq!(
            TradingSettings::from_value(&json!("nonsense")),
            TradingSettings::default()
        );
    }

    #[test]
    fn test_missing_settings_file_is_an_error() {
        let result = TradingSettings::load(Path::new("/nonexistent/settings.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_company_list_path_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let path = company_list_path(Path::new("files"), date);
        assert_eq!(path, PathBuf::from("files/2025/03/07/selected_companies.txt"));
    }

    #[test]
    fn test_parse_company_list() {
        let tickers = parse_company_list("AAPL\n\n  MSFT \r\nAEVA\n");
        assert_eq!(tickers, vec!["AAPL", "MSFT", "AEVA"]);
    }

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.exchange_timezone, "America/New_York");
        assert_eq!(config.closing_window_minutes, 10);
        assert!(config.request_timeout_secs > 0);
    }
}
