use thiserror::Error;

/// Failures talking to the broker gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode gateway response: {0}")]
    Decode(String),

    #[error("no contract found for {0}")]
    ContractNotFound(String),

    #[error("no brokerage account available")]
    NoAccount,
}

/// Failures reading or writing the day-scoped store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store call timed out after {0}s")]
    Timeout(u64),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Settings, company list and application config problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),

    #[error("unknown exchange timezone {0}")]
    Timezone(String),

    #[error("invalid session time {0}, expected HH:MM")]
    SessionTime(String),

    #[error("closing window of {0} minutes does not fit inside the session")]
    ClosingWindow(i64),
}
