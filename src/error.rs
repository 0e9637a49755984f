use thiserror::Error;

/// Errors raised when constructing rate limiters
///
/// Admission checks themselves never fail; only a limiter built from an
/// impossible configuration is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("max_tokens must be greater than zero")]
    ZeroCapacity,

    #[error("refill_interval must be greater than zero")]
    ZeroRefillInterval,
}

/// Errors that can occur when registering alert rules
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Rule '{0}' is already registered")]
    DuplicateRule(String),

    #[error("Rule '{rule}' uses unsupported condition type '{condition}'")]
    UnsupportedCondition { rule: String, condition: String },

    #[error("Rule '{0}' has a non-finite threshold")]
    InvalidThreshold(String),

    #[error("Rule name must not be empty")]
    EmptyName,
}

/// Errors that can occur when delivering alerts to notification channels
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Notification channel rejected the alert with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid channel configuration: {0}")]
    InvalidChannel(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid rule: {0}")]
    RuleError(#[from] RuleError),

    #[error("Invalid rate limit: {0}")]
    LimiterError(#[from] LimiterError),
}
