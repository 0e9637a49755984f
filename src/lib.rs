/// Error types for limiting, rules, notifications and configuration
pub mod error;

/// Shared severity and timestamp types
pub mod events;

/// Time source abstraction
pub mod clock;

/// Per-key token-bucket rate limiting
pub mod ratelimit;

/// Alert rules and conditions
pub mod rules;

/// Alert model and alert manager
pub mod alerts;

/// Notification channels and dispatch
pub mod notify;

/// Notification delivery statistics
pub mod monitoring;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use alerts::{Alert, AlertManager, AlertStatus};
pub use config::Config;
pub use error::{AlertError, ConfigError, LimiterError, RuleError};
pub use events::Severity;
pub use ratelimit::{LimiterRegistry, RateLimits, TokenBucket};
pub use rules::{AlertRule, Condition, Operator};
