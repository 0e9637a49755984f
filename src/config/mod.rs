//! TOML configuration for alerting, rate limits, rules and receivers
//!
//! Every section is optional; an empty file yields the built-in defaults.

use crate::alerts::AlertManager;
use crate::clock::{Clock, SystemClock};
use crate::error::{AlertError, ConfigError, RuleError};
use crate::notify::dispatcher::DEFAULT_MAX_IN_FLIGHT;
use crate::notify::{
    ChatChannel, NotificationChannel, NotificationDispatcher, WebhookChannel, DEFAULT_TIMEOUT,
};
use crate::ratelimit::{LimitSettings, RateLimitSettings, RateLimits};
use crate::rules::AlertRule;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub alerting: AlertingSettings,
    pub rate_limits: RateLimitSettings,
    /// Alert rules; the built-in set is used when empty
    pub rules: Vec<AlertRule>,
    pub receivers: Vec<ReceiverConfig>,
}

/// `[alerting]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingSettings {
    /// Service name stamped on every alert
    pub service: String,
    pub environment: String,
    pub enabled: bool,
    /// Upper bound on concurrently running notification deliveries
    pub max_in_flight_notifications: usize,
}

impl Default for AlertingSettings {
    fn default() -> Self {
        Self {
            service: "tradeguard".to_string(),
            environment: "development".to_string(),
            enabled: true,
            max_in_flight_notifications: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// One `[[receivers]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReceiverConfig {
    /// Raw alert JSON POSTed to `url`
    Webhook {
        name: String,
        url: String,
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Formatted message POSTed to a chat incoming webhook
    Chat {
        name: String,
        url: String,
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
        #[serde(default)]
        channel: Option<String>,
    },
}

impl ReceiverConfig {
    pub fn name(&self) -> &str {
        match self {
            ReceiverConfig::Webhook { name, .. } | ReceiverConfig::Chat { name, .. } => name,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ReceiverConfig::Webhook { url, .. } | ReceiverConfig::Chat { url, .. } => url,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReceiverConfig::Webhook { .. } => "webhook",
            ReceiverConfig::Chat { .. } => "chat",
        }
    }

    /// Build the channel this entry describes
    pub fn build(&self) -> Result<Arc<dyn NotificationChannel>, AlertError> {
        let channel: Arc<dyn NotificationChannel> = match self {
            ReceiverConfig::Webhook {
                name,
                url,
                timeout,
                headers,
            } => Arc::new(
                WebhookChannel::with_timeout(
                    name.as_str(),
                    url.as_str(),
                    timeout.unwrap_or(DEFAULT_TIMEOUT),
                )?
                .with_headers(headers.clone()),
            ),
            ReceiverConfig::Chat {
                name,
                url,
                timeout,
                channel,
            } => {
                let chat = ChatChannel::with_timeout(
                    name.as_str(),
                    url.as_str(),
                    timeout.unwrap_or(DEFAULT_TIMEOUT),
                )?;
                match channel {
                    Some(channel) => Arc::new(chat.with_channel(channel.as_str())),
                    None => Arc::new(chat),
                }
            }
        };
        Ok(channel)
    }
}

impl Config {
    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// * `ConfigError::TomlError` if the text is not valid for the schema
    /// * `ConfigError::ValidationError` / `RuleError` if values are invalid
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, otherwise
    /// any error from [`Config::parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Load configuration, falling back to defaults when no usable file exists
    ///
    /// A missing or unreadable file is logged and replaced by
    /// [`Config::default`]. A file that exists but is invalid is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Self::from_file(path) {
                    Err(ConfigError::ReadError(reason)) => {
                        warn!("Configuration file unreadable ({}), using defaults", reason);
                        Ok(Self::default())
                    }
                    other => other,
                }
            }
            None => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Check every value that deserialization alone cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alerting.service.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "alerting.service cannot be empty".to_string(),
            ));
        }
        if self.alerting.max_in_flight_notifications == 0 {
            return Err(ConfigError::ValidationError(
                "alerting.max_in_flight_notifications must be greater than zero".to_string(),
            ));
        }

        let limits = &self.rate_limits;
        validate_limit("rate_limits.api", &limits.api)?;
        validate_limit("rate_limits.auth", &limits.auth)?;
        validate_limit("rate_limits.high_value", &limits.high_value)?;
        if limits.idle_eviction == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationError(
                "rate_limits.idle_eviction must be non-zero".to_string(),
            ));
        }

        let mut rule_names = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !rule_names.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule(rule.name.clone()).into());
            }
        }

        let mut receiver_names = HashSet::new();
        for receiver in &self.receivers {
            if receiver.name().trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} receiver name cannot be empty",
                    receiver.kind()
                )));
            }
            if receiver.url().trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "receiver {} has an empty url",
                    receiver.name()
                )));
            }
            if !receiver_names.insert(receiver.name()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate receiver name: {}",
                    receiver.name()
                )));
            }
        }

        Ok(())
    }

    /// Rules in effect: the configured ones, or the built-in set if none
    pub fn effective_rules(&self) -> Vec<AlertRule> {
        if self.rules.is_empty() {
            AlertRule::defaults()
        } else {
            self.rules.clone()
        }
    }

    /// Build an alert manager with the configured rules and receivers
    pub fn build_manager(&self) -> Result<AlertManager, ConfigError> {
        self.build_manager_with_clock(Arc::new(SystemClock))
    }

    /// Build an alert manager that reads time from `clock`
    pub fn build_manager_with_clock(
        &self,
        clock: Arc<dyn Clock>,
    ) -> Result<AlertManager, ConfigError> {
        let alerting = &self.alerting;
        let mut manager = AlertManager::with_clock(
            alerting.service.as_str(),
            alerting.environment.as_str(),
            clock,
        )
        .with_dispatcher(NotificationDispatcher::new(
            alerting.max_in_flight_notifications,
        ));

        for receiver in &self.receivers {
            let channel = receiver.build().map_err(|e| {
                ConfigError::ValidationError(format!("receiver {}: {}", receiver.name(), e))
            })?;
            manager = manager.with_receiver(channel);
        }

        manager.add_rules(self.effective_rules())?;
        manager.set_enabled(alerting.enabled);
        Ok(manager)
    }

    /// Build the per-call-site limiter registries
    ///
    /// When `rate_limits.idle_eviction` is set and a tokio runtime is
    /// running, idle-eviction sweepers are started for every registry.
    pub fn build_rate_limits(&self) -> Result<RateLimits, ConfigError> {
        let limits = RateLimits::from_settings(&self.rate_limits)?;
        // Detached; each sweeper exits when its registry is dropped
        limits.start_eviction(self.rate_limits.idle_eviction);
        Ok(limits)
    }
}

fn validate_limit(section: &str, limit: &LimitSettings) -> Result<(), ConfigError> {
    if limit.max_tokens == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.max_tokens must be greater than zero",
            section
        )));
    }
    if limit.refill_interval.is_zero() {
        return Err(ConfigError::ValidationError(format!(
            "{}.refill_interval must be non-zero",
            section
        )));
    }
    Ok(())
}
