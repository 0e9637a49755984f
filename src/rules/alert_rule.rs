//! Declarative alert rules
//!
//! A rule pairs a [`Condition`] with scheduling metadata. Rules are built
//! once from configuration; `last_triggered` is the only field the alert
//! manager changes at runtime.

use crate::error::RuleError;
use crate::events::{Severity, Timestamp};
use crate::rules::{Condition, Operator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default minimum interval between evaluations of the same rule
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Threshold rule evaluated against incoming metric samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name, also the name of alerts it fires
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    /// Subsystem the rule watches (api, database, auth, ...)
    #[serde(default)]
    pub component: String,
    pub condition: Condition,
    /// Informational dwell time, not enforced by the evaluator
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
    /// Minimum interval between successive evaluations once the rule has fired
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_deserializing)]
    pub last_triggered: Option<Timestamp>,
}

fn default_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Create an enabled rule with a threshold condition and default cooldown
    ///
    /// # Arguments
    ///
    /// * `name` - Unique rule name
    /// * `metric` - Metric the rule watches
    /// * `operator` - Comparison between sample and threshold
    /// * `threshold` - Value the sample is compared against
    pub fn threshold(
        name: impl Into<String>,
        metric: impl Into<String>,
        operator: Operator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            severity: Severity::Warning,
            component: String::new(),
            condition: Condition::threshold(metric, operator, threshold),
            duration: Duration::ZERO,
            cooldown: DEFAULT_COOLDOWN,
            enabled: true,
            last_triggered: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check that the rule can be evaluated
    ///
    /// # Errors
    ///
    /// * `RuleError::EmptyName` if the name is blank
    /// * `RuleError::UnsupportedCondition` for `change` and `absence` conditions
    /// * `RuleError::InvalidThreshold` for NaN or infinite thresholds
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::EmptyName);
        }
        if !self.condition.is_supported() {
            return Err(RuleError::UnsupportedCondition {
                rule: self.name.clone(),
                condition: self.condition.kind().to_string(),
            });
        }
        if !self.condition.threshold_value().is_finite() {
            return Err(RuleError::InvalidThreshold(self.name.clone()));
        }
        Ok(())
    }

    /// Whether the rule fired less than `cooldown` before `now`
    pub fn in_cooldown(&self, now: Timestamp) -> bool {
        match self.last_triggered {
            Some(last) => (now - last).to_std().unwrap_or_default() < self.cooldown,
            None => false,
        }
    }

    /// Built-in rule set for the trading platform backend
    pub fn defaults() -> Vec<AlertRule> {
        vec![
            AlertRule::threshold("HighErrorRate", "http_error_rate", Operator::Gt, 5.0)
                .with_description("HTTP 5xx error rate above 5%")
                .with_severity(Severity::Warning)
                .with_component("api")
                .with_duration(Duration::from_secs(5 * 60)),
            AlertRule::threshold("SlowResponses", "http_response_time_p95", Operator::Gt, 2.0)
                .with_description("95th percentile response time above 2 seconds")
                .with_severity(Severity::Warning)
                .with_component("api")
                .with_duration(Duration::from_secs(5 * 60))
                .with_cooldown(Duration::from_secs(10 * 60)),
            AlertRule::threshold("HighMemoryUsage", "memory_usage_percent", Operator::Gt, 85.0)
                .with_description("Process memory usage above 85%")
                .with_severity(Severity::Warning)
                .with_component("system")
                .with_cooldown(Duration::from_secs(30 * 60)),
            AlertRule::threshold(
                "DatabasePoolExhausted",
                "db_pool_utilization",
                Operator::Gte,
                95.0,
            )
            .with_description("Database connection pool nearly exhausted")
            .with_severity(Severity::Critical)
            .with_component("database")
            .with_cooldown(Duration::from_secs(5 * 60)),
            AlertRule::threshold("FailedLoginSpike", "failed_login_rate", Operator::Gt, 10.0)
                .with_description("More than 10 failed logins per minute")
                .with_severity(Severity::Critical)
                .with_component("auth")
                .with_cooldown(Duration::from_secs(5 * 60)),
            AlertRule::threshold(
                "RateLimitRejections",
                "rate_limit_rejections",
                Operator::Gt,
                100.0,
            )
            .with_description("More than 100 rate-limited requests per minute")
            .with_severity(Severity::Info)
            .with_component("api"),
            AlertRule::threshold("OrderRejectionRate", "order_rejection_rate", Operator::Gt, 2.0)
                .with_description("Order rejection rate above 2%")
                .with_severity(Severity::Warning)
                .with_component("trading"),
        ]
    }
}
