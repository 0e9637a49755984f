use crate::events::{Severity, Timestamp};
use crate::rules::{AlertRule, Condition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Label set attached to an alert, kept sorted for stable dedup keys
pub type Labels = BTreeMap<String, String>;

/// Rendering of an empty label set inside a dedup key
pub const NO_LABELS: &str = "none";

/// Lifecycle state of an alert
///
/// Alerts are always created `Firing`. `Silenced` is reserved; nothing
/// transitions into it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
    Silenced,
}

/// What created an alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    /// Threshold rule evaluated by `check_threshold`
    Rule,
    /// Direct `fire_*` call from application code
    Manual,
}

/// One ongoing or historical rule violation or reported event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Generated identifier, unique per created alert
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub source: AlertSource,
    pub component: String,
    pub service: String,
    pub environment: String,
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    /// Last observed value
    pub value: f64,
    pub threshold: f64,
    pub fired_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
    pub last_seen: Timestamp,
    /// Number of violations folded into this alert, at least 1
    pub count: u64,
    pub details: HashMap<String, serde_json::Value>,
}

/// Render labels as a deterministic `k=v,k=v` string
///
/// Returns [`NO_LABELS`] for an empty set. `\`, `=`, `,` and `:` inside keys
/// and values are backslash-escaped, so distinct label sets never share a
/// rendering.
pub fn canonicalize_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return NO_LABELS.to_string();
    }
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", escape_label(k), escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_label(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '=' | ',' | ':') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Deduplication key identifying one logical alert instance
pub fn dedup_key(name: &str, labels: &Labels) -> String {
    format!("{}:{}", name, canonicalize_labels(labels))
}

impl Alert {
    /// Create a firing alert for a rule violation
    pub fn from_rule(
        rule: &AlertRule,
        value: f64,
        labels: Labels,
        service: &str,
        environment: &str,
        now: Timestamp,
    ) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert("metric".to_string(), rule.condition.metric().to_string());
        if let Condition::Threshold {
            operator,
            threshold,
            ..
        } = &rule.condition
        {
            annotations.insert(
                "condition".to_string(),
                format!(
                    "{} {} {}",
                    rule.condition.metric(),
                    operator.symbol(),
                    threshold
                ),
            );
        }
        if !rule.duration.is_zero() {
            annotations.insert(
                "for".to_string(),
                humantime_serde::re::humantime::format_duration(rule.duration).to_string(),
            );
        }

        Self {
            id: Uuid::new_v4().to_string(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            severity: rule.severity,
            status: AlertStatus::Firing,
            source: AlertSource::Rule,
            component: rule.component.clone(),
            service: service.to_string(),
            environment: environment.to_string(),
            labels,
            annotations,
            value,
            threshold: rule.condition.threshold_value(),
            fired_at: now,
            resolved_at: None,
            last_seen: now,
            count: 1,
            details: HashMap::new(),
        }
    }

    /// Create a firing alert reported directly by application code
    #[allow(clippy::too_many_arguments)]
    pub fn manual(
        name: &str,
        description: &str,
        severity: Severity,
        component: &str,
        labels: Labels,
        details: HashMap<String, serde_json::Value>,
        service: &str,
        environment: &str,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            severity,
            status: AlertStatus::Firing,
            source: AlertSource::Manual,
            component: component.to_string(),
            service: service.to_string(),
            environment: environment.to_string(),
            labels,
            annotations: BTreeMap::new(),
            value: 0.0,
            threshold: 0.0,
            fired_at: now,
            resolved_at: None,
            last_seen: now,
            count: 1,
            details,
        }
    }

    /// Deduplication key of this alert
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.name, &self.labels)
    }

    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }
}
