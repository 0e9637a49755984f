use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Comparison applied between an observed value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

impl Operator {
    /// Compare `value` against `threshold`
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => value == threshold,
            Operator::Ne => value != threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Eq => "eq",
            Operator::Ne => "ne",
        }
    }

    /// Mathematical symbol, used in human-readable alert text
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition under which a rule matches a metric sample
///
/// Only `threshold` conditions are evaluated. `change` and `absence` are
/// accepted by the configuration format but rejected when a rule using them
/// is registered with the alert manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    /// Compare each sample against a fixed threshold
    Threshold {
        metric: String,
        operator: Operator,
        threshold: f64,
    },
    /// Relative change of a metric between samples
    Change { metric: String, threshold: f64 },
    /// No sample for a metric within a window
    Absence {
        metric: String,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
}

impl Condition {
    /// Shorthand for a threshold condition
    pub fn threshold(metric: impl Into<String>, operator: Operator, threshold: f64) -> Self {
        Condition::Threshold {
            metric: metric.into(),
            operator,
            threshold,
        }
    }

    /// Metric this condition watches
    pub fn metric(&self) -> &str {
        match self {
            Condition::Threshold { metric, .. }
            | Condition::Change { metric, .. }
            | Condition::Absence { metric, .. } => metric,
        }
    }

    /// Condition type name as written in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Threshold { .. } => "threshold",
            Condition::Change { .. } => "change",
            Condition::Absence { .. } => "absence",
        }
    }

    /// Whether the evaluator implements this condition type
    pub fn is_supported(&self) -> bool {
        matches!(self, Condition::Threshold { .. })
    }

    /// Threshold value, or zero for condition types without one
    pub fn threshold_value(&self) -> f64 {
        match self {
            Condition::Threshold { threshold, .. } | Condition::Change { threshold, .. } => {
                *threshold
            }
            Condition::Absence { .. } => 0.0,
        }
    }

    /// Check a sample against this condition
    ///
    /// Non-finite samples are treated as non-numeric and never match.
    /// Unsupported condition types never match.
    pub fn evaluate(&self, value: f64) -> bool {
        match self {
            Condition::Threshold {
                operator,
                threshold,
                ..
            } => value.is_finite() && threshold.is_finite() && operator.compare(value, *threshold),
            Condition::Change { .. } | Condition::Absence { .. } => false,
        }
    }
}
