use crate::alerts::alert::{dedup_key, Alert, AlertStatus, Labels};
use crate::clock::{Clock, SystemClock};
use crate::error::RuleError;
use crate::events::{Severity, Timestamp};
use crate::monitoring::DeliveryStats;
use crate::notify::{NotificationChannel, NotificationDispatcher};
use crate::rules::AlertRule;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Event-type keywords that make a security alert critical
const CRITICAL_SECURITY_KEYWORDS: &[&str] = &[
    "breach",
    "compromise",
    "unauthorized",
    "injection",
    "privilege",
    "fraud",
    "tamper",
];

/// Event-type keywords that make a security alert a warning
const WARNING_SECURITY_KEYWORDS: &[&str] = &[
    "failed_login",
    "brute",
    "suspicious",
    "lockout",
    "invalid_token",
    "rate_limit",
];

/// Performance alerts above this multiple of their threshold are critical
const PERFORMANCE_CRITICAL_FACTOR: f64 = 1.5;

/// Evaluates rules against metric samples and tracks the resulting alerts
///
/// All rule and alert bookkeeping happens under one lock, so every
/// evaluate-and-mutate step is atomic with respect to other callers.
/// Notifications are handed to the [`NotificationDispatcher`] after the lock
/// is released; reporting calls never wait on a channel and never fail
/// because of one.
pub struct AlertManager {
    service: String,
    environment: String,
    enabled: AtomicBool,
    state: RwLock<ManagerState>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct ManagerState {
    rules: HashMap<String, AlertRule>,
    /// Alerts keyed by dedup key
    alerts: HashMap<String, Alert>,
}

/// Counts of tracked alerts by status and severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub firing: usize,
    pub resolved: usize,
    pub firing_critical: usize,
    pub firing_warning: usize,
    pub firing_info: usize,
}

impl AlertManager {
    /// Create an enabled manager with no rules or receivers
    ///
    /// # Arguments
    ///
    /// * `service` - Service name stamped on every alert
    /// * `environment` - Deployment environment stamped on every alert
    pub fn new(service: impl Into<String>, environment: impl Into<String>) -> Self {
        Self::with_clock(service, environment, Arc::new(SystemClock))
    }

    /// Create a manager that reads time from `clock`
    pub fn with_clock(
        service: impl Into<String>,
        environment: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service: service.into(),
            environment: environment.into(),
            enabled: AtomicBool::new(true),
            state: RwLock::new(ManagerState::default()),
            dispatcher: NotificationDispatcher::default(),
            clock,
        }
    }

    /// Replace the dispatcher, e.g. to change the in-flight bound
    ///
    /// Receivers registered on the previous dispatcher are discarded.
    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Append a notification channel
    pub fn with_receiver(mut self, receiver: Arc<dyn NotificationChannel>) -> Self {
        self.dispatcher.add_receiver(receiver);
        self
    }

    /// Register a rule
    ///
    /// # Errors
    ///
    /// * `RuleError::DuplicateRule` if a rule with the same name exists
    /// * any error from [`AlertRule::validate`]
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), RuleError> {
        rule.validate()?;

        let mut state = self.write_state();
        if state.rules.contains_key(&rule.name) {
            return Err(RuleError::DuplicateRule(rule.name));
        }
        info!(
            "Registered alert rule {} ({} {} on {})",
            rule.name,
            rule.severity,
            rule.condition.kind(),
            rule.condition.metric()
        );
        state.rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    /// Register several rules, stopping at the first invalid one
    pub fn add_rules(&self, rules: impl IntoIterator<Item = AlertRule>) -> Result<(), RuleError> {
        rules.into_iter().try_for_each(|rule| self.add_rule(rule))
    }

    /// Snapshot of registered rules, sorted by name
    pub fn rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<_> = self.read_state().rules.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(
            "Alerting {} for {}/{}",
            if enabled { "enabled" } else { "disabled" },
            self.service,
            self.environment
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Report a metric sample
    ///
    /// Every enabled rule watching `metric` is evaluated unless it is inside
    /// its cooldown window, in which case it is skipped entirely: no
    /// evaluation, no count increment, no notification.
    pub fn check_threshold(&self, metric: &str, value: f64, labels: &HashMap<String, String>) {
        if !self.is_enabled() {
            return;
        }

        let now = self.clock.now();
        let labels: Labels = labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut to_notify = Vec::new();

        {
            let mut state = self.write_state();
            let ManagerState { rules, alerts } = &mut *state;

            for rule in rules.values_mut() {
                if !rule.enabled || rule.condition.metric() != metric {
                    continue;
                }
                if rule.in_cooldown(now) {
                    debug!("Rule {} in cooldown, skipping {}={}", rule.name, metric, value);
                    continue;
                }
                if !rule.condition.evaluate(value) {
                    continue;
                }
                if let Some(alert) = self.fire_rule(rule, alerts, value, &labels, now) {
                    to_notify.push(alert);
                }
            }
        }

        for alert in &to_notify {
            self.dispatcher.dispatch(alert);
        }
    }

    /// Record a rule violation; returns the alert if receivers must be notified
    fn fire_rule(
        &self,
        rule: &mut AlertRule,
        alerts: &mut HashMap<String, Alert>,
        value: f64,
        labels: &Labels,
        now: Timestamp,
    ) -> Option<Alert> {
        rule.last_triggered = Some(now);
        let key = dedup_key(&rule.name, labels);

        if let Some(existing) = alerts.get_mut(&key) {
            existing.count += 1;
            existing.last_seen = now;
            existing.value = value;

            return match existing.status {
                AlertStatus::Firing | AlertStatus::Silenced => {
                    debug!(
                        "Alert {} still {:?} (count {}), not notifying",
                        key, existing.status, existing.count
                    );
                    None
                }
                AlertStatus::Resolved => {
                    existing.status = AlertStatus::Firing;
                    existing.resolved_at = None;
                    log_fired("Reopened", existing);
                    Some(existing.clone())
                }
            };
        }

        let alert = Alert::from_rule(
            rule,
            value,
            labels.clone(),
            &self.service,
            &self.environment,
            now,
        );
        log_fired("Fired", &alert);
        alerts.insert(key, alert.clone());
        Some(alert)
    }

    /// Report an event directly from application code
    ///
    /// Unlike rule-sourced alerts, a manual fire always replaces whatever
    /// alert holds the same dedup key (`name` plus a `component` label),
    /// resetting its count to 1 and notifying again even if it was already
    /// firing.
    pub fn fire_alert(
        &self,
        name: &str,
        description: &str,
        severity: Severity,
        component: &str,
        details: HashMap<String, Value>,
    ) {
        self.fire_manual(name, description, severity, component, details, None);
    }

    /// Report a security event; severity is derived from the event type
    pub fn fire_security_alert(
        &self,
        event_type: &str,
        description: &str,
        details: HashMap<String, Value>,
    ) {
        let severity = security_severity(event_type);
        let mut details = details;
        details.insert("event_type".to_string(), Value::from(event_type));
        self.fire_manual(
            &format!("security_{}", event_type),
            description,
            severity,
            "security",
            details,
            None,
        );
    }

    /// Report a performance measurement that crossed its threshold
    ///
    /// Critical when `value` exceeds 1.5x `threshold`, warning otherwise.
    pub fn fire_performance_alert(&self, metric: &str, value: f64, threshold: f64, component: &str) {
        let severity = performance_severity(value, threshold);
        let mut details = HashMap::new();
        details.insert("metric".to_string(), Value::from(metric));
        details.insert("value".to_string(), Value::from(value));
        details.insert("threshold".to_string(), Value::from(threshold));

        self.fire_manual(
            &format!("performance_{}", metric),
            &format!("{} is {} (threshold {})", metric, value, threshold),
            severity,
            component,
            details,
            Some((value, threshold)),
        );
    }

    /// Report a business-level event (large withdrawal, settlement failure, ...)
    pub fn fire_business_alert(
        &self,
        event: &str,
        description: &str,
        severity: Severity,
        details: HashMap<String, Value>,
    ) {
        self.fire_manual(
            &format!("business_{}", event),
            description,
            severity,
            "business",
            details,
            None,
        );
    }

    fn fire_manual(
        &self,
        name: &str,
        description: &str,
        severity: Severity,
        component: &str,
        details: HashMap<String, Value>,
        measurement: Option<(f64, f64)>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let now = self.clock.now();
        let mut labels = Labels::new();
        labels.insert("component".to_string(), component.to_string());

        let mut alert = Alert::manual(
            name,
            description,
            severity,
            component,
            labels,
            details,
            &self.service,
            &self.environment,
            now,
        );
        if let Some((value, threshold)) = measurement {
            alert.value = value;
            alert.threshold = threshold;
        }

        {
            let mut state = self.write_state();
            if let Some(previous) = state.alerts.insert(alert.dedup_key(), alert.clone()) {
                debug!(
                    "Manual alert {} replaced previous alert {} (count {})",
                    alert.name, previous.id, previous.count
                );
            }
        }

        log_fired("Fired", &alert);
        self.dispatcher.dispatch(&alert);
    }

    /// Resolve a firing alert, identified by its id or its dedup key
    ///
    /// # Returns
    ///
    /// `true` if a firing alert was resolved and receivers notified, `false`
    /// if no alert matched or it was not firing
    pub fn resolve_alert(&self, alert_id: &str) -> bool {
        let now = self.clock.now();

        let resolved = {
            let mut state = self.write_state();
            let found = state
                .alerts
                .iter_mut()
                .find(|(key, alert)| alert.id == alert_id || key.as_str() == alert_id);

            match found {
                Some((_, alert)) if alert.is_firing() => {
                    alert.status = AlertStatus::Resolved;
                    alert.resolved_at = Some(now);
                    Some(alert.clone())
                }
                _ => None,
            }
        };

        match resolved {
            Some(alert) => {
                info!(
                    "Resolved alert {} ({}) after {} occurrences",
                    alert.name, alert.id, alert.count
                );
                self.dispatcher.dispatch(&alert);
                true
            }
            None => {
                debug!("No firing alert matches {}", alert_id);
                false
            }
        }
    }

    /// All alerts currently firing, in no particular order
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.read_state()
            .alerts
            .values()
            .filter(|alert| alert.is_firing())
            .cloned()
            .collect()
    }

    /// Alerts fired at or after `since`, optionally filtered by exact
    /// severity and component, in no particular order
    ///
    /// Filtering is on `fired_at` only. A reopened alert keeps the `fired_at`
    /// of its first firing, so an alert first fired before `since` and
    /// reopened after it is not returned; use `last_seen` from
    /// [`get_active_alerts`](Self::get_active_alerts) to find recent activity.
    pub fn get_alert_history(
        &self,
        since: Timestamp,
        severity: Option<Severity>,
        component: Option<&str>,
    ) -> Vec<Alert> {
        self.read_state()
            .alerts
            .values()
            .filter(|alert| alert.fired_at >= since)
            .filter(|alert| severity.map_or(true, |s| alert.severity == s))
            .filter(|alert| component.map_or(true, |c| alert.component == c))
            .cloned()
            .collect()
    }

    /// Look up one alert by id or dedup key
    pub fn get_alert(&self, id_or_key: &str) -> Option<Alert> {
        let state = self.read_state();
        state.alerts.get(id_or_key).cloned().or_else(|| {
            state
                .alerts
                .values()
                .find(|alert| alert.id == id_or_key)
                .cloned()
        })
    }

    /// Count tracked alerts by status and firing severity
    pub fn summary(&self) -> AlertSummary {
        let state = self.read_state();
        let mut summary = AlertSummary {
            total: state.alerts.len(),
            ..AlertSummary::default()
        };

        for alert in state.alerts.values() {
            match alert.status {
                AlertStatus::Firing => {
                    summary.firing += 1;
                    match alert.severity {
                        Severity::Critical => summary.firing_critical += 1,
                        Severity::Warning => summary.firing_warning += 1,
                        Severity::Info => summary.firing_info += 1,
                    }
                }
                AlertStatus::Resolved => summary.resolved += 1,
                AlertStatus::Silenced => {}
            }
        }
        summary
    }

    /// Drop alerts resolved at least `older_than` ago
    ///
    /// # Returns
    ///
    /// Number of alerts removed
    pub fn purge_resolved(&self, older_than: Duration) -> usize {
        let now = self.clock.now();
        let mut state = self.write_state();
        let before = state.alerts.len();

        state.alerts.retain(|_, alert| match alert.resolved_at {
            Some(resolved_at) if alert.status == AlertStatus::Resolved => {
                (now - resolved_at).to_std().unwrap_or_default() < older_than
            }
            _ => true,
        });

        let purged = before - state.alerts.len();
        if purged > 0 {
            info!("Purged {} resolved alerts", purged);
        }
        purged
    }

    /// Per-channel delivery counters
    pub fn delivery_stats(&self) -> &Arc<DeliveryStats> {
        self.dispatcher.stats()
    }

    /// Number of registered notification channels
    pub fn receiver_count(&self) -> usize {
        self.dispatcher.receivers().len()
    }

    /// Deliveries started but not yet finished
    pub fn notifications_in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_fired(action: &str, alert: &Alert) {
    if alert.severity == Severity::Critical {
        warn!(
            "{} {} alert {} ({}) value={} count={}",
            action, alert.severity, alert.name, alert.id, alert.value, alert.count
        );
    } else {
        info!(
            "{} {} alert {} ({}) value={} count={}",
            action, alert.severity, alert.name, alert.id, alert.value, alert.count
        );
    }
}

/// Severity of a security event, by keyword match on its type
fn security_severity(event_type: &str) -> Severity {
    let event_type = event_type.to_lowercase();
    if CRITICAL_SECURITY_KEYWORDS
        .iter()
        .any(|keyword| event_type.contains(keyword))
    {
        Severity::Critical
    } else if WARNING_SECURITY_KEYWORDS
        .iter()
        .any(|keyword| event_type.contains(keyword))
    {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn performance_severity(value: f64, threshold: f64) -> Severity {
    if value > threshold * PERFORMANCE_CRITICAL_FACTOR {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::MockChannel;
    use crate::rules::{Condition, Operator};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(1);
    const SETTLE: Duration = Duration::from_millis(50);

    fn high_error_rate() -> AlertRule {
        AlertRule::threshold("HighErrorRate", "http_error_rate", Operator::Gt, 5.0)
            .with_severity(Severity::Warning)
            .with_component("api")
            .with_cooldown(Duration::from_secs(15 * 60))
    }

    fn manager_with_channel() -> (AlertManager, Arc<ManualClock>, Arc<MockChannel>) {
        let clock = Arc::new(ManualClock::default());
        let channel = Arc::new(MockChannel::success("mock"));
        let manager = AlertManager::with_clock("trading-api", "test", clock.clone())
            .with_receiver(channel.clone());
        (manager, clock, channel)
    }

    fn no_labels() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn test_first_violation_fires_and_notifies() {
        let (manager, _clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 6.0, &no_labels());

        let active = manager.get_active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, AlertStatus::Firing);
        assert_eq!(active[0].count, 1);
        assert_eq!(active[0].value, 6.0);
        assert_eq!(active[0].service, "trading-api");

        assert!(channel.wait_for_calls(1, WAIT).await);
        assert_eq!(channel.last_alert().unwrap().name, "HighErrorRate");
    }

    #[tokio::test]
    async fn test_non_matching_value_does_nothing() {
        let (manager, _clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 4.0, &no_labels());
        manager.check_threshold("other_metric", 100.0, &no_labels());

        assert!(manager.get_active_alerts().is_empty());
        assert!(manager.rules()[0].last_triggered.is_none());
        tokio::time::sleep(SETTLE).await;
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_skips_evaluation_entirely() {
        let (manager, clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 6.0, &no_labels());
        clock.advance(chrono::Duration::minutes(5));
        manager.check_threshold("http_error_rate", 7.0, &no_labels());

        let alert = manager.get_active_alerts().remove(0);
        assert_eq!(alert.count, 1);
        assert_eq!(alert.value, 6.0);

        assert!(channel.wait_for_calls(1, WAIT).await);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_steady_state_suppresses_renotification() {
        let (manager, clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 6.0, &no_labels());
        clock.advance(chrono::Duration::minutes(16));
        manager.check_threshold("http_error_rate", 8.0, &no_labels());

        let active = manager.get_active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].count, 2);
        assert_eq!(active[0].value, 8.0);
        assert_eq!(active[0].status, AlertStatus::Firing);
        assert_eq!(active[0].last_seen, clock.now());

        assert!(channel.wait_for_calls(1, WAIT).await);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_and_reopen() {
        let (manager, clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 6.0, &no_labels());
        let id = manager.get_active_alerts()[0].id.clone();

        clock.advance(chrono::Duration::minutes(1));
        assert!(manager.resolve_alert(&id));

        let resolved = manager.get_alert(&id).unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolved_at, Some(clock.now()));
        assert!(manager.get_active_alerts().is_empty());
        assert!(channel.wait_for_calls(2, WAIT).await);
        assert_eq!(channel.last_alert().unwrap().status, AlertStatus::Resolved);

        clock.advance(chrono::Duration::minutes(20));
        manager.check_threshold("http_error_rate", 9.0, &no_labels());

        let reopened = manager.get_alert(&id).unwrap();
        assert_eq!(reopened.status, AlertStatus::Firing);
        assert!(reopened.resolved_at.is_none());
        assert_eq!(reopened.count, 2);
        assert!(channel.wait_for_calls(3, WAIT).await);
    }

    #[tokio::test]
    async fn test_resolve_is_noop_when_not_firing() {
        let (manager, _clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();
        manager.check_threshold("http_error_rate", 6.0, &no_labels());
        let id = manager.get_active_alerts()[0].id.clone();

        assert!(manager.resolve_alert(&id));
        assert!(!manager.resolve_alert(&id));
        assert!(!manager.resolve_alert("no-such-alert"));

        assert!(channel.wait_for_calls(2, WAIT).await);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(channel.call_count(), 2);
    }

    #[tokio::test]
    async fn test_resolve_by_dedup_key() {
        let (manager, _clock, _channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();
        manager.check_threshold("http_error_rate", 6.0, &no_labels());

        assert!(manager.resolve_alert("HighErrorRate:none"));
        assert!(manager.get_active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_labels_separate_alerts() {
        let (manager, clock, _channel) = manager_with_channel();
        manager
            .add_rule(high_error_rate().with_cooldown(Duration::ZERO))
            .unwrap();

        let mut eu = HashMap::new();
        eu.insert("region".to_string(), "eu".to_string());
        let mut us = HashMap::new();
        us.insert("region".to_string(), "us".to_string());

        manager.check_threshold("http_error_rate", 6.0, &eu);
        clock.advance(chrono::Duration::seconds(1));
        manager.check_threshold("http_error_rate", 6.0, &us);
        manager.check_threshold("http_error_rate", 6.0, &eu);

        let eu_alert = manager.get_alert("HighErrorRate:region=eu").unwrap();
        let us_alert = manager.get_alert("HighErrorRate:region=us").unwrap();
        assert_eq!(eu_alert.count, 2);
        assert_eq!(us_alert.count, 1);
    }

    #[tokio::test]
    async fn test_disabled_manager_ignores_reports() {
        let (manager, _clock, channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();
        manager.set_enabled(false);

        manager.check_threshold("http_error_rate", 6.0, &no_labels());
        manager.fire_alert("Manual", "", Severity::Info, "api", HashMap::new());

        assert!(manager.get_active_alerts().is_empty());
        assert!(!manager.is_enabled());
        tokio::time::sleep(SETTLE).await;
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_rule_is_ignored() {
        let (manager, _clock, _channel) = manager_with_channel();
        manager.add_rule(high_error_rate().disabled()).unwrap();

        manager.check_threshold("http_error_rate", 60.0, &no_labels());
        assert!(manager.get_active_alerts().is_empty());
    }

    #[test]
    fn test_add_rule_rejects_duplicates_and_unsupported() {
        let manager = AlertManager::new("svc", "test");
        manager.add_rule(high_error_rate()).unwrap();

        assert_eq!(
            manager.add_rule(high_error_rate()),
            Err(RuleError::DuplicateRule("HighErrorRate".to_string()))
        );

        let absence = AlertRule::threshold("NoHeartbeat", "heartbeat", Operator::Gt, 0.0)
            .with_condition(Condition::Absence {
                metric: "heartbeat".to_string(),
                window: Duration::from_secs(60),
            });
        assert!(matches!(
            manager.add_rule(absence),
            Err(RuleError::UnsupportedCondition { .. })
        ));
        assert_eq!(manager.rules().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_fire_overwrites() {
        let (manager, _clock, channel) = manager_with_channel();

        manager.fire_alert("SettlementLag", "first", Severity::Warning, "settlement", HashMap::new());
        let first = manager.get_alert("SettlementLag:component=settlement").unwrap();

        manager.fire_alert("SettlementLag", "second", Severity::Critical, "settlement", HashMap::new());
        let second = manager.get_alert("SettlementLag:component=settlement").unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.count, 1);
        assert_eq!(second.description, "second");
        assert_eq!(manager.get_active_alerts().len(), 1);
        // Both fires notify
        assert!(channel.wait_for_calls(2, WAIT).await);
    }

    #[tokio::test]
    async fn test_security_alert_severity_heuristic() {
        let (manager, _clock, _channel) = manager_with_channel();

        manager.fire_security_alert("unauthorized_withdrawal", "", HashMap::new());
        manager.fire_security_alert("failed_login_burst", "", HashMap::new());
        manager.fire_security_alert("password_changed", "", HashMap::new());

        let severity_of = |name: &str| {
            manager
                .get_alert(&format!("{}:component=security", name))
                .unwrap()
                .severity
        };
        assert_eq!(severity_of("security_unauthorized_withdrawal"), Severity::Critical);
        assert_eq!(severity_of("security_failed_login_burst"), Severity::Warning);
        assert_eq!(severity_of("security_password_changed"), Severity::Info);

        let alert = manager
            .get_alert("security_password_changed:component=security")
            .unwrap();
        assert_eq!(alert.details["event_type"], "password_changed");
    }

    #[tokio::test]
    async fn test_performance_alert_severity() {
        let (manager, _clock, _channel) = manager_with_channel();

        manager.fire_performance_alert("order_latency_ms", 160.0, 100.0, "matching");
        let critical = manager
            .get_alert("performance_order_latency_ms:component=matching")
            .unwrap();
        assert_eq!(critical.severity, Severity::Critical);
        assert_eq!(critical.value, 160.0);
        assert_eq!(critical.threshold, 100.0);

        manager.fire_performance_alert("order_latency_ms", 150.0, 100.0, "matching");
        let warning = manager
            .get_alert("performance_order_latency_ms:component=matching")
            .unwrap();
        assert_eq!(warning.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_business_alert() {
        let (manager, _clock, _channel) = manager_with_channel();
        let mut details = HashMap::new();
        details.insert("amount".to_string(), serde_json::json!(250_000));

        manager.fire_business_alert(
            "large_withdrawal",
            "Withdrawal above review limit",
            Severity::Warning,
            details,
        );

        let alert = manager
            .get_alert("business_large_withdrawal:component=business")
            .unwrap();
        assert_eq!(alert.component, "business");
        assert_eq!(alert.details["amount"], 250_000);
    }

    #[tokio::test]
    async fn test_alert_history_filters() {
        let (manager, clock, _channel) = manager_with_channel();
        let start = clock.now();

        manager.fire_alert("Old", "", Severity::Critical, "api", HashMap::new());
        clock.advance(chrono::Duration::hours(2));
        let since = clock.now();
        manager.fire_alert("NewApi", "", Severity::Critical, "api", HashMap::new());
        manager.fire_alert("NewDb", "", Severity::Warning, "database", HashMap::new());

        assert_eq!(manager.get_alert_history(start, None, None).len(), 3);
        assert_eq!(manager.get_alert_history(since, None, None).len(), 2);

        let critical = manager.get_alert_history(since, Some(Severity::Critical), None);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].name, "NewApi");

        let database = manager.get_alert_history(start, None, Some("database"));
        assert_eq!(database.len(), 1);
        assert_eq!(database[0].name, "NewDb");

        assert!(manager
            .get_alert_history(start, Some(Severity::Info), Some("api"))
            .is_empty());
    }

    #[tokio::test]
    async fn test_history_filters_on_first_firing() {
        let (manager, clock, _channel) = manager_with_channel();
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 6.0, &no_labels());
        assert!(manager.resolve_alert("HighErrorRate:none"));

        clock.advance(chrono::Duration::hours(1));
        let since = clock.now();
        manager.check_threshold("http_error_rate", 7.0, &no_labels());

        let reopened = manager.get_alert("HighErrorRate:none").unwrap();
        assert!(reopened.is_firing());
        assert!(reopened.fired_at < since);
        assert_eq!(reopened.last_seen, since);
        assert!(manager.get_alert_history(since, None, None).is_empty());
    }

    #[tokio::test]
    async fn test_summary_and_purge() {
        let (manager, clock, _channel) = manager_with_channel();
        manager.fire_alert("A", "", Severity::Critical, "api", HashMap::new());
        manager.fire_alert("B", "", Severity::Warning, "api", HashMap::new());
        manager.fire_alert("C", "", Severity::Info, "api", HashMap::new());
        assert!(manager.resolve_alert("C:component=api"));

        let summary = manager.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.firing, 2);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.firing_critical, 1);
        assert_eq!(summary.firing_warning, 1);
        assert_eq!(summary.firing_info, 0);

        assert_eq!(manager.purge_resolved(Duration::from_secs(3600)), 0);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(manager.purge_resolved(Duration::from_secs(3600)), 1);
        assert_eq!(manager.summary().total, 2);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_affect_state() {
        let clock = Arc::new(ManualClock::default());
        let broken = Arc::new(MockChannel::failing("broken", "503"));
        let healthy = Arc::new(MockChannel::success("healthy"));
        let manager = AlertManager::with_clock("svc", "test", clock)
            .with_receiver(broken.clone())
            .with_receiver(healthy.clone());
        manager.add_rule(high_error_rate()).unwrap();

        manager.check_threshold("http_error_rate", 6.0, &no_labels());

        assert_eq!(manager.get_active_alerts().len(), 1);
        assert!(broken.wait_for_calls(1, WAIT).await);
        assert!(healthy.wait_for_calls(1, WAIT).await);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(manager.delivery_stats().channel("broken").failed, 1);
        assert_eq!(manager.delivery_stats().channel("healthy").delivered, 1);
        assert_eq!(manager.receiver_count(), 2);
    }

    #[test]
    fn test_severity_heuristics() {
        assert_eq!(security_severity("ACCOUNT_COMPROMISE"), Severity::Critical);
        assert_eq!(security_severity("sql_injection_attempt"), Severity::Critical);
        assert_eq!(security_severity("suspicious_ip"), Severity::Warning);
        assert_eq!(security_severity("login"), Severity::Info);

        assert_eq!(performance_severity(151.0, 100.0), Severity::Critical);
        assert_eq!(performance_severity(150.0, 100.0), Severity::Warning);
    }
}
