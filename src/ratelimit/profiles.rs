use crate::clock::{Clock, SystemClock};
use crate::error::LimiterError;
use crate::ratelimit::LimiterRegistry;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Capacity and refill rate for one call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    pub max_tokens: u32,
    #[serde(with = "humantime_serde")]
    pub refill_interval: Duration,
}

impl LimitSettings {
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            max_tokens,
            refill_interval,
        }
    }
}

/// Limits for every call site, as read from the `[rate_limits]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// General API traffic, keyed by caller identity or client IP
    pub api: LimitSettings,
    /// Login and token endpoints
    pub auth: LimitSettings,
    /// Withdrawals, transfers and other high-value operations
    pub high_value: LimitSettings,
    /// Evict buckets untouched for this long; no eviction when unset
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub idle_eviction: Option<Duration>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            // 100 requests per minute
            api: LimitSettings::new(100, Duration::from_millis(600)),
            // 5 attempts, one credited back per minute
            auth: LimitSettings::new(5, Duration::from_secs(60)),
            // 10 operations per minute
            high_value: LimitSettings::new(10, Duration::from_secs(6)),
            idle_eviction: None,
        }
    }
}

/// Independent limiter registries for each call site
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub api: Arc<LimiterRegistry>,
    pub auth: Arc<LimiterRegistry>,
    pub high_value: Arc<LimiterRegistry>,
}

impl RateLimits {
    /// Build all registries from settings using the system clock
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self, LimiterError> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Build all registries from settings, reading time from `clock`
    pub fn with_clock(
        settings: &RateLimitSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LimiterError> {
        let build = |name: &str, limit: &LimitSettings| {
            LimiterRegistry::with_clock(
                name,
                limit.max_tokens,
                limit.refill_interval,
                clock.clone(),
            )
            .map(Arc::new)
        };

        Ok(Self {
            api: build("api", &settings.api)?,
            auth: build("auth", &settings.auth)?,
            high_value: build("high_value", &settings.high_value)?,
        })
    }

    /// Start the sweepers configured by `idle_eviction`, if any
    ///
    /// Does nothing when `idle_eviction` is unset. Outside a tokio runtime the
    /// sweepers cannot be spawned; this is logged and buckets are kept.
    /// The sweepers stop on their own once the registries are dropped.
    pub fn start_eviction(&self, idle_eviction: Option<Duration>) -> Vec<JoinHandle<()>> {
        let Some(idle_for) = idle_eviction else {
            return Vec::new();
        };
        if Handle::try_current().is_err() {
            warn!("No async runtime available, idle rate limiter eviction not started");
            return Vec::new();
        }

        info!("Evicting rate limiters idle for {:?}", idle_for);
        self.spawn_sweepers(idle_for)
    }

    /// Start one idle-eviction sweeper per registry
    ///
    /// Each registry is swept every `idle_for`, or one refill interval if
    /// that is longer, and loses full buckets idle for at least as long.
    pub fn spawn_sweepers(&self, idle_for: Duration) -> Vec<JoinHandle<()>> {
        [&self.api, &self.auth, &self.high_value]
            .into_iter()
            .map(|registry| {
                let idle_for = idle_for.max(registry.refill_interval());
                registry.spawn_sweeper(idle_for, idle_for)
            })
            .collect()
    }
}
