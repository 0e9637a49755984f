use crate::clock::{Clock, SystemClock};
use crate::error::LimiterError;
use crate::ratelimit::token_bucket::{Admission, TokenBucket};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-identity collection of token buckets for one call site
///
/// Buckets are created lazily, exactly once per key, and all share the
/// registry's capacity and refill interval. Separate call sites (general API,
/// authentication, high-value operations) use separate registries so their
/// limits never interact.
pub struct LimiterRegistry {
    name: String,
    max_tokens: u32,
    refill_interval: Duration,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("name", &self.name)
            .field("max_tokens", &self.max_tokens)
            .field("refill_interval", &self.refill_interval)
            .field("keys", &self.len())
            .finish()
    }
}

impl LimiterRegistry {
    /// Create an empty registry using the system clock
    ///
    /// # Arguments
    ///
    /// * `name` - Call-site label used in log output
    /// * `max_tokens` - Capacity of every bucket in this registry
    /// * `refill_interval` - Time needed to credit one token
    pub fn new(
        name: impl Into<String>,
        max_tokens: u32,
        refill_interval: Duration,
    ) -> Result<Self, LimiterError> {
        Self::with_clock(name, max_tokens, refill_interval, Arc::new(SystemClock))
    }

    /// Create an empty registry whose buckets read time from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        max_tokens: u32,
        refill_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LimiterError> {
        if max_tokens == 0 {
            return Err(LimiterError::ZeroCapacity);
        }
        if refill_interval.is_zero() {
            return Err(LimiterError::ZeroRefillInterval);
        }

        Ok(Self {
            name: name.into(),
            max_tokens,
            refill_interval,
            buckets: RwLock::new(HashMap::new()),
            clock,
        })
    }

    /// Get the bucket for `key`, creating it on first use
    pub fn get_limiter(&self, key: &str) -> Arc<TokenBucket> {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(key) {
                return bucket.clone();
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks
        buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating {} rate limiter for key {}", self.name, key);
                Arc::new(TokenBucket::prevalidated(
                    self.max_tokens,
                    self.refill_interval,
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Consume one token for `key`
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    /// Consume one token for `key` and report limit, remaining and reset values
    pub fn check(&self, key: &str) -> Admission {
        let admission = self.get_limiter(key).admit();
        if !admission.allowed {
            debug!("{} rate limit exceeded for key {}", self.name, key);
        }
        admission
    }

    /// Remove buckets that have not been checked for at least `idle_for`
    /// and have refilled to capacity
    ///
    /// A bucket that is still partly drained is kept however long it has
    /// been idle, since a replacement would start full and admit more than
    /// the limit allows.
    ///
    /// # Returns
    ///
    /// Number of buckets removed
    pub fn evict_idle(&self, idle_for: Duration) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();

        buckets.retain(|_, bucket| {
            let idle = (now - bucket.last_used()).to_std().unwrap_or_default();
            idle < idle_for || !bucket.is_full()
        });

        before - buckets.len()
    }

    /// Periodically evict idle buckets on the current tokio runtime
    ///
    /// The sweep stops on its own once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, idle_for: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle(idle_for);
                if evicted > 0 {
                    info!(
                        "Evicted {} idle {} rate limiters ({} remaining)",
                        evicted,
                        registry.name,
                        registry.len()
                    );
                }
            }
        })
    }

    /// Call-site label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity of every bucket in this registry
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Refill interval of every bucket in this registry
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
