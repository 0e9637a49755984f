use crate::clock::{Clock, SystemClock};
use crate::error::LimiterError;
use crate::events::Timestamp;
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Token bucket admission control for a single identity key
///
/// Each admitted request consumes one token. Tokens are credited back one per
/// whole `refill_interval` elapsed since the last refill, capped at
/// `max_tokens`. Sub-interval time is never lost: `last_refill` only advances
/// once at least one whole interval has been credited.
pub struct TokenBucket {
    max_tokens: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    /// Remaining credits, always within `0..=max_tokens`
    tokens: u32,
    last_refill: Timestamp,
    /// Last admission attempt, used for idle eviction
    last_used: Timestamp,
}

/// Outcome of one admission check with the values callers need for
/// limit / remaining / reset reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Bucket capacity
    pub limit: u32,
    /// Tokens left after this check
    pub remaining: u32,
    /// Time until the next token is credited (zero when the bucket is full)
    pub reset_after: Duration,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("max_tokens", &self.max_tokens)
            .field("refill_interval", &self.refill_interval)
            .field("state", &*self.lock_state())
            .finish()
    }
}

impl TokenBucket {
    /// Create a full bucket using the system clock
    ///
    /// # Arguments
    ///
    /// * `max_tokens` - Bucket capacity, must be greater than zero
    /// * `refill_interval` - Time needed to credit one token, must be non-zero
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Result<Self, LimiterError> {
        Self::with_clock(max_tokens, refill_interval, Arc::new(SystemClock))
    }

    /// Create a full bucket reading time from `clock`
    pub fn with_clock(
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
        Ok(Self::prevalidated(max_tokens, refill_interval, clock))
    }

    /// Build a bucket from parameters the caller has already checked
    pub(crate) fn prevalidated(
        max_tokens: u32,
        refill_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            max_tokens,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: now,
                last_used: now,
            }),
            clock,
        }
    }

    /// Try to consume one token
    ///
    /// # Returns
    ///
    /// `true` if a token was available and consumed, `false` if the bucket is empty
    pub fn allow(&self) -> bool {
        self.admit().allowed
    }

    /// Try to consume one token and report the bucket state after the attempt
    pub fn admit(&self) -> Admission {
        let now = self.clock.now();
        let mut state = self.lock_state();
        self.refill(&mut state, now);
        state.last_used = now;

        let allowed = if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            debug!(
                "Token bucket empty (max_tokens={}, refill_interval={:?})",
                self.max_tokens, self.refill_interval
            );
            false
        };

        Admission {
            allowed,
            limit: self.max_tokens,
            remaining: state.tokens,
            reset_after: self.reset_after(&state, now),
        }
    }

    /// Whether the bucket is back at capacity after applying pending refill
    pub fn is_full(&self) -> bool {
        self.tokens() >= self.max_tokens
    }

    /// Time until the next token is credited, zero when the bucket is full
    ///
    /// Applies pending refill like [`tokens`](Self::tokens) but consumes nothing.
    pub fn time_until_refill(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.lock_state();
        self.refill(&mut state, now);
        self.reset_after(&state, now)
    }

    /// Current token count
    ///
    /// Does not consume a token, but applies the same refill step as
    /// [`allow`](Self::allow), so it may advance the refill timestamp.
    pub fn tokens(&self) -> u32 {
        let now = self.clock.now();
        let mut state = self.lock_state();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Bucket capacity
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Time needed to credit one token
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// When this bucket last received an admission check
    pub fn last_used(&self) -> Timestamp {
        self.lock_state().last_used
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, state: &mut BucketState, now: Timestamp) {
        // A clock stepping backwards credits nothing
        let elapsed = (now - state.last_refill).to_std().unwrap_or_default();
        let whole_intervals = elapsed.as_nanos() / self.refill_interval.as_nanos();

        if whole_intervals > 0 {
            let refilled = (state.tokens as u128 + whole_intervals).min(self.max_tokens as u128);
            state.tokens = refilled as u32;
            state.last_refill = now;
        }
    }

    fn reset_after(&self, state: &BucketState, now: Timestamp) -> Duration {
        if state.tokens >= self.max_tokens {
            return Duration::ZERO;
        }
        let elapsed = (now - state.last_refill).to_std().unwrap_or_default();
        self.refill_interval.saturating_sub(elapsed)
    }
}
