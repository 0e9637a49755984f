//! Notification delivery statistics
//!
//! Delivery failures never reach the code that reported an alert, so they are
//! counted here per channel to keep them observable.

use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Delivery counters for one notification channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounts {
    /// Alerts the channel accepted
    pub delivered: u64,
    /// Alerts the channel failed to deliver
    pub failed: u64,
    /// Alerts never handed to the channel because the in-flight bound was hit
    pub dropped: u64,
}

impl ChannelCounts {
    /// Delivery success rate as a percentage (0-100) of attempted deliveries
    ///
    /// Returns 100 when nothing has been attempted yet.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.delivered + self.failed;
        if attempted == 0 {
            return 100.0;
        }
        (self.delivered as f64 / attempted as f64) * 100.0
    }
}

/// Per-channel delivery statistics shared between dispatch tasks
#[derive(Debug, Default)]
pub struct DeliveryStats {
    channels: Mutex<HashMap<String, ChannelCounts>>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self, channel: &str) {
        self.update(channel, |counts| counts.delivered += 1);
    }

    pub fn record_failed(&self, channel: &str) {
        self.update(channel, |counts| counts.failed += 1);
    }

    pub fn record_dropped(&self, channel: &str) {
        self.update(channel, |counts| counts.dropped += 1);
    }

    /// Counters for one channel
    pub fn channel(&self, channel: &str) -> ChannelCounts {
        self.lock().get(channel).copied().unwrap_or_default()
    }

    /// Counters for every channel that has seen at least one delivery attempt
    pub fn snapshot(&self) -> HashMap<String, ChannelCounts> {
        self.lock().clone()
    }

    /// Counters summed across all channels
    pub fn totals(&self) -> ChannelCounts {
        self.lock()
            .values()
            .fold(ChannelCounts::default(), |acc, c| ChannelCounts {
                delivered: acc.delivered + c.delivered,
                failed: acc.failed + c.failed,
                dropped: acc.dropped + c.dropped,
            })
    }

    fn update(&self, channel: &str, apply: impl FnOnce(&mut ChannelCounts)) {
        let mut channels = self.lock();
        let counts = channels.entry(channel.to_string()).or_default();
        apply(counts);
        debug!(
            "Delivery stats for {}: delivered={} failed={} dropped={}",
            channel, counts.delivered, counts.failed, counts.dropped
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelCounts>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_channel() {
        let stats = DeliveryStats::new();
        stats.record_delivered("webhook");
        stats.record_delivered("webhook");
        stats.record_failed("webhook");
        stats.record_dropped("chat");

        assert_eq!(
            stats.channel("webhook"),
            ChannelCounts {
                delivered: 2,
                failed: 1,
                dropped: 0
            }
        );
        assert_eq!(stats.channel("chat").dropped, 1);
        assert_eq!(stats.channel("unknown"), ChannelCounts::default());
        assert_eq!(stats.snapshot().len(), 2);
    }

    #[test]
    fn test_totals() {
        let stats = DeliveryStats::new();
        stats.record_delivered("a");
        stats.record_failed("b");
        stats.record_dropped("b");

        let totals = stats.totals();
        assert_eq!(totals.delivered, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.dropped, 1);
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(ChannelCounts::default().success_rate(), 100.0);

        let counts = ChannelCounts {
            delivered: 3,
            failed: 1,
            dropped: 10,
        };
        assert!((counts.success_rate() - 75.0).abs() < f64::EPSILON);
    }
}
