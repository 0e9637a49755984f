use crate::alerts::Alert;
use crate::monitoring::DeliveryStats;
use crate::notify::NotificationChannel;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Default bound on concurrently running deliveries
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Fans alerts out to every registered channel on independent tasks
///
/// Each (alert, channel) pair gets its own tokio task, so no channel waits on
/// another and the caller never waits on any. At most `max_in_flight`
/// deliveries run at once; beyond that deliveries are dropped and counted
/// rather than queued. Failures are logged and counted, never retried.
pub struct NotificationDispatcher {
    receivers: Vec<Arc<dyn NotificationChannel>>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    stats: Arc<DeliveryStats>,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl NotificationDispatcher {
    /// Create a dispatcher with no receivers
    ///
    /// # Arguments
    ///
    /// * `max_in_flight` - Maximum deliveries running at once (at least 1)
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            receivers: Vec::new(),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            stats: Arc::new(DeliveryStats::new()),
        }
    }

    /// Append a receiver; receivers are notified in registration order
    pub fn add_receiver(&mut self, receiver: Arc<dyn NotificationChannel>) {
        debug!("Registered notification channel {}", receiver.name());
        self.receivers.push(receiver);
    }

    pub fn receivers(&self) -> &[Arc<dyn NotificationChannel>] {
        &self.receivers
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Deliveries currently running
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.in_flight.available_permits()
    }

    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// Start delivering `alert` to every receiver without waiting
    ///
    /// Never blocks. Outside a tokio runtime nothing can be spawned, so
    /// deliveries are dropped and logged.
    pub fn dispatch(&self, alert: &Alert) {
        if self.receivers.is_empty() {
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "No async runtime available, dropping notifications for alert {}",
                    alert.name
                );
                for receiver in &self.receivers {
                    self.stats.record_dropped(receiver.name());
                }
                return;
            }
        };

        for receiver in &self.receivers {
            let permit = match self.in_flight.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        "{} notifications in flight, dropping alert {} for channel {}",
                        self.max_in_flight,
                        alert.name,
                        receiver.name()
                    );
                    self.stats.record_dropped(receiver.name());
                    continue;
                }
            };

            let receiver = receiver.clone();
            let stats = self.stats.clone();
            let alert = alert.clone();
            handle.spawn(async move {
                let result = receiver.send_alert(&alert).await;
                drop(permit);
                match result {
                    Ok(()) => {
                        debug!(
                            "Delivered alert {} ({:?}) via {}",
                            alert.name,
                            alert.status,
                            receiver.name()
                        );
                        stats.record_delivered(receiver.name());
                    }
                    Err(e) => {
                        error!(
                            "Failed to deliver alert {} ({}) via {}: {}",
                            alert.name,
                            alert.id,
                            receiver.name(),
                            e
                        );
                        stats.record_failed(receiver.name());
                    }
                }
            });
        }
    }
}
