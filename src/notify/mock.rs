use crate::alerts::Alert;
use crate::error::AlertError;
use crate::notify::NotificationChannel;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Mock channel for testing and development
///
/// Records every alert it receives and can simulate failures and slow sinks.
pub struct MockChannel {
    name: String,
    failure: Option<String>,
    delay: Option<Duration>,
    call_count: Arc<Mutex<usize>>,
    received: Arc<Mutex<Vec<Alert>>>,
}

impl MockChannel {
    /// Create a mock channel that accepts every alert
    pub fn success(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: None,
            delay: None,
            call_count: Arc::new(Mutex::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock channel that fails every delivery with `error_message`
    pub fn failing(name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            failure: Some(error_message.into()),
            ..Self::success(name)
        }
    }

    /// Add a delay to every delivery
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times send_alert() has been called
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Alerts received so far, in arrival order
    ///
    /// Failed deliveries are recorded too.
    pub fn received(&self) -> Vec<Alert> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_alert(&self) -> Option<Alert> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Wait until at least `calls` deliveries have completed, up to `timeout`
    ///
    /// # Returns
    ///
    /// `true` if the count was reached in time
    pub async fn wait_for_calls(&self, calls: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.call_count() < calls {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Reset the call count and received alerts
    pub fn reset(&self) {
        *self.call_count.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl NotificationChannel for MockChannel {
    fn send_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(alert.clone());
            // Counted last so wait_for_calls observes the recorded alert
            *self.call_count.lock().unwrap_or_else(PoisonError::into_inner) += 1;

            match &self.failure {
                Some(message) => Err(AlertError::NotificationFailed(message.clone())),
                None => Ok(()),
            }
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
