//! Notification channels and asynchronous fan-out
//!
//! A [`NotificationChannel`] delivers one alert to an external sink. The
//! [`NotificationDispatcher`] runs each delivery on its own task so that a
//! slow or failing sink never blocks the caller that reported the alert.

pub mod chat;
pub mod dispatcher;
pub mod mock;
pub mod webhook;

pub use chat::ChatChannel;
pub use dispatcher::NotificationDispatcher;
pub use mock::MockChannel;
pub use webhook::WebhookChannel;

use crate::alerts::Alert;
use crate::error::AlertError;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default client-side timeout for one outbound delivery
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability to deliver one alert to an external sink
///
/// Implementations bound their own latency; the dispatcher imposes no
/// timeout and never retries.
pub trait NotificationChannel: Send + Sync {
    fn send_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;

    /// Channel name used in logs and delivery statistics
    fn name(&self) -> &str;
}

/// Build an HTTP client with a fixed per-request timeout
pub(crate) fn http_client(timeout: Duration) -> Result<Client, AlertError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// POST a JSON body and map non-success responses to errors
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    headers: &HashMap<String, String>,
    body: &T,
) -> Result<(), AlertError> {
    let mut request = client.post(url).json(body);
    for (key, value) in headers {
        request = request.header(key.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| AlertError::NotificationFailed(format!("HTTP request failed: {}", e)))?;

    if response.status().is_success() {
        return Ok(());
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    Err(AlertError::Rejected {
        status: status.as_u16(),
        body,
    })
}
