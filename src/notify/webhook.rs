use crate::alerts::Alert;
use crate::error::AlertError;
use crate::notify::{http_client, post_json, NotificationChannel, DEFAULT_TIMEOUT};
use log::debug;
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Channel that POSTs each alert as a JSON document to a URL
///
/// The request body is the serialized [`Alert`] itself.
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: Client,
}

impl WebhookChannel {
    /// Create a webhook channel with the default timeout
    ///
    /// # Example
    /// ```
    /// use tradeguard::notify::WebhookChannel;
    ///
    /// let channel = WebhookChannel::new("ops-webhook", "https://ops.example.com/alerts").unwrap();
    /// ```
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, AlertError> {
        Self::with_timeout(name, url, DEFAULT_TIMEOUT)
    }

    /// Create a webhook channel whose requests give up after `timeout`
    pub fn with_timeout(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AlertError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(AlertError::InvalidChannel(
                "Webhook URL cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            name: name.into(),
            url,
            headers: HashMap::new(),
            client: http_client(timeout)?,
        })
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add several headers at once
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NotificationChannel for WebhookChannel {
    fn send_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            debug!("Posting alert {} ({}) to {}", alert.name, alert.id, self.url);
            post_json(&self.client, &self.url, &self.headers, alert).await
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
