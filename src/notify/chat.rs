use crate::alerts::{Alert, AlertStatus};
use crate::error::AlertError;
use crate::events::Severity;
use crate::notify::{http_client, post_json, NotificationChannel, DEFAULT_TIMEOUT};
use log::debug;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Chat-ops channel posting severity-colored messages to an incoming webhook
///
/// The payload follows the widely supported `text` + `attachments` layout of
/// chat incoming webhooks.
pub struct ChatChannel {
    name: String,
    webhook_url: String,
    /// Optional channel override, if the webhook allows it
    channel: Option<String>,
    client: Client,
}

/// Chat message payload
#[derive(Debug, Serialize)]
struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    text: String,
    attachments: Vec<ChatAttachment>,
}

#[derive(Debug, Serialize)]
struct ChatAttachment {
    color: String,
    title: String,
    text: String,
    fields: Vec<ChatField>,
    footer: String,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct ChatField {
    title: String,
    value: String,
    short: bool,
}

impl ChatChannel {
    /// Create a chat channel with the default timeout
    pub fn new(name: impl Into<String>, webhook_url: impl Into<String>) -> Result<Self, AlertError> {
        Self::with_timeout(name, webhook_url, DEFAULT_TIMEOUT)
    }

    /// Create a chat channel whose requests give up after `timeout`
    pub fn with_timeout(
        name: impl Into<String>,
        webhook_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AlertError> {
        let webhook_url = webhook_url.into();
        if webhook_url.trim().is_empty() {
            return Err(AlertError::InvalidChannel(
                "Chat webhook URL cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            name: name.into(),
            webhook_url,
            channel: None,
            client: http_client(timeout)?,
        })
    }

    /// Post into `channel` instead of the webhook's default
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Attachment color for an alert
    fn color(alert: &Alert) -> &'static str {
        if alert.status == AlertStatus::Resolved {
            return "#2eb886";
        }
        match alert.severity {
            Severity::Critical => "#e01e5a",
            Severity::Warning => "#ecb22e",
            Severity::Info => "#36c5f0",
        }
    }

    fn status_tag(alert: &Alert) -> &'static str {
        match alert.status {
            AlertStatus::Firing => "FIRING",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Silenced => "SILENCED",
        }
    }

    /// Render an alert as a human-readable chat message
    fn format_message(&self, alert: &Alert) -> ChatMessage {
        let header = format!(
            "[{}] {} ({}) in {}/{}",
            Self::status_tag(alert),
            alert.name,
            alert.severity,
            alert.service,
            alert.environment
        );

        let mut fields = vec![
            ChatField {
                title: "Severity".to_string(),
                value: alert.severity.to_string(),
                short: true,
            },
            ChatField {
                title: "Component".to_string(),
                value: alert.component.clone(),
                short: true,
            },
            ChatField {
                title: "Value".to_string(),
                value: format!("{} (threshold {})", alert.value, alert.threshold),
                short: true,
            },
            ChatField {
                title: "Occurrences".to_string(),
                value: alert.count.to_string(),
                short: true,
            },
            ChatField {
                title: "Fired".to_string(),
                value: alert.fired_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                short: true,
            },
        ];

        if let Some(resolved_at) = alert.resolved_at {
            fields.push(ChatField {
                title: "Resolved".to_string(),
                value: resolved_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                short: true,
            });
        }

        for (key, value) in &alert.labels {
            fields.push(ChatField {
                title: key.clone(),
                value: value.clone(),
                short: true,
            });
        }

        let text = if alert.description.is_empty() {
            alert
                .annotations
                .get("condition")
                .cloned()
                .unwrap_or_default()
        } else {
            alert.description.clone()
        };

        ChatMessage {
            channel: self.channel.clone(),
            text: header,
            attachments: vec![ChatAttachment {
                color: Self::color(alert).to_string(),
                title: alert.name.clone(),
                text,
                fields,
                footer: format!("alert {}", alert.id),
                ts: alert.last_seen.timestamp(),
            }],
        }
    }
}

impl NotificationChannel for ChatChannel {
    fn send_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let message = self.format_message(alert);
            debug!("Posting alert {} ({}) to chat", alert.name, alert.id);
            post_json(&self.client, &self.webhook_url, &HashMap::new(), &message).await
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
