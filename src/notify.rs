//! Result formatting and notification delivery.
//!
//! Formatters turn a task's serialized result into notification text;
//! notifiers deliver that text to an external channel. Both are polymorphic
//! participants in the serialization registry. Delivery is never retried
//! here; failures propagate to the task that triggered the notification.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{FormatError, NotifyError, SerializationError};
use crate::serialization::{require_field, Record};

/// Messages at or above this length are refused rather than truncated.
/// Matches the payload limit of common chat webhook endpoints.
pub const WEBHOOK_MESSAGE_MAX_LENGTH: usize = 4000;

const DEFAULT_WEBHOOK_USERNAME: &str = "argus";

/// Renders a serialized task result into notification text. Pure; may fail
/// when the result does not have the shape the formatter expects.
pub trait Formatter: Send + Sync {
    /// Discriminator under which this formatter is registered.
    fn type_name(&self) -> &'static str;

    fn format(&self, result: &Value) -> Result<String, FormatError>;

    /// The formatter's own serialized fields, without the discriminator.
    fn fields(&self) -> Record;
}

/// Delivers formatted text to an external channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Discriminator under which this notifier is registered.
    fn type_name(&self) -> &'static str;

    async fn notify(&self, text: &str) -> Result<(), NotifyError>;

    /// The notifier's own serialized fields, without the discriminator.
    fn fields(&self) -> Record;
}

/// A formatter and notifier working as a pair: the formatter's output feeds
/// the notifier.
pub struct Channel {
    pub formatter: Box<dyn Formatter>,
    pub notifier: Box<dyn Notifier>,
}

impl Channel {
    pub fn new(formatter: Box<dyn Formatter>, notifier: Box<dyn Notifier>) -> Self {
        Self {
            formatter,
            notifier,
        }
    }
}

/// Renders any result as plain text: strings verbatim, everything else as
/// pretty-printed JSON.
pub struct SimpleFormatter;

impl Formatter for SimpleFormatter {
    fn type_name(&self) -> &'static str {
        "SimpleFormatter"
    }

    fn format(&self, result: &Value) -> Result<String, FormatError> {
        match result {
            Value::String(text) => Ok(text.clone()),
            other => serde_json::to_string_pretty(other).map_err(|e| FormatError::FormatFailed {
                type_name: self.type_name().to_string(),
                details: e.to_string(),
            }),
        }
    }

    fn fields(&self) -> Record {
        Record::new()
    }
}

pub fn deserialize_simple_formatter(
    _fields: &Record,
) -> Result<Box<dyn Formatter>, SerializationError> {
    Ok(Box::new(SimpleFormatter))
}

/// Posts notification text as a JSON payload to one or more webhook URLs.
pub struct WebhookNotifier {
    webhooks: Vec<String>,
    username: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(webhooks: Vec<String>) -> Self {
        Self::with_username(webhooks, DEFAULT_WEBHOOK_USERNAME)
    }

    pub fn with_username(webhooks: Vec<String>, username: impl Into<String>) -> Self {
        Self {
            webhooks,
            username: username.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn type_name(&self) -> &'static str {
        "WebhookNotifier"
    }

    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        if text.len() >= WEBHOOK_MESSAGE_MAX_LENGTH {
            return Err(NotifyError::MessageTooLong {
                length: text.len(),
                limit: WEBHOOK_MESSAGE_MAX_LENGTH,
            });
        }
        let payload = json!({
            "text": text,
            "username": self.username,
        });
        for webhook in &self.webhooks {
            self.client
                .post(webhook)
                .json(&payload)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| NotifyError::DeliveryFailed {
                    url: webhook.clone(),
                    source: e,
                })?;
            debug!(url = %webhook, length = text.len(), "webhook notification delivered");
        }
        Ok(())
    }

    fn fields(&self) -> Record {
        let mut fields = Record::new();
        fields.insert("webhooks".to_string(), json!(self.webhooks));
        fields.insert("username".to_string(), Value::String(self.username.clone()));
        fields
    }
}

pub fn deserialize_webhook_notifier(
    fields: &Record,
) -> Result<Box<dyn Notifier>, SerializationError> {
    const TYPE: &str = "WebhookNotifier";
    let webhooks = require_field(fields, TYPE, "webhooks")?
        .as_array()
        .ok_or_else(|| SerializationError::InvalidField {
            type_name: TYPE.to_string(),
            field: "webhooks",
            details: "expected an array of strings".to_string(),
        })?
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| SerializationError::InvalidField {
                    type_name: TYPE.to_string(),
                    field: "webhooks",
                    details: "expected an array of strings".to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let username = match fields.get("username") {
        Some(value) => value
            .as_str()
            .ok_or_else(|| SerializationError::InvalidField {
                type_name: TYPE.to_string(),
                field: "username",
                details: "expected a string".to_string(),
            })?
            .to_string(),
        None => DEFAULT_WEBHOOK_USERNAME.to_string(),
    };
    Ok(Box::new(WebhookNotifier::with_username(webhooks, username)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_formatter_passes_strings_through() {
        let formatter = SimpleFormatter;
        assert_eq!(formatter.format(&json!("hello")).unwrap(), "hello");
    }

    #[test]
    fn simple_formatter_pretty_prints_objects() {
        let formatter = SimpleFormatter;
        let text = formatter.format(&json!({ "count": 3 })).unwrap();
        assert!(text.contains("\"count\": 3"));
    }

    #[tokio::test]
    async fn oversized_message_is_refused() {
        let notifier = WebhookNotifier::new(vec!["https://hooks.example.com/x".to_string()]);
        let text = "x".repeat(WEBHOOK_MESSAGE_MAX_LENGTH);
        let err = notifier.notify(&text).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::MessageTooLong {
                length,
                limit: WEBHOOK_MESSAGE_MAX_LENGTH,
            } if length == WEBHOOK_MESSAGE_MAX_LENGTH
        ));
    }

    #[test]
    fn webhook_fields_omit_the_client() {
        let notifier = WebhookNotifier::new(vec!["https://hooks.example.com/x".to_string()]);
        let fields = notifier.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["webhooks"], json!(["https://hooks.example.com/x"]));
        assert_eq!(fields["username"], json!("argus"));
    }
}
