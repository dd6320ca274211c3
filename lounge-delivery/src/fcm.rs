use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lounge_core::config::DeliveryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing;

use crate::push::{PushMessage, PushOptions, PushPriority, PushProvider};

const FCM_SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Serialize)]
struct FcmRequest {
    to: String,
    priority: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    collapse_key: Option<String>,
    notification: FcmNotification,
    #[serde(skip_serializing_if = "Value::is_null")]
    data: Value,
}

#[derive(Debug, Serialize)]
struct FcmNotification {
    title: String,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    /// Android notification tag; same tag replaces instead of stacking.
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: u32,
    #[serde(default)]
    failure: u32,
}

/// FCM delivery over the HTTP v0 send endpoint. Constructed once at process
/// start from configuration and injected into the fan-out; a missing server
/// key degrades to a logged no-op rather than an error.
pub struct FcmDelivery {
    client: Option<Arc<reqwest::Client>>,
    server_key: Option<String>,
}

impl FcmDelivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let (client, server_key) = if let Some(key) = &config.fcm_server_key {
            tracing::info!("Initializing FCM client");

            // Short timeout: push delivery must never hold a request hostage
            // to third-party latency.
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.push_timeout_secs))
                .build()
                .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

            (Some(Arc::new(client)), Some(key.clone()))
        } else {
            tracing::warn!("FCM delivery disabled (missing configuration)");
            (None, None)
        };

        Ok(Self { client, server_key })
    }

    fn build_request(to: String, message: &PushMessage, options: &PushOptions) -> FcmRequest {
        FcmRequest {
            to,
            priority: match options.priority {
                Some(PushPriority::High) => "high",
                _ => "normal",
            },
            collapse_key: options.collapse_tag.clone(),
            notification: FcmNotification {
                title: message.title.clone(),
                body: message.body.clone(),
                sound: options.sound.clone(),
                badge: options.badge,
                tag: options.collapse_tag.clone(),
            },
            data: message.data.clone(),
        }
    }

    async fn post(&self, request: &FcmRequest) -> Result<()> {
        let (client, server_key) = match (&self.client, &self.server_key) {
            (Some(c), Some(k)) => (c, k),
            _ => {
                tracing::debug!("FCM not configured, skipping");
                return Ok(());
            }
        };

        let response = client
            .post(FCM_SEND_URL)
            .header("Authorization", format!("key={}", server_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send HTTP request to FCM: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("FCM returned error status {}: {}", status, error_text));
        }

        let body: FcmResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse FCM response: {}", e))?;
        if body.failure > 0 && body.success == 0 {
            return Err(anyhow!("FCM rejected the message for {}", request.to));
        }

        tracing::debug!("FCM push delivered to {}", request.to);
        Ok(())
    }
}

#[async_trait]
impl PushProvider for FcmDelivery {
    async fn send_to_token(
        &self,
        token: &str,
        message: &PushMessage,
        options: &PushOptions,
    ) -> Result<()> {
        let request = Self::build_request(token.to_string(), message, options);
        self.post(&request).await
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        message: &PushMessage,
        options: &PushOptions,
    ) -> Result<()> {
        let request = Self::build_request(format!("/topics/{}", topic), message, options);
        self.post(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_delivery_hints() {
        let message = PushMessage::new("Title", "Body", json!({"id": "1"}));
        let options = PushOptions {
            sound: Some("default".into()),
            priority: Some(PushPriority::High),
            badge: Some(3),
            collapse_tag: Some("stories".into()),
        };
        let request = FcmDelivery::build_request("token-1".into(), &message, &options);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["to"], "token-1");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["collapse_key"], "stories");
        assert_eq!(value["notification"]["tag"], "stories");
        assert_eq!(value["notification"]["badge"], 3);
        assert_eq!(value["data"]["id"], "1");
    }

    #[test]
    fn defaults_omit_optional_fields() {
        let message = PushMessage::new("Title", "Body", Value::Null);
        let request =
            FcmDelivery::build_request("token-2".into(), &message, &PushOptions::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["priority"], "normal");
        assert!(value.get("collapse_key").is_none());
        assert!(value.get("data").is_none());
        assert!(value["notification"].get("sound").is_none());
    }

    #[tokio::test]
    async fn unconfigured_delivery_is_a_noop() {
        let delivery = FcmDelivery::new(&DeliveryConfig {
            fcm_server_key: None,
            push_timeout_secs: 5,
        })
        .unwrap();
        let message = PushMessage::new("Title", "Body", Value::Null);
        delivery
            .send_to_token("token", &message, &PushOptions::default())
            .await
            .unwrap();
    }
}
