use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushPriority {
    Normal,
    High,
}

/// Platform delivery hints. These are configuration passed through to the
/// provider, not control flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushOptions {
    pub sound: Option<String>,
    pub priority: Option<PushPriority>,
    pub badge: Option<u32>,
    /// Grouping tag: pushes with the same tag replace each other on the
    /// device instead of stacking.
    pub collapse_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>, data: Value) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data,
        }
    }
}

/// Push-provider boundary: given a device token or topic, attempt delivery.
/// Best-effort; callers never see a delivery failure past the fan-out
/// boundary and no delivery-receipt tracking exists.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send_to_token(
        &self,
        token: &str,
        message: &PushMessage,
        options: &PushOptions,
    ) -> Result<()>;

    async fn send_to_topic(
        &self,
        topic: &str,
        message: &PushMessage,
        options: &PushOptions,
    ) -> Result<()>;
}
