use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Tier;

/// How a tier change was initiated. Carried into the notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierChangeSource {
    Admin,
    Webhook,
}

/// Typed domain events emitted by mutating operations and consumed by the
/// notification fan-out. Explicit emission replaces implicit framework hooks
/// so ordering and failure isolation stay visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    MessageSent {
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        recipient_id: Uuid,
        preview: String,
    },
    ContentLiked {
        owner_id: Uuid,
        liker_name: String,
    },
    ContentCommented {
        owner_id: Uuid,
        commenter_name: String,
    },
    ContentApproved {
        title: String,
    },
    StoryPosted {
        author_id: Uuid,
        author_name: String,
    },
    UserRegistered {
        user_id: Uuid,
        username: String,
        email: String,
    },
    UserWarned {
        user_id: Uuid,
        reason: String,
    },
    UserSuspended {
        user_id: Uuid,
        reason: String,
        until: DateTime<Utc>,
    },
    TierChanged {
        user_id: Uuid,
        new_tier: Tier,
        source: TierChangeSource,
    },
}
