use chrono::{DateTime, Utc};
use lounge_core::types::{MediaKind, Tier, User};
use serde::Serialize;
use uuid::Uuid;

/// Chat-facing slice of a user.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub id: Uuid,
    pub username: String,
    pub tier: Tier,
    pub is_online: bool,
}

impl ParticipantView {
    pub fn from_user(user: &User, now: DateTime<Utc>) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            tier: user.tier,
            is_online: user.is_online(now),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub text: String,
    pub sender: Option<ParticipantView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Option<ParticipantView>,
    pub text: String,
    pub attachment_url: Option<String>,
    pub attachment_kind: Option<MediaKind>,
    pub created_at: DateTime<Utc>,
    /// Tells the client which side of the thread to render this on.
    pub is_me: bool,
    /// Already masked by the receipt-privacy rule for the requesting viewer.
    pub is_read: bool,
    pub reply_to: Option<ReplyPreview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub participants: Vec<ParticipantView>,
    pub is_public: bool,
    pub last_activity: DateTime<Utc>,
    pub last_message: Option<MessageView>,
    pub unread_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageSearchHit {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    /// Username of the other side of the conversation the hit lives in.
    pub counterpart: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub users: Vec<ParticipantView>,
    pub messages: Vec<MessageSearchHit>,
}
