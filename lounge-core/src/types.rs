use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A user is considered online if seen within this window.
pub const ONLINE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Free,
    Standard,
    Premium,
}

impl Tier {
    pub fn at_least(&self, required: Tier) -> bool {
        *self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Standard => "STANDARD",
            Tier::Premium => "PREMIUM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub tier: Tier,
    pub role: Role,
    pub admin_notice: Option<String>,
    pub suspended_until: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub read_receipts_enabled: bool,
    pub push_token: Option<String>,
    pub blocked_users: HashSet<Uuid>,
    pub favorites: HashSet<Uuid>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Suspension is advisory state surfaced at login, not an auth failure.
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.map(|t| t > now).unwrap_or(false)
    }

    /// Freshness signal derived from last_seen. Independent from the daily
    /// access log, which tracks one row per user per day.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        self.last_seen
            .map(|t| now - t <= Duration::seconds(ONLINE_WINDOW_SECS))
            .unwrap_or(false)
    }

    /// An account that is neither blocked nor currently suspended.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_blocked && !self.is_suspended(now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub tier: Tier,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub is_public: bool,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.is_public || self.participants.contains(&user_id)
    }

    /// The counterpart in a 1:1 conversation, if there is exactly one.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.is_public || self.participants.len() != 2 {
            return None;
        }
        self.participants.iter().copied().find(|p| *p != user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

/// Opaque blob-store reference plus a type tag. The reference is resolved to
/// a fetchable URL at read time only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub reference: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportItemType {
    Chat,
    User,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub item_type: ReportItemType,
    pub item_id: String,
    pub reason: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(Tier::Premium.at_least(Tier::Standard));
        assert!(Tier::Standard.at_least(Tier::Standard));
        assert!(!Tier::Free.at_least(Tier::Standard));
    }

    #[test]
    fn online_window() {
        let now = Utc::now();
        let mut user = User {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            tier: Tier::Free,
            role: Role::Member,
            admin_notice: None,
            suspended_until: None,
            is_blocked: false,
            read_receipts_enabled: true,
            push_token: None,
            blocked_users: HashSet::new(),
            favorites: HashSet::new(),
            last_seen: Some(now - Duration::seconds(60)),
            created_at: now,
        };
        assert!(user.is_online(now));
        user.last_seen = Some(now - Duration::seconds(ONLINE_WINDOW_SECS + 1));
        assert!(!user.is_online(now));
    }

    #[test]
    fn suspension_is_time_bounded() {
        let now = Utc::now();
        let mut user = User {
            id: Uuid::new_v4(),
            username: "z".into(),
            email: "z@example.com".into(),
            tier: Tier::Free,
            role: Role::Member,
            admin_notice: None,
            suspended_until: Some(now + Duration::days(7)),
            is_blocked: false,
            read_receipts_enabled: true,
            push_token: None,
            blocked_users: HashSet::new(),
            favorites: HashSet::new(),
            last_seen: None,
            created_at: now,
        };
        assert!(user.is_suspended(now));
        assert!(!user.is_active(now));
        user.suspended_until = Some(now - Duration::hours(1));
        assert!(!user.is_suspended(now));
        assert!(user.is_active(now));
    }
}
