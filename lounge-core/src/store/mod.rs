pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    Conversation, Message, NewMessage, NewUser, Notification, Report, ReportItemType, Tier, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unique constraint violated: {0}")]
    Conflict(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conversation listing predicate. Built explicitly by callers instead of
/// chaining conditional query fragments.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    /// Only conversations whose counterpart is this user.
    pub recipient: Option<Uuid>,
    /// Substring match on the counterpart's username.
    pub search: Option<String>,
    /// Only conversations with unread messages for the caller.
    pub unread_only: bool,
    /// Only conversations whose counterpart is in the caller's favorites.
    pub favorites_only: bool,
}

/// The persistent store, modeled as an external collaborator: get/create/
/// update/delete by key, filter by predicate. The single source of truth;
/// no component caches mutable state across calls.
#[async_trait]
pub trait Store: Send + Sync {
    // --- users ---

    /// Fails with `Conflict` on a duplicate email (case-insensitive).
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;
    async fn user(&self, id: Uuid) -> StoreResult<User>;
    /// Case-insensitive email lookup.
    async fn user_by_email(&self, email: &str) -> Option<User>;
    async fn users(&self) -> Vec<User>;
    async fn admins(&self) -> Vec<User>;
    /// Username substring match, excluding one user, capped.
    async fn search_users(&self, query: &str, exclude: Uuid, cap: usize) -> Vec<User>;
    async fn update_user(&self, user: User) -> StoreResult<()>;
    async fn set_tier(&self, id: Uuid, tier: Tier) -> StoreResult<()>;
    async fn block_user(&self, user: Uuid, target: Uuid) -> StoreResult<()>;
    async fn unblock_user(&self, user: Uuid, target: Uuid) -> StoreResult<()>;
    async fn favorite_user(&self, user: Uuid, target: Uuid) -> StoreResult<()>;
    async fn unfavorite_user(&self, user: Uuid, target: Uuid) -> StoreResult<()>;
    async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
    /// One login-log row per user per day; returns true when a row was added.
    async fn record_daily_access(&self, id: Uuid, date: NaiveDate) -> StoreResult<bool>;
    /// Permanent removal cascading to owned content.
    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;

    // --- conversations ---

    /// Unique non-public conversation containing exactly this unordered pair.
    async fn find_direct(&self, a: Uuid, b: Uuid) -> Option<Conversation>;
    /// Fails with `Conflict` when the pair already has a conversation; the
    /// caller retries as lookup.
    async fn create_direct(&self, a: Uuid, b: Uuid) -> StoreResult<Conversation>;
    async fn public_conversation(&self) -> Option<Conversation>;
    /// Fails with `Conflict` when the singleton already exists.
    async fn create_public(&self) -> StoreResult<Conversation>;
    async fn conversation(&self, id: Uuid) -> StoreResult<Conversation>;
    /// Non-public conversations the user participates in, most recent
    /// activity first.
    async fn conversations_for(&self, user: Uuid) -> Vec<Conversation>;
    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // --- clear / mute ---

    async fn clear_horizon(&self, user: Uuid, conversation: Uuid) -> Option<DateTime<Utc>>;
    async fn set_clear_horizon(
        &self,
        user: Uuid,
        conversation: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// First call creates the row as muted; later calls flip it. Returns the
    /// new state.
    async fn toggle_mute(&self, user: Uuid, conversation: Uuid) -> StoreResult<bool>;
    async fn is_muted(&self, user: Uuid, conversation: Uuid) -> bool;

    // --- messages ---

    /// Created-at is made monotonic within the conversation.
    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message>;
    async fn message(&self, id: Uuid) -> StoreResult<Message>;
    /// Ascending by created-at, strictly after `after` when given.
    async fn messages_in(&self, conversation: Uuid, after: Option<DateTime<Utc>>) -> Vec<Message>;
    async fn last_message(&self, conversation: Uuid) -> Option<Message>;
    /// Bulk-marks messages not sent by `viewer` as read; idempotent. Returns
    /// the number of rows that changed.
    async fn mark_read_except(&self, conversation: Uuid, viewer: Uuid) -> StoreResult<usize>;
    async fn unread_count_in(&self, conversation: Uuid, user: Uuid) -> usize;
    /// Unread messages not sent by the user across the user's conversations.
    async fn unread_count(&self, user: Uuid) -> usize;
    /// Body substring match restricted to the user's conversations, most
    /// recent first, capped.
    async fn search_messages(&self, user: Uuid, query: &str, cap: usize) -> Vec<Message>;
    /// Deleting a message nulls the reply_to of dependents, never cascades.
    async fn delete_message(&self, id: Uuid) -> StoreResult<()>;

    // --- notifications ---

    async fn insert_notification(
        &self,
        recipient: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> StoreResult<Notification>;
    async fn notification(&self, id: Uuid) -> StoreResult<Notification>;
    /// Newest first, capped.
    async fn notifications_for(&self, recipient: Uuid, cap: usize) -> Vec<Notification>;
    async fn set_notification_read(&self, id: Uuid) -> StoreResult<()>;

    // --- reports ---

    async fn insert_report(
        &self,
        reporter: Uuid,
        item_type: ReportItemType,
        item_id: &str,
        reason: &str,
    ) -> StoreResult<Report>;
    async fn open_reports_against(&self, item_type: ReportItemType, item_id: &str) -> usize;
}
