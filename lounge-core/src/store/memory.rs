use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::types::{
    Conversation, Message, NewMessage, NewUser, Notification, Report, ReportItemType,
    ReportStatus, Role, Tier, User,
};

/// In-memory reference implementation of the store collaborator. Uniqueness
/// constraints (direct-pair index, public singleton, per-(user, conversation)
/// statuses) are enforced under one lock, which is what a relational backend
/// would do with unique indexes.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    conversations: HashMap<Uuid, Conversation>,
    /// Normalized (low, high) pair -> conversation id.
    direct_index: HashMap<(Uuid, Uuid), Uuid>,
    public_id: Option<Uuid>,
    messages: HashMap<Uuid, Message>,
    /// Per-conversation message ids in insertion (= created_at) order.
    conversation_messages: HashMap<Uuid, Vec<Uuid>>,
    clear_horizons: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    mutes: HashMap<(Uuid, Uuid), bool>,
    notifications: HashMap<Uuid, Notification>,
    user_notifications: HashMap<Uuid, Vec<Uuid>>,
    reports: Vec<Report>,
    access_log: HashSet<(Uuid, NaiveDate)>,
}

fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write().unwrap();
        let email_lower = new.email.to_lowercase();
        if inner
            .users
            .values()
            .any(|u| u.email.to_lowercase() == email_lower)
        {
            return Err(StoreError::Conflict("user email"));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            tier: new.tier,
            role: new.role,
            admin_notice: None,
            suspended_until: None,
            is_blocked: false,
            read_receipts_enabled: true,
            push_token: None,
            blocked_users: HashSet::new(),
            favorites: HashSet::new(),
            last_seen: None,
            created_at: Utc::now(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&self, id: Uuid) -> StoreResult<User> {
        self.inner
            .read()
            .unwrap()
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("user"))
    }

    async fn user_by_email(&self, email: &str) -> Option<User> {
        let email_lower = email.to_lowercase();
        self.inner
            .read()
            .unwrap()
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email_lower)
            .cloned()
    }

    async fn users(&self) -> Vec<User> {
        self.inner.read().unwrap().users.values().cloned().collect()
    }

    async fn admins(&self) -> Vec<User> {
        self.inner
            .read()
            .unwrap()
            .users
            .values()
            .filter(|u| u.role == Role::Admin)
            .cloned()
            .collect()
    }

    async fn search_users(&self, query: &str, exclude: Uuid, cap: usize) -> Vec<User> {
        let needle = query.to_lowercase();
        let mut matches: Vec<User> = self
            .inner
            .read()
            .unwrap()
            .users
            .values()
            .filter(|u| u.id != exclude && u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.username.cmp(&b.username));
        matches.truncate(cap);
        matches
    }

    async fn update_user(&self, user: User) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::NotFound("user"));
        }
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn set_tier(&self, id: Uuid, tier: Tier) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound("user"))?;
        user.tier = tier;
        Ok(())
    }

    async fn block_user(&self, user: Uuid, target: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.users.contains_key(&target) {
            return Err(StoreError::NotFound("user"));
        }
        let entry = inner.users.get_mut(&user).ok_or(StoreError::NotFound("user"))?;
        entry.blocked_users.insert(target);
        Ok(())
    }

    async fn unblock_user(&self, user: Uuid, target: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.users.get_mut(&user).ok_or(StoreError::NotFound("user"))?;
        entry.blocked_users.remove(&target);
        Ok(())
    }

    async fn favorite_user(&self, user: Uuid, target: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.users.contains_key(&target) {
            return Err(StoreError::NotFound("user"));
        }
        let entry = inner.users.get_mut(&user).ok_or(StoreError::NotFound("user"))?;
        entry.favorites.insert(target);
        Ok(())
    }

    async fn unfavorite_user(&self, user: Uuid, target: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.users.get_mut(&user).ok_or(StoreError::NotFound("user"))?;
        entry.favorites.remove(&target);
        Ok(())
    }

    async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound("user"))?;
        user.last_seen = Some(at);
        Ok(())
    }

    async fn record_daily_access(&self, id: Uuid, date: NaiveDate) -> StoreResult<bool> {
        let mut inner = self.inner.write().unwrap();
        if !inner.users.contains_key(&id) {
            return Err(StoreError::NotFound("user"));
        }
        Ok(inner.access_log.insert((id, date)))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.users.remove(&id).is_none() {
            return Err(StoreError::NotFound("user"));
        }

        // Drop back-references held by other users.
        for user in inner.users.values_mut() {
            user.blocked_users.remove(&id);
            user.favorites.remove(&id);
        }

        // Cascade to owned messages; replies to them are nulled, not removed.
        let owned: Vec<Uuid> = inner
            .messages
            .values()
            .filter(|m| m.sender_id == id)
            .map(|m| m.id)
            .collect();
        for message_id in &owned {
            for m in inner.messages.values_mut() {
                if m.reply_to == Some(*message_id) {
                    m.reply_to = None;
                }
            }
        }
        for message_id in owned {
            inner.messages.remove(&message_id);
            for ids in inner.conversation_messages.values_mut() {
                ids.retain(|m| *m != message_id);
            }
        }

        for conversation in inner.conversations.values_mut() {
            conversation.participants.retain(|p| *p != id);
        }
        inner.direct_index.retain(|(a, b), _| *a != id && *b != id);
        inner.clear_horizons.retain(|(u, _), _| *u != id);
        inner.mutes.retain(|(u, _), _| *u != id);

        if let Some(ids) = inner.user_notifications.remove(&id) {
            for notification_id in ids {
                inner.notifications.remove(&notification_id);
            }
        }
        inner.reports.retain(|r| r.reporter_id != id);
        inner.access_log.retain(|(u, _)| *u != id);
        Ok(())
    }

    async fn find_direct(&self, a: Uuid, b: Uuid) -> Option<Conversation> {
        let inner = self.inner.read().unwrap();
        let id = inner.direct_index.get(&pair_key(a, b))?;
        inner.conversations.get(id).cloned()
    }

    async fn create_direct(&self, a: Uuid, b: Uuid) -> StoreResult<Conversation> {
        let mut inner = self.inner.write().unwrap();
        let key = pair_key(a, b);
        if inner.direct_index.contains_key(&key) {
            return Err(StoreError::Conflict("conversation pair"));
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participants: vec![key.0, key.1],
            is_public: false,
            last_activity: now,
            created_at: now,
        };
        inner.direct_index.insert(key, conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn public_conversation(&self) -> Option<Conversation> {
        let inner = self.inner.read().unwrap();
        let id = inner.public_id?;
        inner.conversations.get(&id).cloned()
    }

    async fn create_public(&self) -> StoreResult<Conversation> {
        let mut inner = self.inner.write().unwrap();
        if inner.public_id.is_some() {
            return Err(StoreError::Conflict("public conversation"));
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participants: Vec::new(),
            is_public: true,
            last_activity: now,
            created_at: now,
        };
        inner.public_id = Some(conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, id: Uuid) -> StoreResult<Conversation> {
        self.inner
            .read()
            .unwrap()
            .conversations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("conversation"))
    }

    async fn conversations_for(&self, user: Uuid) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self
            .inner
            .read()
            .unwrap()
            .conversations
            .values()
            .filter(|c| !c.is_public && c.participants.contains(&user))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        conversations
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let conversation = inner
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::NotFound("conversation"))?;
        conversation.last_activity = at;
        Ok(())
    }

    async fn clear_horizon(&self, user: Uuid, conversation: Uuid) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap()
            .clear_horizons
            .get(&(user, conversation))
            .copied()
    }

    async fn set_clear_horizon(
        &self,
        user: Uuid,
        conversation: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.conversations.contains_key(&conversation) {
            return Err(StoreError::NotFound("conversation"));
        }
        inner.clear_horizons.insert((user, conversation), at);
        Ok(())
    }

    async fn toggle_mute(&self, user: Uuid, conversation: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().unwrap();
        if !inner.conversations.contains_key(&conversation) {
            return Err(StoreError::NotFound("conversation"));
        }
        let state = inner
            .mutes
            .entry((user, conversation))
            .and_modify(|m| *m = !*m)
            .or_insert(true);
        Ok(*state)
    }

    async fn is_muted(&self, user: Uuid, conversation: Uuid) -> bool {
        self.inner
            .read()
            .unwrap()
            .mutes
            .get(&(user, conversation))
            .copied()
            .unwrap_or(false)
    }

    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut inner = self.inner.write().unwrap();
        if !inner.conversations.contains_key(&new.conversation_id) {
            return Err(StoreError::NotFound("conversation"));
        }

        // Keep created_at monotonic within the conversation so ordering by
        // timestamp is stable even under same-instant inserts.
        let mut created_at = Utc::now();
        let last = inner
            .conversation_messages
            .get(&new.conversation_id)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.messages.get(id))
            .map(|m| m.created_at);
        if let Some(last) = last {
            if created_at <= last {
                created_at = last + Duration::microseconds(1);
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            text: new.text,
            attachment: new.attachment,
            created_at,
            is_read: false,
            reply_to: new.reply_to,
        };
        inner
            .conversation_messages
            .entry(new.conversation_id)
            .or_default()
            .push(message.id);
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn message(&self, id: Uuid) -> StoreResult<Message> {
        self.inner
            .read()
            .unwrap()
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("message"))
    }

    async fn messages_in(&self, conversation: Uuid, after: Option<DateTime<Utc>>) -> Vec<Message> {
        let inner = self.inner.read().unwrap();
        let Some(ids) = inner.conversation_messages.get(&conversation) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| after.map(|t| m.created_at > t).unwrap_or(true))
            .cloned()
            .collect()
    }

    async fn last_message(&self, conversation: Uuid) -> Option<Message> {
        let inner = self.inner.read().unwrap();
        inner
            .conversation_messages
            .get(&conversation)?
            .last()
            .and_then(|id| inner.messages.get(id))
            .cloned()
    }

    async fn mark_read_except(&self, conversation: Uuid, viewer: Uuid) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let ids = inner
            .conversation_messages
            .get(&conversation)
            .cloned()
            .unwrap_or_default();
        let mut changed = 0;
        for id in ids {
            if let Some(message) = inner.messages.get_mut(&id) {
                if message.sender_id != viewer && !message.is_read {
                    message.is_read = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn unread_count_in(&self, conversation: Uuid, user: Uuid) -> usize {
        let inner = self.inner.read().unwrap();
        inner
            .conversation_messages
            .get(&conversation)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.messages.get(id))
                    .filter(|m| !m.is_read && m.sender_id != user)
                    .count()
            })
            .unwrap_or(0)
    }

    async fn unread_count(&self, user: Uuid) -> usize {
        let inner = self.inner.read().unwrap();
        inner
            .conversations
            .values()
            .filter(|c| c.participants.contains(&user))
            .map(|c| {
                inner
                    .conversation_messages
                    .get(&c.id)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| inner.messages.get(id))
                            .filter(|m| !m.is_read && m.sender_id != user)
                            .count()
                    })
                    .unwrap_or(0)
            })
            .sum()
    }

    async fn search_messages(&self, user: Uuid, query: &str, cap: usize) -> Vec<Message> {
        let needle = query.to_lowercase();
        let inner = self.inner.read().unwrap();
        let mut matches: Vec<Message> = inner
            .conversations
            .values()
            .filter(|c| c.participants.contains(&user))
            .flat_map(|c| {
                inner
                    .conversation_messages
                    .get(&c.id)
                    .into_iter()
                    .flatten()
            })
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(cap);
        matches
    }

    async fn delete_message(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let message = inner
            .messages
            .remove(&id)
            .ok_or(StoreError::NotFound("message"))?;
        if let Some(ids) = inner.conversation_messages.get_mut(&message.conversation_id) {
            ids.retain(|m| *m != id);
        }
        for m in inner.messages.values_mut() {
            if m.reply_to == Some(id) {
                m.reply_to = None;
            }
        }
        Ok(())
    }

    async fn insert_notification(
        &self,
        recipient: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> StoreResult<Notification> {
        let mut inner = self.inner.write().unwrap();
        if !inner.users.contains_key(&recipient) {
            return Err(StoreError::NotFound("user"));
        }
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            kind: kind.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data,
            is_read: false,
            created_at: Utc::now(),
        };
        inner
            .user_notifications
            .entry(recipient)
            .or_default()
            .push(notification.id);
        inner
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn notification(&self, id: Uuid) -> StoreResult<Notification> {
        self.inner
            .read()
            .unwrap()
            .notifications
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("notification"))
    }

    async fn notifications_for(&self, recipient: Uuid, cap: usize) -> Vec<Notification> {
        let inner = self.inner.read().unwrap();
        let mut list: Vec<Notification> = inner
            .user_notifications
            .get(&recipient)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.notifications.get(id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(cap);
        list
    }

    async fn set_notification_read(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let notification = inner
            .notifications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("notification"))?;
        notification.is_read = true;
        Ok(())
    }

    async fn insert_report(
        &self,
        reporter: Uuid,
        item_type: ReportItemType,
        item_id: &str,
        reason: &str,
    ) -> StoreResult<Report> {
        let mut inner = self.inner.write().unwrap();
        if !inner.users.contains_key(&reporter) {
            return Err(StoreError::NotFound("user"));
        }
        let report = Report {
            id: Uuid::new_v4(),
            reporter_id: reporter,
            item_type,
            item_id: item_id.to_string(),
            reason: reason.to_string(),
            status: ReportStatus::Open,
            created_at: Utc::now(),
        };
        inner.reports.push(report.clone());
        Ok(report)
    }

    async fn open_reports_against(&self, item_type: ReportItemType, item_id: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .reports
            .iter()
            .filter(|r| {
                r.status == ReportStatus::Open && r.item_type == item_type && r.item_id == item_id
            })
            .count()
    }
}
