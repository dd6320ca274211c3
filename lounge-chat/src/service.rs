use chrono::Utc;
use lounge_core::error::Result;
use lounge_core::event::DomainEvent;
use lounge_core::store::{ConversationFilter, Store, StoreError};
use lounge_core::types::{Attachment, Conversation, Message, NewMessage, User};
use lounge_core::{BlobStore, Error};
use lounge_notify::Notifier;
use std::sync::Arc;
use tracing;
use uuid::Uuid;

use crate::views::{
    ConversationView, MessageSearchHit, MessageView, ParticipantView, ReplyPreview, SearchResults,
};

const SEARCH_USER_CAP: usize = 10;
const SEARCH_MESSAGE_CAP: usize = 25;
const PUSH_PREVIEW_CHARS: usize = 80;

/// Where a message is headed: an existing conversation, or a user (the
/// conversation is then resolved or lazily created).
#[derive(Debug, Clone, Copy)]
pub enum SendTarget {
    Conversation(Uuid),
    Recipient(Uuid),
}

/// Conversation store and message pipeline.
pub struct ChatService {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<Notifier>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, notifier: Arc<Notifier>) -> Self {
        Self {
            store,
            blobs,
            notifier,
        }
    }

    /// The unique 1:1 conversation for a pair, created on first use. The
    /// caller is `user`; block failures are worded from their side.
    pub async fn get_or_create_direct(&self, user: Uuid, other: Uuid) -> Result<Conversation> {
        let caller = self.store.user(user).await?;
        let counterpart = self.store.user(other).await?;
        self.check_block(&caller, &counterpart)?;

        if let Some(conversation) = self.store.find_direct(user, other).await {
            return Ok(conversation);
        }
        match self.store.create_direct(user, other).await {
            Ok(conversation) => Ok(conversation),
            // Lost the race to the other participant: retry as lookup.
            Err(StoreError::Conflict(_)) => self
                .store
                .find_direct(user, other)
                .await
                .ok_or_else(|| Error::Conflict("conversation pair".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// The community room, lazily created. Idempotent.
    pub async fn get_or_create_public(&self) -> Result<Conversation> {
        if let Some(room) = self.store.public_conversation().await {
            return Ok(room);
        }
        match self.store.create_public().await {
            Ok(room) => Ok(room),
            Err(StoreError::Conflict(_)) => self
                .store
                .public_conversation()
                .await
                .ok_or_else(|| Error::Conflict("public conversation".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_conversations(
        &self,
        user: Uuid,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationView>> {
        let caller = self.store.user(user).await?;
        let mut views = Vec::new();

        for conversation in self.store.conversations_for(user).await {
            let other = conversation.other_participant(user);
            let counterpart = match other {
                Some(id) => self.store.user(id).await.ok(),
                None => None,
            };

            // Conversations whose only other side is blocked are hidden, not
            // deleted; unblocking brings them back.
            if let Some(ref c) = counterpart {
                if caller.blocked_users.contains(&c.id) {
                    continue;
                }
            }

            if let Some(recipient) = filter.recipient {
                if other != Some(recipient) {
                    continue;
                }
            }
            if let Some(ref query) = filter.search {
                let needle = query.to_lowercase();
                let matched = counterpart
                    .as_ref()
                    .map(|c| c.username.to_lowercase().contains(&needle))
                    .unwrap_or(false);
                if !matched {
                    continue;
                }
            }
            if filter.favorites_only {
                let favored = counterpart
                    .as_ref()
                    .map(|c| caller.favorites.contains(&c.id))
                    .unwrap_or(false);
                if !favored {
                    continue;
                }
            }

            let unread = self.store.unread_count_in(conversation.id, user).await;
            if filter.unread_only && unread == 0 {
                continue;
            }

            views.push(self.conversation_view(&conversation, &caller, unread).await);
        }
        Ok(views)
    }

    /// Upserts the caller's clear horizon; messages at or before it vanish
    /// from their view only.
    pub async fn clear(&self, user: Uuid, conversation: Uuid) -> Result<()> {
        let conversation = self.store.conversation(conversation).await?;
        if !conversation.is_participant(user) {
            return Err(Error::forbidden("you are not a participant"));
        }
        self.store
            .set_clear_horizon(user, conversation.id, Utc::now())
            .await?;
        Ok(())
    }

    /// Returns the new mute state. The first toggle mutes.
    pub async fn toggle_mute(&self, user: Uuid, conversation: Uuid) -> Result<bool> {
        let conversation = self.store.conversation(conversation).await?;
        if !conversation.is_participant(user) {
            return Err(Error::forbidden("you are not a participant"));
        }
        Ok(self.store.toggle_mute(user, conversation.id).await?)
    }

    pub async fn send(
        &self,
        sender: Uuid,
        target: SendTarget,
        text: String,
        attachment: Option<Attachment>,
        reply_to: Option<Uuid>,
    ) -> Result<MessageView> {
        let sender_user = self.store.user(sender).await?;

        let conversation = match target {
            SendTarget::Conversation(id) => {
                let conversation = self.store.conversation(id).await?;
                if !conversation.is_public && !conversation.participants.contains(&sender) {
                    return Err(Error::forbidden("you are not a participant"));
                }
                // Blocks only gate exactly-two-participant private chats.
                if let Some(other) = conversation.other_participant(sender) {
                    let counterpart = self.store.user(other).await?;
                    self.check_block(&sender_user, &counterpart)?;
                }
                conversation
            }
            SendTarget::Recipient(recipient) => {
                self.get_or_create_direct(sender, recipient).await?
            }
        };

        if let Some(reply_id) = reply_to {
            let target = self.store.message(reply_id).await?;
            if target.conversation_id != conversation.id {
                return Err(Error::bad_request("reply target is in another conversation"));
            }
        }

        let message = self
            .store
            .insert_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: sender,
                text,
                attachment,
                reply_to,
            })
            .await?;
        self.store
            .touch_conversation(conversation.id, message.created_at)
            .await?;

        // Fan-out happens after the write; a notification failure is logged
        // and must never fail the send.
        if let Some(recipient) = conversation.other_participant(sender) {
            let event = DomainEvent::MessageSent {
                conversation_id: conversation.id,
                sender_id: sender,
                sender_name: sender_user.username.clone(),
                recipient_id: recipient,
                preview: preview_of(&message.text),
            };
            if let Err(e) = self.notifier.dispatch(event).await {
                tracing::warn!("Message fan-out failed: {}", e);
            }
        }

        Ok(self.message_view(&message, &sender_user).await)
    }

    /// Messages visible to the requester, oldest first. Marks everything not
    /// sent by the requester as read (idempotent). A private conversation
    /// yields an empty list, not an error, for outsiders who are not admins.
    pub async fn list_messages(&self, requester: Uuid, conversation: Uuid) -> Result<Vec<MessageView>> {
        let viewer = self.store.user(requester).await?;
        let conversation = self.store.conversation(conversation).await?;

        if !conversation.is_public
            && !conversation.participants.contains(&requester)
            && !viewer.is_admin()
        {
            return Ok(Vec::new());
        }

        self.store
            .mark_read_except(conversation.id, requester)
            .await?;

        let horizon = self.store.clear_horizon(requester, conversation.id).await;
        let messages = self.store.messages_in(conversation.id, horizon).await;

        let receipts_ok = self.receipts_enabled_for_others(&conversation, requester).await;
        let mut views = Vec::with_capacity(messages.len());
        for message in &messages {
            views.push(
                self.render_message(message, &viewer, receipts_ok)
                    .await,
            );
        }
        Ok(views)
    }

    /// Receipt-privacy masking: a sender only ever sees "read" when the other
    /// participant exposes receipts. Presentation-level; storage untouched.
    pub async fn visible_read_flag(&self, message: &Message, viewer: Uuid) -> Result<bool> {
        if message.sender_id != viewer {
            return Ok(message.is_read);
        }
        let conversation = self.store.conversation(message.conversation_id).await?;
        let receipts_ok = self.receipts_enabled_for_others(&conversation, viewer).await;
        Ok(message.is_read && receipts_ok)
    }

    pub async fn unread_count(&self, user: Uuid) -> Result<usize> {
        self.store.user(user).await?;
        Ok(self.store.unread_count(user).await)
    }

    pub async fn search(&self, user: Uuid, query: &str) -> Result<SearchResults> {
        self.store.user(user).await?;
        let now = Utc::now();

        let users = self
            .store
            .search_users(query, user, SEARCH_USER_CAP)
            .await
            .iter()
            .map(|u| ParticipantView::from_user(u, now))
            .collect();

        let mut hits = Vec::new();
        for message in self
            .store
            .search_messages(user, query, SEARCH_MESSAGE_CAP)
            .await
        {
            let counterpart = match self.store.conversation(message.conversation_id).await {
                Ok(conversation) => match conversation.other_participant(user) {
                    Some(id) => self
                        .store
                        .user(id)
                        .await
                        .map(|u| u.username)
                        .unwrap_or_default(),
                    None => String::new(),
                },
                Err(_) => String::new(),
            };
            hits.push(MessageSearchHit {
                message_id: message.id,
                conversation_id: message.conversation_id,
                counterpart,
                text: message.text,
                created_at: message.created_at,
            });
        }

        Ok(SearchResults {
            users,
            messages: hits,
        })
    }

    fn check_block(&self, caller: &User, counterpart: &User) -> Result<()> {
        if caller.blocked_users.contains(&counterpart.id) {
            return Err(Error::forbidden("you have blocked this user"));
        }
        if counterpart.blocked_users.contains(&caller.id) {
            return Err(Error::forbidden("this user has blocked you"));
        }
        Ok(())
    }

    /// True when every participant other than `viewer` exposes read receipts.
    async fn receipts_enabled_for_others(&self, conversation: &Conversation, viewer: Uuid) -> bool {
        for id in &conversation.participants {
            if *id == viewer {
                continue;
            }
            if let Ok(user) = self.store.user(*id).await {
                if !user.read_receipts_enabled {
                    return false;
                }
            }
        }
        true
    }

    async fn conversation_view(
        &self,
        conversation: &Conversation,
        viewer: &User,
        unread: usize,
    ) -> ConversationView {
        let now = Utc::now();
        let mut participants = Vec::new();
        for id in &conversation.participants {
            if let Ok(user) = self.store.user(*id).await {
                participants.push(ParticipantView::from_user(&user, now));
            }
        }

        let receipts_ok = self
            .receipts_enabled_for_others(conversation, viewer.id)
            .await;
        let last_message = match self.store.last_message(conversation.id).await {
            Some(message) => Some(self.render_message(&message, viewer, receipts_ok).await),
            None => None,
        };

        ConversationView {
            id: conversation.id,
            participants,
            is_public: conversation.is_public,
            last_activity: conversation.last_activity,
            last_message,
            unread_count: unread,
        }
    }

    async fn message_view(&self, message: &Message, viewer: &User) -> MessageView {
        let receipts_ok = match self.store.conversation(message.conversation_id).await {
            Ok(conversation) => {
                self.receipts_enabled_for_others(&conversation, viewer.id)
                    .await
            }
            Err(_) => true,
        };
        self.render_message(message, viewer, receipts_ok).await
    }

    async fn render_message(
        &self,
        message: &Message,
        viewer: &User,
        receipts_ok: bool,
    ) -> MessageView {
        let now = Utc::now();
        let is_me = message.sender_id == viewer.id;
        let is_read = if is_me {
            message.is_read && receipts_ok
        } else {
            message.is_read
        };

        let sender = self
            .store
            .user(message.sender_id)
            .await
            .ok()
            .map(|u| ParticipantView::from_user(&u, now));

        let reply_to = match message.reply_to {
            Some(id) => match self.store.message(id).await {
                Ok(target) => {
                    let sender = self
                        .store
                        .user(target.sender_id)
                        .await
                        .ok()
                        .map(|u| ParticipantView::from_user(&u, now));
                    Some(ReplyPreview {
                        id: target.id,
                        text: target.text,
                        sender,
                    })
                }
                Err(_) => None,
            },
            None => None,
        };

        MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            sender,
            text: message.text.clone(),
            attachment_url: message
                .attachment
                .as_ref()
                .map(|a| self.blobs.url_for(&a.reference)),
            attachment_kind: message.attachment.as_ref().map(|a| a.kind),
            created_at: message.created_at,
            is_me,
            is_read,
            reply_to,
        }
    }
}

fn preview_of(text: &str) -> String {
    if text.chars().count() <= PUSH_PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PUSH_PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let short = "hello";
        assert_eq!(preview_of(short), "hello");
        let long = "x".repeat(200);
        let preview = preview_of(&long);
        assert_eq!(preview.chars().count(), PUSH_PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));
    }
}
