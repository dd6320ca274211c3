use chrono::Utc;
use lounge_core::error::Result;
use lounge_core::event::{DomainEvent, TierChangeSource};
use lounge_core::store::Store;
use lounge_core::types::Notification;
use lounge_core::Error;
use lounge_delivery::{PushMessage, PushOptions, PushProvider};
use serde_json::json;
use std::sync::Arc;
use tracing;
use uuid::Uuid;

/// Carried in every push data payload so the mobile client routes taps.
const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

/// Grouping tag for story pushes: repeated story notifications replace each
/// other on the device instead of stacking.
const STORY_TAG: &str = "stories";

const LIST_CAP: usize = 100;

/// Notification fan-out. Records are persisted synchronously; push delivery
/// is isolated so a provider failure never reaches the triggering write.
pub struct Notifier {
    store: Arc<dyn Store>,
    push: Arc<dyn PushProvider>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, push: Arc<dyn PushProvider>) -> Self {
        Self { store, push }
    }

    /// Persist a notification for one recipient and attempt push delivery.
    /// Delivery failures are logged and swallowed; the persisted record is
    /// never rolled back.
    pub async fn notify(
        &self,
        recipient: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
        options: &PushOptions,
    ) -> Result<Notification> {
        let notification = self
            .store
            .insert_notification(recipient, kind, title, body, data.clone())
            .await?;

        self.deliver(recipient, &notification, options).await;
        Ok(notification)
    }

    /// Apply `notify` to each recipient independently. One recipient's
    /// failure never blocks or fails the others; failures aggregate into the
    /// log. Returns the number of persisted notifications.
    pub async fn notify_broadcast(
        &self,
        recipients: &[Uuid],
        kind: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
        options: &PushOptions,
    ) -> usize {
        let mut persisted = 0;
        for recipient in recipients {
            match self
                .notify(*recipient, kind, title, body, data.clone(), options)
                .await
            {
                Ok(_) => persisted += 1,
                Err(e) => {
                    tracing::warn!("Broadcast notify failed for {}: {}", recipient, e);
                }
            }
        }
        persisted
    }

    /// Topic delivery through the push provider. No per-user records; same
    /// failure isolation as token delivery.
    pub async fn notify_topic(&self, topic: &str, title: &str, body: &str, options: &PushOptions) {
        let message = PushMessage::new(title, body, json!({ "click_action": CLICK_ACTION }));
        if let Err(e) = self.push.send_to_topic(topic, &message, options).await {
            tracing::warn!("Topic push to {} failed: {}", topic, e);
        }
    }

    pub async fn list(&self, recipient: Uuid) -> Vec<Notification> {
        self.store.notifications_for(recipient, LIST_CAP).await
    }

    /// Idempotent: marking an already-read notification succeeds.
    pub async fn mark_read(&self, id: Uuid, recipient: Uuid) -> Result<Notification> {
        let notification = self.store.notification(id).await?;
        if notification.recipient_id != recipient {
            return Err(Error::forbidden("notification belongs to another user"));
        }
        if notification.is_read {
            return Ok(notification);
        }
        self.store.set_notification_read(id).await?;
        Ok(Notification {
            is_read: true,
            ..notification
        })
    }

    /// Consume a typed domain event. Each mutating operation calls this
    /// explicitly after its write; there are no implicit persistence hooks.
    pub async fn dispatch(&self, event: DomainEvent) -> Result<()> {
        match event {
            DomainEvent::MessageSent {
                conversation_id,
                sender_id,
                sender_name,
                recipient_id,
                preview,
            } => {
                if recipient_id == sender_id {
                    return Ok(());
                }
                if self.store.is_muted(recipient_id, conversation_id).await {
                    tracing::debug!(
                        "Conversation {} muted by {}, skipping push",
                        conversation_id,
                        recipient_id
                    );
                    return Ok(());
                }
                self.notify(
                    recipient_id,
                    "message.sent",
                    "New Message",
                    &format!("{}: {}", sender_name, preview),
                    Some(json!({
                        "click_action": CLICK_ACTION,
                        "conversation_id": conversation_id,
                        "type": "chat_message",
                    })),
                    &PushOptions::default(),
                )
                .await?;
            }
            DomainEvent::ContentLiked { owner_id, liker_name } => {
                self.notify(
                    owner_id,
                    "content.liked",
                    "New Like",
                    &format!("{} liked your post", liker_name),
                    Some(json!({ "click_action": CLICK_ACTION })),
                    &PushOptions::default(),
                )
                .await?;
            }
            DomainEvent::ContentCommented {
                owner_id,
                commenter_name,
            } => {
                self.notify(
                    owner_id,
                    "content.commented",
                    "New Comment",
                    &format!("{} commented on your post", commenter_name),
                    Some(json!({ "click_action": CLICK_ACTION })),
                    &PushOptions::default(),
                )
                .await?;
            }
            DomainEvent::ContentApproved { title } => {
                let recipients = self.active_users(None).await;
                self.notify_broadcast(
                    &recipients,
                    "content.approved",
                    "New Content",
                    &format!("{} is now live", title),
                    Some(json!({ "click_action": CLICK_ACTION })),
                    &PushOptions::default(),
                )
                .await;
            }
            DomainEvent::StoryPosted {
                author_id,
                author_name,
            } => {
                let recipients = self.active_users(Some(author_id)).await;
                self.notify_broadcast(
                    &recipients,
                    "story.posted",
                    "New Story",
                    &format!("{} posted a story", author_name),
                    Some(json!({ "click_action": CLICK_ACTION, "type": "story" })),
                    &PushOptions {
                        collapse_tag: Some(STORY_TAG.to_string()),
                        ..Default::default()
                    },
                )
                .await;
            }
            DomainEvent::UserRegistered {
                username, email, ..
            } => {
                let admins: Vec<Uuid> = self.store.admins().await.iter().map(|a| a.id).collect();
                self.notify_broadcast(
                    &admins,
                    "user.registered",
                    "New User Registration",
                    &format!("New user joined: {} ({})", username, email),
                    None,
                    &PushOptions::default(),
                )
                .await;
            }
            DomainEvent::UserWarned { user_id, reason } => {
                self.notify(
                    user_id,
                    "moderation.warned",
                    "Account Warning",
                    &reason,
                    None,
                    &PushOptions::default(),
                )
                .await?;
            }
            DomainEvent::UserSuspended {
                user_id,
                reason,
                until,
            } => {
                self.notify(
                    user_id,
                    "moderation.suspended",
                    "Account Suspended",
                    &format!(
                        "Your account is suspended until {}: {}",
                        until.format("%Y-%m-%d"),
                        reason
                    ),
                    None,
                    &PushOptions::default(),
                )
                .await?;
            }
            DomainEvent::TierChanged {
                user_id,
                new_tier,
                source,
            } => {
                let body = match source {
                    TierChangeSource::Webhook => format!(
                        "Your membership was synced to {}",
                        new_tier.as_str()
                    ),
                    TierChangeSource::Admin => {
                        format!("Your membership tier is now {}", new_tier.as_str())
                    }
                };
                self.notify(
                    user_id,
                    "tier.changed",
                    "Membership Updated",
                    &body,
                    Some(json!({ "new_tier": new_tier })),
                    &PushOptions::default(),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn active_users(&self, except: Option<Uuid>) -> Vec<Uuid> {
        let now = Utc::now();
        self.store
            .users()
            .await
            .iter()
            .filter(|u| u.is_active(now) && Some(u.id) != except)
            .map(|u| u.id)
            .collect()
    }

    async fn deliver(&self, recipient: Uuid, notification: &Notification, options: &PushOptions) {
        let user = match self.store.user(recipient).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!("Skipping push, recipient {} unavailable: {}", recipient, e);
                return;
            }
        };
        let Some(token) = user.push_token else {
            tracing::debug!("Skipping push: no device token for {}", user.username);
            return;
        };

        let data = notification.data.clone().unwrap_or_else(|| {
            json!({ "click_action": CLICK_ACTION, "id": notification.id })
        });
        let message = PushMessage::new(&notification.title, &notification.body, data);
        if let Err(e) = self.push.send_to_token(&token, &message, options).await {
            tracing::warn!("Push delivery to {} failed: {}", user.username, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Duration;
    use lounge_core::types::{NewUser, Role, Tier};
    use lounge_core::MemoryStore;
    use lounge_delivery::PushPriority;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPush {
        sent: Mutex<Vec<(String, PushMessage, PushOptions)>>,
        fail_tokens: Mutex<Vec<String>>,
        fail_topics: Mutex<Vec<String>>,
    }

    impl RecordingPush {
        fn fail_for(&self, token: &str) {
            self.fail_tokens.lock().unwrap().push(token.to_string());
        }

        fn fail_for_topic(&self, topic: &str) {
            self.fail_topics.lock().unwrap().push(topic.to_string());
        }

        fn sent_to(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _, _)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PushProvider for RecordingPush {
        async fn send_to_token(
            &self,
            token: &str,
            message: &PushMessage,
            options: &PushOptions,
        ) -> anyhow::Result<()> {
            if self.fail_tokens.lock().unwrap().iter().any(|t| t == token) {
                return Err(anyhow!("provider rejected token"));
            }
            self.sent.lock().unwrap().push((
                token.to_string(),
                message.clone(),
                options.clone(),
            ));
            Ok(())
        }

        async fn send_to_topic(
            &self,
            topic: &str,
            message: &PushMessage,
            options: &PushOptions,
        ) -> anyhow::Result<()> {
            if self.fail_topics.lock().unwrap().iter().any(|t| t == topic) {
                return Err(anyhow!("provider rejected topic"));
            }
            self.sent.lock().unwrap().push((
                format!("/topics/{}", topic),
                message.clone(),
                options.clone(),
            ));
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        push: Arc<RecordingPush>,
        notifier: Notifier,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(RecordingPush::default());
        let notifier = Notifier::new(store.clone(), push.clone());
        Fixture {
            store,
            push,
            notifier,
        }
    }

    async fn user_with_token(fx: &Fixture, name: &str, role: Role) -> Uuid {
        let user = fx
            .store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                tier: Tier::Free,
                role,
            })
            .await
            .unwrap();
        let mut user = fx.store.user(user.id).await.unwrap();
        user.push_token = Some(format!("token-{name}"));
        fx.store.update_user(user.clone()).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn delivery_failure_never_rolls_back_the_record() {
        let fx = fixture();
        let user = user_with_token(&fx, "ada", Role::Member).await;
        fx.push.fail_for("token-ada");

        let notification = fx
            .notifier
            .notify(user, "test", "Title", "Body", None, &PushOptions::default())
            .await
            .unwrap();

        assert!(!notification.is_read);
        assert_eq!(fx.notifier.list(user).await.len(), 1);
        assert!(fx.push.sent_to().is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_skipped_quietly() {
        let fx = fixture();
        let user = fx
            .store
            .create_user(NewUser {
                username: "no-token".into(),
                email: "no-token@example.com".into(),
                tier: Tier::Free,
                role: Role::Member,
            })
            .await
            .unwrap();

        fx.notifier
            .notify(user.id, "test", "Title", "Body", None, &PushOptions::default())
            .await
            .unwrap();

        assert_eq!(fx.notifier.list(user.id).await.len(), 1);
        assert!(fx.push.sent_to().is_empty());
    }

    #[tokio::test]
    async fn broadcast_isolates_per_recipient_failures() {
        let fx = fixture();
        let a = user_with_token(&fx, "a", Role::Member).await;
        let b = user_with_token(&fx, "b", Role::Member).await;
        let c = user_with_token(&fx, "c", Role::Member).await;
        fx.push.fail_for("token-b");

        let persisted = fx
            .notifier
            .notify_broadcast(
                &[a, b, c],
                "test",
                "Title",
                "Body",
                None,
                &PushOptions::default(),
            )
            .await;

        assert_eq!(persisted, 3);
        assert_eq!(fx.notifier.list(b).await.len(), 1);
        let delivered = fx.push.sent_to();
        assert!(delivered.contains(&"token-a".to_string()));
        assert!(delivered.contains(&"token-c".to_string()));
        assert!(!delivered.contains(&"token-b".to_string()));
    }

    #[tokio::test]
    async fn muted_conversations_suppress_message_notifications() {
        let fx = fixture();
        let sender = user_with_token(&fx, "sender", Role::Member).await;
        let recipient = user_with_token(&fx, "recipient", Role::Member).await;
        let conversation = fx.store.create_direct(sender, recipient).await.unwrap();
        fx.store.toggle_mute(recipient, conversation.id).await.unwrap();

        fx.notifier
            .dispatch(DomainEvent::MessageSent {
                conversation_id: conversation.id,
                sender_id: sender,
                sender_name: "sender".into(),
                recipient_id: recipient,
                preview: "hi".into(),
            })
            .await
            .unwrap();

        assert!(fx.notifier.list(recipient).await.is_empty());
        assert!(fx.push.sent_to().is_empty());
    }

    #[tokio::test]
    async fn story_pushes_carry_the_grouping_tag_and_skip_author() {
        let fx = fixture();
        let author = user_with_token(&fx, "author", Role::Member).await;
        let viewer = user_with_token(&fx, "viewer", Role::Member).await;

        fx.notifier
            .dispatch(DomainEvent::StoryPosted {
                author_id: author,
                author_name: "author".into(),
            })
            .await
            .unwrap();

        assert!(fx.notifier.list(author).await.is_empty());
        assert_eq!(fx.notifier.list(viewer).await.len(), 1);
        let sent = fx.push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2.collapse_tag.as_deref(), Some(STORY_TAG));
    }

    #[tokio::test]
    async fn registration_notifies_every_admin() {
        let fx = fixture();
        let admin_a = user_with_token(&fx, "admin-a", Role::Admin).await;
        let admin_b = user_with_token(&fx, "admin-b", Role::Admin).await;
        let member = user_with_token(&fx, "member", Role::Member).await;

        fx.notifier
            .dispatch(DomainEvent::UserRegistered {
                user_id: member,
                username: "member".into(),
                email: "member@example.com".into(),
            })
            .await
            .unwrap();

        assert_eq!(fx.notifier.list(admin_a).await.len(), 1);
        assert_eq!(fx.notifier.list(admin_b).await.len(), 1);
        assert!(fx.notifier.list(member).await.is_empty());
        let body = &fx.notifier.list(admin_a).await[0].body;
        assert_eq!(body, "New user joined: member (member@example.com)");
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_owner_scoped() {
        let fx = fixture();
        let owner = user_with_token(&fx, "owner", Role::Member).await;
        let other = user_with_token(&fx, "other", Role::Member).await;
        let notification = fx
            .notifier
            .notify(owner, "test", "Title", "Body", None, &PushOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            fx.notifier.mark_read(notification.id, other).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.notifier.mark_read(Uuid::new_v4(), owner).await,
            Err(Error::NotFound(_))
        ));

        let first = fx.notifier.mark_read(notification.id, owner).await.unwrap();
        let second = fx.notifier.mark_read(notification.id, owner).await.unwrap();
        assert!(first.is_read && second.is_read);
    }

    #[tokio::test]
    async fn topic_push_failure_is_swallowed() {
        let fx = fixture();
        fx.push.fail_for_topic("announcements");

        fx.notifier
            .notify_topic("announcements", "Title", "Body", &PushOptions::default())
            .await;

        assert!(fx.push.sent_to().is_empty());
    }

    #[tokio::test]
    async fn topic_delivery_passes_options_through() {
        let fx = fixture();
        let options = PushOptions {
            sound: Some("default".into()),
            priority: Some(PushPriority::High),
            badge: None,
            collapse_tag: Some("announcements".into()),
        };

        fx.notifier
            .notify_topic("updates", "Title", "Body", &options)
            .await;

        let sent = fx.push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "/topics/updates");
        assert_eq!(sent[0].1.data["click_action"], CLICK_ACTION);
        assert_eq!(sent[0].2.priority, Some(PushPriority::High));
        assert_eq!(sent[0].2.collapse_tag.as_deref(), Some("announcements"));
    }

    #[tokio::test]
    async fn likes_and_comments_notify_the_content_owner() {
        let fx = fixture();
        let owner = user_with_token(&fx, "owner", Role::Member).await;

        fx.notifier
            .dispatch(DomainEvent::ContentLiked {
                owner_id: owner,
                liker_name: "fan".into(),
            })
            .await
            .unwrap();
        fx.notifier
            .dispatch(DomainEvent::ContentCommented {
                owner_id: owner,
                commenter_name: "critic".into(),
            })
            .await
            .unwrap();

        let inbox = fx.notifier.list(owner).await;
        assert_eq!(inbox.len(), 2);
        assert!(inbox
            .iter()
            .any(|n| n.title == "New Like" && n.body == "fan liked your post"));
        assert!(inbox
            .iter()
            .any(|n| n.title == "New Comment" && n.body == "critic commented on your post"));
        assert_eq!(fx.push.sent_to().len(), 2);
    }

    #[tokio::test]
    async fn approved_content_reaches_active_users_only() {
        let fx = fixture();
        let active = user_with_token(&fx, "active", Role::Member).await;
        let benched = user_with_token(&fx, "benched", Role::Member).await;
        let mut suspended = fx.store.user(benched).await.unwrap();
        suspended.suspended_until = Some(Utc::now() + Duration::days(3));
        fx.store.update_user(suspended).await.unwrap();

        fx.notifier
            .dispatch(DomainEvent::ContentApproved {
                title: "Spring Gala".into(),
            })
            .await
            .unwrap();

        let inbox = fx.notifier.list(active).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].body, "Spring Gala is now live");
        assert!(fx.notifier.list(benched).await.is_empty());
    }

    #[tokio::test]
    async fn tier_change_body_names_the_source() {
        let fx = fixture();
        let member = user_with_token(&fx, "member", Role::Member).await;

        fx.notifier
            .dispatch(DomainEvent::TierChanged {
                user_id: member,
                new_tier: Tier::Premium,
                source: TierChangeSource::Webhook,
            })
            .await
            .unwrap();
        fx.notifier
            .dispatch(DomainEvent::TierChanged {
                user_id: member,
                new_tier: Tier::Standard,
                source: TierChangeSource::Admin,
            })
            .await
            .unwrap();

        let inbox = fx.notifier.list(member).await;
        assert!(inbox
            .iter()
            .any(|n| n.body == "Your membership was synced to PREMIUM"));
        assert!(inbox
            .iter()
            .any(|n| n.body == "Your membership tier is now STANDARD"));
    }
}
