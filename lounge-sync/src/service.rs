use std::sync::Arc;

use lounge_core::error::{Error, Result};
use lounge_core::event::{DomainEvent, TierChangeSource};
use lounge_core::store::Store;
use lounge_core::types::Tier;
use lounge_notify::Notifier;
use serde_json::Value;
use uuid::Uuid;

use crate::extract::{collect_labels, find_email, resolve_tier};

/// What a webhook delivery amounted to. Replays and unknown members are
/// acknowledged without side effects so the sender never retries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated { user_id: Uuid, new_tier: Tier },
    NoChange,
    Ignored,
}

/// Applies membership-tier changes pushed by the external CRM.
pub struct TierSyncService {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    shared_secret: String,
}

impl TierSyncService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>, shared_secret: String) -> Self {
        Self {
            store,
            notifier,
            shared_secret,
        }
    }

    /// Ingests one webhook delivery. The caller passes whatever secret the
    /// request carried; a missing or wrong secret is rejected before the
    /// payload is looked at.
    pub async fn handle_webhook(
        &self,
        payload: &Value,
        provided_secret: Option<&str>,
    ) -> Result<SyncOutcome> {
        let provided = provided_secret.unwrap_or("");
        if !constant_time_eq(provided.as_bytes(), self.shared_secret.as_bytes()) {
            tracing::warn!("tier webhook rejected: bad shared secret");
            return Err(Error::Unauthorized("invalid webhook secret".to_string()));
        }

        let email = find_email(payload)
            .ok_or_else(|| Error::bad_request("no email address in webhook payload"))?;
        let labels = collect_labels(payload);
        let tier = resolve_tier(&labels);

        let user = match self.store.user_by_email(&email).await {
            Some(user) => user,
            None => {
                tracing::info!(email = %email, "tier webhook for unknown member, ignoring");
                return Ok(SyncOutcome::Ignored);
            }
        };

        if user.tier == tier {
            return Ok(SyncOutcome::NoChange);
        }

        let previous = user.tier;
        self.store.set_tier(user.id, tier).await?;
        tracing::info!(
            user_id = %user.id,
            from = previous.as_str(),
            to = tier.as_str(),
            "membership tier synced from webhook"
        );
        self.notifier
            .dispatch(DomainEvent::TierChanged {
                user_id: user.id,
                new_tier: tier,
                source: TierChangeSource::Webhook,
            })
            .await?;

        Ok(SyncOutcome::Updated {
            user_id: user.id,
            new_tier: tier,
        })
    }
}

/// Compares secrets without short-circuiting on the first mismatched byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lounge_core::types::{NewUser, Role};
    use lounge_core::MemoryStore;
    use lounge_delivery::{PushMessage, PushOptions, PushProvider};
    use serde_json::json;

    struct SilentPush;

    #[async_trait]
    impl PushProvider for SilentPush {
        async fn send_to_token(
            &self,
            _token: &str,
            _message: &PushMessage,
            _options: &PushOptions,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_to_topic(
            &self,
            _topic: &str,
            _message: &PushMessage,
            _options: &PushOptions,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    const SECRET: &str = "test-secret";

    async fn fixture() -> (Arc<MemoryStore>, TierSyncService) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(Notifier::new(store.clone(), Arc::new(SilentPush)));
        let sync = TierSyncService::new(store.clone(), notifier, SECRET.to_string());
        (store, sync)
    }

    async fn member(store: &MemoryStore, email: &str) -> Uuid {
        let user = store
            .create_user(NewUser {
                username: email.split('@').next().unwrap().to_string(),
                email: email.to_string(),
                tier: Tier::Free,
                role: Role::Member,
            })
            .await
            .unwrap();
        user.id
    }

    #[tokio::test]
    async fn nested_contact_payload_upgrades_member() {
        let (store, sync) = fixture().await;
        let id = member(&store, "nested@example.com").await;
        let payload = json!({
            "data": {
                "contact": {
                    "emails": [{"email": "nested@example.com"}],
                    "labels": ["PREMIUM member"]
                }
            }
        });
        let outcome = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                user_id: id,
                new_tier: Tier::Premium
            }
        );
        let user = store.user(id).await.unwrap();
        assert_eq!(user.tier, Tier::Premium);
    }

    #[tokio::test]
    async fn flat_payload_with_label_keys_resolves_premium() {
        let (store, sync) = fixture().await;
        member(&store, "x@y.com").await;
        let payload = json!({
            "emails": [{"email": "x@y.com"}],
            "labelKeys": ["premium_member"]
        });
        let outcome = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Updated {
                new_tier: Tier::Premium,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn premium_wins_when_both_labels_present() {
        let (store, sync) = fixture().await;
        member(&store, "both@example.com").await;
        let payload = json!({
            "emailAddress": "both@example.com",
            "labels": ["standard_member", "premium_member"]
        });
        let outcome = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Updated {
                new_tier: Tier::Premium,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn replay_is_a_no_op_and_notifies_once() {
        let (store, sync) = fixture().await;
        let id = member(&store, "replay@example.com").await;
        let payload = json!({
            "emailAddress": "replay@example.com",
            "labels": ["standard_member"]
        });
        let first = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert!(matches!(first, SyncOutcome::Updated { .. }));
        let second = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert_eq!(second, SyncOutcome::NoChange);

        let notifications = store.notifications_for(id, 100).await;
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn bad_or_missing_secret_is_rejected() {
        let (store, sync) = fixture().await;
        member(&store, "secure@example.com").await;
        let payload = json!({"emailAddress": "secure@example.com", "labels": ["PREMIUM"]});

        let err = sync.handle_webhook(&payload, Some("wrong")).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let err = sync.handle_webhook(&payload, None).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let user = store
            .user_by_email("secure@example.com")
            .await
            .unwrap();
        assert_eq!(user.tier, Tier::Free);
    }

    #[tokio::test]
    async fn payload_without_email_is_bad_request() {
        let (_store, sync) = fixture().await;
        let payload = json!({"labels": ["PREMIUM"]});
        let err = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_member_is_acknowledged_but_ignored() {
        let (_store, sync) = fixture().await;
        let payload = json!({"emailAddress": "stranger@example.com", "labels": ["PREMIUM"]});
        let outcome = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Ignored);
    }

    #[tokio::test]
    async fn unlabelled_payload_downgrades_to_free() {
        let (store, sync) = fixture().await;
        let id = member(&store, "down@example.com").await;
        store.set_tier(id, Tier::Premium).await.unwrap();

        let payload = json!({"emailAddress": "down@example.com", "labels": ["newsletter"]});
        let outcome = sync.handle_webhook(&payload, Some(SECRET)).await.unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Updated {
                new_tier: Tier::Free,
                ..
            }
        ));
    }
}
