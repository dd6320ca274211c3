use std::sync::Arc;

use chrono::{Duration, Utc};
use lounge_core::error::{Error, Result};
use lounge_core::event::DomainEvent;
use lounge_core::store::Store;
use lounge_core::types::{Report, ReportItemType};
use lounge_notify::Notifier;
use serde::Deserialize;
use uuid::Uuid;

/// Open reports against the same item beyond this count trigger an
/// automatic suspension.
pub const REPORT_THRESHOLD: usize = 4;

/// Length of an automatic or admin-issued suspension.
pub const SUSPEND_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Warn,
    Suspend,
    Block,
    Delete,
}

/// Admin sanctions and the member-facing report pipeline.
pub struct ModerationService {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
}

impl ModerationService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Applies an admin sanction to a member. Only admins may call this;
    /// sanctions against a missing user surface as `NotFound`.
    pub async fn apply(
        &self,
        admin: Uuid,
        action: ModerationAction,
        target: Uuid,
        reason: &str,
    ) -> Result<()> {
        let actor = self.store.user(admin).await?;
        if !actor.is_admin() {
            return Err(Error::forbidden("admin role required"));
        }

        match action {
            ModerationAction::Warn => {
                let mut user = self.store.user(target).await?;
                user.admin_notice = Some(reason.to_string());
                self.store.update_user(user).await?;
                tracing::info!(target = %target, "member warned");
                self.notifier
                    .dispatch(DomainEvent::UserWarned {
                        user_id: target,
                        reason: reason.to_string(),
                    })
                    .await?;
            }
            ModerationAction::Suspend => {
                self.suspend(target, reason).await?;
            }
            ModerationAction::Block => {
                let mut user = self.store.user(target).await?;
                user.is_blocked = true;
                self.store.update_user(user).await?;
                tracing::info!(target = %target, "member account blocked");
            }
            ModerationAction::Delete => {
                self.store.delete_user(target).await?;
                tracing::info!(target = %target, "member account deleted");
            }
        }
        Ok(())
    }

    /// Files a member report. Reports against users feed the automatic
    /// suspension counter; reports against chats and posts only accumulate
    /// for admin review.
    pub async fn file_report(
        &self,
        reporter: Uuid,
        item_type: ReportItemType,
        item_id: &str,
        reason: &str,
    ) -> Result<Report> {
        self.store.user(reporter).await?;
        let report = self
            .store
            .insert_report(reporter, item_type, item_id, reason)
            .await?;
        tracing::info!(
            reporter = %reporter,
            item_type = ?item_type,
            item_id = %item_id,
            "report filed"
        );

        if item_type == ReportItemType::User {
            if let Ok(target) = Uuid::parse_str(item_id) {
                self.maybe_auto_suspend(target).await?;
            }
        }
        Ok(report)
    }

    /// Suspends the target when the open-report count crosses the threshold
    /// and the target is not already serving a suspension. Reports filed
    /// during an active suspension never extend it.
    async fn maybe_auto_suspend(&self, target: Uuid) -> Result<()> {
        let count = self
            .store
            .open_reports_against(ReportItemType::User, &target.to_string())
            .await;
        if count <= REPORT_THRESHOLD {
            return Ok(());
        }
        let user = match self.store.user(target).await {
            Ok(user) => user,
            Err(_) => return Ok(()),
        };
        if user.is_suspended(Utc::now()) {
            return Ok(());
        }
        tracing::warn!(target = %target, reports = count, "report threshold crossed");
        self.suspend(target, "multiple reports from other members")
            .await
    }

    async fn suspend(&self, target: Uuid, reason: &str) -> Result<()> {
        let mut user = self.store.user(target).await?;
        let until = Utc::now() + Duration::days(SUSPEND_DAYS);
        user.suspended_until = Some(until);
        user.admin_notice = Some(reason.to_string());
        self.store.update_user(user).await?;
        tracing::info!(target = %target, until = %until, "member suspended");
        self.notifier
            .dispatch(DomainEvent::UserSuspended {
                user_id: target,
                reason: reason.to_string(),
                until,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lounge_core::types::{NewUser, Role, Tier};
    use lounge_core::MemoryStore;
    use lounge_delivery::{PushMessage, PushOptions, PushProvider};

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

    async fn fixture() -> (Arc<MemoryStore>, ModerationService) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(Notifier::new(store.clone(), Arc::new(SilentPush)));
        let service = ModerationService::new(store.clone(), notifier);
        (store, service)
    }

    async fn user(store: &MemoryStore, name: &str, role: Role) -> Uuid {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                tier: Tier::Free,
                role,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn warn_sets_notice_and_notifies() {
        let (store, service) = fixture().await;
        let admin = user(&store, "admin", Role::Admin).await;
        let target = user(&store, "member", Role::Member).await;

        service
            .apply(admin, ModerationAction::Warn, target, "tone it down")
            .await
            .unwrap();

        let warned = store.user(target).await.unwrap();
        assert_eq!(warned.admin_notice.as_deref(), Some("tone it down"));
        let notifications = store.notifications_for(target, 100).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Account Warning");
    }

    #[tokio::test]
    async fn non_admin_cannot_sanction() {
        let (store, service) = fixture().await;
        let member = user(&store, "member", Role::Member).await;
        let target = user(&store, "target", Role::Member).await;

        let err = service
            .apply(member, ModerationAction::Warn, target, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(store.user(target).await.unwrap().admin_notice.is_none());
    }

    #[tokio::test]
    async fn suspend_sets_expiry_and_notifies() {
        let (store, service) = fixture().await;
        let admin = user(&store, "admin", Role::Admin).await;
        let target = user(&store, "member", Role::Member).await;

        service
            .apply(admin, ModerationAction::Suspend, target, "repeated abuse")
            .await
            .unwrap();

        let suspended = store.user(target).await.unwrap();
        assert!(suspended.is_suspended(Utc::now()));
        let notifications = store.notifications_for(target, 100).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Account Suspended");
    }

    #[tokio::test]
    async fn block_flags_account_without_notifying() {
        let (store, service) = fixture().await;
        let admin = user(&store, "admin", Role::Admin).await;
        let target = user(&store, "member", Role::Member).await;

        service
            .apply(admin, ModerationAction::Block, target, "")
            .await
            .unwrap();

        let blocked = store.user(target).await.unwrap();
        assert!(blocked.is_blocked);
        assert!(store.notifications_for(target, 100).await.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_account() {
        let (store, service) = fixture().await;
        let admin = user(&store, "admin", Role::Admin).await;
        let target = user(&store, "member", Role::Member).await;

        service
            .apply(admin, ModerationAction::Delete, target, "")
            .await
            .unwrap();
        assert!(store.user(target).await.is_err());
    }

    #[tokio::test]
    async fn fifth_report_suspends_and_later_reports_do_not_extend() {
        let (store, service) = fixture().await;
        let target = user(&store, "target", Role::Member).await;
        let mut reporters = Vec::new();
        for i in 0..6 {
            reporters.push(user(&store, &format!("reporter{i}"), Role::Member).await);
        }

        for reporter in reporters.iter().take(4) {
            service
                .file_report(*reporter, ReportItemType::User, &target.to_string(), "spam")
                .await
                .unwrap();
            assert!(!store.user(target).await.unwrap().is_suspended(Utc::now()));
        }

        service
            .file_report(
                reporters[4],
                ReportItemType::User,
                &target.to_string(),
                "spam",
            )
            .await
            .unwrap();
        let suspended = store.user(target).await.unwrap();
        let first_expiry = suspended.suspended_until;
        assert!(suspended.is_suspended(Utc::now()));

        service
            .file_report(
                reporters[5],
                ReportItemType::User,
                &target.to_string(),
                "spam",
            )
            .await
            .unwrap();
        let unchanged = store.user(target).await.unwrap();
        assert_eq!(unchanged.suspended_until, first_expiry);
    }

    #[tokio::test]
    async fn reports_against_posts_never_suspend_anyone() {
        let (store, service) = fixture().await;
        let reporter = user(&store, "reporter", Role::Member).await;
        for _ in 0..6 {
            service
                .file_report(reporter, ReportItemType::Post, "post-77", "offensive")
                .await
                .unwrap();
        }
        assert!(!store.user(reporter).await.unwrap().is_suspended(Utc::now()));
    }
}
