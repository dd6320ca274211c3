use std::sync::Arc;

use anyhow::Result;
use lounge_api::{run as run_api, ApiContext};
use lounge_chat::ChatService;
use lounge_core::{AppContext, Config, MemoryStore, PublicBlobStore};
use lounge_delivery::FcmDelivery;
use lounge_moderation::ModerationService;
use lounge_notify::Notifier;
use lounge_sync::TierSyncService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Lounge Server");

    let config = Config::from_env();

    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(PublicBlobStore::new(&config.blob.public_base_url));
    let push = Arc::new(FcmDelivery::new(&config.delivery)?);
    let webhook_secret = config.webhook.shared_secret.clone();

    let app = AppContext::new(config, store.clone(), blobs.clone());

    let notifier = Arc::new(Notifier::new(store.clone(), push));
    let chat = Arc::new(ChatService::new(store.clone(), blobs, notifier.clone()));
    let sync = Arc::new(TierSyncService::new(
        store.clone(),
        notifier.clone(),
        webhook_secret,
    ));
    let moderation = Arc::new(ModerationService::new(store, notifier.clone()));

    tracing::info!("Lounge context initialized");

    run_api(ApiContext {
        app,
        chat,
        notifier,
        sync,
        moderation,
    })
    .await
}
