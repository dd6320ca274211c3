use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use lounge_chat::ChatService;
use lounge_core::AppContext;
use lounge_moderation::ModerationService;
use lounge_notify::Notifier;
use lounge_sync::TierSyncService;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::auth;
use crate::handlers;

/// Everything a handler needs, constructed once at startup.
#[derive(Clone)]
pub struct ApiContext {
    pub app: AppContext,
    pub chat: Arc<ChatService>,
    pub notifier: Arc<Notifier>,
    pub sync: Arc<TierSyncService>,
    pub moderation: Arc<ModerationService>,
}

pub async fn run(ctx: ApiContext) -> Result<()> {
    let api_port = ctx.app.config.server.api_port;

    // Allow specific origins when CORS_ORIGINS is set, otherwise stay
    // permissive for development.
    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let origin_list: Vec<&str> = origins.split(',').map(|s| s.trim()).collect();
        let mut cors = CorsLayer::new();
        for origin in origin_list {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(true)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
        CorsLayer::permissive()
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/auth/token", post(handlers::auth_token))
        .route("/api/v1/auth/register", post(handlers::register))
        .route("/api/v1/conversations", get(handlers::list_conversations))
        .route("/api/v1/conversations/direct", post(handlers::open_direct))
        .route("/api/v1/conversations/community", get(handlers::community))
        .route("/api/v1/conversations/:id/clear", post(handlers::clear_conversation))
        .route("/api/v1/conversations/:id/mute", post(handlers::toggle_mute))
        .route("/api/v1/conversations/:id/messages", get(handlers::list_messages))
        .route("/api/v1/messages", post(handlers::send_message))
        .route("/api/v1/messages/unread-count", get(handlers::unread_count))
        .route("/api/v1/search", get(handlers::search))
        .route("/api/v1/notifications", get(handlers::list_notifications))
        .route("/api/v1/notifications/:id/read", post(handlers::mark_notification_read))
        .route("/api/v1/webhooks/tier", post(handlers::tier_webhook))
        .route("/api/v1/moderation", post(handlers::apply_moderation))
        .route("/api/v1/reports", post(handlers::file_report))
        .route("/api/v1/admin/users/:id/tier", post(handlers::update_tier))
        .route("/api/v1/device-tokens", post(handlers::register_device_token))
        .route("/api/v1/preferences", post(handlers::update_preferences))
        .route("/api/v1/users/:id/block", post(handlers::block_user))
        .route("/api/v1/users/:id/unblock", post(handlers::unblock_user))
        .route("/api/v1/users/:id/favorite", post(handlers::favorite_user))
        .route("/api/v1/users/:id/unfavorite", post(handlers::unfavorite_user))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(ctx))
                .layer(middleware::from_fn(auth::auth_middleware))
                .layer(cors_layer),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
