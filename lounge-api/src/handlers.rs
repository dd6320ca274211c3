use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use lounge_core::error::Error;
use lounge_core::event::{DomainEvent, TierChangeSource};
use lounge_core::store::{ConversationFilter, StoreError};
use lounge_core::types::{Attachment, MediaKind, NewUser, ReportItemType, Role, Tier, User};
use lounge_moderation::ModerationAction;
use lounge_sync::SyncOutcome;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, AuthenticatedUser};
use crate::server::ApiContext;

const TOKEN_LIFETIME_DAYS: u64 = 30;

/// Maps the error taxonomy onto HTTP statuses with a json error body.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(Error::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "lounge-api"
    }))
}

fn profile_json(user: &User) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "tier": user.tier,
        "role": user.role,
        "admin_notice": user.admin_notice,
        "is_suspended": user.is_suspended(now),
        "suspension_expiry": user.suspended_until,
        "is_blocked": user.is_blocked,
    })
}

fn issue_token(ctx: &ApiContext, user_id: Uuid) -> ApiResult<String> {
    auth::generate_token(
        user_id,
        &ctx.app.config.server.jwt_secret,
        TOKEN_LIFETIME_DAYS,
    )
    .map_err(|_| ApiError(Error::Internal(anyhow::anyhow!("token generation failed"))))
}

// --- auth ---

#[derive(Deserialize)]
pub struct TokenRequest {
    pub email: String,
}

/// Issues a JWT for a known member. Suspension is surfaced in the profile
/// rather than refused; the client decides what to show.
pub async fn auth_token(
    Extension(ctx): Extension<ApiContext>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = ctx
        .app
        .store
        .user_by_email(&req.email)
        .await
        .ok_or_else(|| Error::Unauthorized("unknown email".to_string()))?;

    let token = issue_token(&ctx, user.id)?;

    let now = Utc::now();
    ctx.app.store.touch_last_seen(user.id, now).await?;
    ctx.app.store.record_daily_access(user.id, now.date_naive()).await?;
    tracing::info!(user_id = %user.id, "member logged in");

    Ok(Json(json!({
        "token": token,
        "user": profile_json(&user),
    })))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
}

pub async fn register(
    Extension(ctx): Extension<ApiContext>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.username.trim().is_empty() || !req.email.contains('@') {
        return Err(Error::bad_request("username and a valid email are required").into());
    }

    let user = ctx
        .app
        .store
        .create_user(NewUser {
            username: req.username.trim().to_string(),
            email: req.email.trim().to_string(),
            tier: Tier::Free,
            role: Role::Member,
        })
        .await?;
    tracing::info!(user_id = %user.id, "member registered");

    ctx.notifier
        .dispatch(DomainEvent::UserRegistered {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        })
        .await?;

    let token = issue_token(&ctx, user.id)?;
    Ok(Json(json!({
        "token": token,
        "user": profile_json(&user),
    })))
}

// --- conversations ---

#[derive(Deserialize)]
pub struct ConversationListQuery {
    #[serde(default)]
    pub recipient: Option<Uuid>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub favorites: bool,
}

pub async fn list_conversations(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<ConversationListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = ConversationFilter {
        recipient: params.recipient,
        search: params.search,
        unread_only: params.unread,
        favorites_only: params.favorites,
    };
    let views = ctx.chat.list_conversations(user.user_id, &filter).await?;
    Ok(Json(json!(views)))
}

#[derive(Deserialize)]
pub struct DirectRequest {
    pub user_id: Uuid,
}

pub async fn open_direct(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<DirectRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let conversation = ctx
        .chat
        .get_or_create_direct(user.user_id, req.user_id)
        .await?;
    Ok(Json(json!({"id": conversation.id})))
}

/// The shared community room, gated to STANDARD tier and above.
pub async fn community(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = ctx.app.store.user(user.user_id).await.map_err(Error::from)?;
    if !caller.tier.at_least(Tier::Standard) {
        return Err(Error::forbidden("standard membership required").into());
    }

    let conversation = ctx.chat.get_or_create_public().await?;
    let messages = ctx.chat.list_messages(user.user_id, conversation.id).await?;
    Ok(Json(json!({
        "id": conversation.id,
        "messages": messages,
    })))
}

pub async fn clear_conversation(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.chat.clear(user.user_id, id).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn toggle_mute(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let muted = ctx.chat.toggle_mute(user.user_id, id).await?;
    Ok(Json(json!({"muted": muted})))
}

// --- messages ---

pub async fn list_messages(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let messages = ctx.chat.list_messages(user.user_id, id).await?;
    Ok(Json(json!(messages)))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub recipient_id: Option<Uuid>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachment_reference: Option<String>,
    #[serde(default)]
    pub attachment_kind: Option<MediaKind>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

pub async fn send_message(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let target = match (req.conversation_id, req.recipient_id) {
        (Some(conversation), None) => lounge_chat::SendTarget::Conversation(conversation),
        (None, Some(recipient)) => lounge_chat::SendTarget::Recipient(recipient),
        _ => {
            return Err(Error::bad_request(
                "provide exactly one of conversation_id or recipient_id",
            )
            .into())
        }
    };

    let attachment = match (req.attachment_reference, req.attachment_kind) {
        (Some(reference), Some(kind)) => Some(Attachment { reference, kind }),
        (None, None) => None,
        _ => {
            return Err(
                Error::bad_request("attachment needs both a reference and a kind").into(),
            )
        }
    };

    let view = ctx
        .chat
        .send(user.user_id, target, req.text, attachment, req.reply_to)
        .await?;
    Ok(Json(json!(view)))
}

pub async fn unread_count(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let unread = ctx.chat.unread_count(user.user_id).await?;
    Ok(Json(json!({"unread": unread})))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

pub async fn search(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let results = ctx.chat.search(user.user_id, &params.q).await?;
    Ok(Json(json!(results)))
}

// --- notifications ---

pub async fn list_notifications(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let notifications = ctx.notifier.list(user.user_id).await;
    Ok(Json(json!(notifications)))
}

pub async fn mark_notification_read(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let notification = ctx.notifier.mark_read(id, user.user_id).await?;
    Ok(Json(json!(notification)))
}

// --- webhook ingress ---

#[derive(Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub secret: Option<String>,
}

/// CRM tier webhook. The shared secret arrives either as an
/// `X-Webhook-Secret` header or a `secret` query parameter.
pub async fn tier_webhook(
    Extension(ctx): Extension<ApiContext>,
    Query(params): Query<WebhookQuery>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let header_secret = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let secret = header_secret.or(params.secret);

    let outcome = ctx.sync.handle_webhook(&payload, secret.as_deref()).await?;
    let body = match outcome {
        SyncOutcome::Updated { new_tier, .. } => {
            json!({"updated": true, "new_tier": new_tier})
        }
        SyncOutcome::NoChange => json!({"updated": false, "status": "no_change"}),
        SyncOutcome::Ignored => json!({"updated": false, "status": "ignored"}),
    };
    Ok(Json(body))
}

// --- moderation ---

#[derive(Deserialize)]
pub struct ModerationRequest {
    pub action: ModerationAction,
    pub target: Uuid,
    #[serde(default)]
    pub reason: String,
}

pub async fn apply_moderation(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ModerationRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.moderation
        .apply(user.user_id, req.action, req.target, &req.reason)
        .await?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct ReportRequest {
    pub item_type: ReportItemType,
    pub item_id: String,
    pub reason: String,
}

pub async fn file_report(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let report = ctx
        .moderation
        .file_report(user.user_id, req.item_type, &req.item_id, &req.reason)
        .await?;
    Ok(Json(json!(report)))
}

// --- admin ---

#[derive(Deserialize)]
pub struct TierUpdateRequest {
    pub tier: Tier,
}

pub async fn update_tier(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<TierUpdateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = ctx.app.store.user(user.user_id).await.map_err(Error::from)?;
    if !caller.is_admin() {
        return Err(Error::forbidden("admin role required").into());
    }

    let target = ctx.app.store.user(id).await.map_err(Error::from)?;
    if target.tier == req.tier {
        return Ok(Json(json!({"status": "unchanged"})));
    }

    ctx.app.store.set_tier(id, req.tier).await?;
    ctx.notifier
        .dispatch(DomainEvent::TierChanged {
            user_id: id,
            new_tier: req.tier,
            source: TierChangeSource::Admin,
        })
        .await?;
    Ok(Json(json!({"status": "updated"})))
}

// --- account settings ---

#[derive(Deserialize)]
pub struct DeviceTokenRequest {
    pub token: String,
}

pub async fn register_device_token(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<DeviceTokenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut account = ctx.app.store.user(user.user_id).await.map_err(Error::from)?;
    account.push_token = Some(req.token);
    ctx.app.store.update_user(account).await?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct PreferencesRequest {
    pub read_receipts_enabled: bool,
}

pub async fn update_preferences(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<PreferencesRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut account = ctx.app.store.user(user.user_id).await.map_err(Error::from)?;
    account.read_receipts_enabled = req.read_receipts_enabled;
    ctx.app.store.update_user(account).await?;
    Ok(Json(json!({"read_receipts_enabled": req.read_receipts_enabled})))
}

// --- social edges ---

pub async fn block_user(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if id == user.user_id {
        return Err(Error::bad_request("cannot block yourself").into());
    }
    ctx.app.store.block_user(user.user_id, id).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn unblock_user(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.app.store.unblock_user(user.user_id, id).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn favorite_user(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if id == user.user_id {
        return Err(Error::bad_request("cannot favorite yourself").into());
    }
    ctx.app.store.favorite_user(user.user_id, id).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn unfavorite_user(
    Extension(ctx): Extension<ApiContext>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.app.store.unfavorite_user(user.user_id, id).await?;
    Ok(Json(json!({"status": "ok"})))
}
