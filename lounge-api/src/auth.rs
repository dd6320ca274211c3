use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::server::ApiContext;

/// JWT claims carried by issued tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

/// Identity attached to the request after the token checks out.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

pub fn generate_token(user_id: Uuid, secret: &str, expires_in_days: u64) -> Result<String, StatusCode> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .as_secs() as usize;

    let claims = Claims {
        sub: user_id,
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| {
        tracing::error!("Failed to generate JWT token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());
    let validation = Validation::default();

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(token_data) => Ok(token_data.claims.sub),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// JWT middleware. Health checks, token issue and the CRM webhook ingress
/// carry their own authentication (or none) and are skipped here. Verified
/// requests also refresh the caller's presence signals.
pub async fn auth_middleware(
    mut req: Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/api/v1/auth/") || path.starts_with("/api/v1/webhooks/") {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match extract_token(auth_header) {
        Some(t) => t,
        None => {
            tracing::debug!("Missing Authorization header");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let ctx = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let user_id = verify_token(&token, &ctx.app.config.server.jwt_secret)?;

    let now = Utc::now();
    if let Err(e) = ctx.app.store.touch_last_seen(user_id, now).await {
        tracing::debug!(user_id = %user_id, "presence refresh skipped: {}", e);
    }
    if let Err(e) = ctx.app.store.record_daily_access(user_id, now.date_naive()).await {
        tracing::debug!(user_id = %user_id, "access log skipped: {}", e);
    }

    req.extensions_mut().insert(AuthenticatedUser { user_id });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_the_user_id() {
        let id = Uuid::new_v4();
        let token = generate_token(id, "secret", 7).unwrap();
        assert_eq!(verify_token(&token, "secret").unwrap(), id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_token(Uuid::new_v4(), "secret", 7).unwrap();
        assert_eq!(
            verify_token(&token, "other").unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(extract_token(Some("Bearer abc")), Some("abc".to_string()));
        assert_eq!(extract_token(Some("abc")), None);
        assert_eq!(extract_token(None), None);
    }
}
