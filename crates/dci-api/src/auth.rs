//! Caller authentication.
//!
//! Requests carry `Authorization: Bearer <token>`. The token's SHA-256 is
//! looked up among users and turned into a [`Caller`].

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use dci_core::{Caller, Role};
use dci_db::hash_token;

use crate::AppState;
use crate::error::ApiError;

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Caller);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let user = state
            .users
            .find_by_token_hash(&hash_token(token))
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;

        let role = Role::parse(&user.role).ok_or_else(|| {
            ApiError::Internal(format!("user {} has unknown role '{}'", user.id, user.role))
        })?;

        Ok(Authenticated(Caller {
            user_id: user.id,
            team_id: user.team_id,
            role,
        }))
    }
}
