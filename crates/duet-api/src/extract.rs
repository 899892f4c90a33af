//! Path extractors that reject with the JSON error body instead of axum's
//! plain-text rejection.

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use duet_types::models::{ChatId, UserId};

use crate::error::ApiError;

/// `{chat_id}` path segment. Must be a positive integer.
#[derive(Debug, Clone, Copy)]
pub struct ChatIdPath(pub ChatId);

/// `{user_id}` path segment. Must be a positive integer.
#[derive(Debug, Clone, Copy)]
pub struct UserIdPath(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for ChatIdPath {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        positive_id(parts, state, "Invalid chat ID").await.map(Self)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for UserIdPath {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        positive_id(parts, state, "Invalid user ID").await.map(Self)
    }
}

async fn positive_id<S: Send + Sync>(
    parts: &mut Parts,
    state: &S,
    reason: &str,
) -> Result<u64, ApiError> {
    let Path(raw) = Path::<String>::from_request_parts(parts, state)
        .await
        .map_err(|_| ApiError::BadRequest(reason.into()))?;
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::BadRequest(reason.into())),
    }
}
