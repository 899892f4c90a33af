use axum::{Extension, Json, extract::State, response::IntoResponse};

use duet_types::api::{
    ApiResponse, NotificationsResponse, UnreadCountResponse, UnreadMessagesResponse,
    UnreadUsersCountResponse,
};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::{AppState, blocking};

/// `GET /chats/notifications`
pub async fn notifications(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (notifications, total_unread) = blocking(&state, move |db| {
        Ok((db.unread_notifications(user_id)?, db.total_unread_count(user_id)?))
    })
    .await?;

    Ok(Json(ApiResponse::new(
        "Notifications retrieved successfully",
        NotificationsResponse {
            notification_count: notifications.len(),
            notifications,
            total_unread,
        },
    )))
}

/// `GET /chats/unread-count`
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let unread_count = blocking(&state, move |db| Ok(db.total_unread_count(user_id)?)).await?;
    Ok(Json(ApiResponse::new(
        "Unread count retrieved successfully",
        UnreadCountResponse { unread_count },
    )))
}

/// `GET /chats/unread-users-count`
pub async fn unread_users_count(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let unread_users_count = blocking(&state, move |db| Ok(db.unread_users_count(user_id)?)).await?;
    Ok(Json(ApiResponse::new(
        "Unread users count retrieved successfully",
        UnreadUsersCountResponse { unread_users_count },
    )))
}

/// `GET /chats/unread-messages` — unread counts grouped by sender.
pub async fn unread_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let unread_messages = blocking(&state, move |db| Ok(db.unread_counts_by_sender(user_id)?)).await?;
    let total_count = unread_messages.iter().map(|u| u.unread_count).sum();

    Ok(Json(ApiResponse::new(
        "Unread messages count retrieved successfully",
        UnreadMessagesResponse {
            unread_messages,
            total_count,
        },
    )))
}
