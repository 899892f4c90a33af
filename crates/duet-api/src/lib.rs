//! REST surface over the chat store: history, read receipts and unread
//! aggregates. Realtime delivery lives in `duet-gateway`.

pub mod chats;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod state;
pub mod unread;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use crate::state::AppState;

/// All REST routes, behind bearer-token auth.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/with/{user_id}", post(chats::get_or_create_chat))
        .route("/chats/notifications", get(unread::notifications))
        .route("/chats/unread-count", get(unread::unread_count))
        .route("/chats/unread-users-count", get(unread::unread_users_count))
        .route("/chats/unread-messages", get(unread::unread_messages))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route("/chats/{chat_id}/messages", get(chats::get_messages))
        .route("/chats/{chat_id}/read", put(chats::mark_chat_read))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
