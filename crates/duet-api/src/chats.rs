use axum::{
    Extension, Json,
    extract::{Query, State, rejection::QueryRejection},
    response::IntoResponse,
};

use duet_types::api::{ApiResponse, MessagesPage, PageQuery};
use duet_types::store::ChatStore;

use crate::error::ApiError;
use crate::extract::{ChatIdPath, UserIdPath};
use crate::middleware::AuthUser;
use crate::state::{AppState, blocking};

/// `POST /chats/with/{user_id}`
pub async fn get_or_create_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    UserIdPath(other_id): UserIdPath,
) -> Result<impl IntoResponse, ApiError> {
    let chat = blocking(&state, move |db| Ok(db.get_or_create_chat(user_id, other_id)?)).await?;
    Ok(Json(ApiResponse::new("Chat retrieved successfully", chat)))
}

/// `GET /chats`
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = blocking(&state, move |db| Ok(db.list_user_chats(user_id)?)).await?;
    Ok(Json(ApiResponse::new("Chats retrieved successfully", chats)))
}

/// `GET /chats/{chat_id}`
pub async fn get_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ChatIdPath(chat_id): ChatIdPath,
) -> Result<impl IntoResponse, ApiError> {
    let chat = blocking(&state, move |db| Ok(db.get_chat(chat_id, user_id)?)).await?;
    Ok(Json(ApiResponse::new("Chat retrieved successfully", chat)))
}

/// `GET /chats/{chat_id}/messages?page=&limit=` — newest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ChatIdPath(chat_id): ChatIdPath,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let (page, limit, offset) = (query.page(), query.limit(), query.offset());

    let messages = blocking(&state, move |db| {
        Ok(db.get_chat_messages(chat_id, user_id, offset, limit)?)
    })
    .await?;

    Ok(Json(ApiResponse::new(
        "Messages retrieved successfully",
        MessagesPage {
            messages,
            page,
            limit,
        },
    )))
}

/// `PUT /chats/{chat_id}/read`
pub async fn mark_chat_read(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ChatIdPath(chat_id): ChatIdPath,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |db| Ok(db.mark_read(chat_id, user_id)?)).await?;
    Ok(Json(ApiResponse::new("Messages marked as read", ())))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use duet_db::Database;
    use duet_gateway::auth::JwtKeys;
    use duet_types::models::UserId;

    use crate::routes;
    use crate::state::AppStateInner;

    use super::*;

    struct Api {
        db: Arc<Database>,
        keys: Arc<JwtKeys>,
        state: AppState,
    }

    impl Api {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let keys = Arc::new(JwtKeys::new("test-secret"));
            let state = Arc::new(AppStateInner {
                db: db.clone(),
                verifier: keys.clone(),
            });
            Self { db, keys, state }
        }

        async fn call(&self, method: Method, uri: &str, user_id: Option<UserId>) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(user_id) = user_id {
                let token = self.keys.issue(user_id).unwrap();
                req = req.header("authorization", format!("Bearer {}", token));
            }
            let resp = routes(self.state.clone())
                .oneshot(req.body(Body::empty()).unwrap())
                .await
                .unwrap();
            let status = resp.status();
            let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&body).unwrap()
            };
            (status, json)
        }
    }

    #[tokio::test]
    async fn requests_without_valid_token_are_rejected() {
        let api = Api::new();
        let (status, _) = api.call(Method::GET, "/chats", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let resp = routes(api.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/chats")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn get_or_create_is_symmetric() {
        let api = Api::new();
        let (status, a) = api.call(Method::POST, "/chats/with/7", Some(5)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, b) = api.call(Method::POST, "/chats/with/5", Some(7)).await;

        assert_eq!(a["data"]["id"], b["data"]["id"]);
        assert_eq!(a["data"]["user1_id"], 5);
        assert_eq!(a["data"]["user2_id"], 7);

        let (status, body) = api.call(Method::POST, "/chats/with/5", Some(5)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "cannot create chat with yourself");
    }

    #[tokio::test]
    async fn history_is_paginated_and_access_checked() {
        let api = Api::new();
        let chat = api.db.get_or_create_chat(5, 7).unwrap();
        for i in 0..5 {
            api.db.send_message(chat.id, 7, &format!("m{}", i)).unwrap();
        }

        let uri = format!("/chats/{}/messages?page=2&limit=2", chat.id);
        let (status, body) = api.call(Method::GET, &uri, Some(5)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["page"], 2);
        assert_eq!(body["data"]["limit"], 2);
        let contents: Vec<&str> = body["data"]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["m2", "m1"]);

        let uri = format!("/chats/{}/messages?limit=1000", chat.id);
        let (_, body) = api.call(Method::GET, &uri, Some(5)).await;
        assert_eq!(body["data"]["limit"], 100);

        let (status, _) = api.call(Method::GET, &uri, Some(9)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mark_read_via_rest() {
        let api = Api::new();
        let chat = api.db.get_or_create_chat(5, 7).unwrap();
        api.db.send_message(chat.id, 7, "hi").unwrap();
        assert_eq!(api.db.total_unread_count(5).unwrap(), 1);

        let (status, body) = api
            .call(Method::PUT, &format!("/chats/{}/read", chat.id), Some(5))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Messages marked as read");
        assert_eq!(api.db.total_unread_count(5).unwrap(), 0);

        let (status, _) = api.call(Method::GET, &format!("/chats/{}", chat.id), Some(9)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_ids_get_json_errors() {
        let api = Api::new();

        for uri in ["/chats/abc", "/chats/0", "/chats/-3/messages"] {
            let (status, body) = api.call(Method::GET, uri, Some(5)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"], "Invalid chat ID", "{}", uri);
        }

        let (status, body) = api.call(Method::PUT, "/chats/x/read", Some(5)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid chat ID");

        let (status, body) = api.call(Method::POST, "/chats/with/bob", Some(5)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid user ID");
    }

    #[tokio::test]
    async fn malformed_paging_uses_defaults() {
        let api = Api::new();
        let chat = api.db.get_or_create_chat(5, 7).unwrap();
        api.db.send_message(chat.id, 7, "hi").unwrap();

        for query in ["page=abc", "page=-1&limit=x", "limit=0"] {
            let uri = format!("/chats/{}/messages?{}", chat.id, query);
            let (status, body) = api.call(Method::GET, &uri, Some(5)).await;
            assert_eq!(status, StatusCode::OK, "{}", query);
            assert_eq!(body["data"]["page"], 1, "{}", query);
            assert_eq!(body["data"]["limit"], 50, "{}", query);
            assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 1);
        }
    }
}
