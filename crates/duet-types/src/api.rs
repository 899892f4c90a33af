use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chat, ChatId, Message, UserId, UserSummary};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the websocket handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub exp: usize,
}

// -- Envelope --

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// -- Chats --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub other_user: UserSummary,
    pub last_message: Option<Message>,
}

// -- Messages --

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `?page=&limit=` as sent. Values that are missing or not integers fall
/// back to the defaults rather than failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    /// 1-based page number, at least 1.
    pub fn page(&self) -> u32 {
        lenient_int(self.page.as_deref()).unwrap_or(1).clamp(1, u32::MAX as i64) as u32
    }

    /// Page size, capped at `MAX_PAGE_SIZE`. Non-positive sizes mean the default.
    pub fn limit(&self) -> u32 {
        lenient_int(self.limit.as_deref())
            .filter(|&n| n > 0)
            .map_or(DEFAULT_PAGE_SIZE, |n| n.min(MAX_PAGE_SIZE as i64) as u32)
    }

    pub fn offset(&self) -> u32 {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

fn lenient_int(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesPage {
    pub messages: Vec<Message>,
    pub page: u32,
    pub limit: u32,
}

// -- Unread --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadNotification {
    pub chat_id: ChatId,
    pub other_user_id: UserId,
    pub other_user_name: String,
    pub unread_count: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<UnreadNotification>,
    pub total_unread: u64,
    pub notification_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadUsersCountResponse {
    pub unread_users_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadBySender {
    pub user_id: UserId,
    pub user_name: String,
    pub unread_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadMessagesResponse {
    pub unread_messages: Vec<UnreadBySender>,
    pub total_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(String::from),
            limit: limit.map(String::from),
        }
    }

    #[test]
    fn paging_defaults_and_bounds() {
        let q = PageQuery::default();
        assert_eq!((q.page(), q.limit(), q.offset()), (1, 50, 0));

        let q = query(Some("3"), Some("20"));
        assert_eq!((q.page(), q.limit(), q.offset()), (3, 20, 40));

        let q = query(Some("0"), Some("1000"));
        assert_eq!((q.page(), q.limit()), (1, 100));
    }

    #[test]
    fn malformed_paging_falls_back_to_defaults() {
        let q = query(Some("abc"), Some("ten"));
        assert_eq!((q.page(), q.limit()), (1, 50));

        let q = query(Some("-1"), Some("-5"));
        assert_eq!((q.page(), q.limit()), (1, 50));

        let q = query(None, Some("0"));
        assert_eq!(q.limit(), 50);
    }
}
