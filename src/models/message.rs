use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-app message. `sender_id` is `None` for system notices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub subject: String,
    pub content: String,
    pub sender_id: Option<i64>,
    pub recipient_id: i64,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub subject: String,
    pub content: String,
    pub sender_id: Option<i64>,
    pub recipient_id: i64,
}
