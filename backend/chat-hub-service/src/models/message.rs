use serde::{Deserialize, Serialize};

/// Message row as stored in `messages`
/// Deletion is soft: `is_deleted` rows stay in the table but can no longer be
/// edited or deleted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub is_read: bool,
    pub is_deleted: bool,
}
