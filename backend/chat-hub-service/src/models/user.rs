use serde::{Deserialize, Serialize};

/// Display attributes attached to `create` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub login: String,
    pub role_id: i32,
}
