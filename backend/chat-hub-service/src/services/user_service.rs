use crate::error::AppError;
use crate::models::UserProfile;
use async_trait::async_trait;
use deadpool_postgres::Pool;

/// Read-only lookup of user display attributes.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// [`AppError::NotFound`] when the user does not exist.
    async fn profile(&self, user_id: i64) -> Result<UserProfile, AppError>;
}

pub struct PgUserDirectory {
    db: Pool,
}

impl PgUserDirectory {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn profile(&self, user_id: i64) -> Result<UserProfile, AppError> {
        let client = self.db.get().await?;
        let row = client
            .query_opt(
                "SELECT uid, login, role_id FROM users WHERE uid = $1",
                &[&user_id],
            )
            .await?
            .ok_or(AppError::NotFound)?;

        Ok(UserProfile {
            user_id: row.get("uid"),
            login: row.get("login"),
            role_id: row.get("role_id"),
        })
    }
}
