use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;

/// Persistence for chat messages, as seen by the event producer.
///
/// Edit and delete only touch the sender's own message while it is not yet
/// deleted; anything else is reported as [`AppError::NotFound`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message and return its id.
    async fn create_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<i64, AppError>;

    async fn edit_message(
        &self,
        message_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<(), AppError>;

    async fn delete_message(&self, message_id: i64, sender_id: i64) -> Result<(), AppError>;

    /// Mark every message in the chat not sent by `reader_id` as read.
    /// Returns the number of messages that changed.
    async fn mark_read(&self, chat_id: i64, reader_id: i64) -> Result<u64, AppError>;

    /// User ids taking part in the chat: its owner plus every member.
    async fn participants_of(&self, chat_id: i64) -> Result<Vec<i64>, AppError>;
}

pub struct PgMessageStore {
    db: Pool,
}

impl PgMessageStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<i64, AppError> {
        let client = self.db.get().await?;
        let row = client
            .query_one(
                "INSERT INTO messages (chat_id, sender_id, content) VALUES ($1, $2, $3) RETURNING id",
                &[&chat_id, &sender_id, &content],
            )
            .await?;
        Ok(row.get("id"))
    }

    async fn edit_message(
        &self,
        message_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<(), AppError> {
        let client = self.db.get().await?;
        let affected = client
            .execute(
                "UPDATE messages SET content = $1, updated_at = NOW() \
                 WHERE id = $2 AND sender_id = $3 AND is_deleted = false",
                &[&content, &message_id, &sender_id],
            )
            .await?;
        if affected == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn delete_message(&self, message_id: i64, sender_id: i64) -> Result<(), AppError> {
        let client = self.db.get().await?;
        let affected = client
            .execute(
                "UPDATE messages SET is_deleted = true, updated_at = NOW() \
                 WHERE id = $1 AND sender_id = $2 AND is_deleted = false",
                &[&message_id, &sender_id],
            )
            .await?;
        if affected == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn mark_read(&self, chat_id: i64, reader_id: i64) -> Result<u64, AppError> {
        let client = self.db.get().await?;
        let affected = client
            .execute(
                "UPDATE messages SET is_read = true \
                 WHERE chat_id = $1 AND sender_id <> $2 AND is_read = false",
                &[&chat_id, &reader_id],
            )
            .await?;
        Ok(affected)
    }

    async fn participants_of(&self, chat_id: i64) -> Result<Vec<i64>, AppError> {
        let client = self.db.get().await?;
        let rows = client
            .query(
                "SELECT owner_id AS user_id FROM chats WHERE id = $1 \
                 UNION \
                 SELECT user_id FROM chat_members WHERE chat_id = $1",
                &[&chat_id],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }
}
