//! In-process collaborators for `HUB_STORAGE=memory` and tests.

use super::{message_service::MessageStore, user_service::UserDirectory};
use crate::error::AppError;
use crate::models::{Message, UserProfile};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MessageTables {
    next_id: i64,
    messages: HashMap<i64, Message>,
    // chat_id -> participants
    participants: HashMap<i64, BTreeSet<i64>>,
}

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: RwLock<MessageTables>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id` to the chat's participants.
    pub async fn add_participant(&self, chat_id: i64, user_id: i64) {
        let mut guard = self.inner.write().await;
        guard.participants.entry(chat_id).or_default().insert(user_id);
    }

    pub async fn message(&self, message_id: i64) -> Option<Message> {
        self.inner.read().await.messages.get(&message_id).cloned()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<i64, AppError> {
        let mut guard = self.inner.write().await;
        guard.next_id += 1;
        let id = guard.next_id;
        guard.messages.insert(
            id,
            Message {
                id,
                chat_id,
                sender_id,
                content: content.to_string(),
                is_read: false,
                is_deleted: false,
            },
        );
        Ok(id)
    }

    async fn edit_message(
        &self,
        message_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<(), AppError> {
        let mut guard = self.inner.write().await;
        match guard.messages.get_mut(&message_id) {
            Some(m) if m.sender_id == sender_id && !m.is_deleted => {
                m.content = content.to_string();
                Ok(())
            }
            _ => Err(AppError::NotFound),
        }
    }

    async fn delete_message(&self, message_id: i64, sender_id: i64) -> Result<(), AppError> {
        let mut guard = self.inner.write().await;
        match guard.messages.get_mut(&message_id) {
            Some(m) if m.sender_id == sender_id && !m.is_deleted => {
                m.is_deleted = true;
                Ok(())
            }
            _ => Err(AppError::NotFound),
        }
    }

    async fn mark_read(&self, chat_id: i64, reader_id: i64) -> Result<u64, AppError> {
        let mut guard = self.inner.write().await;
        let mut changed = 0;
        for m in guard.messages.values_mut() {
            if m.chat_id == chat_id && m.sender_id != reader_id && !m.is_read {
                m.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn participants_of(&self, chat_id: i64) -> Result<Vec<i64>, AppError> {
        let guard = self.inner.read().await;
        Ok(guard
            .participants
            .get(&chat_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<i64, UserProfile>>,
    placeholders: bool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that answers unknown ids with a `user{id}` profile (role 0)
    /// instead of `NotFound`.
    pub fn with_placeholder_profiles() -> Self {
        Self {
            placeholders: true,
            ..Self::default()
        }
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.users.write().await.insert(profile.user_id, profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn profile(&self, user_id: i64) -> Result<UserProfile, AppError> {
        if let Some(profile) = self.users.read().await.get(&user_id) {
            return Ok(profile.clone());
        }
        if self.placeholders {
            return Ok(UserProfile {
                user_id,
                login: format!("user{user_id}"),
                role_id: 0,
            });
        }
        Err(AppError::NotFound)
    }
}

/// Users and chat participants loaded into the in-memory stores at startup.
///
/// ```json
/// { "users": [{ "user_id": 1, "login": "alice", "role_id": 1 }],
///   "chats": [{ "chat_id": 5, "participants": [1, 2] }] }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub chats: Vec<SeedChat>,
}

#[derive(Debug, Deserialize)]
pub struct SeedChat {
    pub chat_id: i64,
    #[serde(default)]
    pub participants: Vec<i64>,
}

impl MemorySeed {
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Config(format!("read seed {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse seed {}: {e}", path.display())))
    }
}

/// Build the `HUB_STORAGE=memory` collaborators, optionally seeded from a JSON
/// file. Senders missing from the seed get placeholder profiles so their
/// messages are still broadcast.
pub async fn memory_stores(
    seed_path: Option<&Path>,
) -> Result<(Arc<InMemoryMessageStore>, Arc<InMemoryUserDirectory>), AppError> {
    let seed = match seed_path {
        Some(path) => MemorySeed::load(path).await?,
        None => MemorySeed::default(),
    };

    let messages = InMemoryMessageStore::new();
    for chat in &seed.chats {
        for &user_id in &chat.participants {
            messages.add_participant(chat.chat_id, user_id).await;
        }
    }

    let users = InMemoryUserDirectory::with_placeholder_profiles();
    let user_count = seed.users.len();
    for profile in seed.users {
        users.insert(profile).await;
    }

    tracing::info!(
        users = user_count,
        chats = seed.chats.len(),
        seeded = seed_path.is_some(),
        "in-memory stores ready"
    );
    Ok((Arc::new(messages), Arc::new(users)))
}
