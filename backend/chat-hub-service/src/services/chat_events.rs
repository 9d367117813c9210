use super::{message_service::MessageStore, user_service::UserDirectory};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::websocket::{
    message_types::{WsInboundAction, WsOutboundEvent},
    ConnectionInfo, ConnectionRegistry,
};
use std::sync::Arc;

/// Turns client actions into persisted changes and fans the resulting event
/// out through the hub.
///
/// Every event goes to the conversation's sockets first and then to the
/// user-scoped sockets of each participant. Nothing is broadcast unless the
/// change was persisted.
pub struct ChatEventProducer {
    registry: ConnectionRegistry,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
}

impl ChatEventProducer {
    pub fn new(
        registry: ConnectionRegistry,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            registry,
            messages,
            users,
        }
    }

    /// Entry point for the read-loop. Failures are logged and counted here;
    /// the connection stays open whatever happens.
    pub async fn handle_action(&self, conn: &ConnectionInfo, action: WsInboundAction) {
        let kind = action.kind();
        metrics::record_inbound_action(kind);

        let Some(chat_id) = conn.scope.conversation_id() else {
            tracing::warn!(
                connection_id = %conn.id,
                user_id = conn.user_id,
                action = kind,
                "action on a user-scoped connection rejected"
            );
            metrics::record_producer_failure(kind);
            return;
        };

        let result = match action {
            WsInboundAction::Create { content } => self
                .create_message(chat_id, conn.user_id, content)
                .await
                .map(|_| ()),
            WsInboundAction::Edit {
                message_id,
                content,
            } => {
                self.edit_message(chat_id, conn.user_id, message_id, content)
                    .await
            }
            WsInboundAction::Delete { message_id } => {
                self.delete_message(chat_id, conn.user_id, message_id).await
            }
            WsInboundAction::Unknown => {
                tracing::debug!(connection_id = %conn.id, "ignoring unknown action");
                return;
            }
        };

        if let Err(e) = result {
            metrics::record_producer_failure(kind);
            tracing::error!(
                error = %e,
                retryable = e.is_retryable(),
                connection_id = %conn.id,
                user_id = conn.user_id,
                chat_id,
                action = kind,
                "chat action dropped"
            );
        }
    }

    /// Persist a new message, then broadcast it with the sender's login and role.
    /// If the sender cannot be resolved the message stays stored but no event
    /// goes out.
    pub async fn create_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: String,
    ) -> AppResult<i64> {
        let message_id = self
            .messages
            .create_message(chat_id, sender_id, &content)
            .await?;
        let sender = self.users.profile(sender_id).await?;

        let event = WsOutboundEvent::created(
            chat_id,
            message_id,
            sender_id,
            content,
            sender.login,
            sender.role_id,
        );
        self.publish(chat_id, &event).await?;

        tracing::info!(chat_id, sender_id, message_id, "message created and broadcast");
        Ok(message_id)
    }

    pub async fn edit_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        message_id: i64,
        content: String,
    ) -> AppResult<()> {
        self.messages
            .edit_message(message_id, sender_id, &content)
            .await?;

        let event = WsOutboundEvent::edited(chat_id, message_id, sender_id, content);
        self.publish(chat_id, &event).await?;

        tracing::info!(chat_id, sender_id, message_id, "message edited and broadcast");
        Ok(())
    }

    pub async fn delete_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        message_id: i64,
    ) -> AppResult<()> {
        self.messages.delete_message(message_id, sender_id).await?;

        let event = WsOutboundEvent::deleted(chat_id, message_id, sender_id);
        self.publish(chat_id, &event).await?;

        tracing::info!(chat_id, sender_id, message_id, "message deleted and broadcast");
        Ok(())
    }

    /// Mark the reader's unread messages in the chat as read and tell everyone.
    /// Runs when a conversation socket is opened.
    pub async fn mark_read(&self, chat_id: i64, reader_id: i64) -> AppResult<()> {
        let changed = self
            .messages
            .mark_read(chat_id, reader_id)
            .await
            .inspect_err(|_| metrics::record_producer_failure("read_messages"))?;

        let event = WsOutboundEvent::read_messages(chat_id, reader_id);
        self.publish(chat_id, &event).await?;

        tracing::debug!(chat_id, reader_id, changed, "read receipt broadcast");
        Ok(())
    }

    async fn publish(&self, chat_id: i64, event: &WsOutboundEvent) -> AppResult<()> {
        let payload = event.encode().map_err(|e| {
            tracing::error!(error = %e, chat_id, "failed to encode outbound event");
            AppError::Internal
        })?;

        self.registry
            .broadcast_to_conversation(chat_id, payload.clone());

        match self.messages.participants_of(chat_id).await {
            Ok(participants) => {
                for user_id in participants {
                    self.registry.broadcast_to_user(user_id, payload.clone());
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    chat_id,
                    action = event.action.as_str(),
                    "failed to load participants, skipping per-user fan-out"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::UserProfile;
    use crate::services::memory_store::{InMemoryMessageStore, InMemoryUserDirectory};
    use crate::websocket::{Connection, OutboundQueue};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::Value;

    struct Fixture {
        registry: ConnectionRegistry,
        producer: ChatEventProducer,
        store: Arc<InMemoryMessageStore>,
    }

    async fn fixture() -> Fixture {
        let (registry, _hub) = ConnectionRegistry::start();
        let store = Arc::new(InMemoryMessageStore::new());
        store.add_participant(5, 1).await;
        store.add_participant(5, 2).await;

        let users = Arc::new(InMemoryUserDirectory::new());
        for (user_id, login, role_id) in [(1, "alice", 1), (2, "bob", 2)] {
            users
                .insert(UserProfile {
                    user_id,
                    login: login.into(),
                    role_id,
                })
                .await;
        }

        let producer = ChatEventProducer::new(registry.clone(), store.clone(), users);
        Fixture {
            registry,
            producer,
            store,
        }
    }

    fn join(registry: &ConnectionRegistry, (conn, queue): (Connection, OutboundQueue)) -> (ConnectionInfo, OutboundQueue) {
        let info = conn.info();
        registry.register(conn);
        (info, queue)
    }

    /// Everything sent before this call has been applied by the hub.
    async fn settle(registry: &ConnectionRegistry) {
        registry.stats().await;
    }

    fn drain(queue: &mut OutboundQueue) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(payload) = queue.try_recv() {
            out.push(payload);
        }
        out
    }

    #[tokio::test]
    async fn create_reaches_conversation_and_participant_sockets() {
        let f = fixture().await;
        let (a, mut qa) = join(&f.registry, Connection::conversation(1, 5, 8));
        let (_, mut qb) = join(&f.registry, Connection::conversation(2, 5, 8));
        let (_, mut qc) = join(&f.registry, Connection::global(1, 8));
        let (_, mut qd) = join(&f.registry, Connection::global(2, 8));
        let (_, mut qe) = join(&f.registry, Connection::global(3, 8));

        f.producer
            .handle_action(
                &a,
                WsInboundAction::Create {
                    content: "hello".into(),
                },
            )
            .await;
        settle(&f.registry).await;

        let sent = drain(&mut qa);
        assert_eq!(sent.len(), 1);
        assert_eq!(drain(&mut qb), sent);
        assert_eq!(drain(&mut qc), sent);
        assert_eq!(drain(&mut qd), sent);
        assert!(drain(&mut qe).is_empty());

        let event: Value = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(event["action"], "create");
        assert_eq!(event["chat_id"], 5);
        assert_eq!(event["sender_id"], 1);
        assert_eq!(event["login"], "alice");
        assert_eq!(event["role_id"], 1);
        assert_eq!(event["content"], "hello");

        let id = event["message_id"].as_i64().unwrap();
        assert_eq!(f.store.message(id).await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn edit_of_someone_elses_message_broadcasts_nothing() {
        let f = fixture().await;
        let id = f.store.create_message(5, 1, "original").await.unwrap();
        let (b, mut qb) = join(&f.registry, Connection::conversation(2, 5, 8));

        f.producer
            .handle_action(
                &b,
                WsInboundAction::Edit {
                    message_id: id,
                    content: "hijack".into(),
                },
            )
            .await;
        settle(&f.registry).await;

        assert!(drain(&mut qb).is_empty());
        assert_eq!(f.store.message(id).await.unwrap().content, "original");
    }

    #[tokio::test]
    async fn edit_and_delete_broadcast_after_persisting() {
        let f = fixture().await;
        let id = f.store.create_message(5, 1, "draft").await.unwrap();
        let (a, mut qa) = join(&f.registry, Connection::conversation(1, 5, 8));

        f.producer
            .handle_action(
                &a,
                WsInboundAction::Edit {
                    message_id: id,
                    content: "final".into(),
                },
            )
            .await;
        f.producer
            .handle_action(&a, WsInboundAction::Delete { message_id: id })
            .await;
        settle(&f.registry).await;

        let events: Vec<Value> = drain(&mut qa)
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["action"], "edit");
        assert_eq!(events[0]["content"], "final");
        assert_eq!(events[1]["action"], "delete");
        assert_eq!(events[1]["message_id"], id);
        assert!(f.store.message(id).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn unknown_sender_keeps_message_but_skips_broadcast() {
        let f = fixture().await;
        let (stranger, mut queue) = join(&f.registry, Connection::conversation(9, 5, 8));

        f.producer
            .handle_action(
                &stranger,
                WsInboundAction::Create {
                    content: "who am i".into(),
                },
            )
            .await;
        settle(&f.registry).await;

        assert!(drain(&mut queue).is_empty());
        assert_eq!(f.store.message(1).await.unwrap().sender_id, 9);
    }

    #[tokio::test]
    async fn user_scoped_connections_cannot_send_actions() {
        let f = fixture().await;
        let (global, mut queue) = join(&f.registry, Connection::global(1, 8));

        f.producer
            .handle_action(
                &global,
                WsInboundAction::Create {
                    content: "nowhere".into(),
                },
            )
            .await;
        settle(&f.registry).await;

        assert!(drain(&mut queue).is_empty());
        assert!(f.store.message(1).await.is_none());
    }

    #[tokio::test]
    async fn mark_read_broadcasts_a_read_receipt() {
        let f = fixture().await;
        let id = f.store.create_message(5, 1, "unread").await.unwrap();
        let (_, mut qa) = join(&f.registry, Connection::conversation(1, 5, 8));
        let (_, mut qc) = join(&f.registry, Connection::global(1, 8));

        f.producer.mark_read(5, 2).await.unwrap();
        settle(&f.registry).await;

        assert!(f.store.message(id).await.unwrap().is_read);
        for queue in [&mut qa, &mut qc] {
            let events = drain(queue);
            assert_eq!(events.len(), 1);
            let event: Value = serde_json::from_slice(&events[0]).unwrap();
            assert_eq!(event["action"], "read_messages");
            assert_eq!(event["sender_id"], 2);
        }
    }

    /// Store whose participant lookup always fails and whose writes fail on demand.
    struct FlakyStore {
        fail_writes: bool,
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn create_message(&self, _: i64, _: i64, _: &str) -> Result<i64, AppError> {
            if self.fail_writes {
                return Err(AppError::database("connection closed", ErrorKind::Retryable));
            }
            Ok(1)
        }

        async fn edit_message(&self, _: i64, _: i64, _: &str) -> Result<(), AppError> {
            Err(AppError::database("connection closed", ErrorKind::Retryable))
        }

        async fn delete_message(&self, _: i64, _: i64) -> Result<(), AppError> {
            Err(AppError::database("connection closed", ErrorKind::Retryable))
        }

        async fn mark_read(&self, _: i64, _: i64) -> Result<u64, AppError> {
            Err(AppError::database("connection closed", ErrorKind::Retryable))
        }

        async fn participants_of(&self, _: i64) -> Result<Vec<i64>, AppError> {
            Err(AppError::database("connection closed", ErrorKind::Retryable))
        }
    }

    async fn flaky_producer(fail_writes: bool) -> (ConnectionRegistry, ChatEventProducer) {
        let (registry, _hub) = ConnectionRegistry::start();
        let users = Arc::new(InMemoryUserDirectory::new());
        users
            .insert(UserProfile {
                user_id: 1,
                login: "alice".into(),
                role_id: 1,
            })
            .await;
        let producer =
            ChatEventProducer::new(registry.clone(), Arc::new(FlakyStore { fail_writes }), users);
        (registry, producer)
    }

    #[tokio::test]
    async fn persistence_failure_suppresses_the_broadcast() {
        let (registry, producer) = flaky_producer(true).await;
        let (a, mut qa) = join(&registry, Connection::conversation(1, 5, 8));

        let err = producer
            .create_message(5, a.user_id, "lost".into())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(producer.mark_read(5, 1).await.is_err());
        settle(&registry).await;

        assert!(drain(&mut qa).is_empty());
    }

    #[tokio::test]
    async fn participant_lookup_failure_still_reaches_the_conversation() {
        let (registry, producer) = flaky_producer(false).await;
        let (a, mut qa) = join(&registry, Connection::conversation(1, 5, 8));
        let (_, mut qc) = join(&registry, Connection::global(1, 8));

        producer
            .create_message(5, a.user_id, "partial".into())
            .await
            .unwrap();
        settle(&registry).await;

        assert_eq!(drain(&mut qa).len(), 1);
        assert!(drain(&mut qc).is_empty());
    }
}
