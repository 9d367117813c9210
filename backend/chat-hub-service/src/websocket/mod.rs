use bytes::Bytes;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedSender},
    oneshot,
};
use tokio::task::JoinHandle;

pub mod connection;
mod hub;
pub mod message_types;
pub mod session;

pub use connection::{Audience, Connection, ConnectionId, ConnectionInfo, OutboundQueue, Scope};
pub use hub::HubStats;

use hub::{Hub, HubCommand};

/// Handle to the connection hub
///
/// All index mutation happens on one task that owns the conversation and user
/// indexes; this handle only sends commands to it, so cloning is cheap and any
/// task can register, unregister or broadcast without locking.
///
/// Broadcasts never block and never fail: a recipient whose outbound queue is
/// full is unregistered on the spot and its queue closed.
#[derive(Clone, Debug)]
pub struct ConnectionRegistry {
    commands: UnboundedSender<HubCommand>,
}

impl ConnectionRegistry {
    /// Spawn the hub task. It runs until every clone of the handle is dropped.
    pub fn start() -> (Self, JoinHandle<()>) {
        let (tx, rx) = unbounded_channel();
        let handle = tokio::spawn(Hub::default().run(rx));
        (Self { commands: tx }, handle)
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("connection hub has stopped, command dropped");
        }
    }

    /// Add a connection to the index its scope selects: the conversation index
    /// for conversation-scoped connections, the user index otherwise.
    pub fn register(&self, conn: Connection) {
        self.send(HubCommand::Register(conn));
    }

    /// Remove a connection and close its outbound queue. Safe to call twice.
    pub fn unregister(&self, info: ConnectionInfo) {
        self.send(HubCommand::Unregister(info));
    }

    pub fn broadcast_to_conversation(&self, conversation_id: i64, payload: Bytes) {
        self.send(HubCommand::Broadcast {
            audience: Audience::Conversation(conversation_id),
            payload,
        });
    }

    pub fn broadcast_to_user(&self, user_id: i64, payload: Bytes) {
        self.send(HubCommand::Broadcast {
            audience: Audience::User(user_id),
            payload,
        });
    }

    /// Ids of the connections registered under one key, in a stable order.
    pub async fn members(&self, audience: Audience) -> Vec<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Members { audience, reply });
        rx.await.unwrap_or_default()
    }

    /// Get subscriber count for a conversation (for debugging/metrics)
    pub async fn subscriber_count(&self, conversation_id: i64) -> usize {
        self.members(Audience::Conversation(conversation_id))
            .await
            .len()
    }

    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply });
        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scenario_two_members_and_a_global_connection() {
        let (registry, _hub) = ConnectionRegistry::start();

        let (a, mut qa) = Connection::conversation(1, 5, 8);
        let (b, mut qb) = Connection::conversation(2, 5, 8);
        let (c, mut qc) = Connection::global(1, 8);
        registry.register(a);
        registry.register(b);
        registry.register(c);

        registry.broadcast_to_conversation(5, Bytes::from_static(b"m1"));
        registry.broadcast_to_user(1, Bytes::from_static(b"u1"));

        assert_eq!(qa.recv().await, Some(Bytes::from_static(b"m1")));
        assert_eq!(qb.recv().await, Some(Bytes::from_static(b"m1")));
        assert_eq!(qc.recv().await, Some(Bytes::from_static(b"u1")));

        // Queries go through the same loop, so everything above has been applied.
        assert_eq!(registry.subscriber_count(5).await, 2);
        assert!(qa.try_recv().is_err());
        assert!(qc.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_member_is_dropped_and_the_other_is_still_served() {
        let (registry, _hub) = ConnectionRegistry::start();

        let (a, mut qa) = Connection::conversation(1, 5, 1);
        let (b, mut qb) = Connection::conversation(2, 5, 8);
        let b_id = b.id();
        registry.register(a);
        registry.register(b);

        registry.broadcast_to_conversation(5, Bytes::from_static(b"m1"));
        registry.broadcast_to_conversation(5, Bytes::from_static(b"m2"));

        assert_eq!(
            registry.members(Audience::Conversation(5)).await,
            vec![b_id]
        );
        assert_eq!(qa.recv().await, Some(Bytes::from_static(b"m1")));
        assert_eq!(qa.recv().await, None);
        assert_eq!(qb.recv().await, Some(Bytes::from_static(b"m1")));
        assert_eq!(qb.recv().await, Some(Bytes::from_static(b"m2")));
    }

    #[tokio::test]
    async fn unregister_prunes_and_closes() {
        let (registry, _hub) = ConnectionRegistry::start();

        let (conn, mut queue) = Connection::global(9, 4);
        let info = conn.info();
        registry.register(conn);
        assert_eq!(registry.stats().await.user_connections, 1);

        registry.unregister(info);
        registry.unregister(info);

        assert_eq!(queue.recv().await, None);
        assert_eq!(registry.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn per_conversation_order_matches_issue_order() {
        let (registry, _hub) = ConnectionRegistry::start();
        let (conn, mut queue) = Connection::conversation(1, 3, 64);
        registry.register(conn);

        for i in 0..32u8 {
            registry.broadcast_to_conversation(3, Bytes::from(vec![i]));
        }
        for i in 0..32u8 {
            assert_eq!(queue.recv().await, Some(Bytes::from(vec![i])));
        }
    }

    #[tokio::test]
    async fn hub_stops_when_every_handle_is_dropped() {
        let (registry, hub) = ConnectionRegistry::start();
        let (conn, mut queue) = Connection::global(1, 4);
        registry.register(conn);
        drop(registry);

        hub.await.unwrap();
        assert_eq!(queue.recv().await, None);
    }
}
