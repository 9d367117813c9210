use super::connection::{Audience, Connection, ConnectionId, ConnectionInfo, Delivery};
use crate::metrics;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

/// Everything the hub loop can be asked to do. Commands are applied strictly
/// in the order they were sent.
#[derive(Debug)]
pub(crate) enum HubCommand {
    Register(Connection),
    Unregister(ConnectionInfo),
    Broadcast {
        audience: Audience,
        payload: Bytes,
    },
    Members {
        audience: Audience,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Snapshot of both indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub conversations: usize,
    pub conversation_connections: usize,
    pub users: usize,
    pub user_connections: usize,
}

/// key -> live connections under that key
#[derive(Debug, Default)]
struct Index {
    sets: HashMap<i64, HashMap<ConnectionId, Connection>>,
}

impl Index {
    fn insert(&mut self, key: i64, conn: Connection) {
        self.sets.entry(key).or_default().insert(conn.id(), conn);
    }

    /// Removes the connection and prunes the key once its set is empty.
    fn remove(&mut self, key: i64, id: ConnectionId) -> Option<Connection> {
        let set = self.sets.get_mut(&key)?;
        let removed = set.remove(&id);
        if set.is_empty() {
            self.sets.remove(&key);
        }
        removed
    }

    /// Pushes `payload` onto every queue under `key` without waiting. Connections
    /// whose queue is full or closed are taken out of the index and returned.
    fn fan_out(&mut self, key: i64, payload: &Bytes) -> (usize, Vec<(Connection, Delivery)>) {
        let Some(set) = self.sets.get_mut(&key) else {
            return (0, Vec::new());
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, conn) in set.iter() {
            match conn.try_deliver(payload) {
                Delivery::Queued => delivered += 1,
                outcome => failed.push((*id, outcome)),
            }
        }

        let dropped = failed
            .into_iter()
            .filter_map(|(id, outcome)| set.remove(&id).map(|conn| (conn, outcome)))
            .collect();
        if set.is_empty() {
            self.sets.remove(&key);
        }
        (delivered, dropped)
    }

    fn members(&self, key: i64) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .sets
            .get(&key)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn keys(&self) -> usize {
        self.sets.len()
    }

    fn connections(&self) -> usize {
        self.sets.values().map(HashMap::len).sum()
    }
}

/// State owned by the single hub task. Nothing else touches the indexes.
#[derive(Debug, Default)]
pub(crate) struct Hub {
    conversations: Index,
    users: Index,
}

impl Hub {
    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<HubCommand>) {
        tracing::info!("connection hub started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        tracing::info!(
            conversations = self.conversations.keys(),
            users = self.users.keys(),
            "connection hub stopped"
        );
    }

    fn index_mut(&mut self, audience: Audience) -> (&mut Index, i64) {
        match audience {
            Audience::Conversation(id) => (&mut self.conversations, id),
            Audience::User(id) => (&mut self.users, id),
        }
    }

    fn index(&self, audience: Audience) -> (&Index, i64) {
        match audience {
            Audience::Conversation(id) => (&self.conversations, id),
            Audience::User(id) => (&self.users, id),
        }
    }

    pub(crate) fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(conn) => self.register(conn),
            HubCommand::Unregister(info) => self.unregister(info),
            HubCommand::Broadcast { audience, payload } => self.broadcast(audience, &payload),
            HubCommand::Members { audience, reply } => {
                let (index, key) = self.index(audience);
                let _ = reply.send(index.members(key));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, conn: Connection) {
        let info = conn.info();
        let (index, key) = self.index_mut(info.audience());
        index.insert(key, conn);
        metrics::connection_registered(info.scope.label());
        tracing::debug!(
            connection_id = %info.id,
            user_id = info.user_id,
            scope = info.scope.label(),
            key,
            "connection registered"
        );
    }

    fn unregister(&mut self, info: ConnectionInfo) {
        let (index, key) = self.index_mut(info.audience());
        // Dropping the connection closes its outbound queue.
        if index.remove(key, info.id).is_some() {
            metrics::connection_unregistered(info.scope.label());
            tracing::debug!(
                connection_id = %info.id,
                user_id = info.user_id,
                scope = info.scope.label(),
                key,
                "connection unregistered"
            );
        }
    }

    fn broadcast(&mut self, audience: Audience, payload: &Bytes) {
        let (index, key) = self.index_mut(audience);
        let (delivered, dropped) = index.fan_out(key, payload);
        metrics::record_broadcast(audience.label(), delivered);

        for (conn, outcome) in dropped {
            let info = conn.info();
            let reason = match outcome {
                Delivery::Closed => "closed",
                _ => "full",
            };
            metrics::connection_unregistered(info.scope.label());
            metrics::record_slow_consumer_drop(reason);
            tracing::warn!(
                connection_id = %info.id,
                user_id = info.user_id,
                audience = audience.label(),
                key,
                reason,
                "dropping connection that cannot keep up"
            );
        }
    }

    pub(crate) fn stats(&self) -> HubStats {
        HubStats {
            conversations: self.conversations.keys(),
            conversation_connections: self.conversations.connections(),
            users: self.users.keys(),
            user_connections: self.users.connections(),
        }
    }

    #[cfg(test)]
    fn members(&self, audience: Audience) -> Vec<ConnectionId> {
        let (index, key) = self.index(audience);
        index.members(key)
    }
}
