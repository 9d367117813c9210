use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Unique identifier for one live WebSocket connection.
///
/// A new socket always gets a new id; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What a connection is listening to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Bound to one conversation (chat room).
    Conversation(i64),
    /// User-level presence, not bound to any conversation.
    User,
}

impl Scope {
    pub fn conversation_id(&self) -> Option<i64> {
        match self {
            Scope::Conversation(id) => Some(*id),
            Scope::User => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Scope::Conversation(_) => "conversation",
            Scope::User => "user",
        }
    }
}

/// Index key inside the hub: either a conversation or a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    Conversation(i64),
    User(i64),
}

impl Audience {
    pub fn label(&self) -> &'static str {
        match self {
            Audience::Conversation(_) => "conversation",
            Audience::User(_) => "user",
        }
    }
}

/// Copyable identity of a connection, kept by the transport tasks after the
/// [`Connection`] itself has been handed to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user_id: i64,
    pub scope: Scope,
}

impl ConnectionInfo {
    /// The single index key this connection lives under.
    pub fn audience(&self) -> Audience {
        match self.scope {
            Scope::Conversation(id) => Audience::Conversation(id),
            Scope::User => Audience::User(self.user_id),
        }
    }
}

/// Result of a non-blocking push onto an outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    Full,
    Closed,
}

/// Hub-side half of a connection: owns the only sender of its outbound queue,
/// so dropping it closes the queue.
#[derive(Debug)]
pub struct Connection {
    info: ConnectionInfo,
    outbound: mpsc::Sender<Bytes>,
}

/// Transport-side half: drained by the write-loop.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Bytes>,
}

impl Connection {
    /// Build a connection and its bounded outbound queue.
    pub fn new(user_id: i64, scope: Scope, capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let info = ConnectionInfo {
            id: ConnectionId::new(),
            user_id,
            scope,
        };
        (Self { info, outbound: tx }, OutboundQueue { rx })
    }

    pub fn conversation(user_id: i64, conversation_id: i64, capacity: usize) -> (Self, OutboundQueue) {
        Self::new(user_id, Scope::Conversation(conversation_id), capacity)
    }

    pub fn global(user_id: i64, capacity: usize) -> (Self, OutboundQueue) {
        Self::new(user_id, Scope::User, capacity)
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub(crate) fn try_deliver(&self, payload: &Bytes) -> Delivery {
        match self.outbound.try_send(payload.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl OutboundQueue {
    /// Next payload, or `None` once the hub has dropped the connection and
    /// everything already queued has been drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`OutboundQueue::recv`].
    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}
