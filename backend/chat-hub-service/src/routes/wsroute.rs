use crate::state::AppState;
use crate::websocket::{session::run_session, Connection, Scope};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};

pub const CHAT_PATH: &str = "/ws/chat";
pub const USER_PATH: &str = "/ws/user";

/// Validated upgrade parameters. Nothing is registered until these parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsParams {
    pub user_id: i64,
    pub scope: Scope,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WsParamError {
    #[error("not found")]
    UnknownPath,

    #[error("{0} required")]
    Missing(&'static str),

    #[error("invalid {0}")]
    Invalid(&'static str),
}

impl WsParamError {
    pub fn status(&self) -> StatusCode {
        match self {
            WsParamError::UnknownPath => StatusCode::NOT_FOUND,
            WsParamError::Missing(_) | WsParamError::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

fn query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Ids are non-negative integers.
fn parse_id(query: Option<&str>, key: &'static str) -> Result<i64, WsParamError> {
    let raw = query_param(query, key).ok_or(WsParamError::Missing(key))?;
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or(WsParamError::Invalid(key))
}

impl WsParams {
    /// `/ws/chat?chat_id=&user_id=` for a conversation socket,
    /// `/ws/user?user_id=` for a user-level socket.
    pub fn from_uri(path: &str, query: Option<&str>) -> Result<Self, WsParamError> {
        let scope = match path {
            CHAT_PATH => Scope::Conversation(parse_id(query, "chat_id")?),
            USER_PATH => Scope::User,
            _ => return Err(WsParamError::UnknownPath),
        };
        let user_id = parse_id(query, "user_id")?;
        Ok(Self { user_id, scope })
    }
}

/// Accept loop of the WebSocket listener. Each socket gets its own task.
pub async fn serve(listener: TcpListener, state: AppState) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "websocket listener ready");
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, state).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept websocket connection");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: AppState) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, %peer, "failed to set TCP_NODELAY");
    }

    let mut params = None;
    let handshake = accept_hdr_async(stream, |req: &Request, response: Response| {
        match WsParams::from_uri(req.uri().path(), req.uri().query()) {
            Ok(parsed) => {
                params = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(%peer, path = req.uri().path(), error = %e, "websocket upgrade rejected");
                Err(e.into_response())
            }
        }
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let Some(params) = params else {
        return;
    };

    let (conn, queue) = Connection::new(
        params.user_id,
        params.scope,
        state.config.ws.outbound_capacity,
    );

    // Opening a chat marks it read for this user before the socket joins.
    if let Scope::Conversation(chat_id) = params.scope {
        if let Err(e) = state.events.mark_read(chat_id, params.user_id).await {
            tracing::warn!(
                error = %e,
                retryable = e.is_retryable(),
                chat_id,
                user_id = params.user_id,
                "failed to mark messages read"
            );
        }
    }

    tracing::info!(
        %peer,
        connection_id = %conn.id(),
        user_id = params.user_id,
        scope = params.scope.label(),
        chat_id = params.scope.conversation_id(),
        "websocket connected"
    );

    run_session(
        ws,
        conn,
        queue,
        state.registry.clone(),
        state.events.clone(),
        state.config.ws,
    )
    .await;
}
