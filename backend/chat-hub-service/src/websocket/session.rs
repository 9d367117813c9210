use super::{message_types::WsInboundAction, Connection, ConnectionInfo, ConnectionRegistry, OutboundQueue};
use crate::config::WsConfig;
use crate::services::ChatEventProducer;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    tungstenite::{self, Message, Utf8Bytes},
    WebSocketStream,
};

/// Why one connection's session ended. Never affects other connections.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),

    #[error("frame write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("writer task failed: {0}")]
    Writer(String),
}

async fn send_frame<W>(sink: &mut W, frame: Message, deadline: Duration) -> Result<(), SessionError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::WriteTimeout(deadline)),
    }
}

/// Sole writer of the socket.
///
/// Drains the outbound queue one text frame per payload and sends a ping every
/// `ping_interval`. When the hub closes the queue a close frame is sent and the
/// loop ends; any failed or late write ends it with an error.
pub async fn write_loop<W>(mut sink: W, mut queue: OutboundQueue, config: WsConfig) -> Result<(), SessionError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            next = queue.recv() => match next {
                Some(payload) => match Utf8Bytes::try_from(payload) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        tracing::error!(error = %e, "outbound payload is not valid UTF-8, skipped");
                        continue;
                    }
                },
                None => {
                    // Best effort: the peer may already be gone.
                    let _ = send_frame(&mut sink, Message::Close(None), config.write_timeout).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        send_frame(&mut sink, frame, config.write_timeout).await?;
    }
}

/// Reads client frames until the peer goes away, stays silent for
/// `idle_timeout`, or `stop` resolves. Every frame, pong included, resets the
/// idle deadline. Decoded actions are handed to the producer in arrival order;
/// frames that fail to decode are logged and skipped.
///
/// `stop` is only observed while waiting for the next frame, so an action that
/// is already being handled always runs to completion.
pub async fn read_loop<R, F>(
    stream: &mut R,
    conn: ConnectionInfo,
    events: &ChatEventProducer,
    idle_timeout: Duration,
    stop: F,
) -> Result<(), SessionError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(stop);

    loop {
        let next = tokio::select! {
            next = timeout(idle_timeout, stream.next()) => next,
            _ = &mut stop => return Ok(()),
        };
        let frame = match next {
            Err(_) => return Err(SessionError::IdleTimeout(idle_timeout)),
            Ok(None) => return Ok(()),
            Ok(Some(frame)) => frame?,
        };

        let decoded = match &frame {
            Message::Text(text) => WsInboundAction::decode(text.as_bytes()),
            Message::Binary(data) => WsInboundAction::decode(data),
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        match decoded {
            Ok(action) => events.handle_action(&conn, action).await,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    connection_id = %conn.id,
                    user_id = conn.user_id,
                    "malformed frame skipped"
                );
            }
        }
    }
}

/// Drive one accepted socket: register the connection, run the read and write
/// loops, and unregister exactly once when either of them stops.
///
/// When the writer ends first the reader is asked to stop and finishes the
/// action it is handling before returning.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    conn: Connection,
    queue: OutboundQueue,
    registry: ConnectionRegistry,
    events: Arc<ChatEventProducer>,
    config: WsConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let info = conn.info();
    registry.register(conn);

    let (sink, mut stream) = ws.split();
    let (writer_done_tx, writer_done_rx) = oneshot::channel::<()>();
    let mut writer = tokio::spawn(async move {
        let result = write_loop(sink, queue, config).await;
        let _ = writer_done_tx.send(());
        result
    });

    let read_result = read_loop(&mut stream, info, &events, config.idle_timeout, async {
        // A dropped sender means the writer task is gone as well.
        let _ = writer_done_rx.await;
    })
    .await;

    registry.unregister(info);

    // Unregistering closes the queue; give the writer a chance to send the close frame.
    let write_result = match timeout(config.write_timeout, &mut writer).await {
        Ok(joined) => joined.unwrap_or_else(|e| Err(SessionError::Writer(e.to_string()))),
        Err(_) => {
            writer.abort();
            Err(SessionError::WriteTimeout(config.write_timeout))
        }
    };

    for (side, result) in [("read", read_result), ("write", write_result)] {
        match result {
            Ok(()) => tracing::debug!(
                connection_id = %info.id,
                user_id = info.user_id,
                scope = info.scope.label(),
                side,
                "websocket session closed"
            ),
            Err(SessionError::IdleTimeout(_)) => tracing::info!(
                connection_id = %info.id,
                user_id = info.user_id,
                scope = info.scope.label(),
                "websocket session idle, closing"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                connection_id = %info.id,
                user_id = info.user_id,
                scope = info.scope.label(),
                side,
                "websocket session ended with error"
            ),
        }
    }
}
