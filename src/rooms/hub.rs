//! Per-connection control loop of the room.
//!
//! A connection goes through join (register, snapshot history), replay
//! (history written before anything queued live), the frame loop, and a
//! single exit where the [`Registration`] guard drops.

use std::{fmt, sync::Arc, time::Duration};

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    AppError, AppResult,
    registry::{Connection, ConnectionRegistry, Outbound, Registration},
    store::{Message, MessageStore},
};

use super::frame::{self, ChatFrame, ErrorFrame, Inbound};

#[derive(Debug, Clone)]
pub struct Hub {
    store: MessageStore,
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Option<Duration>,
}

/// A registered connection together with the history it has yet to be sent.
pub(crate) struct Joined {
    pub(crate) conn: Connection,
    pub(crate) rx: mpsc::Receiver<Outbound>,
    pub(crate) history: Vec<Message>,
    pub(crate) registration: Registration,
}

impl Hub {
    pub fn new(store: MessageStore, registry: Arc<ConnectionRegistry>, idle_timeout: Option<Duration>) -> Self {
        Hub {
            store,
            registry,
            idle_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Registers a new connection, then snapshots history.
    ///
    /// Registering first means nothing broadcast after the snapshot is missed;
    /// anything broadcast in between is both queued and in the snapshot, and
    /// [`pump`] drops the queued copy.
    pub(crate) async fn join(&self) -> AppResult<Joined> {
        let (conn, rx) = self.registry.open();
        let registration = self.registry.enter(&conn);
        let history = self.store.list_all().await?;

        Ok(Joined {
            conn,
            rx,
            history,
            registration,
        })
    }

    /// Handles one inbound frame from `conn`.
    ///
    /// Only a malformed frame is an error; the caller should close the connection.
    /// A failed store append is reported to the sender alone.
    pub(crate) async fn handle_frame(&self, conn: &Connection, raw: Utf8Bytes) -> AppResult<()> {
        match frame::classify(&raw)? {
            Inbound::Signal => {
                self.registry.broadcast(&Outbound::Text(raw), Some(conn.id()));
            }
            Inbound::Chat(chat) => {
                let message = match self.store.append(&chat.sender, &chat.content, chat.kind, None).await {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("could not store message from {}: {err}", conn.id());
                        let nack = ErrorFrame::new("message could not be saved").encode()?;
                        conn.send(Outbound::Text(nack));
                        return Ok(());
                    }
                };

                let text = ChatFrame::encode(&message)?;
                let failed = self.registry.broadcast(&Outbound::Chat { id: message.id, text }, None);
                if !failed.is_empty() {
                    debug!("message {} missed {} dead connection(s)", message.id, failed.len());
                }
            }
        }
        Ok(())
    }

    /// Runs one client for the lifetime of its socket.
    pub async fn serve(self, socket: WebSocket) {
        let (sink, stream) = socket.split();
        self.run(sink, stream).await
    }

    /// The session loop over an already split socket.
    pub(crate) async fn run<Si, St, E>(self, mut sink: Si, mut stream: St)
    where
        Si: Sink<WsMessage> + Unpin + Send + 'static,
        St: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: fmt::Display,
    {
        let Joined { conn, rx, history, registration } = match self.join().await {
            Ok(joined) => joined,
            Err(err) => {
                warn!("could not load history for a new connection: {err}");
                let _ = sink.send(WsMessage::Close(Some(close(close_code::ERROR, "history unavailable")))).await;
                return;
            }
        };
        info!("connection {} replaying {} message(s)", conn.id(), history.len());

        let (evict_tx, evict_rx) = oneshot::channel();
        let writer = tokio::spawn(pump(sink, history, rx, evict_rx));

        loop {
            let read = async {
                match self.idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, stream.next()).await.map_err(|_| limit),
                    None => Ok(stream.next().await),
                }
            };

            let next = tokio::select! {
                biased;
                () = conn.evicted() => {
                    info!("connection {} fell behind and was dropped", conn.id());
                    let _ = evict_tx.send(close(close_code::AGAIN, "falling behind"));
                    break;
                }
                read = read => match read {
                    Ok(next) => next,
                    Err(limit) => {
                        info!("connection {} idle for {limit:?}", conn.id());
                        conn.send(Outbound::Close(close(close_code::AWAY, "idle timeout")));
                        break;
                    }
                },
            };

            let raw = match next {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Utf8Bytes::from(text),
                    Err(err) => {
                        reject(&conn, &AppError::Protocol(err.to_string()));
                        break;
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!("connection {} read error: {err}", conn.id());
                    break;
                }
            };

            if let Err(err) = self.handle_frame(&conn, raw).await {
                reject(&conn, &err);
                break;
            }
        }

        drop(registration);
        drop(conn);
        // the queue is closed now; let the writer flush what is left
        let _ = writer.await;
    }
}

fn close(code: u16, reason: &'static str) -> CloseFrame {
    CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }
}

fn reject(conn: &Connection, err: &AppError) {
    warn!("closing connection {}: {err}", conn.id());
    conn.send(Outbound::Close(close(close_code::INVALID, "malformed frame")));
}

/// Writes `history`, then everything queued for this connection, to `sink`.
///
/// Chat frames with an id already covered by the replay are skipped. Stops
/// at the first write error, after a close frame, or once the queue closes.
/// A frame arriving on `evicted` preempts whatever is still pending and is
/// written as the final close.
pub(crate) async fn pump<S>(
    mut sink: S,
    history: Vec<Message>,
    rx: mpsc::Receiver<Outbound>,
    evicted: oneshot::Receiver<CloseFrame>,
) where
    S: Sink<WsMessage> + Unpin,
{
    let frame = tokio::select! {
        biased;
        Ok(frame) = evicted => frame,
        () = write_all(&mut sink, history, rx) => return,
    };
    let _ = sink.send(WsMessage::Close(Some(frame))).await;
}

async fn write_all<S>(sink: &mut S, history: Vec<Message>, mut rx: mpsc::Receiver<Outbound>)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut replayed_up_to = None;
    for message in &history {
        let text = match ChatFrame::encode(message) {
            Ok(text) => text,
            Err(err) => {
                warn!("skipping message {} in replay: {err}", message.id);
                continue;
            }
        };
        if sink.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
        replayed_up_to = Some(message.id);
    }

    while let Some(frame) = rx.recv().await {
        let message = match frame {
            Outbound::Chat { id, .. } if replayed_up_to.is_some_and(|last| id <= last) => continue,
            Outbound::Chat { text, .. } | Outbound::Text(text) => WsMessage::Text(text),
            Outbound::Close(frame) => {
                let _ = sink.send(WsMessage::Close(Some(frame))).await;
                return;
            }
        };
        if sink.send(message).await.is_err() {
            return;
        }
    }
}
