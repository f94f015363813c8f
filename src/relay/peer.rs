use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use warp::ws::Message;

use super::protocol::{ClientMessage, ServerMessage};

/// Close codes a browser sends on a normal tab close or navigation.
const EXPECTED_CLOSE_CODES: [u16; 3] = [1000, 1001, 1006];

pub type Outbox = mpsc::Receiver<ServerMessage>;

/// One connected client.
///
/// The outbound queue is bounded; when it is full new messages are dropped
/// rather than awaited, so a slow client never stalls a broadcast.
pub struct Peer {
    id: String,
    session_id: String,
    queue: RwLock<Option<mpsc::Sender<ServerMessage>>>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl Peer {
    /// Creates the peer and the receiving end of its outbound queue.
    /// A zero `capacity` is treated as one.
    pub fn new(id: String, session_id: String, capacity: usize) -> (Arc<Self>, Outbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let peer = Arc::new(Self {
            id,
            session_id,
            queue: RwLock::new(Some(sender)),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        (peer, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queues a message without waiting. Drops it if the queue is full.
    pub fn enqueue(&self, message: ServerMessage) {
        if self.is_closed() {
            return;
        }

        let queue = self.queue.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = queue.as_ref() else {
            return;
        };

        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    peer_id = %self.id,
                    kind = dropped.kind(),
                    "Outbound queue full, dropping message"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(peer_id = %self.id, "Outbound queue closed (disconnected)");
            }
        }
    }

    /// Stops accepting messages. The write loop drains what is already queued.
    pub fn finish(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Closes the peer immediately, discarding anything still queued.
    pub fn close(&self) {
        self.finish();
        self.shutdown.notify_one();
    }

    /// Reads frames until the connection ends, handing each valid message to
    /// `on_message`. The next frame is not read until the handler completes.
    pub async fn read_loop<S, E, F, Fut>(&self, mut stream: S, mut on_message: F)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        F: FnMut(ClientMessage) -> Fut,
        Fut: Future<Output = ()>,
    {
        while let Some(result) = stream.next().await {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(peer_id = %self.id, error = %e, "WebSocket read error");
                    break;
                }
            };

            if message.is_close() {
                self.log_close(&message);
                break;
            }

            if !message.is_text() && !message.is_binary() {
                continue;
            }

            match ClientMessage::decode(message.as_bytes()) {
                Ok(client_message) => on_message(client_message).await,
                Err(e) => {
                    tracing::warn!(peer_id = %self.id, error = %e, "Ignoring inbound message");
                }
            }
        }
    }

    fn log_close(&self, message: &Message) {
        match message.close_frame() {
            Some((code, reason)) if !EXPECTED_CLOSE_CODES.contains(&code) => {
                tracing::warn!(
                    peer_id = %self.id,
                    code = code,
                    reason = %reason,
                    "Peer closed connection unexpectedly"
                );
            }
            Some((code, _)) => {
                tracing::debug!(peer_id = %self.id, code = code, "Peer closed connection");
            }
            None => {
                tracing::debug!(peer_id = %self.id, "Peer closed connection");
            }
        }
    }

    /// Drains the outbound queue onto `sink` in order. Exits when the queue
    /// is finished, on `close`, or on a write error, then closes the sink.
    pub async fn write_loop<K>(self: Arc<Self>, mut outbox: Outbox, mut sink: K)
    where
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                next = outbox.recv() => next,
            };

            let Some(message) = next else {
                break;
            };

            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(peer_id = %self.id, error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if let Err(e) = sink.send(Message::text(text)).await {
                tracing::warn!(peer_id = %self.id, error = %e, "Failed to send to peer");
                break;
            }
        }

        self.finish();
        if let Err(e) = sink.close().await {
            tracing::debug!(peer_id = %self.id, error = %e, "Error closing connection");
        }
    }
}
