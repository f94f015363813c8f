use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::timeout;
use warp::ws::Message;

use super::peer::Peer;
use super::protocol::{
    ClientMessage, JoinRequest, PeerIdAllocator, ServerMessage, SyncUpdate, VideoPayload,
};
use super::session::Session;
use super::storage::Storage;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Connection lifecycle orchestrator: join, dispatch, teardown.
pub struct RelayServer {
    storage: Arc<Storage>,
    peer_ids: PeerIdAllocator,
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            storage: Arc::new(Storage::new()),
            peer_ids: PeerIdAllocator::new(),
            config,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Drives one client connection to completion.
    ///
    /// `stream` and `sink` are the two halves of the transport. The sink is
    /// moved into the peer's write task; this future returns once the inbound
    /// side has ended and the peer has been removed from its session.
    pub async fn handle_connection<S, E, K>(&self, mut stream: S, mut sink: K)
    where
        S: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: Display + Send,
    {
        let peer_id = self.peer_ids.allocate();

        let join = match Self::await_join(&mut stream).await {
            Ok(join) => join,
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "Rejecting connection");
                if let Err(e) = sink.close().await {
                    tracing::debug!(error = %e, "Error closing rejected connection");
                }
                return;
            }
        };

        let (peer, outbox) = Peer::new(peer_id, join.session_id, self.config.queue_capacity);
        tokio::spawn(peer.clone().write_loop(outbox, sink));

        let session = self
            .storage
            .join_session(peer.session_id(), peer.clone())
            .await;

        let total_peers = session.peer_count().await;
        tracing::info!(
            peer_id = %peer.id(),
            session_id = %session.id(),
            total_peers = total_peers,
            "Peer joined session"
        );

        session.broadcast_peer_update().await;

        let peer_ref: &Peer = &peer;
        let session_ref: &Session = &session;
        let read = peer.read_loop(stream, move |message| {
            self.dispatch(peer_ref, session_ref, message)
        });

        match timeout(self.config.max_connection_lifetime, read).await {
            Ok(()) => peer.finish(),
            Err(_) => {
                tracing::warn!(
                    peer_id = %peer.id(),
                    lifetime_secs = self.config.max_connection_lifetime.as_secs(),
                    "Connection lifetime cap reached, closing"
                );
                peer.close();
            }
        }

        self.leave(&peer, &session).await;
    }

    async fn await_join<S, E>(stream: &mut S) -> Result<JoinRequest>
    where
        S: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
    {
        while let Some(result) = stream.next().await {
            let message = result.map_err(|e| RelayError::network(e.to_string()))?;

            if message.is_close() {
                return Err(RelayError::ClosedBeforeJoin);
            }
            if message.is_text() || message.is_binary() {
                return JoinRequest::decode(message.as_bytes());
            }
        }

        Err(RelayError::ClosedBeforeJoin)
    }

    async fn dispatch(&self, peer: &Peer, session: &Session, message: ClientMessage) {
        match message {
            ClientMessage::Sync(update) => self.handle_sync(peer, session, update).await,
            ClientMessage::VideoData(payload) => self.handle_video(peer, session, payload).await,
        }
    }

    async fn handle_sync(&self, peer: &Peer, session: &Session, update: SyncUpdate) {
        let state = session.apply_sync(&update).await;
        let delivered = session.broadcast_sync(peer.id()).await;

        tracing::debug!(
            peer_id = %peer.id(),
            session_id = %session.id(),
            playing = state.playing,
            current_time = state.current_time,
            delivered = delivered,
            "Sync applied"
        );
    }

    async fn handle_video(&self, peer: &Peer, session: &Session, payload: VideoPayload) {
        let bytes = match payload.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(peer_id = %peer.id(), error = %e, "Ignoring video upload");
                return;
            }
        };

        let size = bytes.len();
        let data = self.storage.store_video(session.id(), bytes).await;
        let delivered = session
            .broadcast_except(peer.id(), ServerMessage::VideoData { data })
            .await;

        tracing::info!(
            peer_id = %peer.id(),
            session_id = %session.id(),
            size_bytes = size,
            delivered = delivered,
            "Video stored and broadcast"
        );
    }

    async fn leave(&self, peer: &Peer, session: &Session) {
        session.remove_peer(peer.id()).await;
        let remaining = session.peer_count().await;

        tracing::info!(
            peer_id = %peer.id(),
            session_id = %session.id(),
            remaining = remaining,
            "Peer left session"
        );

        session.broadcast_peer_update().await;

        if self.storage.remove_session_if_empty(session.id()).await {
            tracing::info!(session_id = %session.id(), "Session removed (empty)");
        }
    }
}
