use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

use super::peer::Peer;
use super::protocol::{unix_seconds, ServerMessage, SyncUpdate};

/// Shared playback position of a session. Last write wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub playing: bool,
    pub current_time: f64,
    pub last_update: SystemTime,
}

impl PlaybackState {
    fn new(now: SystemTime) -> Self {
        Self {
            playing: false,
            current_time: 0.0,
            last_update: now,
        }
    }

    fn to_message(self, timestamp: Option<i64>) -> ServerMessage {
        ServerMessage::Sync {
            playing: self.playing,
            current_time: self.current_time,
            timestamp,
        }
    }
}

/// A named room. Lock order inside a session is playback, then peers.
pub struct Session {
    id: String,
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    playback: RwLock<PlaybackState>,
    created_at: SystemTime,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            peers: RwLock::new(HashMap::new()),
            playback: RwLock::new(PlaybackState::new(now)),
            created_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub async fn add_peer(&self, peer: Arc<Peer>) {
        let mut peers = self.peers.write().await;
        peers.insert(peer.id().to_string(), peer);
    }

    /// Greets `peer` with its id, the stored video and the current playback
    /// state, then registers it. Nothing broadcast to the session can reach
    /// the peer ahead of the greeting.
    pub async fn admit(&self, peer: Arc<Peer>, video: Option<Arc<str>>) {
        let playback = self.playback.read().await;
        let mut peers = self.peers.write().await;

        peer.enqueue(ServerMessage::Joined {
            peer_id: peer.id().to_string(),
        });
        if let Some(data) = video {
            peer.enqueue(ServerMessage::VideoData { data });
        }
        peer.enqueue(playback.to_message(None));

        peers.insert(peer.id().to_string(), peer);
    }

    pub async fn remove_peer(&self, peer_id: &str) -> Option<Arc<Peer>> {
        let mut peers = self.peers.write().await;
        peers.remove(peer_id)
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Sorted ids of the current members.
    pub async fn peer_ids(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        sorted_ids(&peers)
    }

    pub async fn playback(&self) -> PlaybackState {
        *self.playback.read().await
    }

    /// Applies the fields present in `update` and stamps `last_update`.
    pub async fn apply_sync(&self, update: &SyncUpdate) -> PlaybackState {
        let mut playback = self.playback.write().await;

        if let Some(playing) = update.playing {
            playback.playing = playing;
        }
        if let Some(current_time) = update.current_time {
            playback.current_time = current_time;
        }
        playback.last_update = SystemTime::now();

        *playback
    }

    /// Sends the current playback state to every peer except `exclude_peer_id`.
    pub async fn broadcast_sync(&self, exclude_peer_id: &str) -> usize {
        let (message, targets) = {
            let playback = self.playback.read().await;
            let peers = self.peers.read().await;
            let message = playback.to_message(Some(unix_seconds(SystemTime::now())));
            (message, recipients(&peers, Some(exclude_peer_id)))
        };

        deliver(message, &targets)
    }

    /// Sends the roster to every peer, including the one that triggered it.
    pub async fn broadcast_peer_update(&self) -> usize {
        let (message, targets) = {
            let peers = self.peers.read().await;
            let message = ServerMessage::PeerUpdate {
                peers: sorted_ids(&peers),
            };
            (message, recipients(&peers, None))
        };

        deliver(message, &targets)
    }

    pub async fn broadcast_except(&self, exclude_peer_id: &str, message: ServerMessage) -> usize {
        let targets = {
            let peers = self.peers.read().await;
            recipients(&peers, Some(exclude_peer_id))
        };

        deliver(message, &targets)
    }
}

fn sorted_ids(peers: &HashMap<String, Arc<Peer>>) -> Vec<String> {
    let mut ids: Vec<String> = peers.keys().cloned().collect();
    ids.sort();
    ids
}

fn recipients(peers: &HashMap<String, Arc<Peer>>, exclude: Option<&str>) -> Vec<Arc<Peer>> {
    peers
        .iter()
        .filter(|(id, _)| Some(id.as_str()) != exclude)
        .map(|(_, peer)| peer.clone())
        .collect()
}

/// Enqueues outside any session lock. Full queues drop per peer.
fn deliver(message: ServerMessage, targets: &[Arc<Peer>]) -> usize {
    for peer in targets {
        peer.enqueue(message.clone());
    }
    targets.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::peer::Outbox;

    fn peer(id: &str) -> (Arc<Peer>, Outbox) {
        Peer::new(id.to_string(), "movie1".to_string(), 10)
    }

    fn drain(outbox: &mut Outbox) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = outbox.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_add_and_remove_peers() {
        let session = Session::new("movie1");
        let (a, _a_rx) = peer("peer_a");
        let (b, _b_rx) = peer("peer_b");

        session.add_peer(a).await;
        session.add_peer(b).await;
        assert_eq!(session.peer_count().await, 2);
        assert_eq!(session.peer_ids().await, vec!["peer_a", "peer_b"]);

        assert!(session.remove_peer("peer_a").await.is_some());
        assert!(session.remove_peer("peer_a").await.is_none());
        assert_eq!(session.peer_ids().await, vec!["peer_b"]);

        session.remove_peer("peer_b").await;
        assert!(session.is_empty().await);
    }

    #[tokio::test]
    async fn test_new_session_starts_paused_at_zero() {
        let session = Session::new("movie1");
        let playback = session.playback().await;
        assert!(!playback.playing);
        assert_eq!(playback.current_time, 0.0);
        assert!(playback.last_update >= session.created_at());
    }

    #[tokio::test]
    async fn test_apply_sync_updates_present_fields_only() {
        let session = Session::new("movie1");
        let before = session.playback().await.last_update;

        let state = session
            .apply_sync(&SyncUpdate {
                playing: Some(true),
                current_time: None,
            })
            .await;
        assert!(state.playing);
        assert_eq!(state.current_time, 0.0);
        assert!(state.last_update >= before);

        let state = session
            .apply_sync(&SyncUpdate {
                playing: None,
                current_time: Some(42.5),
            })
            .await;
        assert!(state.playing);
        assert_eq!(state.current_time, 42.5);
    }

    #[tokio::test]
    async fn test_broadcast_sync_excludes_originator() {
        let session = Session::new("movie1");
        let (a, mut a_rx) = peer("peer_a");
        let (b, mut b_rx) = peer("peer_b");
        let (c, mut c_rx) = peer("peer_c");
        session.add_peer(a).await;
        session.add_peer(b).await;
        session.add_peer(c).await;

        session
            .apply_sync(&SyncUpdate {
                playing: Some(true),
                current_time: Some(12.5),
            })
            .await;
        let delivered = session.broadcast_sync("peer_b").await;

        assert_eq!(delivered, 2);
        assert!(drain(&mut b_rx).is_empty());
        for rx in [&mut a_rx, &mut c_rx] {
            let messages = drain(rx);
            assert_eq!(messages.len(), 1);
            match &messages[0] {
                ServerMessage::Sync {
                    playing,
                    current_time,
                    timestamp,
                } => {
                    assert!(*playing);
                    assert_eq!(*current_time, 12.5);
                    assert!(timestamp.is_some());
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_peer_update_reaches_everyone() {
        let session = Session::new("movie1");
        let (a, mut a_rx) = peer("peer_a");
        let (b, mut b_rx) = peer("peer_b");
        session.add_peer(a).await;
        session.add_peer(b).await;

        assert_eq!(session.broadcast_peer_update().await, 2);

        let expected = ServerMessage::PeerUpdate {
            peers: vec!["peer_a".to_string(), "peer_b".to_string()],
        };
        assert_eq!(drain(&mut a_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut b_rx), vec![expected]);
    }

    #[tokio::test]
    async fn test_admit_greets_before_registering() {
        let session = Session::new("movie1");
        let (a, mut a_rx) = peer("peer_a");

        session.admit(a, Some("AQID".into())).await;

        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::Joined {
                    peer_id: "peer_a".to_string()
                },
                ServerMessage::VideoData {
                    data: "AQID".into()
                },
                ServerMessage::Sync {
                    playing: false,
                    current_time: 0.0,
                    timestamp: None
                },
            ]
        );
        assert_eq!(session.peer_ids().await, vec!["peer_a"]);
    }

    #[tokio::test]
    async fn test_broadcast_ignores_closed_peers() {
        let session = Session::new("movie1");
        let (a, mut a_rx) = peer("peer_a");
        let (b, mut b_rx) = peer("peer_b");
        b.close();
        session.add_peer(a).await;
        session.add_peer(b).await;

        session
            .broadcast_except("nobody", ServerMessage::video(&[9]))
            .await;

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_only_affects_that_peer() {
        let session = Session::new("movie1");
        let (a, mut a_rx) = peer("peer_a");
        let (b, mut b_rx) = Peer::new("peer_b".into(), "movie1".into(), 1);
        let (c, mut c_rx) = peer("peer_c");
        let first = ServerMessage::PeerUpdate {
            peers: vec!["peer_b".to_string()],
        };
        b.enqueue(first.clone());
        session.add_peer(a).await;
        session.add_peer(b).await;
        session.add_peer(c).await;

        assert_eq!(session.broadcast_sync("nobody").await, 3);
        let video = ServerMessage::video(&[9]);
        assert_eq!(session.broadcast_except("nobody", video).await, 3);

        for rx in [&mut a_rx, &mut c_rx] {
            let kinds: Vec<_> = drain(rx).iter().map(ServerMessage::kind).collect();
            assert_eq!(kinds, vec!["sync", "videoData"]);
        }
        assert_eq!(drain(&mut b_rx), vec![first]);
    }
}
