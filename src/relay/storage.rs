use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::peer::Peer;
use super::protocol::encode_video;
use super::session::Session;

/// An uploaded video kept both raw and in its base64 wire form, so joiners
/// and broadcasts share one encoding.
#[derive(Clone)]
struct StoredVideo {
    bytes: Arc<Vec<u8>>,
    encoded: Arc<str>,
}

/// Process-wide registry of sessions and their last uploaded video.
///
/// Lock order: `sessions`, then `videos`, then any lock inside a [`Session`].
pub struct Storage {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    videos: RwLock<HashMap<String, StoredVideo>>,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            videos: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the session for `session_id`, creating it on first use.
    /// Concurrent callers with the same id all get the same instance.
    pub async fn create_or_get_session(&self, session_id: &str) -> Arc<Session> {
        if let Some(session) = self.get_session(session_id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        Self::entry(&mut sessions, session_id)
    }

    /// Resolves the session and admits `peer` in one step, so a concurrent
    /// last-leaver cannot remove the session between lookup and registration.
    pub async fn join_session(&self, session_id: &str, peer: Arc<Peer>) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        let session = Self::entry(&mut sessions, session_id);

        let video = {
            let videos = self.videos.read().await;
            videos
                .get(session_id)
                .filter(|video| !video.bytes.is_empty())
                .map(|video| video.encoded.clone())
        };
        session.admit(peer, video).await;

        session
    }

    fn entry(sessions: &mut HashMap<String, Arc<Session>>, session_id: &str) -> Arc<Session> {
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id = %session_id, "Session created");
                Arc::new(Session::new(session_id))
            })
            .clone()
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    pub async fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id)
    }

    /// Deletes the session and its video if no peers remain.
    /// Returns whether anything was removed.
    pub async fn remove_session_if_empty(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;

        let empty = match sessions.get(session_id) {
            Some(session) => session.is_empty().await,
            None => return false,
        };
        if !empty {
            return false;
        }

        sessions.remove(session_id);
        self.videos.write().await.remove(session_id);
        true
    }

    /// Replaces any video stored for `session_id` and returns its base64
    /// form for relaying.
    ///
    /// Encoding happens before any lock is taken. The sessions read lock is
    /// then held so an upload cannot land between a joiner's video snapshot
    /// and its registration.
    pub async fn store_video(&self, session_id: &str, data: Vec<u8>) -> Arc<str> {
        let encoded: Arc<str> = encode_video(&data).into();
        let video = StoredVideo {
            bytes: Arc::new(data),
            encoded: encoded.clone(),
        };

        let _sessions = self.sessions.read().await;
        let mut videos = self.videos.write().await;
        videos.insert(session_id.to_string(), video);
        encoded
    }

    /// `None` means no upload yet; an empty payload is returned as-is.
    pub async fn get_video(&self, session_id: &str) -> Option<Arc<Vec<u8>>> {
        let videos = self.videos.read().await;
        videos.get(session_id).map(|video| video.bytes.clone())
    }

    /// The stored video in the form joiners receive it.
    pub async fn get_encoded_video(&self, session_id: &str) -> Option<Arc<str>> {
        let videos = self.videos.read().await;
        videos.get(session_id).map(|video| video.encoded.clone())
    }

    pub async fn delete_video(&self, session_id: &str) {
        let mut videos = self.videos.write().await;
        videos.remove(session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
