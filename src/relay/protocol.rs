use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};

/// First frame a client sends after the upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

impl JoinRequest {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let request: JoinRequest = serde_json::from_slice(raw)
            .map_err(|e| RelayError::invalid_join(e.to_string()))?;

        if request.session_id.is_empty() {
            return Err(RelayError::invalid_join("sessionId is empty"));
        }

        Ok(request)
    }
}

/// Messages accepted from a joined peer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Sync(SyncUpdate),
    VideoData(VideoPayload),
}

/// Partial playback update. Absent or wrong-typed fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncUpdate {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub playing: Option<bool>,
    #[serde(default, rename = "currentTime", deserialize_with = "lenient_f64")]
    pub current_time: Option<f64>,
}

/// Video bytes as sent by a browser: either base64 or a plain array of byte values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VideoPayload {
    Base64(String),
    Bytes(Vec<Value>),
}

#[derive(Deserialize)]
struct VideoDataFields {
    data: VideoPayload,
}

impl ClientMessage {
    /// Validates one inbound frame into a typed message.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| RelayError::malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(RelayError::MissingMessageType)?
            .to_owned();

        match kind.as_str() {
            "sync" => {
                let update: SyncUpdate = serde_json::from_value(value)
                    .map_err(|e| RelayError::malformed(e.to_string()))?;
                Ok(ClientMessage::Sync(update))
            }
            "videoData" => {
                let fields: VideoDataFields = serde_json::from_value(value)
                    .map_err(|e| RelayError::malformed(e.to_string()))?;
                Ok(ClientMessage::VideoData(fields.data))
            }
            _ => Err(RelayError::UnknownMessageType(kind)),
        }
    }
}

impl VideoPayload {
    /// Decodes to raw bytes. Empty results are rejected.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            VideoPayload::Base64(encoded) => STANDARD.decode(encoded)?,
            VideoPayload::Bytes(values) => values
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    value
                        .as_u64()
                        .and_then(|byte| u8::try_from(byte).ok())
                        .ok_or_else(|| {
                            RelayError::VideoDecodeFailed(format!(
                                "element {} ({}) is not a byte",
                                index, value
                            ))
                        })
                })
                .collect::<Result<Vec<u8>>>()?,
        };

        if bytes.is_empty() {
            return Err(RelayError::EmptyVideo);
        }

        Ok(bytes)
    }
}

pub fn encode_video(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_bool())
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_f64())
}

/// Messages the relay sends to peers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Joined {
        #[serde(rename = "peerID")]
        peer_id: String,
    },
    VideoData {
        data: Arc<str>,
    },
    Sync {
        playing: bool,
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    PeerUpdate {
        peers: Vec<String>,
    },
}

impl ServerMessage {
    pub fn video(bytes: &[u8]) -> Self {
        ServerMessage::VideoData {
            data: encode_video(bytes).into(),
        }
    }

    /// JSON text of the frame sent on the wire.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Name of the `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::VideoData { .. } => "videoData",
            ServerMessage::Sync { .. } => "sync",
            ServerMessage::PeerUpdate { .. } => "peerUpdate",
        }
    }
}

/// Process-wide source of peer ids.
#[derive(Debug, Default)]
pub struct PeerIdAllocator {
    next: AtomicU64,
}

impl PeerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("peer_{}", n)
    }
}

pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
