pub mod peer;
pub mod protocol;
mod server;
pub mod session;
pub mod storage;

pub use peer::Peer;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::RelayServer;
pub use session::{PlaybackState, Session};
pub use storage::Storage;
