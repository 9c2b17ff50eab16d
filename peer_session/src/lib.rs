use std::fmt;

pub use awc::ws;
use uuid::Uuid;

pub mod collab;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod link;
pub mod message;
pub mod registry;
pub mod session;
pub mod signal;
pub mod template;
pub mod transport;

pub use collab::{CollabConfig, Collaboration, RelayMode};
pub use config::{SignalingConfig, SignalingConfigBuilder};
pub use dispatcher::{handler, Dispatcher, Handler, Received};
pub use document::{Document, SharedDocument};
pub use error::{ConnectError, JoinError, SendError, TransportError, ValidationError};
pub use message::{Body, Message, MessageKind};
pub use registry::{Connection, ConnectionRegistry, Direction};
pub use session::{PeerSession, PeerState, WeakPeerSession};
pub use transport::{
    memory::{MemoryNetwork, MemoryTransport},
    rtc::WebRtcTransport,
    Transport, TransportEvent,
};

/// Identifier of one session participant.
///
/// Generated once when a local peer is created and never reused, so a
/// destroyed peer can not be resurrected under its old id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
