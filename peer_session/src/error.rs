use crate::{message::MessageKind, PeerId};

/// Failure reported by a [`Transport`](crate::Transport).
///
/// Cloneable so one failure can settle every caller waiting on the same
/// connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("signaling failed: {0}")]
    Signaling(String),

    #[error("peer id {0} is already taken")]
    IdTaken(PeerId),

    #[error("peer {0} is unavailable")]
    PeerUnavailable(PeerId),

    #[error("channel to {0} is closed")]
    ChannelClosed(PeerId),

    #[error("rtc error: {0}")]
    Rtc(String),

    #[error("transport is not open")]
    NotOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("local peer is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("local peer was destroyed before the operation completed")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("no open connection to {0}")]
    NoConnection(PeerId),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("delivery failed for {} connection(s)", failures.len())]
    Broadcast { failures: Vec<(PeerId, SendError)> },

    #[error("peer session has shut down")]
    Closed,
}

impl SendError {
    /// Peers a message could not be delivered to.
    pub fn failed_peers(&self) -> Vec<&PeerId> {
        match self {
            SendError::NoConnection(peer) | SendError::Transport(TransportError::ChannelClosed(peer)) => {
                vec![peer]
            }
            SendError::Broadcast { failures } => failures.iter().map(|(peer, _)| peer).collect(),
            _ => vec![],
        }
    }
}

/// Why an inbound payload was dropped. Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("payload is not an object")]
    NotAnObject,

    #[error("missing `type` field")]
    MissingKind,

    #[error("unknown message type {0}")]
    UnknownKind(String),

    #[error("missing `peerId` field")]
    MissingSender,

    #[error("missing `data` field")]
    MissingData,

    #[error("malformed `data` for {kind}")]
    MalformedData {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("failed to join session: {0}")]
    Connect(#[from] ConnectError),

    #[error("failed to request session state: {0}")]
    Send(#[from] SendError),
}
