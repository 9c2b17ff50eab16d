//! Frames exchanged with the signaling backend over its websocket.

use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::PeerId;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    /// First frame from the backend: the id is registered.
    Open { id: PeerId },
    IdTaken { id: PeerId },
    Error { reason: String },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
        offer: RTCSessionDescription,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
        answer: RTCSessionDescription,
    },
    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
        candidate: String,
    },
    /// The sender is closing its connection to `dst`.
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
    },
    /// A frame could not be delivered because `peer` is not registered.
    Expire { peer: PeerId },
    Heartbeat,
}

impl Signal {
    /// Peer a relayed frame is addressed to.
    pub fn destination(&self) -> Option<&PeerId> {
        match self {
            Signal::Offer { dst, .. }
            | Signal::Answer { dst, .. }
            | Signal::Candidate { dst, .. }
            | Signal::Leave { dst, .. } => Some(dst),
            _ => None,
        }
    }

    /// Stamps the sender on a relayed frame, replacing whatever it claimed.
    pub fn with_source(mut self, source: PeerId) -> Self {
        match &mut self {
            Signal::Offer { src, .. }
            | Signal::Answer { src, .. }
            | Signal::Candidate { src, .. }
            | Signal::Leave { src, .. } => *src = Some(source),
            _ => {}
        }
        self
    }

    pub fn source(&self) -> Option<&PeerId> {
        match self {
            Signal::Offer { src, .. }
            | Signal::Answer { src, .. }
            | Signal::Candidate { src, .. }
            | Signal::Leave { src, .. } => src.as_ref(),
            _ => None,
        }
    }
}
