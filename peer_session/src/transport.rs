//! The contract a peer session consumes from its data-channel transport.
//!
//! Operations only *start* work; completion is reported on the event channel
//! handed to [`Transport::open`]. The session driver therefore never blocks
//! on a pending connection and can tear everything down at any time.
//!
//! Delivery order within one channel is whatever the transport provides.
//! Both transports shipped here deliver in send order.

use futures_util::future::LocalBoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{error::TransportError, registry::Direction, PeerId};

pub mod memory;
pub mod rtc;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The local identity is live on the signaling backend.
    Open,
    /// Opening the local identity failed, or the backend reported a problem.
    Error(TransportError),
    ChannelOpen {
        remote: PeerId,
        direction: Direction,
    },
    ChannelError {
        remote: PeerId,
        error: TransportError,
    },
    ChannelClosed {
        remote: PeerId,
    },
    Data {
        remote: PeerId,
        payload: Value,
    },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

pub trait Transport {
    /// Starts bringing `id` live. Answered with [`TransportEvent::Open`] or
    /// [`TransportEvent::Error`]; every later event for this identity goes
    /// to `events` as well.
    fn open(&mut self, id: PeerId, events: EventSender);

    /// Starts an outbound channel. Answered with `ChannelOpen` or
    /// `ChannelError` for `remote`.
    fn connect(&mut self, remote: &PeerId);

    /// Queues `payload` on the channel to `remote`. Sends are queued in call
    /// order; the returned future reports the outcome.
    fn send(&mut self, remote: &PeerId, payload: Value)
        -> LocalBoxFuture<'static, Result<(), TransportError>>;

    fn disconnect(&mut self, remote: &PeerId);

    /// Drops the local identity and all of its channels.
    fn destroy(&mut self);
}
