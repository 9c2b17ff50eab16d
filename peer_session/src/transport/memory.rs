//! In-process transport.
//!
//! A [`MemoryNetwork`] plays the part of the signaling backend and of the
//! data channels between every [`MemoryTransport`] created from it, so
//! several peers can run inside one process (and one test).

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

use futures_util::future::{self, LocalBoxFuture};
use serde_json::Value;
use tracing::debug;

use super::{EventSender, Transport, TransportEvent};
use crate::{error::TransportError, registry::Direction, PeerId};

#[derive(Debug, Default)]
struct Network {
    endpoints: HashMap<PeerId, EventSender>,
    channels: HashSet<(PeerId, PeerId)>,
    hold_connects: bool,
    held: Vec<(PeerId, PeerId)>,
    hold_opens: bool,
    held_opens: Vec<(PeerId, EventSender)>,
    failing: HashSet<PeerId>,
}

fn channel_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl Network {
    fn register(&mut self, id: PeerId, events: EventSender) {
        if self.endpoints.contains_key(&id) {
            let _ = events.send(TransportEvent::Error(TransportError::IdTaken(id)));
            return;
        }
        self.endpoints.insert(id, events.clone());
        let _ = events.send(TransportEvent::Open);
    }

    fn establish(&mut self, local: &PeerId, remote: &PeerId) {
        let Some(local_tx) = self.endpoints.get(local) else {
            debug!(%local, "connect from a peer that is gone");
            return;
        };
        match self.endpoints.get(remote) {
            Some(remote_tx) if local != remote => {
                let _ = local_tx.send(TransportEvent::ChannelOpen {
                    remote: remote.clone(),
                    direction: Direction::Outbound,
                });
                let _ = remote_tx.send(TransportEvent::ChannelOpen {
                    remote: local.clone(),
                    direction: Direction::Inbound,
                });
                self.channels.insert(channel_key(local, remote));
            }
            _ => {
                let _ = local_tx.send(TransportEvent::ChannelError {
                    remote: remote.clone(),
                    error: TransportError::PeerUnavailable(remote.clone()),
                });
            }
        }
    }

    fn close(&mut self, a: &PeerId, b: &PeerId) {
        if !self.channels.remove(&channel_key(a, b)) {
            return;
        }
        for (end, other) in [(a, b), (b, a)] {
            if let Some(tx) = self.endpoints.get(end) {
                let _ = tx.send(TransportEvent::ChannelClosed {
                    remote: other.clone(),
                });
            }
        }
    }

    fn deliver(&self, local: &PeerId, remote: &PeerId, payload: Value) -> Result<(), TransportError> {
        if self.failing.contains(remote) || !self.channels.contains(&channel_key(local, remote)) {
            return Err(TransportError::ChannelClosed(remote.clone()));
        }
        let tx = self
            .endpoints
            .get(remote)
            .ok_or_else(|| TransportError::PeerUnavailable(remote.clone()))?;
        tx.send(TransportEvent::Data {
            remote: local.clone(),
            payload,
        })
        .map_err(|_| TransportError::ChannelClosed(remote.clone()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Rc<RefCell<Network>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local: None,
        }
    }

    pub fn is_online(&self, id: &PeerId) -> bool {
        self.inner.borrow().endpoints.contains_key(id)
    }

    /// While set, connection attempts stay pending. Clearing it completes
    /// the held attempts.
    pub fn hold_connects(&self, hold: bool) {
        let mut network = self.inner.borrow_mut();
        network.hold_connects = hold;
        if !hold {
            for (local, remote) in std::mem::take(&mut network.held) {
                network.establish(&local, &remote);
            }
        }
    }

    /// While set, peers stay initializing. Clearing it confirms the held
    /// identities.
    pub fn hold_opens(&self, hold: bool) {
        let mut network = self.inner.borrow_mut();
        network.hold_opens = hold;
        if !hold {
            for (id, events) in std::mem::take(&mut network.held_opens) {
                network.register(id, events);
            }
        }
    }

    /// Makes every send to `peer` fail from now on.
    pub fn fail_sends_to(&self, peer: &PeerId) {
        self.inner.borrow_mut().failing.insert(peer.clone());
    }

    /// Drops the channel between `a` and `b` as if the link went down.
    pub fn sever(&self, a: &PeerId, b: &PeerId) {
        self.inner.borrow_mut().close(a, b);
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: Option<PeerId>,
}

impl Transport for MemoryTransport {
    fn open(&mut self, id: PeerId, events: EventSender) {
        self.destroy();
        let mut network = self.network.inner.borrow_mut();
        if network.hold_opens {
            self.local = Some(id.clone());
            network.held_opens.push((id, events));
            return;
        }
        if !network.endpoints.contains_key(&id) {
            self.local = Some(id.clone());
        }
        network.register(id, events);
    }

    fn connect(&mut self, remote: &PeerId) {
        let Some(local) = &self.local else {
            return;
        };
        let mut network = self.network.inner.borrow_mut();
        if network.hold_connects {
            network.held.push((local.clone(), remote.clone()));
        } else {
            network.establish(local, remote);
        }
    }

    fn send(
        &mut self,
        remote: &PeerId,
        payload: Value,
    ) -> LocalBoxFuture<'static, Result<(), TransportError>> {
        let result = match &self.local {
            Some(local) => self.network.inner.borrow().deliver(local, remote, payload),
            None => Err(TransportError::NotOpen),
        };
        Box::pin(future::ready(result))
    }

    fn disconnect(&mut self, remote: &PeerId) {
        if let Some(local) = &self.local {
            self.network.inner.borrow_mut().close(local, remote);
        }
    }

    fn destroy(&mut self) {
        let Some(local) = self.local.take() else {
            return;
        };
        let mut network = self.network.inner.borrow_mut();
        let remotes: Vec<PeerId> = network
            .channels
            .iter()
            .filter_map(|(a, b)| match (a == &local, b == &local) {
                (true, _) => Some(b.clone()),
                (_, true) => Some(a.clone()),
                _ => None,
            })
            .collect();
        for remote in remotes {
            network.close(&local, &remote);
        }
        network.held.retain(|(from, _)| from != &local);
        network.held_opens.retain(|(id, _)| id != &local);
        network.endpoints.remove(&local);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}
