use std::{collections::BTreeMap, time::Instant};

use getset::{CopyGetters, Getters};

use crate::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted from a remote peer.
    Inbound,
    /// Opened by `connect_to`.
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    Closed,
}

#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct Connection {
    #[getset(get = "pub")]
    remote: PeerId,
    #[getset(get_copy = "pub")]
    direction: Direction,
    #[getset(get_copy = "pub")]
    status: Status,
    #[getset(get_copy = "pub")]
    opened_at: Instant,
}

impl Connection {
    fn open(remote: PeerId, direction: Direction) -> Self {
        Self {
            remote,
            direction,
            status: Status::Open,
            opened_at: Instant::now(),
        }
    }
}

/// Open connections keyed by remote peer.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<PeerId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a connection to `remote` was already registered.
    pub fn insert(&mut self, remote: PeerId, direction: Direction) -> bool {
        if self.connections.contains_key(&remote) {
            return false;
        }
        self.connections
            .insert(remote.clone(), Connection::open(remote, direction));
        true
    }

    pub fn remove(&mut self, remote: &PeerId) -> Option<Connection> {
        self.connections.remove(remote).map(|mut connection| {
            connection.status = Status::Closed;
            connection
        })
    }

    pub fn get(&self, remote: &PeerId) -> Option<&Connection> {
        self.connections.get(remote)
    }

    pub fn contains(&self, remote: &PeerId) -> bool {
        self.connections.contains_key(remote)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.connections.keys()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections)
            .into_values()
            .map(|mut connection| {
                connection.status = Status::Closed;
                connection
            })
            .collect()
    }
}
