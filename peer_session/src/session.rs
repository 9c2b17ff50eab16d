//! The peer session manager.
//!
//! A [`PeerSession`] is a cheap handle; the state lives in a driver task
//! that owns the transport, the connection registry and the dispatcher and
//! `select!`s over commands from handles and events from the transport.
//! Everything runs on the current thread, so handles and the driver must be
//! used inside a `LocalSet` (an actix `System` provides one).

use std::collections::{hash_map::Entry, HashMap};

use futures_util::future::{join_all, LocalBoxFuture};
use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::{Dispatcher, Handler, Received},
    error::{ConnectError, SendError},
    message::{Message, MessageKind},
    registry::{Connection, ConnectionRegistry},
    transport::{Transport, TransportEvent},
    PeerId,
};

/// Lifecycle of the local peer as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Uninitialized,
    /// Waiting for the signaling backend to confirm the identity.
    Initializing,
    Ready,
    /// At least one outbound connection attempt is pending.
    Connecting,
    /// At least one connection is open.
    Connected,
    Destroyed,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Create(Reply<Result<PeerId, ConnectError>>),
    Connect(PeerId, Reply<Result<(), ConnectError>>),
    Send(PeerId, Message, Reply<Result<(), SendError>>),
    Broadcast(Message, Vec<PeerId>, Reply<Result<(), SendError>>),
    Disconnect(PeerId, Reply<()>),
    Destroy(Reply<()>),
    Register(Vec<MessageKind>, Handler),
    LocalId(Reply<Option<PeerId>>),
    State(Reply<PeerState>),
    Connections(Reply<Vec<Connection>>),
}

#[derive(Clone)]
pub struct PeerSession {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

/// A handle that does not keep the session alive. Handlers hold these.
#[derive(Clone)]
pub struct WeakPeerSession {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl WeakPeerSession {
    pub fn upgrade(&self) -> Option<PeerSession> {
        self.commands
            .upgrade()
            .map(|commands| PeerSession { commands })
    }
}

impl PeerSession {
    /// Spawns the session driver on the current `LocalSet`.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (jobs, jobs_rx) = mpsc::unbounded_channel();
        actix_rt::spawn(run_jobs(jobs_rx));
        actix_rt::spawn(Driver::new(Box::new(transport), commands_rx, jobs).run());
        Self { commands }
    }

    pub fn downgrade(&self) -> WeakPeerSession {
        WeakPeerSession {
            commands: self.commands.downgrade(),
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(command(reply)).ok()?;
        rx.await.ok()
    }

    /// Brings the local peer live, or returns the id of the one that already
    /// is. Waits while the identity is being confirmed.
    pub async fn create_local_peer(&self) -> Result<PeerId, ConnectError> {
        self.request(Command::Create)
            .await
            .unwrap_or(Err(ConnectError::Cancelled))
    }

    pub async fn connect_to(&self, remote: PeerId) -> Result<(), ConnectError> {
        self.request(|reply| Command::Connect(remote, reply))
            .await
            .unwrap_or(Err(ConnectError::Cancelled))
    }

    pub async fn send(&self, remote: PeerId, message: Message) -> Result<(), SendError> {
        self.request(|reply| Command::Send(remote, message, reply))
            .await
            .unwrap_or(Err(SendError::Closed))
    }

    /// Sends to every open connection. Failures are collected into
    /// [`SendError::Broadcast`] after all deliveries were attempted.
    pub async fn broadcast(&self, message: Message) -> Result<(), SendError> {
        self.broadcast_except(message, vec![]).await
    }

    pub async fn broadcast_except(
        &self,
        message: Message,
        excluded: Vec<PeerId>,
    ) -> Result<(), SendError> {
        self.request(|reply| Command::Broadcast(message, excluded, reply))
            .await
            .unwrap_or(Err(SendError::Closed))
    }

    /// Closes the connection to `remote`, if there is one.
    pub async fn disconnect(&self, remote: PeerId) {
        let _ = self.request(|reply| Command::Disconnect(remote, reply)).await;
    }

    /// Tears the local peer down. Pending `create_local_peer` and
    /// `connect_to` calls fail with [`ConnectError::Cancelled`].
    pub async fn destroy_local_peer(&self) {
        let _ = self.request(Command::Destroy).await;
    }

    pub fn register_handler(&self, kinds: impl IntoIterator<Item = MessageKind>, handler: Handler) {
        let kinds = kinds.into_iter().collect();
        if self.commands.send(Command::Register(kinds, handler)).is_err() {
            warn!("handler registered on a session that has shut down");
        }
    }

    /// Id of the local peer once it is live.
    pub async fn peer_id(&self) -> Option<PeerId> {
        self.request(Command::LocalId).await.flatten()
    }

    pub async fn state(&self) -> PeerState {
        self.request(Command::State)
            .await
            .unwrap_or(PeerState::Destroyed)
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.request(Command::Connections)
            .await
            .unwrap_or_default()
    }
}

/// Runs dispatch jobs one after another, so handlers see messages in the
/// order the driver received them.
async fn run_jobs(mut jobs: mpsc::UnboundedReceiver<LocalBoxFuture<'static, ()>>) {
    while let Some(job) = jobs.recv().await {
        job.await;
    }
}

#[derive(Debug)]
enum Phase {
    Uninitialized,
    Initializing(PeerId),
    Ready(PeerId),
    Destroyed,
}

struct Driver {
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    jobs: mpsc::UnboundedSender<LocalBoxFuture<'static, ()>>,
    phase: Phase,
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    pending_open: Vec<Reply<Result<PeerId, ConnectError>>>,
    pending_connects: HashMap<PeerId, Vec<Reply<Result<(), ConnectError>>>>,
    /// Connects requested while the identity was still initializing.
    deferred_connects: Vec<(PeerId, Reply<Result<(), ConnectError>>)>,
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    fn new(
        transport: Box<dyn Transport>,
        commands: mpsc::UnboundedReceiver<Command>,
        jobs: mpsc::UnboundedSender<LocalBoxFuture<'static, ()>>,
    ) -> Self {
        Self {
            transport,
            commands,
            events: None,
            jobs,
            phase: Phase::Uninitialized,
            registry: ConnectionRegistry::new(),
            dispatcher: Dispatcher::new(),
            pending_open: vec![],
            pending_connects: HashMap::new(),
            deferred_connects: vec![],
        }
    }

    async fn run(mut self) {
        loop {
            select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("transport event stream ended");
                        self.events = None;
                    }
                },
            }
        }
        self.destroy();
        debug!("peer session driver stopped");
    }

    fn live_id(&self) -> Option<&PeerId> {
        match &self.phase {
            Phase::Ready(id) => Some(id),
            _ => None,
        }
    }

    fn state(&self) -> PeerState {
        match &self.phase {
            Phase::Uninitialized => PeerState::Uninitialized,
            Phase::Initializing(_) => PeerState::Initializing,
            Phase::Destroyed => PeerState::Destroyed,
            Phase::Ready(_) if !self.pending_connects.is_empty() => PeerState::Connecting,
            Phase::Ready(_) if !self.registry.is_empty() => PeerState::Connected,
            Phase::Ready(_) => PeerState::Ready,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create(reply) => self.create(reply),
            Command::Connect(remote, reply) => self.connect(remote, reply),
            Command::Send(remote, message, reply) => self.send(remote, message, reply),
            Command::Broadcast(message, excluded, reply) => {
                self.broadcast(message, excluded, reply)
            }
            Command::Disconnect(remote, reply) => {
                self.disconnect(&remote);
                let _ = reply.send(());
            }
            Command::Destroy(reply) => {
                self.destroy();
                let _ = reply.send(());
            }
            Command::Register(kinds, handler) => self.dispatcher.register(kinds, handler),
            Command::LocalId(reply) => {
                let _ = reply.send(self.live_id().cloned());
            }
            Command::State(reply) => {
                let _ = reply.send(self.state());
            }
            Command::Connections(reply) => {
                let _ = reply.send(self.registry.connections());
            }
        }
    }

    fn create(&mut self, reply: Reply<Result<PeerId, ConnectError>>) {
        match &self.phase {
            Phase::Ready(id) => {
                let _ = reply.send(Ok(id.clone()));
            }
            Phase::Initializing(_) => self.pending_open.push(reply),
            Phase::Uninitialized | Phase::Destroyed => {
                let id = PeerId::generate();
                info!(%id, "creating local peer");
                let (events, events_rx) = mpsc::unbounded_channel();
                self.events = Some(events_rx);
                self.phase = Phase::Initializing(id.clone());
                self.pending_open.push(reply);
                self.transport.open(id, events);
            }
        }
    }

    fn connect(&mut self, remote: PeerId, reply: Reply<Result<(), ConnectError>>) {
        match &self.phase {
            Phase::Uninitialized | Phase::Destroyed => {
                let _ = reply.send(Err(ConnectError::NotInitialized));
            }
            Phase::Initializing(_) => self.deferred_connects.push((remote, reply)),
            Phase::Ready(_) if self.registry.contains(&remote) => {
                let _ = reply.send(Ok(()));
            }
            Phase::Ready(_) => match self.pending_connects.entry(remote) {
                Entry::Occupied(mut waiting) => waiting.get_mut().push(reply),
                Entry::Vacant(slot) => {
                    info!(remote = %slot.key(), "connecting");
                    self.transport.connect(slot.key());
                    slot.insert(vec![reply]);
                }
            },
        }
    }

    fn send(&mut self, remote: PeerId, message: Message, reply: Reply<Result<(), SendError>>) {
        if !self.registry.contains(&remote) {
            let _ = reply.send(Err(SendError::NoConnection(remote)));
            return;
        }
        debug!(%remote, kind = %message.kind(), "sending");
        let delivery = self.transport.send(&remote, message.to_wire());
        actix_rt::spawn(async move {
            let _ = reply.send(delivery.await.map_err(SendError::from));
        });
    }

    fn broadcast(
        &mut self,
        message: Message,
        excluded: Vec<PeerId>,
        reply: Reply<Result<(), SendError>>,
    ) {
        let payload = message.to_wire();
        let targets: Vec<PeerId> = self
            .registry
            .peers()
            .filter(|peer| !excluded.contains(peer))
            .cloned()
            .collect();
        debug!(kind = %message.kind(), targets = targets.len(), "broadcasting");
        let deliveries: Vec<_> = targets
            .into_iter()
            .map(|peer| {
                let delivery = self.transport.send(&peer, payload.clone());
                async move { (peer, delivery.await) }
            })
            .collect();
        actix_rt::spawn(async move {
            let failures: Vec<(PeerId, SendError)> = join_all(deliveries)
                .await
                .into_iter()
                .filter_map(|(peer, result)| result.err().map(|e| (peer, SendError::from(e))))
                .collect();
            let result = if failures.is_empty() {
                Ok(())
            } else {
                Err(SendError::Broadcast { failures })
            };
            let _ = reply.send(result);
        });
    }

    fn disconnect(&mut self, remote: &PeerId) {
        if self.registry.remove(remote).is_some() {
            info!(%remote, "disconnecting");
            self.transport.disconnect(remote);
        }
    }

    fn destroy(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Destroyed) {
            Phase::Uninitialized => {
                self.phase = Phase::Uninitialized;
                return;
            }
            Phase::Destroyed => return,
            Phase::Initializing(id) | Phase::Ready(id) => info!(%id, "destroying local peer"),
        }
        self.transport.destroy();
        self.events = None;
        for connection in self.registry.clear() {
            debug!(remote = %connection.remote(), "connection dropped");
        }
        self.fail_pending(ConnectError::Cancelled);
    }

    fn fail_pending(&mut self, error: ConnectError) {
        for reply in self.pending_open.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for (_, replies) in self.pending_connects.drain() {
            for reply in replies {
                let _ = reply.send(Err(error.clone()));
            }
        }
        for (_, reply) in self.deferred_connects.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Error(e) => match &self.phase {
                Phase::Initializing(id) => {
                    error!(%id, error = %e, "failed to open local peer");
                    self.transport.destroy();
                    self.events = None;
                    self.phase = Phase::Uninitialized;
                    self.fail_pending(ConnectError::Transport(e));
                }
                _ => warn!(error = %e, "transport error"),
            },
            TransportEvent::ChannelOpen { remote, direction } => {
                if self.registry.insert(remote.clone(), direction) {
                    info!(%remote, ?direction, "connection open");
                }
                for reply in self.pending_connects.remove(&remote).unwrap_or_default() {
                    let _ = reply.send(Ok(()));
                }
            }
            TransportEvent::ChannelError { remote, error } => {
                warn!(%remote, %error, "connection failed");
                self.registry.remove(&remote);
                for reply in self.pending_connects.remove(&remote).unwrap_or_default() {
                    let _ = reply.send(Err(ConnectError::Transport(error.clone())));
                }
            }
            TransportEvent::ChannelClosed { remote } => {
                if self.registry.remove(&remote).is_some() {
                    info!(%remote, "connection closed");
                }
                for reply in self.pending_connects.remove(&remote).unwrap_or_default() {
                    let _ = reply.send(Err(ConnectError::Transport(
                        crate::error::TransportError::ChannelClosed(remote.clone()),
                    )));
                }
            }
            TransportEvent::Data { remote, payload } => {
                let Some(message) = Dispatcher::validate(&payload) else {
                    return;
                };
                debug!(%remote, kind = %message.kind(), "received");
                let job = self.dispatcher.dispatch(Received {
                    from: remote,
                    message,
                });
                if self.jobs.send(job).is_err() {
                    error!("dispatch worker is gone");
                }
            }
        }
    }

    fn on_open(&mut self) {
        let Phase::Initializing(id) = &self.phase else {
            debug!("ignoring open for a peer that is not initializing");
            return;
        };
        let id = id.clone();
        info!(%id, "local peer is live");
        self.phase = Phase::Ready(id.clone());
        for reply in self.pending_open.drain(..) {
            let _ = reply.send(Ok(id.clone()));
        }
        for (remote, reply) in std::mem::take(&mut self.deferred_connects) {
            self.connect(remote, reply);
        }
    }
}
