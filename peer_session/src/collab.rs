//! Template/inputs replication on top of a [`PeerSession`].
//!
//! A peer that joins through a session link asks its parent for the current
//! state (`REQUEST_STATE`) and gets a full snapshot back (`INITIAL_STATE`).
//! From then on every local edit is broadcast as `TEMPLATE_CHANGE` or
//! `INPUT_CHANGE`, and the root of the star relays what it receives to its
//! other connections.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use anyhow::Context;
use tracing::{debug, info};

use crate::{
    dispatcher::{handler, Received},
    document::SharedDocument,
    error::{JoinError, SendError},
    message::{Body, Message, MessageKind},
    session::{PeerSession, WeakPeerSession},
    PeerId,
};

/// Which peers forward changes they receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayMode {
    /// Only a peer without a parent relays: enough for a star.
    #[default]
    RootOnly,
    /// Every peer relays, for trees deeper than one level.
    Always,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CollabConfig {
    #[serde(default)]
    pub relay: RelayMode,
}

/// Highest edit sequence seen per origin.
#[derive(Debug, Default)]
struct RelayGuard {
    latest: HashMap<PeerId, u64>,
}

impl RelayGuard {
    fn is_fresh(&mut self, message: &Message) -> bool {
        let Some(seq) = message.seq() else {
            return true;
        };
        match self.latest.get(message.sender()) {
            Some(&seen) if seen >= seq => false,
            _ => {
                self.latest.insert(message.sender().clone(), seq);
                true
            }
        }
    }
}

struct Inner {
    session: WeakPeerSession,
    document: SharedDocument,
    config: CollabConfig,
    /// Local identity that `parent` and `collaborators` belong to.
    identity: RefCell<Option<PeerId>>,
    parent: RefCell<Option<PeerId>>,
    collaborators: RefCell<Vec<PeerId>>,
    guard: RefCell<RelayGuard>,
    next_seq: Cell<u64>,
}

#[derive(Clone)]
pub struct Collaboration {
    session: PeerSession,
    inner: Rc<Inner>,
}

impl std::fmt::Debug for Collaboration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaboration")
            .field("parent", &self.inner.parent.borrow())
            .field("collaborators", &self.inner.collaborators.borrow())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Collaboration {
    /// Registers the protocol handlers on `session`.
    pub fn attach(session: &PeerSession, document: SharedDocument, config: CollabConfig) -> Self {
        let inner = Rc::new(Inner {
            session: session.downgrade(),
            document,
            config,
            identity: RefCell::new(None),
            parent: RefCell::new(None),
            collaborators: RefCell::new(vec![]),
            guard: RefCell::new(RelayGuard::default()),
            next_seq: Cell::new(0),
        });
        let handler_inner = inner.clone();
        session.register_handler(
            MessageKind::ALL,
            handler(move |received| {
                let inner = handler_inner.clone();
                async move { inner.handle(received).await }
            }),
        );
        Self {
            session: session.clone(),
            inner,
        }
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    pub fn document(&self) -> &SharedDocument {
        &self.inner.document
    }

    pub fn parent(&self) -> Option<PeerId> {
        self.inner.parent.borrow().clone()
    }

    pub fn collaborators(&self) -> Vec<PeerId> {
        self.inner.collaborators.borrow().clone()
    }

    /// Brings the local peer live and, given a parent from a session link,
    /// joins it.
    pub async fn start(&self, parent: Option<PeerId>) -> Result<PeerId, JoinError> {
        let id = self.go_live().await?;
        if let Some(parent) = parent {
            self.join(parent).await?;
        }
        Ok(id)
    }

    /// Connects to `parent` and asks it for the current state.
    pub async fn join(&self, parent: PeerId) -> Result<(), JoinError> {
        let local = self.go_live().await?;
        let previous = self.inner.parent.replace(Some(parent.clone()));
        if let Err(e) = self.session.connect_to(parent.clone()).await {
            *self.inner.parent.borrow_mut() = previous;
            return Err(e.into());
        }
        info!(%parent, "joined session");
        let request = Message::new(local.clone(), Body::RequestState { peer_id: local });
        self.session.send(parent, request).await?;
        Ok(())
    }

    /// Destroys the local peer and forgets its place in the session.
    pub async fn leave(&self) {
        self.session.destroy_local_peer().await;
        self.inner.identity.replace(None);
        self.inner.forget_role();
    }

    async fn go_live(&self) -> Result<PeerId, JoinError> {
        let id = self.session.create_local_peer().await?;
        self.inner.adopt(&id);
        Ok(id)
    }

    pub async fn set_template(&self, template: impl Into<String>) -> Result<(), SendError> {
        let template = template.into();
        self.inner.document.set_template(template.clone());
        self.publish(Body::TemplateChanged { template }).await
    }

    pub async fn set_input(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SendError> {
        let (name, value) = (name.into(), value.into());
        self.inner.document.set_input(name.clone(), value.clone());
        self.publish(Body::InputChanged { name, value }).await
    }

    /// Broadcasts a local edit. Before the peer is live the edit stays local.
    async fn publish(&self, body: Body) -> Result<(), SendError> {
        let Some(local) = self.session.peer_id().await else {
            debug!(kind = %body.kind(), "not collaborating, edit stays local");
            return Ok(());
        };
        let seq = self.inner.next_seq.get() + 1;
        self.inner.next_seq.set(seq);
        self.session
            .broadcast(Message::new(local, body).with_seq(seq))
            .await
    }
}

impl Inner {
    /// A new local identity starts with no parent and no collaborators.
    fn adopt(&self, local: &PeerId) {
        let previous = self.identity.replace(Some(local.clone()));
        if previous.as_ref() != Some(local) {
            self.forget_role();
        }
    }

    fn forget_role(&self) {
        if let Some(parent) = self.parent.replace(None) {
            debug!(%parent, "forgetting parent of a previous identity");
        }
        self.collaborators.borrow_mut().clear();
    }

    async fn handle(&self, received: Received) -> anyhow::Result<()> {
        let session = self.session.upgrade().context("peer session is gone")?;
        let local = session
            .peer_id()
            .await
            .context("message arrived for a peer that is not live")?;
        self.adopt(&local);
        let Received { from, message } = received;
        if message.sender() == &local {
            debug!(kind = %message.kind(), %from, "ignoring own message");
            return Ok(());
        }

        match message.body() {
            Body::RequestState { peer_id } => {
                self.collaborators.borrow_mut().push(peer_id.clone());
                info!(collaborator = %peer_id, "sending state to new collaborator");
                let snapshot = Body::InitialState(self.document.snapshot());
                session
                    .send(peer_id.clone(), Message::new(local, snapshot))
                    .await
                    .with_context(|| format!("failed to send state to {peer_id}"))?;
            }
            Body::InitialState(document) => {
                info!(%from, "received session state");
                self.document.replace(document.clone());
            }
            Body::TemplateChanged { template } => {
                if !self.guard.borrow_mut().is_fresh(&message) {
                    debug!(origin = %message.sender(), "dropping stale template change");
                    return Ok(());
                }
                self.document.set_template(template.clone());
                self.relay(&session, &from, &message).await?;
            }
            Body::InputChanged { name, value } => {
                if !self.guard.borrow_mut().is_fresh(&message) {
                    debug!(origin = %message.sender(), "dropping stale input change");
                    return Ok(());
                }
                self.document.set_input(name.clone(), value.clone());
                self.relay(&session, &from, &message).await?;
            }
        }
        Ok(())
    }

    /// Forwards `message` unchanged to every connection other than the one
    /// it came from and its origin.
    async fn relay(&self, session: &PeerSession, from: &PeerId, message: &Message) -> anyhow::Result<()> {
        let relays = match self.config.relay {
            RelayMode::RootOnly => self.parent.borrow().is_none(),
            RelayMode::Always => true,
        };
        if !relays {
            return Ok(());
        }
        let excluded = vec![from.clone(), message.sender().clone()];
        session
            .broadcast_except(message.clone(), excluded)
            .await
            .with_context(|| format!("failed to relay {}", message.kind()))
    }
}
