use std::collections::HashMap;

use actix::prelude::*;
use peer_session::{signal::Signal, PeerId};
use tracing::{debug, info, warn};

/// A frame for the client's websocket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub Signal);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("peer id {0} is already connected")]
    AlreadyConnected(PeerId),
}

#[derive(Message)]
#[rtype(result = "Result<(), Error>")]
pub struct Connect {
    pub id: PeerId,
    pub addr: Recipient<Deliver>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub id: PeerId,
}

/// A frame from `src` to be relayed to its destination.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Forward {
    pub src: PeerId,
    pub signal: Signal,
}

/// Knows every registered peer and relays frames between them.
#[derive(Default)]
pub struct Moderator {
    clients: HashMap<PeerId, Recipient<Deliver>>,
}

impl Actor for Moderator {
    type Context = Context<Self>;
}

impl Handler<Connect> for Moderator {
    type Result = Result<(), Error>;

    fn handle(&mut self, msg: Connect, _: &mut Self::Context) -> Self::Result {
        if self.clients.contains_key(&msg.id) {
            return Err(Error::AlreadyConnected(msg.id));
        }
        info!(id = %msg.id, "peer registered");
        self.clients.insert(msg.id, msg.addr);
        Ok(())
    }
}

impl Handler<Disconnect> for Moderator {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Self::Context) -> Self::Result {
        if self.clients.remove(&msg.id).is_some() {
            info!(id = %msg.id, "peer left");
        }
    }
}

impl Handler<Forward> for Moderator {
    type Result = ();

    fn handle(&mut self, msg: Forward, _: &mut Self::Context) -> Self::Result {
        let Forward { src, signal } = msg;
        let Some(dst) = signal.destination().cloned() else {
            warn!(%src, ?signal, "frame has no destination");
            return;
        };
        match self.clients.get(&dst) {
            Some(client) => {
                debug!(%src, %dst, "relaying");
                client.do_send(Deliver(signal.with_source(src)));
            }
            None if matches!(signal, Signal::Leave { .. }) => {}
            None => {
                debug!(%src, %dst, "destination unknown");
                if let Some(sender) = self.clients.get(&src) {
                    sender.do_send(Deliver(Signal::Expire { peer: dst }));
                }
            }
        }
    }
}
