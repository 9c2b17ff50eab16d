use std::{collections::HashMap, future::Future, panic::AssertUnwindSafe, rc::Rc};

use futures_util::{future::LocalBoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    message::{Message, MessageKind},
    PeerId,
};

/// An inbound message together with the connection it arrived on.
///
/// `from` differs from `message.sender()` when the message was relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub from: PeerId,
    pub message: Message,
}

pub type Handler = Rc<dyn Fn(Received) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// Wraps an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Received) -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    Rc::new(move |received| -> LocalBoxFuture<'static, anyhow::Result<()>> {
        Box::pin(f(received))
    })
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Vec<Handler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kinds: impl IntoIterator<Item = MessageKind>, handler: Handler) {
        for kind in kinds {
            self.handlers.entry(kind).or_default().push(handler.clone());
        }
    }

    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Decodes an inbound payload, logging and dropping anything malformed.
    pub fn validate(raw: &Value) -> Option<Message> {
        match Message::from_wire(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, payload = %raw, "dropping invalid message");
                None
            }
        }
    }

    /// Runs the handlers registered for the message kind, in registration
    /// order. A failing or panicking handler is logged and skipped.
    ///
    /// The handler list is taken when this is called, so registrations made
    /// afterwards only see later messages.
    pub fn dispatch(&self, received: Received) -> LocalBoxFuture<'static, ()> {
        let kind = received.message.kind();
        let handlers = self.handlers.get(&kind).cloned().unwrap_or_default();
        Box::pin(async move {
            if handlers.is_empty() {
                debug!(%kind, from = %received.from, "no handler registered");
            }
            for (index, handler) in handlers.iter().enumerate() {
                match AssertUnwindSafe(handler(received.clone()))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%kind, index, error = %format!("{e:#}"), "handler failed"),
                    Err(_) => warn!(%kind, index, "handler panicked"),
                }
            }
        })
    }
}
