use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web_actors::ws;
use peer_session::{signal::Signal, PeerId};
use tracing::{debug, error, info, warn};

pub use ws::start;

use super::moderator::{self, Moderator};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct WsClient {
    id: PeerId,
    heartbeat: Instant,
    moderator: Addr<Moderator>,
    /// Set once the moderator accepted the id.
    registered: bool,
}

impl WsClient {
    pub fn new(id: PeerId, moderator: Addr<Moderator>) -> Self {
        Self {
            id,
            heartbeat: Instant::now(),
            moderator,
            registered: false,
        }
    }

    /// Pings the client every HEARTBEAT_INTERVAL and drops it once it was
    /// silent for longer than CLIENT_TIMEOUT.
    fn heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.heartbeat) > CLIENT_TIMEOUT {
                error!(id = %act.id, "Websocket Client heartbeat failed, disconnecting!");
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }

    fn send_signal(&self, signal: &Signal, ctx: &mut <Self as Actor>::Context) {
        match serde_json::to_string(signal) {
            Ok(text) => ctx.text(text),
            Err(e) => error!(error = %e, "failed to encode signal"),
        }
    }
}

impl Handler<moderator::Deliver> for WsClient {
    type Result = ();

    fn handle(&mut self, msg: moderator::Deliver, ctx: &mut Self::Context) -> Self::Result {
        self.send_signal(&msg.0, ctx);
    }
}

impl Actor for WsClient {
    type Context = ws::WebsocketContext<Self>;

    /// Registers with the moderator and tells the client whether its id was
    /// accepted.
    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        let addr = ctx.address();
        self.moderator
            .send(moderator::Connect {
                id: self.id.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(Ok(())) => {
                        act.registered = true;
                        info!(id = %act.id, "client open");
                        act.send_signal(&Signal::Open { id: act.id.clone() }, ctx);
                    }
                    Ok(Err(moderator::Error::AlreadyConnected(id))) => {
                        warn!(%id, "id taken, closing");
                        act.send_signal(&Signal::IdTaken { id }, ctx);
                        ctx.close(Some(ws::CloseCode::Policy.into()));
                        ctx.stop();
                    }
                    Err(e) => {
                        error!(?e);
                        ctx.stop();
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if self.registered {
            self.moderator.do_send(moderator::Disconnect {
                id: self.id.clone(),
            });
        }
        Running::Stop
    }
}

/// Handler for ws::Message message
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsClient {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.heartbeat = Instant::now();
                match serde_json::from_str::<Signal>(&text) {
                    Ok(Signal::Heartbeat) => {}
                    Ok(signal) if signal.destination().is_some() => {
                        self.moderator.do_send(moderator::Forward {
                            src: self.id.clone(),
                            signal,
                        });
                    }
                    Ok(signal) => debug!(id = %self.id, ?signal, "ignoring frame"),
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "malformed frame");
                        self.send_signal(
                            &Signal::Error {
                                reason: format!("malformed frame: {e}"),
                            },
                            ctx,
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => warn!(id = %self.id, "binary frames are not supported"),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(id = %self.id, error = %e, "protocol error");
                ctx.stop();
            }
        }
    }
}
