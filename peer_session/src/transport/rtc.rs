//! Data channels over WebRTC, negotiated through the signaling backend.
//!
//! [`WebRtcTransport`] hands every operation to a signaling loop task that
//! owns the websocket and all peer connections.

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use awc::{ws, ws::Codec, BoxedSocket};
use futures_util::{future, SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, info, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{EventSender, Transport, TransportEvent};
use crate::{
    config::SignalingConfig, error::TransportError, registry::Direction, signal::Signal, PeerId,
};

mod peer;
use peer::Peer;

type Socket = actix_codec::Framed<BoxedSocket, Codec>;

#[derive(Debug)]
enum Control {
    Connect(PeerId),
    Send {
        remote: PeerId,
        payload: Value,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Disconnect(PeerId),
    Destroy,
}

#[derive(Debug)]
pub struct WebRtcTransport {
    config: Arc<SignalingConfig>,
    control: Option<mpsc::UnboundedSender<Control>>,
}

impl WebRtcTransport {
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config: Arc::new(config),
            control: None,
        }
    }

    fn control(&self, command: Control) {
        if let Some(control) = &self.control {
            if control.send(command).is_err() {
                debug!("signaling loop is gone");
            }
        }
    }
}

impl Transport for WebRtcTransport {
    fn open(&mut self, id: PeerId, events: EventSender) {
        self.destroy();
        let (control, control_rx) = mpsc::unbounded_channel();
        self.control = Some(control);
        let config = self.config.clone();
        actix_rt::spawn(async move {
            match SignalingLoop::connect(config, id, events.clone(), control_rx).await {
                Ok(signaling) => signaling.run().await,
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e));
                }
            }
        });
    }

    fn connect(&mut self, remote: &PeerId) {
        self.control(Control::Connect(remote.clone()));
    }

    fn send(
        &mut self,
        remote: &PeerId,
        payload: Value,
    ) -> future::LocalBoxFuture<'static, Result<(), TransportError>> {
        let Some(control) = &self.control else {
            return Box::pin(future::ready(Err(TransportError::NotOpen)));
        };
        let (reply, rx) = oneshot::channel();
        let remote = remote.clone();
        let queued = control.send(Control::Send {
            remote: remote.clone(),
            payload,
            reply,
        });
        Box::pin(async move {
            queued.map_err(|_| TransportError::NotOpen)?;
            rx.await
                .unwrap_or(Err(TransportError::ChannelClosed(remote)))
        })
    }

    fn disconnect(&mut self, remote: &PeerId) {
        self.control(Control::Disconnect(remote.clone()));
    }

    fn destroy(&mut self) {
        self.control(Control::Destroy);
        self.control = None;
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct SignalingLoop {
    id: PeerId,
    config: Arc<SignalingConfig>,
    ws: Socket,
    events: EventSender,
    control: mpsc::UnboundedReceiver<Control>,
    peers: HashMap<PeerId, Peer>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
}

impl std::fmt::Debug for SignalingLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingLoop")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("peers", &self.peers)
            .finish()
    }
}

impl SignalingLoop {
    /// Registers `id` with the backend and waits for it to confirm.
    async fn connect(
        config: Arc<SignalingConfig>,
        id: PeerId,
        events: EventSender,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Result<Self, TransportError> {
        let url = config
            .socket_url(&id)
            .map_err(|e| TransportError::Signaling(e.to_string()))?;
        let (_res, mut ws) = awc::Client::new()
            .ws(url.as_str())
            .connect()
            .await
            .map_err(|e| TransportError::Signaling(format!("client error: {e}")))?;

        match ws.next().await {
            Some(Ok(ws::Frame::Text(text))) => match serde_json::from_slice(&text) {
                Ok(Signal::Open { .. }) => {}
                Ok(Signal::IdTaken { id }) => return Err(TransportError::IdTaken(id)),
                Ok(Signal::Error { reason }) => return Err(TransportError::Signaling(reason)),
                _ => return Err(TransportError::Signaling("first frame must be OPEN".into())),
            },
            _ => return Err(TransportError::Signaling("error with ws connection".into())),
        }
        info!(%id, "registered with signaling backend");
        let _ = events.send(TransportEvent::Open);

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Ok(Self {
            id,
            config,
            ws,
            events,
            control,
            peers: Default::default(),
            signals_tx,
            signals_rx,
        })
    }

    async fn run(mut self) {
        let mut keep_alive = tokio::time::interval(self.config.ping_interval());
        loop {
            select! {
                Some(signal) = self.signals_rx.recv() => {
                    if let Err(e) = self.send_signal(&signal).await {
                        error!(error = %e, "failed to send signal");
                    }
                }
                frame = self.ws.next() => match frame {
                    Some(Ok(frame)) => {
                        if !self.handle_frame(frame).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "signaling websocket failed");
                        let _ = self.events.send(TransportEvent::Error(TransportError::Signaling(e.to_string())));
                        break;
                    }
                    None => {
                        let _ = self.events.send(TransportEvent::Error(TransportError::Signaling(
                            "signaling websocket closed".into(),
                        )));
                        break;
                    }
                },
                command = self.control.recv() => match command {
                    Some(Control::Destroy) | None => break,
                    Some(command) => self.handle_control(command).await,
                },
                _ = keep_alive.tick() => {
                    if let Err(e) = self.send_signal(&Signal::Heartbeat).await {
                        warn!(error = %e, "failed to send heartbeat");
                    }
                }
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        for (remote, peer) in self.peers.drain() {
            peer.close().await;
            debug!(%remote, "peer connection closed");
        }
        let _ = self.ws.close().await;
        info!(id = %self.id, "left signaling backend");
    }

    async fn send_signal(&mut self, signal: &Signal) -> anyhow::Result<()> {
        let text = serde_json::to_string(signal)?;
        Ok(self.ws.send(ws::Message::Text(text.into())).await?)
    }

    /// Returns `false` once the backend closed the socket.
    async fn handle_frame(&mut self, frame: ws::Frame) -> bool {
        match frame {
            ws::Frame::Text(text) => match serde_json::from_slice::<Signal>(&text) {
                Ok(signal) => self.handle_signal(signal).await,
                Err(e) => warn!(error = %e, "unknown signaling frame"),
            },
            ws::Frame::Ping(msg) => {
                if let Err(e) = self.ws.send(ws::Message::Pong(msg)).await {
                    warn!(error = %e, "failed to answer ping");
                }
            }
            ws::Frame::Close(reason) => {
                info!(?reason, "signaling backend closed the socket");
                let _ = self.events.send(TransportEvent::Error(TransportError::Signaling(
                    "signaling websocket closed".into(),
                )));
                return false;
            }
            ws::Frame::Pong(_) | ws::Frame::Binary(_) | ws::Frame::Continuation(_) => {}
        }
        true
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Offer {
                src: Some(src),
                offer,
                ..
            } => {
                if let Err(e) = self.handle_offer(src.clone(), offer).await {
                    self.fail(src, e);
                }
            }
            Signal::Answer {
                src: Some(src),
                answer,
                ..
            } => {
                if let Err(e) = self.handle_answer(&src, answer).await {
                    self.fail(src, e);
                }
            }
            Signal::Candidate {
                src: Some(src),
                candidate,
                ..
            } => self.handle_candidate(&src, candidate).await,
            Signal::Leave { src: Some(src), .. } => {
                if let Some(peer) = self.peers.remove(&src) {
                    peer.close().await;
                    let _ = self.events.send(TransportEvent::ChannelClosed { remote: src });
                }
            }
            Signal::Expire { peer } => {
                if let Some(pending) = self.peers.remove(&peer) {
                    pending.close().await;
                }
                let _ = self.events.send(TransportEvent::ChannelError {
                    remote: peer.clone(),
                    error: TransportError::PeerUnavailable(peer),
                });
            }
            Signal::Error { reason } => {
                warn!(%reason, "signaling backend reported an error");
                let _ = self
                    .events
                    .send(TransportEvent::Error(TransportError::Signaling(reason)));
            }
            Signal::Heartbeat | Signal::Open { .. } | Signal::IdTaken { .. } => {}
            relayed => warn!(?relayed, "relayed frame without source"),
        }
    }

    async fn handle_control(&mut self, command: Control) {
        match command {
            Control::Connect(remote) => {
                if let Err(e) = self.connect_peer(remote.clone()).await {
                    self.fail(remote, e);
                }
            }
            Control::Send {
                remote,
                payload,
                reply,
            } => {
                let result = match self.peers.get(&remote) {
                    Some(peer) => peer.send(&payload).await,
                    None => Err(TransportError::ChannelClosed(remote)),
                };
                let _ = reply.send(result);
            }
            Control::Disconnect(remote) => {
                if let Some(peer) = self.peers.remove(&remote) {
                    peer.close().await;
                    let leave = Signal::Leave {
                        src: None,
                        dst: remote.clone(),
                    };
                    if let Err(e) = self.send_signal(&leave).await {
                        warn!(error = %e, "failed to announce leave");
                    }
                    let _ = self.events.send(TransportEvent::ChannelClosed { remote });
                }
            }
            Control::Destroy => {}
        }
    }

    fn fail(&mut self, remote: PeerId, error: anyhow::Error) {
        error!(%remote, error = %format!("{error:#}"), "peer connection failed");
        self.peers.remove(&remote);
        let _ = self.events.send(TransportEvent::ChannelError {
            remote,
            error: TransportError::Rtc(format!("{error:#}")),
        });
    }

    async fn new_peer(&mut self, remote: PeerId, direction: Direction) -> anyhow::Result<&Peer> {
        if let Some(stale) = self.peers.remove(&remote) {
            stale.close().await;
        }
        let peer = Peer::new(
            remote.clone(),
            &self.config,
            direction,
            self.signals_tx.clone(),
            self.events.clone(),
        )
        .await?;
        let peer: &Peer = self.peers.entry(remote).or_insert(peer);
        Ok(peer)
    }

    async fn connect_peer(&mut self, remote: PeerId) -> anyhow::Result<()> {
        if remote == self.id {
            return Err(anyhow!("can not connect to self"));
        }
        info!(%remote, "new outbound peer");
        let peer = self.new_peer(remote.clone(), Direction::Outbound).await?;
        let offer = peer.create_offer().await?;
        self.send_signal(&Signal::Offer {
            src: None,
            dst: remote,
            offer,
        })
        .await
    }

    async fn handle_offer(&mut self, src: PeerId, offer: RTCSessionDescription) -> anyhow::Result<()> {
        info!(remote = %src, "got offer");
        let peer = self.new_peer(src.clone(), Direction::Inbound).await?;
        let answer = peer.accept(offer).await?;
        self.send_signal(&Signal::Answer {
            src: None,
            dst: src,
            answer,
        })
        .await
    }

    async fn handle_answer(&mut self, src: &PeerId, answer: RTCSessionDescription) -> anyhow::Result<()> {
        debug!(remote = %src, "got answer");
        match self.peers.get(src) {
            Some(peer) => peer.handle_answer(answer).await,
            None => Err(anyhow!("answer from unknown peer")),
        }
    }

    async fn handle_candidate(&self, src: &PeerId, candidate: String) {
        if let Some(peer) = self.peers.get(src) {
            if let Err(e) = peer.add_candidate(candidate).await {
                error!(remote = %src, error = %e, "failed to add ice candidate");
            }
        }
    }
}
