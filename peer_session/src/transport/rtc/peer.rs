use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder,
    },
    data_channel::{
        data_channel_init::RTCDataChannelInit, data_channel_message::DataChannelMessage,
        RTCDataChannel,
    },
    ice_transport::ice_candidate::RTCIceCandidateInit,
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

use crate::{
    config::SignalingConfig,
    error::TransportError,
    registry::Direction,
    signal::Signal,
    transport::{EventSender, TransportEvent},
    PeerId,
};

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// One RTC connection and the data channel that runs over it.
///
/// The outbound side creates the channel; the inbound side picks it up when
/// the remote announces it. Either way the channel is only usable after its
/// `on_open` fired, which is also when `ChannelOpen` is reported.
pub(super) struct Peer {
    remote: PeerId,
    connection: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("remote", &self.remote).finish()
    }
}

impl Peer {
    pub(super) async fn new(
        remote: PeerId,
        config: &SignalingConfig,
        direction: Direction,
        signals: mpsc::UnboundedSender<Signal>,
        events: EventSender,
    ) -> anyhow::Result<Self> {
        let connection = Self::create_peer_connection(config, &remote, events.clone()).await?;
        let peer = Self {
            remote,
            connection,
            channel: Default::default(),
        };
        peer.ice_candidates(signals).await;
        match direction {
            Direction::Outbound => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let channel = peer
                    .connection
                    .create_data_channel("data", Some(init))
                    .await?;
                wire_channel(channel, peer.channel.clone(), peer.remote.clone(), direction, events)
                    .await;
            }
            Direction::Inbound => peer.accept_incoming_channel(events).await,
        }
        Ok(peer)
    }

    async fn create_peer_connection(
        config: &SignalingConfig,
        remote: &PeerId,
        events: EventSender,
    ) -> anyhow::Result<Arc<RTCPeerConnection>> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();
        let rtc_config = RTCConfiguration {
            ice_servers: config.rtc_ice_servers(),
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let remote = remote.clone();
        connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                debug!(%remote, state = %s, "peer connection state changed");
                if s == RTCPeerConnectionState::Failed {
                    let _ = events.send(TransportEvent::ChannelError {
                        remote: remote.clone(),
                        error: TransportError::Rtc("peer connection failed".into()),
                    });
                }
                Box::pin(async {})
            }))
            .await;
        Ok(connection)
    }

    async fn ice_candidates(&self, signals: mpsc::UnboundedSender<Signal>) {
        let remote = self.remote.clone();
        self.connection
            .on_ice_candidate(Box::new(move |c| {
                let signals = signals.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    let Some(candidate) = c else {
                        return;
                    };
                    match candidate.to_json().await {
                        Ok(init) => {
                            let _ = signals.send(Signal::Candidate {
                                src: None,
                                dst: remote,
                                candidate: init.candidate,
                            });
                        }
                        Err(e) => warn!(error = %e, "failed to encode ice candidate"),
                    }
                })
            }))
            .await;
    }

    async fn accept_incoming_channel(&self, events: EventSender) {
        let slot = self.channel.clone();
        let remote = self.remote.clone();
        self.connection
            .on_data_channel(Box::new(move |channel| {
                let slot = slot.clone();
                let remote = remote.clone();
                let events = events.clone();
                Box::pin(async move {
                    wire_channel(channel, slot, remote, Direction::Inbound, events).await;
                })
            }))
            .await;
    }

    pub(super) async fn create_offer(&self) -> anyhow::Result<RTCSessionDescription> {
        let offer = self.connection.create_offer(None).await?;
        self.connection.set_local_description(offer).await?;

        self.connection
            .local_description()
            .await
            .ok_or_else(|| anyhow::anyhow!("generate local_description failed!"))
    }

    pub(super) async fn accept(
        &self,
        offer: RTCSessionDescription,
    ) -> anyhow::Result<RTCSessionDescription> {
        self.connection.set_remote_description(offer).await?;
        let answer = self.connection.create_answer(None).await?;
        self.connection
            .set_local_description(answer.clone())
            .await?;
        Ok(answer)
    }

    pub(super) async fn handle_answer(&self, answer: RTCSessionDescription) -> anyhow::Result<()> {
        self.connection.set_remote_description(answer).await?;
        Ok(())
    }

    pub(super) async fn add_candidate(&self, candidate: String) -> anyhow::Result<()> {
        let candidate = RTCIceCandidateInit {
            candidate,
            ..Default::default()
        };
        self.connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    pub(super) async fn send(&self, payload: &Value) -> Result<(), TransportError> {
        let channel = self.channel.lock().await.clone();
        match channel {
            Some(channel) => channel
                .send_text(payload.to_string())
                .await
                .map(|_| ())
                .map_err(|e| TransportError::Rtc(e.to_string())),
            None => Err(TransportError::ChannelClosed(self.remote.clone())),
        }
    }

    pub(super) async fn close(self) {
        if let Err(e) = self.connection.close().await {
            warn!(remote = %self.remote, error = %e, "failed to close peer connection");
        }
    }
}

async fn wire_channel(
    channel: Arc<RTCDataChannel>,
    slot: ChannelSlot,
    remote: PeerId,
    direction: Direction,
    events: EventSender,
) {
    let opened = channel.clone();
    let (open_remote, open_events) = (remote.clone(), events.clone());
    channel
        .on_open(Box::new(move || {
            let (slot, opened) = (slot.clone(), opened.clone());
            let (remote, events) = (open_remote.clone(), open_events.clone());
            Box::pin(async move {
                info!(%remote, ?direction, "data channel open");
                *slot.lock().await = Some(opened);
                let _ = events.send(TransportEvent::ChannelOpen { remote, direction });
            })
        }))
        .await;

    let (message_remote, message_events) = (remote.clone(), events.clone());
    channel
        .on_message(Box::new(move |msg: DataChannelMessage| {
            match serde_json::from_slice::<Value>(&msg.data) {
                Ok(payload) => {
                    let _ = message_events.send(TransportEvent::Data {
                        remote: message_remote.clone(),
                        payload,
                    });
                }
                Err(e) => warn!(remote = %message_remote, error = %e, "dropping non-json payload"),
            }
            Box::pin(async {})
        }))
        .await;

    channel
        .on_close(Box::new(move || {
            debug!(%remote, "data channel closed");
            let _ = events.send(TransportEvent::ChannelClosed {
                remote: remote.clone(),
            });
            Box::pin(async {})
        }))
        .await;

    channel
        .on_error(Box::new(move |e| {
            warn!("data channel error {:?}", e);
            Box::pin(async {})
        }))
        .await;
}
