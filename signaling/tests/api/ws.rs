use std::time::Duration;

use futures_util::SinkExt as _;
use peer_session::{
    ws, PeerId, Transport, TransportError, TransportEvent, WebRtcTransport,
};
use serde_json::json;
use tokio::sync::mpsc;

use crate::helper::{next_signal, spawn_app};

#[actix_web::test]
async fn open_is_sent_after_registration() {
    let app = spawn_app().await;
    let mut alice = app.connect("alice").await;
    assert_eq!(next_signal(&mut alice).await, json!({ "type": "OPEN", "id": "alice" }));
}

#[actix_web::test]
async fn duplicate_id_is_refused() {
    let app = spawn_app().await;
    let mut first = app.connect("alice").await;
    next_signal(&mut first).await;

    let mut second = app.connect("alice").await;
    assert_eq!(
        next_signal(&mut second).await,
        json!({ "type": "ID_TAKEN", "id": "alice" })
    );
}

#[actix_web::test]
async fn frames_are_relayed_with_their_source() {
    let app = spawn_app().await;
    let mut alice = app.connect("alice").await;
    next_signal(&mut alice).await;
    let mut bob = app.connect("bob").await;
    next_signal(&mut bob).await;

    let candidate = json!({ "type": "CANDIDATE", "dst": "bob", "candidate": "candidate:1", "src": "mallory" });
    alice
        .send(ws::Message::Text(candidate.to_string().into()))
        .await
        .unwrap();

    assert_eq!(
        next_signal(&mut bob).await,
        json!({ "type": "CANDIDATE", "src": "alice", "dst": "bob", "candidate": "candidate:1" })
    );
}

#[actix_web::test]
async fn unknown_destination_expires() {
    let app = spawn_app().await;
    let mut alice = app.connect("alice").await;
    next_signal(&mut alice).await;

    let candidate = json!({ "type": "CANDIDATE", "dst": "nobody", "candidate": "candidate:1" });
    alice
        .send(ws::Message::Text(candidate.to_string().into()))
        .await
        .unwrap();

    assert_eq!(
        next_signal(&mut alice).await,
        json!({ "type": "EXPIRE", "peer": "nobody" })
    );
}

#[actix_web::test]
async fn malformed_frames_are_answered_with_an_error() {
    let app = spawn_app().await;
    let mut alice = app.connect("alice").await;
    next_signal(&mut alice).await;

    alice
        .send(ws::Message::Text("{\"type\":\"WHATEVER\"}".into()))
        .await
        .unwrap();

    assert_eq!(next_signal(&mut alice).await["type"], "ERROR");
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for a transport event")
        .expect("Transport event stream ended")
}

#[actix_web::test]
async fn rtc_transport_registers_and_learns_about_missing_peers() {
    let app = spawn_app().await;
    let (events, mut events_rx) = mpsc::unbounded_channel();
    let mut transport = WebRtcTransport::new(app.signaling_config());
    let id = PeerId::from("alice");

    transport.open(id.clone(), events);
    assert_eq!(next_event(&mut events_rx).await, TransportEvent::Open);

    let (taken_events, mut taken_rx) = mpsc::unbounded_channel();
    let mut impostor = WebRtcTransport::new(app.signaling_config());
    impostor.open(id, taken_events);
    assert_eq!(
        next_event(&mut taken_rx).await,
        TransportEvent::Error(TransportError::IdTaken("alice".into()))
    );

    transport.connect(&"nobody".into());
    loop {
        match next_event(&mut events_rx).await {
            TransportEvent::ChannelError { remote, error } => {
                assert_eq!(remote, PeerId::from("nobody"));
                assert_eq!(error, TransportError::PeerUnavailable("nobody".into()));
                break;
            }
            TransportEvent::ChannelOpen { .. } => panic!("channel to a missing peer opened"),
            _ => continue,
        }
    }
}
