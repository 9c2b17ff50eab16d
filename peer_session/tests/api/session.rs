use std::{cell::RefCell, rc::Rc};

use peer_session::{
    handler, Body, ConnectError, Direction, MemoryNetwork, Message, MessageKind, PeerSession,
    PeerState, SendError, Transport, TransportEvent,
};
use serde_json::json;
use tokio::sync::mpsc;

use crate::helper::{live_session, settle, wait_for, Spy};

fn template_change(sender: &peer_session::PeerId, template: &str) -> Message {
    Message::new(
        sender.clone(),
        Body::TemplateChanged {
            template: template.into(),
        },
    )
}

#[actix_rt::test]
async fn destroyed_peer_comes_back_with_a_new_id() {
    let network = MemoryNetwork::new();
    let (alice, first) = live_session(&network).await;
    let (_bob, bob_id) = live_session(&network).await;
    alice.connect_to(bob_id).await.unwrap();
    assert_eq!(alice.state().await, PeerState::Connected);

    alice.destroy_local_peer().await;

    assert_eq!(alice.state().await, PeerState::Destroyed);
    assert!(alice.connections().await.is_empty());
    assert_eq!(alice.peer_id().await, None);
    assert!(!network.is_online(&first));

    let second = alice.create_local_peer().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(alice.state().await, PeerState::Ready);
}

#[actix_rt::test]
async fn create_is_idempotent_while_live() {
    let network = MemoryNetwork::new();
    let (alice, id) = live_session(&network).await;
    assert_eq!(alice.create_local_peer().await.unwrap(), id);
}

#[actix_rt::test]
async fn connecting_before_create_fails() {
    let network = MemoryNetwork::new();
    let alice = PeerSession::new(network.transport());
    assert_eq!(alice.state().await, PeerState::Uninitialized);
    assert_eq!(
        alice.connect_to("bob".into()).await,
        Err(ConnectError::NotInitialized)
    );
}

#[actix_rt::test]
async fn connecting_to_an_unknown_peer_fails() {
    let network = MemoryNetwork::new();
    let (alice, _) = live_session(&network).await;
    assert!(matches!(
        alice.connect_to("nobody".into()).await,
        Err(ConnectError::Transport(_))
    ));
    assert!(alice.connections().await.is_empty());
}

#[actix_rt::test]
async fn destroy_cancels_a_pending_connect() {
    let network = MemoryNetwork::new();
    let (alice, _) = live_session(&network).await;
    let (_bob, bob_id) = live_session(&network).await;

    network.hold_connects(true);
    let pending = {
        let alice = alice.clone();
        actix_rt::spawn(async move { alice.connect_to(bob_id).await })
    };
    settle().await;
    assert_eq!(alice.state().await, PeerState::Connecting);

    alice.destroy_local_peer().await;

    assert_eq!(pending.await.unwrap(), Err(ConnectError::Cancelled));
    network.hold_connects(false);
    settle().await;
    assert!(alice.connections().await.is_empty());
}

#[actix_rt::test]
async fn concurrent_connects_to_one_peer_share_the_attempt() {
    let network = MemoryNetwork::new();
    let (alice, _) = live_session(&network).await;
    let (_bob, bob_id) = live_session(&network).await;

    network.hold_connects(true);
    let first = actix_rt::spawn({
        let (alice, bob_id) = (alice.clone(), bob_id.clone());
        async move { alice.connect_to(bob_id).await }
    });
    let second = actix_rt::spawn({
        let (alice, bob_id) = (alice.clone(), bob_id.clone());
        async move { alice.connect_to(bob_id).await }
    });
    settle().await;
    network.hold_connects(false);

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    let connections = alice.connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].remote(), &bob_id);
    assert_eq!(connections[0].direction(), Direction::Outbound);
}

#[actix_rt::test]
async fn sending_without_a_connection_fails() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (_bob, bob_id) = live_session(&network).await;

    let result = alice
        .send(bob_id.clone(), template_change(&alice_id, "T"))
        .await;
    assert_eq!(result, Err(SendError::NoConnection(bob_id)));
}

#[actix_rt::test]
async fn inbound_connections_are_registered() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;

    alice.connect_to(bob_id).await.unwrap();

    wait_for("bob to see alice", || async {
        bob.connections().await.len() == 1
    })
    .await;
    let connections = bob.connections().await;
    assert_eq!(connections[0].remote(), &alice_id);
    assert_eq!(connections[0].direction(), Direction::Inbound);
}

#[actix_rt::test]
async fn broadcast_reaches_everyone_and_reports_failures() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;
    let (carol, carol_id) = live_session(&network).await;
    let bob_spy = Spy::attach(&bob, [MessageKind::TemplateChanged]);
    let carol_spy = Spy::attach(&carol, [MessageKind::TemplateChanged]);
    alice.connect_to(bob_id.clone()).await.unwrap();
    alice.connect_to(carol_id).await.unwrap();

    alice
        .broadcast(template_change(&alice_id, "one"))
        .await
        .unwrap();
    wait_for("both to receive", || async {
        bob_spy.len() == 1 && carol_spy.len() == 1
    })
    .await;

    network.fail_sends_to(&bob_id);
    let err = alice
        .broadcast(template_change(&alice_id, "two"))
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::Broadcast { .. }));
    assert_eq!(err.failed_peers(), vec![&bob_id]);
    wait_for("carol to receive", || async { carol_spy.len() == 2 }).await;
    assert_eq!(bob_spy.len(), 1);
}

#[actix_rt::test]
async fn broadcast_except_skips_excluded_peers() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;
    let (carol, carol_id) = live_session(&network).await;
    let bob_spy = Spy::attach(&bob, MessageKind::ALL);
    let carol_spy = Spy::attach(&carol, MessageKind::ALL);
    alice.connect_to(bob_id.clone()).await.unwrap();
    alice.connect_to(carol_id).await.unwrap();

    alice
        .broadcast_except(template_change(&alice_id, "T"), vec![bob_id])
        .await
        .unwrap();

    wait_for("carol to receive", || async { carol_spy.len() == 1 }).await;
    settle().await;
    assert_eq!(bob_spy.len(), 0);
}

#[actix_rt::test]
async fn handlers_for_a_kind_run_in_registration_order() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;

    let log = Rc::new(RefCell::new(vec![]));
    for name in ["first", "second"] {
        let log = log.clone();
        bob.register_handler(
            [MessageKind::TemplateChanged],
            handler(move |received| {
                let log = log.clone();
                async move {
                    log.borrow_mut().push((name, received.message.sender().clone()));
                    Ok::<(), anyhow::Error>(())
                }
            }),
        );
    }
    alice.connect_to(bob_id.clone()).await.unwrap();
    alice
        .send(bob_id, template_change(&alice_id, "T"))
        .await
        .unwrap();

    wait_for("both handlers", || async { log.borrow().len() == 2 }).await;
    assert_eq!(
        *log.borrow(),
        vec![("first", alice_id.clone()), ("second", alice_id)]
    );
}

#[actix_rt::test]
async fn invalid_payloads_reach_no_handler() {
    let network = MemoryNetwork::new();
    let (bob, bob_id) = live_session(&network).await;
    let spy = Spy::attach(&bob, MessageKind::ALL);

    let (events, mut events_rx) = mpsc::unbounded_channel();
    let mut raw = network.transport();
    raw.open("raw".into(), events);
    assert_eq!(events_rx.recv().await, Some(TransportEvent::Open));
    raw.connect(&bob_id);

    for payload in [
        json!({ "peerId": "raw", "data": {} }),
        json!({ "type": "SHOUT", "peerId": "raw", "data": {} }),
        json!({ "type": "TEMPLATE_CHANGE", "peerId": "raw", "data": null }),
        json!({ "type": "TEMPLATE_CHANGE", "peerId": "raw" }),
        json!("just a string"),
    ] {
        raw.send(&bob_id, payload).await.unwrap();
    }
    raw.send(
        &bob_id,
        json!({ "type": "TEMPLATE_CHANGE", "peerId": "raw", "data": { "template": "ok" } }),
    )
    .await
    .unwrap();

    wait_for("the valid message", || async { spy.len() == 1 }).await;
    settle().await;
    let received = spy.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message.kind(), MessageKind::TemplateChanged);
}

#[actix_rt::test]
async fn severed_channels_leave_the_registry() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;
    alice.connect_to(bob_id.clone()).await.unwrap();
    wait_for("bob to see alice", || async {
        bob.connections().await.len() == 1
    })
    .await;

    network.sever(&alice_id, &bob_id);

    wait_for("both sides to drop the connection", || async {
        alice.connections().await.is_empty() && bob.connections().await.is_empty()
    })
    .await;
    assert_eq!(alice.state().await, PeerState::Ready);
    assert!(matches!(
        alice.send(bob_id, template_change(&alice_id, "T")).await,
        Err(SendError::NoConnection(_))
    ));
}

#[actix_rt::test]
async fn handlers_survive_a_failing_neighbour() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;
    bob.register_handler(
        [MessageKind::TemplateChanged],
        handler(|_| async { Err::<(), _>(anyhow::anyhow!("broken handler")) }),
    );
    let spy = Spy::attach(&bob, [MessageKind::TemplateChanged]);
    alice.connect_to(bob_id.clone()).await.unwrap();

    alice
        .send(bob_id, template_change(&alice_id, "T"))
        .await
        .unwrap();

    wait_for("the second handler", || async { spy.len() == 1 }).await;
}

#[actix_rt::test]
async fn destroy_while_initializing_cancels_create_and_deferred_connects() {
    let network = MemoryNetwork::new();
    let (_bob, bob_id) = live_session(&network).await;
    let alice = PeerSession::new(network.transport());

    network.hold_opens(true);
    let create = actix_rt::spawn({
        let alice = alice.clone();
        async move { alice.create_local_peer().await }
    });
    settle().await;
    assert_eq!(alice.state().await, PeerState::Initializing);
    let connect = actix_rt::spawn({
        let alice = alice.clone();
        async move { alice.connect_to(bob_id).await }
    });
    settle().await;

    alice.destroy_local_peer().await;

    assert_eq!(create.await.unwrap(), Err(ConnectError::Cancelled));
    assert_eq!(connect.await.unwrap(), Err(ConnectError::Cancelled));
    assert_eq!(alice.state().await, PeerState::Destroyed);

    network.hold_opens(false);
    let id = alice.create_local_peer().await.unwrap();
    assert_eq!(alice.peer_id().await, Some(id.clone()));
    assert!(network.is_online(&id));
    assert!(alice.connections().await.is_empty());
}

#[actix_rt::test]
async fn disconnect_closes_both_ends() {
    let network = MemoryNetwork::new();
    let (alice, alice_id) = live_session(&network).await;
    let (bob, bob_id) = live_session(&network).await;
    alice.connect_to(bob_id.clone()).await.unwrap();
    wait_for("bob to see alice", || async {
        bob.connections().await.len() == 1
    })
    .await;

    alice.disconnect(bob_id.clone()).await;

    assert!(alice.connections().await.is_empty());
    assert_eq!(alice.state().await, PeerState::Ready);
    wait_for("bob to drop alice", || async {
        bob.connections().await.is_empty()
    })
    .await;
    assert_eq!(
        alice
            .send(bob_id.clone(), template_change(&alice_id, "T"))
            .await,
        Err(SendError::NoConnection(bob_id))
    );
}
