use std::collections::BTreeMap;

use peer_session::{CollabConfig, Document, MemoryNetwork, MessageKind, RelayMode};

use crate::helper::{settle, wait_for, Spy, TestPeer};

fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[actix_rt::test]
async fn joiner_adopts_the_owner_state() {
    let network = MemoryNetwork::new();
    let owner = TestPeer::new(
        &network,
        Document::new("T", inputs(&[("x", "1")])),
        CollabConfig::default(),
    );
    let owner_id = owner.start(None).await;

    let joiner = TestPeer::new(&network, Document::default(), CollabConfig::default());
    joiner.collab.set_template("my own {draft}").await.unwrap();
    joiner.collab.set_input("draft", "lost").await.unwrap();
    let joiner_id = joiner.start(Some(owner_id.clone())).await;

    wait_for("the snapshot", || async {
        joiner.document() == Document::new("T", inputs(&[("x", "1")]))
    })
    .await;
    assert_eq!(joiner.collab.parent(), Some(owner_id));
    assert_eq!(owner.collab.collaborators(), vec![joiner_id]);
    assert_eq!(owner.document().template(), "T");
}

#[actix_rt::test]
async fn failed_join_leaves_no_parent() {
    let network = MemoryNetwork::new();
    let joiner = TestPeer::new(&network, Document::default(), CollabConfig::default());
    assert!(joiner.collab.start(Some("gone".into())).await.is_err());
    assert_eq!(joiner.collab.parent(), None);
}

#[actix_rt::test]
async fn edits_reach_everyone_through_the_owner() {
    let network = MemoryNetwork::new();
    let owner = TestPeer::new(
        &network,
        Document::from_template("Hello {name}"),
        CollabConfig::default(),
    );
    let owner_id = owner.start(None).await;
    let alice = TestPeer::new(&network, Document::default(), CollabConfig::default());
    alice.start(Some(owner_id.clone())).await;
    let bob = TestPeer::new(&network, Document::default(), CollabConfig::default());
    bob.start(Some(owner_id.clone())).await;
    wait_for("both snapshots", || async {
        alice.document().template() == "Hello {name}" && bob.document().template() == "Hello {name}"
    })
    .await;

    let alice_spy = Spy::attach(&alice.session, [MessageKind::TemplateChanged]);
    let bob_spy = Spy::attach(&bob.session, [MessageKind::TemplateChanged]);
    let bob_id = bob.session.peer_id().await.unwrap();

    bob.collab.set_template("Bye {name}, {when}").await.unwrap();

    wait_for("the relayed change", || async {
        alice.document().template() == "Bye {name}, {when}"
    })
    .await;
    assert_eq!(owner.document().template(), "Bye {name}, {when}");
    assert_eq!(
        alice.document().inputs(),
        &inputs(&[("name", ""), ("when", "")])
    );

    settle().await;
    let relayed = alice_spy.received();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].from, owner_id);
    assert_eq!(relayed[0].message.sender(), &bob_id);
    assert!(bob_spy.received().is_empty());
}

#[actix_rt::test]
async fn input_changes_from_the_owner_reach_every_child() {
    let network = MemoryNetwork::new();
    let owner = TestPeer::new(
        &network,
        Document::from_template("{a} and {b}"),
        CollabConfig::default(),
    );
    let owner_id = owner.start(None).await;
    let alice = TestPeer::new(&network, Document::default(), CollabConfig::default());
    alice.start(Some(owner_id.clone())).await;
    let bob = TestPeer::new(&network, Document::default(), CollabConfig::default());
    bob.start(Some(owner_id)).await;
    wait_for("both snapshots", || async {
        !alice.document().inputs().is_empty() && !bob.document().inputs().is_empty()
    })
    .await;

    owner.collab.set_input("a", "cats").await.unwrap();
    alice.collab.set_input("b", "dogs").await.unwrap();

    for peer in [&owner, &alice, &bob] {
        wait_for("both inputs", || async {
            peer.document().story() == "cats and dogs"
        })
        .await;
    }
    assert!(bob.document().is_complete());
}

#[actix_rt::test]
async fn edits_before_going_live_stay_local() {
    let network = MemoryNetwork::new();
    let peer = TestPeer::new(&network, Document::default(), CollabConfig::default());

    peer.collab.set_template("{x}").await.unwrap();
    peer.collab.set_input("x", "1").await.unwrap();

    assert_eq!(peer.document().story(), "1");
}

#[actix_rt::test]
async fn relaying_peers_carry_changes_down_a_chain() {
    let network = MemoryNetwork::new();
    let config = CollabConfig {
        relay: RelayMode::Always,
    };
    let root = TestPeer::new(&network, Document::from_template("{x}"), config.clone());
    let root_id = root.start(None).await;
    let middle = TestPeer::new(&network, Document::default(), config.clone());
    let middle_id = middle.start(Some(root_id)).await;
    wait_for("the middle snapshot", || async {
        middle.document().template() == "{x}"
    })
    .await;
    let leaf = TestPeer::new(&network, Document::default(), config);
    leaf.start(Some(middle_id)).await;
    wait_for("the leaf snapshot", || async {
        leaf.document().template() == "{x}"
    })
    .await;
    let leaf_spy = Spy::attach(&leaf.session, [MessageKind::InputChanged]);
    let root_spy = Spy::attach(&root.session, [MessageKind::InputChanged]);

    root.collab.set_input("x", "deep").await.unwrap();
    wait_for("the leaf", || async { leaf.document().story() == "deep" }).await;

    leaf.collab.set_input("x", "back up").await.unwrap();
    wait_for("the root", || async { root.document().story() == "back up" }).await;

    settle().await;
    assert_eq!(leaf_spy.len(), 1);
    assert_eq!(root_spy.len(), 1);
    assert_eq!(middle.document().story(), "back up");
}

#[actix_rt::test]
async fn a_recreated_peer_starts_as_a_new_root() {
    let network = MemoryNetwork::new();
    let owner = TestPeer::new(
        &network,
        Document::from_template("{x}"),
        CollabConfig::default(),
    );
    let owner_id = owner.start(None).await;
    let hub = TestPeer::new(&network, Document::default(), CollabConfig::default());
    hub.start(Some(owner_id)).await;
    wait_for("the hub snapshot", || async { hub.document().template() == "{x}" }).await;

    hub.session.destroy_local_peer().await;
    let hub_id = hub.start(None).await;
    assert_eq!(hub.collab.parent(), None);
    assert!(hub.collab.collaborators().is_empty());

    let alice = TestPeer::new(&network, Document::default(), CollabConfig::default());
    alice.start(Some(hub_id.clone())).await;
    let bob = TestPeer::new(&network, Document::default(), CollabConfig::default());
    bob.start(Some(hub_id)).await;
    wait_for("both snapshots", || async {
        alice.document().template() == "{x}" && bob.document().template() == "{x}"
    })
    .await;

    alice.collab.set_input("x", "hello").await.unwrap();

    wait_for("bob to see the edit", || async {
        bob.document().story() == "hello"
    })
    .await;
    assert_eq!(hub.collab.collaborators().len(), 2);
}

#[actix_rt::test]
async fn leaving_forgets_the_parent() {
    let network = MemoryNetwork::new();
    let owner = TestPeer::new(&network, Document::default(), CollabConfig::default());
    let owner_id = owner.start(None).await;
    let joiner = TestPeer::new(&network, Document::default(), CollabConfig::default());
    let first = joiner.start(Some(owner_id.clone())).await;
    assert_eq!(joiner.collab.parent(), Some(owner_id));

    joiner.collab.leave().await;

    assert_eq!(joiner.collab.parent(), None);
    assert_eq!(joiner.session.peer_id().await, None);
    assert_ne!(joiner.start(None).await, first);
}
