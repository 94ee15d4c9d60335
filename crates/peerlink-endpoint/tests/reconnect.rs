//! Reconnection timing: failed links, closed channels, transient
//! disconnects and unanswered offers.
//!
//! Runs on paused time through the in-process hub, so the fixed delays
//! can be checked exactly.

mod common;

use std::time::Duration;

use common::*;
use peerlink_endpoint::{EndpointHandle, MemoryNetwork, PeerEvents, SendResult, SignalingLink};
use peerlink_protocol::{ClientMessage, PeerId, PeerSummary, ServerMessage};

// =========================================================================
// Helpers
// =========================================================================

struct Pair {
    network: MemoryNetwork,
    x: EndpointHandle,
    x_events: PeerEvents,
    y: EndpointHandle,
    y_events: PeerEvents,
}

/// Connects "x" and "y" through a hub and waits for both channels.
async fn connected_pair() -> Pair {
    let network = MemoryNetwork::new();
    let hub = Hub::default();
    let (x, mut x_events) = endpoint(&network, "x").attach(hub.link());
    let (y, mut y_events) = endpoint(&network, "y").attach(hub.link());

    expect_connected(&mut x_events, "y").await;
    expect_connected(&mut y_events, "x").await;
    settle().await;
    Pair {
        network,
        x,
        x_events,
        y,
        y_events,
    }
}

fn ids() -> (PeerId, PeerId) {
    (PeerId::from("x"), PeerId::from("y"))
}

// =========================================================================
// Failed link
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_link_reoffers_after_fixed_delay() {
    let mut pair = connected_pair().await;
    let (x, y) = ids();
    let offers_before = pair.network.offers().len();
    let old_candidates = pair.network.applied_candidates(&x, &y);
    assert!(!old_candidates.is_empty());

    pair.network.fail_link(&x, &y);
    expect_disconnected(&mut pair.x_events, "y").await;
    expect_disconnected(&mut pair.y_events, "x").await;
    assert_eq!(pair.network.restarts(&x, &y), 1);
    assert!(!pair.x.is_connected("y").await);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(pair.network.offers().len(), offers_before, "re-offered too early");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(pair.network.offers().len() > offers_before);

    expect_connected(&mut pair.x_events, "y").await;
    expect_connected(&mut pair.y_events, "x").await;
    settle().await;

    // The new attempt starts from an empty queue.
    let new_candidates = pair.network.applied_candidates(&x, &y);
    assert!(!new_candidates.is_empty());
    assert!(new_candidates.iter().all(|c| !old_candidates.contains(c)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_link_falls_back_to_relay_until_reconnected() {
    let mut pair = connected_pair().await;
    let (x, y) = ids();

    pair.network.fail_link(&x, &y);
    expect_disconnected(&mut pair.x_events, "y").await;

    assert_eq!(pair.x.send("y", "meanwhile").await.unwrap(), SendResult::Relayed);

    tokio::time::sleep(Duration::from_secs(6)).await;
    expect_connected(&mut pair.x_events, "y").await;
    assert_eq!(pair.x.send("y", "again").await.unwrap(), SendResult::Direct);
}

// =========================================================================
// Closed channel
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_closed_channel_reconnects() {
    let mut pair = connected_pair().await;
    let (x, y) = ids();
    let established = pair.network.established().len();

    pair.network.close_channel(&x, &y);
    expect_disconnected(&mut pair.x_events, "y").await;
    expect_disconnected(&mut pair.y_events, "x").await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    expect_connected(&mut pair.x_events, "y").await;
    expect_connected(&mut pair.y_events, "x").await;
    assert!(pair.network.established().len() > established);
    assert!(pair.y.is_connected("x").await);
}

// =========================================================================
// Transient disconnect
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_recovered_link_cancels_grace_timer() {
    let pair = connected_pair().await;
    let (x, y) = ids();
    let offers_before = pair.network.offers().len();

    pair.network.drop_link(&x, &y);
    tokio::time::sleep(Duration::from_secs(2)).await;
    pair.network.restore_link(&x, &y);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pair.network.offers().len(), offers_before);
    assert!(pair.x.is_connected("y").await);
}

#[tokio::test(start_paused = true)]
async fn test_unrecovered_link_reconnects_after_grace() {
    let mut pair = connected_pair().await;
    let (x, y) = ids();
    let offers_before = pair.network.offers().len();

    pair.network.drop_link(&x, &y);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(pair.network.offers().len(), offers_before);

    tokio::time::sleep(Duration::from_secs(2)).await;
    expect_disconnected(&mut pair.x_events, "y").await;
    expect_connected(&mut pair.x_events, "y").await;
    assert!(pair.network.offers().len() > offers_before);
}

// =========================================================================
// Departure and unanswered offers
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_departed_peer_is_not_reconnected() {
    let mut pair = connected_pair().await;
    let offers_before = pair.network.offers().len();

    pair.y.stop().await.unwrap();
    expect_disconnected(&mut pair.x_events, "y").await;
    expect_event(&mut pair.x_events, |e| {
        matches!(e, peerlink_endpoint::PeerEvent::Left { id } if *id == PeerId::from("y"))
    })
    .await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(pair.network.offers().len(), offers_before);
    assert!(pair.x.connected_peers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_offer_is_retried_after_timeout() {
    let network = MemoryNetwork::new();
    let (link, mut remote) = SignalingLink::pair();
    let (_a, _events) = endpoint(&network, "a").attach(link);

    remote
        .tx
        .send(ServerMessage::PeerList {
            peers: vec![PeerSummary {
                id: PeerId::from("b"),
                display_name: "B".into(),
            }],
        })
        .unwrap();
    let is_offer = |msg: ClientMessage| matches!(msg, ClientMessage::Offer { .. }).then_some(());
    next_frame(&mut remote, is_offer).await;
    let first = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(network.offers().len(), 1);

    next_frame(&mut remote, is_offer).await;
    assert!(first.elapsed() >= Duration::from_secs(30));
    assert_eq!(network.offers().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_link_flap_before_channel_open_keeps_negotiation_deadline() {
    let network = MemoryNetwork::new();
    let (link, mut remote) = SignalingLink::pair();
    let (_a, _events) = endpoint(&network, "a").attach(link);
    let (a, b) = (PeerId::from("a"), PeerId::from("b"));

    remote
        .tx
        .send(ServerMessage::PeerList {
            peers: vec![PeerSummary {
                id: b.clone(),
                display_name: "B".into(),
            }],
        })
        .unwrap();
    let is_offer = |msg: ClientMessage| matches!(msg, ClientMessage::Offer { .. }).then_some(());
    next_frame(&mut remote, is_offer).await;

    // The offer is never answered, so the channel never opens.
    network.drop_link(&a, &b);
    settle().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    network.restore_link(&a, &b);
    settle().await;
    let restored = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(network.offers().len(), 1, "re-offered before the deadline");

    next_frame(&mut remote, is_offer).await;
    assert!(restored.elapsed() >= Duration::from_secs(29));
    assert_eq!(network.offers().len(), 2);
}
