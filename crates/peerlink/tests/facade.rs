//! End-to-end runs through the facade: a real coordinator and two
//! in-process endpoints.

use std::time::Duration;

use peerlink::prelude::*;

async fn start_coordinator() -> Result<String, PeerlinkError> {
    let coordinator = Coordinator::builder().bind("127.0.0.1:0").build().await?;
    let addr = coordinator.local_addr().map_err(peerlink::transport::TransportError::AcceptFailed)?;
    tokio::spawn(coordinator.run());
    Ok(format!("ws://{addr}"))
}

async fn join(
    network: &MemoryNetwork,
    url: &str,
    id: &str,
) -> Result<(EndpointHandle, PeerEvents), PeerlinkError> {
    let endpoint = Endpoint::builder(network.clone())
        .local_id(id)
        .cipher(Cipher::from_key(&[3; 32]))
        .build()?;
    Ok(endpoint.connect(url).await?)
}

async fn next_matching(
    events: &mut PeerEvents,
    mut pred: impl FnMut(&PeerEvent) -> bool,
) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_two_endpoints_message_directly() -> Result<(), PeerlinkError> {
    let url = start_coordinator().await?;
    let network = MemoryNetwork::new();
    let (alice, mut alice_events) = join(&network, &url, "alice").await?;
    let (bob, mut bob_events) = join(&network, &url, "bob").await?;

    next_matching(&mut alice_events, |e| matches!(e, PeerEvent::Connected { .. })).await;
    next_matching(&mut bob_events, |e| matches!(e, PeerEvent::Connected { .. })).await;

    assert_eq!(alice.send("bob", "hi").await?, SendResult::Direct);
    let event = next_matching(&mut bob_events, |e| matches!(e, PeerEvent::MessageReceived { .. })).await;
    assert_eq!(
        event,
        PeerEvent::MessageReceived {
            from: PeerId::from("alice"),
            content: "hi".into(),
            via: Via::Direct,
            security: Security::Encrypted,
        }
    );

    alice.stop().await?;
    bob.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_send_after_stop_surfaces_as_endpoint_error() -> Result<(), PeerlinkError> {
    let url = start_coordinator().await?;
    let network = MemoryNetwork::new();
    let (alice, _events) = join(&network, &url, "alice").await?;

    alice.stop().await?;
    let err: PeerlinkError = alice.send("bob", "late").await.unwrap_err().into();
    assert!(matches!(err, PeerlinkError::Endpoint(_)));
    Ok(())
}

#[tokio::test]
async fn test_wrong_passphrase_is_flagged_not_dropped() -> Result<(), PeerlinkError> {
    let url = start_coordinator().await?;
    let network = MemoryNetwork::new();
    let (alice, mut alice_events) = join(&network, &url, "alice").await?;
    let (_eve, mut eve_events) = Endpoint::builder(network.clone())
        .local_id("eve")
        .cipher(Cipher::from_key(&[4; 32]))
        .build()?
        .connect(&url)
        .await?;

    next_matching(&mut alice_events, |e| matches!(e, PeerEvent::Connected { .. })).await;
    next_matching(&mut eve_events, |e| matches!(e, PeerEvent::Connected { .. })).await;

    alice.send("eve", "secret").await?;
    let event = next_matching(&mut eve_events, |e| matches!(e, PeerEvent::MessageReceived { .. })).await;
    let PeerEvent::MessageReceived { content, security, .. } = event else {
        unreachable!()
    };
    assert_eq!(security, Security::Undecryptable);
    assert_ne!(content, "secret");
    Ok(())
}
