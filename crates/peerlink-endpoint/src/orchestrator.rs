//! The connection orchestrator.
//!
//! One actor task per endpoint owns every negotiation record. It selects
//! over four inputs (application commands, coordinator frames,
//! connectivity events, timers) and handles each to completion before
//! looking at the next, so glare decisions and phase changes never race.
//!
//! ```text
//!   EndpointHandle ──Command──▶ ┌──────────────┐ ──ClientMessage──▶ coordinator
//!                               │ Orchestrator │ ◀─ServerMessage───
//!   Connectivity ─TaggedEvent─▶ │   (actor)    │ ──PeerEvent──────▶ PeerEvents
//!   Scheduler ───TimerFired───▶ └──────────────┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use peerlink_cipher::{Cipher, CipherConfig, Decoded};
use peerlink_protocol::{
    ClientMessage, IceCandidate, NegotiationKind, PeerId, ServerMessage,
    SessionDescription, unix_millis,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connectivity::{
    ConnectivityEvent, ConnectivityFactory, ConnectivityRequest, EventSink,
    LinkState, TaggedEvent,
};
use crate::event::{PeerEvent, PeerEvents, SendResult, Security, Via};
use crate::link::SignalingLink;
use crate::negotiation::{Negotiation, OfferDecision, next_generation};
use crate::phase::{Input, Phase, Role};
use crate::scheduler::{Scheduler, TimerFired, TimerReason};
use crate::{Connectivity, EndpointConfig, EndpointError};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures an [`Endpoint`].
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), peerlink_endpoint::EndpointError> {
/// use peerlink_endpoint::{Endpoint, MemoryNetwork};
///
/// let endpoint = Endpoint::builder(MemoryNetwork::new())
///     .local_id("alice")
///     .display_name("Alice")
///     .build()?;
/// let (handle, mut events) = endpoint.connect("ws://127.0.0.1:8080").await?;
/// # Ok(())
/// # }
/// ```
pub struct EndpointBuilder<F> {
    factory: F,
    config: EndpointConfig,
    cipher: Option<Cipher>,
    cipher_config: CipherConfig,
}

impl<F: ConnectivityFactory> EndpointBuilder<F> {
    pub fn local_id(mut self, id: impl Into<PeerId>) -> Self {
        self.config.local_id = id.into();
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.display_name = Some(name.into());
        self
    }

    /// Replaces the whole configuration, including the id.
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn disconnect_grace(mut self, grace: Duration) -> Self {
        self.config.disconnect_grace = grace;
        self
    }

    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.config.negotiation_timeout = timeout;
        self
    }

    /// Derives the payload key from this passphrase instead of the
    /// deployment default.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.cipher_config.passphrase = passphrase.into();
        self
    }

    pub fn cipher_config(mut self, config: CipherConfig) -> Self {
        self.cipher_config = config;
        self
    }

    /// Uses an already derived cipher and skips key derivation.
    pub fn cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// # Errors
    /// `EndpointError::Cipher` if the key cannot be derived.
    pub fn build(self) -> Result<Endpoint<F>, EndpointError> {
        let cipher = match self.cipher {
            Some(cipher) => cipher,
            None => Cipher::derive(&self.cipher_config)?,
        };
        Ok(Endpoint {
            factory: self.factory,
            config: self.config.validated(),
            cipher,
        })
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A configured endpoint, not yet started.
pub struct Endpoint<F> {
    factory: F,
    config: EndpointConfig,
    cipher: Cipher,
}

impl<F: ConnectivityFactory> Endpoint<F> {
    pub fn builder(factory: F) -> EndpointBuilder<F> {
        EndpointBuilder {
            factory,
            config: EndpointConfig::default(),
            cipher: None,
            cipher_config: CipherConfig::default(),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.config.local_id
    }

    /// Dials the coordinator and starts the orchestrator.
    ///
    /// # Errors
    /// `EndpointError::Link` if the coordinator cannot be reached.
    pub async fn connect(self, url: &str) -> Result<(EndpointHandle, PeerEvents), EndpointError> {
        let link = SignalingLink::websocket(url).await?;
        tracing::info!(peer = %self.config.local_id, url, "connected to coordinator");
        Ok(self.attach(link))
    }

    /// Starts the orchestrator over an existing signaling link.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn attach(self, link: SignalingLink) -> (EndpointHandle, PeerEvents) {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (scheduler, timer_rx) = Scheduler::new();

        let SignalingLink { outbound, inbound } = link;
        let local = self.config.local_id.clone();

        let actor = Orchestrator {
            local: local.clone(),
            config: self.config,
            factory: self.factory,
            cipher: self.cipher,
            records: HashMap::new(),
            out: Outbox {
                signaling: outbound,
                events: event_tx,
            },
            conn_tx,
            scheduler,
        };
        tokio::spawn(actor.run(Inputs {
            commands: command_rx,
            signaling: inbound,
            connectivity: conn_rx,
            timers: timer_rx,
        }));

        (
            EndpointHandle {
                local,
                commands: command_tx,
            },
            PeerEvents::new(event_rx),
        )
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Requests from handles to the actor.
enum Command {
    Send {
        to: PeerId,
        content: String,
        reply: oneshot::Sender<SendResult>,
    },
    Broadcast {
        content: String,
    },
    RequestPeerInfo {
        id: PeerId,
    },
    IsConnected {
        id: PeerId,
        reply: oneshot::Sender<bool>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<BTreeSet<PeerId>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running endpoint. Cheap to clone.
#[derive(Clone)]
pub struct EndpointHandle {
    local: PeerId,
    commands: mpsc::Sender<Command>,
}

impl EndpointHandle {
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// `true` once the orchestrator has stopped.
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EndpointError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| EndpointError::Stopped)?;
        reply_rx.await.map_err(|_| EndpointError::Stopped)
    }

    /// Sends an encrypted message to `to`.
    ///
    /// Goes over the data channel when one is open, otherwise through
    /// the coordinator relay. An unknown or offline peer is not an
    /// error here; the relay reports it later as
    /// [`PeerEvent::DeliveryFailed`].
    ///
    /// # Errors
    /// `EndpointError::Stopped` after the endpoint stopped.
    pub async fn send(
        &self,
        to: impl Into<PeerId>,
        content: impl Into<String>,
    ) -> Result<SendResult, EndpointError> {
        let (to, content) = (to.into(), content.into());
        self.request(|reply| Command::Send { to, content, reply }).await
    }

    /// Posts an encrypted message to every other registered peer.
    pub async fn broadcast(&self, content: impl Into<String>) -> Result<(), EndpointError> {
        self.commands
            .send(Command::Broadcast {
                content: content.into(),
            })
            .await
            .map_err(|_| EndpointError::Stopped)
    }

    /// Asks the coordinator about `id`; the answer arrives as
    /// [`PeerEvent::PeerInfo`].
    pub async fn request_peer_info(&self, id: impl Into<PeerId>) -> Result<(), EndpointError> {
        self.commands
            .send(Command::RequestPeerInfo { id: id.into() })
            .await
            .map_err(|_| EndpointError::Stopped)
    }

    /// `true` if the data channel to `id` is open. `false` after stop.
    pub async fn is_connected(&self, id: impl Into<PeerId>) -> bool {
        let id = id.into();
        self.request(|reply| Command::IsConnected { id, reply })
            .await
            .unwrap_or(false)
    }

    /// Every peer with an open data channel. Empty after stop.
    pub async fn connected_peers(&self) -> BTreeSet<PeerId> {
        self.request(|reply| Command::ConnectedPeers { reply })
            .await
            .unwrap_or_default()
    }

    /// Closes every negotiation and the coordinator link.
    ///
    /// # Errors
    /// `EndpointError::Stopped` if the endpoint had already stopped.
    pub async fn stop(&self) -> Result<(), EndpointError> {
        self.request(|reply| Command::Stop { reply }).await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Inputs {
    commands: mpsc::Receiver<Command>,
    signaling: mpsc::UnboundedReceiver<ServerMessage>,
    connectivity: mpsc::UnboundedReceiver<TaggedEvent>,
    timers: mpsc::UnboundedReceiver<TimerFired>,
}

/// Everything the actor emits.
struct Outbox {
    signaling: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl Outbox {
    fn signal(&self, msg: ClientMessage) {
        let kind = msg.kind();
        if self.signaling.send(msg).is_err() {
            tracing::debug!(kind, "coordinator link gone, frame dropped");
        }
    }

    fn negotiation(&self, kind: NegotiationKind, to: &PeerId, payload: Value) {
        self.signal(ClientMessage::negotiation(kind, to.clone(), payload));
    }

    fn emit(&self, event: PeerEvent) {
        // Nobody listening is fine; the application dropped its receiver.
        let _ = self.events.send(event);
    }
}

struct Orchestrator<F: ConnectivityFactory> {
    local: PeerId,
    config: EndpointConfig,
    factory: F,
    cipher: Cipher,
    records: HashMap<PeerId, Negotiation<F::Connectivity>>,
    out: Outbox,
    conn_tx: mpsc::UnboundedSender<TaggedEvent>,
    scheduler: Scheduler,
}

impl<F: ConnectivityFactory> Orchestrator<F> {
    async fn run(mut self, mut inputs: Inputs) {
        tracing::info!(peer = %self.local, "orchestrator started");
        self.out.signal(ClientMessage::Register {
            id: self.local.clone(),
            display_name: self.config.display_name.clone(),
        });

        loop {
            tokio::select! {
                cmd = inputs.commands.recv() => match cmd {
                    Some(Command::Stop { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::debug!(peer = %self.local, "all handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                msg = inputs.signaling.recv() => match msg {
                    Some(msg) => self.handle_signal(msg).await,
                    None => {
                        tracing::warn!(peer = %self.local, "coordinator link lost");
                        self.shutdown().await;
                        self.out.emit(PeerEvent::CoordinatorLost);
                        break;
                    }
                },
                Some(event) = inputs.connectivity.recv() => {
                    self.handle_connectivity(event).await;
                }
                Some(fired) = inputs.timers.recv() => {
                    self.handle_timer(fired).await;
                }
            }
        }

        tracing::info!(peer = %self.local, "orchestrator stopped");
    }

    // -- commands ---------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { to, content, reply } => {
                let result = self.send(to, content).await;
                let _ = reply.send(result);
            }
            Command::Broadcast { content } => {
                let content = self.seal(&content);
                self.out.signal(ClientMessage::PublicPost {
                    content,
                    timestamp: Some(unix_millis()),
                });
            }
            Command::RequestPeerInfo { id } => {
                self.out.signal(ClientMessage::GetPeerInfo { id });
            }
            Command::IsConnected { id, reply } => {
                let connected = self
                    .records
                    .get(&id)
                    .is_some_and(|r| r.phase() == Phase::Connected);
                let _ = reply.send(connected);
            }
            Command::ConnectedPeers { reply } => {
                let peers = self
                    .records
                    .values()
                    .filter(|r| r.phase() == Phase::Connected)
                    .map(|r| r.remote().clone())
                    .collect();
                let _ = reply.send(peers);
            }
            // Handled by the run loop, which has to exit afterwards.
            Command::Stop { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Seals `content`, falling back to plaintext if encryption fails.
    fn seal(&self, content: &str) -> String {
        match self.cipher.encode(content.as_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(error = %e, "encryption failed, sending plaintext");
                content.to_string()
            }
        }
    }

    async fn send(&mut self, to: PeerId, content: String) -> SendResult {
        let payload = self.seal(&content);

        if let Some(record) = self.records.get(&to) {
            if record.phase() == Phase::Connected {
                match record.connectivity().send(&payload).await {
                    Ok(()) => return SendResult::Direct,
                    Err(e) => {
                        tracing::debug!(peer = %to, error = %e, "direct send failed, relaying");
                    }
                }
            }
        }

        self.out.signal(ClientMessage::Message {
            to,
            content: payload,
            timestamp: Some(unix_millis()),
        });
        SendResult::Relayed
    }

    // -- coordinator frames -----------------------------------------------

    async fn handle_signal(&mut self, msg: ServerMessage) {
        tracing::debug!(peer = %self.local, kind = msg.kind(), "signal");
        match msg {
            ServerMessage::PeerList { peers } => {
                for peer in peers {
                    self.discover(peer.id, peer.display_name).await;
                }
            }
            ServerMessage::PeerJoined { id, display_name } => {
                self.discover(id, display_name).await;
            }
            ServerMessage::PeerLeft { id } => {
                self.discard(&id).await;
                self.out.emit(PeerEvent::Left { id });
            }
            ServerMessage::Offer { from, payload } => self.on_offer(from, payload).await,
            ServerMessage::Answer { from, payload } => self.on_answer(from, payload).await,
            ServerMessage::IceCandidate { from, payload } => {
                self.on_candidate(from, payload).await;
            }
            ServerMessage::Message { from, content, .. } => {
                let (content, security) = unseal(&self.cipher, &from, &content);
                self.out.emit(PeerEvent::MessageReceived {
                    from,
                    content,
                    via: Via::Relay,
                    security,
                });
            }
            ServerMessage::MessageFailed { to, reason } => {
                tracing::debug!(peer = %to, %reason, "relay delivery failed");
                self.out.emit(PeerEvent::DeliveryFailed { to, reason });
            }
            ServerMessage::PublicPost {
                from,
                content,
                timestamp,
            } => {
                let (content, security) = unseal(&self.cipher, &from, &content);
                self.out.emit(PeerEvent::PublicPost {
                    from,
                    content,
                    timestamp,
                    security,
                });
            }
            ServerMessage::PeerInfo {
                id,
                display_name,
                online,
            } => {
                self.out.emit(PeerEvent::PeerInfo {
                    id,
                    display_name,
                    online,
                });
            }
            ServerMessage::Error { message } => {
                tracing::warn!(peer = %self.local, %message, "coordinator error");
                self.out.emit(PeerEvent::SignalingError { message });
            }
        }
    }

    async fn discover(&mut self, id: PeerId, display_name: String) {
        if id == self.local {
            return;
        }
        self.out.emit(PeerEvent::Discovered {
            id: id.clone(),
            display_name,
        });
        if self.records.contains_key(&id) {
            return;
        }
        self.start_offer(id, Phase::Idle).await;
    }

    async fn on_offer(&mut self, from: PeerId, payload: Value) {
        let offer = match SessionDescription::from_payload(payload) {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "malformed offer");
                return;
            }
        };

        if let Some(record) = self.records.get(&from) {
            match record.offer_decision() {
                OfferDecision::Ignore => {
                    tracing::debug!(peer = %from, role = %record.role(), "glare, keeping own offer");
                    return;
                }
                OfferDecision::Replace => {
                    tracing::debug!(
                        peer = %from,
                        role = %record.role(),
                        phase = %record.phase(),
                        "replacing record for inbound offer"
                    );
                    self.discard(&from).await;
                }
            }
        }

        self.answer(from, offer).await;
    }

    async fn on_answer(&mut self, from: PeerId, payload: Value) {
        let answer = match SessionDescription::from_payload(payload) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "malformed answer");
                return;
            }
        };
        let Some(record) = self.records.get_mut(&from) else {
            tracing::debug!(peer = %from, "answer for unknown peer");
            return;
        };
        if record.phase() != Phase::AwaitingAnswer {
            tracing::debug!(peer = %from, phase = %record.phase(), "unexpected answer");
            return;
        }

        if let Err(e) = record.connectivity().accept_answer(answer).await {
            tracing::warn!(peer = %from, error = %e, "failed to accept answer");
            return;
        }
        if let Err(e) = record.apply(Input::RemoteAnswer) {
            tracing::warn!(peer = %from, error = %e, "answer rejected");
            return;
        }
        apply_queued(record).await;
    }

    async fn on_candidate(&mut self, from: PeerId, payload: Value) {
        let candidate = match IceCandidate::from_payload(payload) {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "malformed candidate");
                return;
            }
        };
        let Some(record) = self.records.get_mut(&from) else {
            tracing::debug!(peer = %from, "dropping candidate for unknown peer");
            return;
        };
        match record.candidates_mut().admit(candidate) {
            Some(candidate) => add_candidate(record, candidate).await,
            None => {
                tracing::debug!(
                    peer = %from,
                    queued = record.candidates_mut().len(),
                    "queued candidate"
                );
            }
        }
    }

    // -- negotiation ------------------------------------------------------

    async fn create_connectivity(
        &self,
        remote: &PeerId,
        generation: u64,
        initiator: bool,
    ) -> Option<F::Connectivity> {
        let request = ConnectivityRequest {
            local: self.local.clone(),
            remote: remote.clone(),
            generation,
            initiator,
        };
        let sink = EventSink::new(remote.clone(), generation, self.conn_tx.clone());
        match self.factory.create(request, sink).await {
            Ok(connectivity) => Some(connectivity),
            Err(e) => {
                tracing::warn!(peer = %remote, error = %e, "failed to create connectivity");
                None
            }
        }
    }

    /// Builds a fresh record for `remote` and sends our offer.
    async fn start_offer(&mut self, remote: PeerId, phase: Phase) {
        let generation = next_generation();
        let Some(connectivity) = self.create_connectivity(&remote, generation, true).await else {
            return;
        };
        let role = Role::between(&self.local, &remote);
        let mut record = Negotiation::new(remote.clone(), role, generation, connectivity, phase);

        let (delay, reason) = match self.offer(&mut record).await {
            Ok(()) => {
                tracing::info!(peer = %remote, %role, generation, "offer sent");
                (self.config.negotiation_timeout, TimerReason::NegotiationTimeout)
            }
            Err(e) => {
                tracing::warn!(peer = %remote, error = %e, "offer failed");
                (self.config.reconnect_delay, TimerReason::Reconnect)
            }
        };
        record.set_timer(self.scheduler.schedule(remote.clone(), generation, delay, reason));
        self.records.insert(remote, record);
    }

    async fn offer(&self, record: &mut Negotiation<F::Connectivity>) -> Result<(), EndpointError> {
        record.apply(Input::StartOffer)?;
        let offer = record.connectivity().create_offer().await?;
        self.out
            .negotiation(NegotiationKind::Offer, record.remote(), offer.to_payload()?);
        record.apply(Input::OfferSent)?;
        Ok(())
    }

    /// Answers `offer` on a fresh record.
    async fn answer(&mut self, remote: PeerId, offer: SessionDescription) {
        let generation = next_generation();
        let Some(connectivity) = self.create_connectivity(&remote, generation, false).await else {
            return;
        };
        let role = Role::between(&self.local, &remote);
        let mut record = Negotiation::new(remote.clone(), role, generation, connectivity, Phase::Idle);

        match self.accept(&mut record, offer).await {
            Ok(()) => {
                tracing::info!(peer = %remote, %role, generation, "answer sent");
                record.set_timer(self.scheduler.schedule(
                    remote.clone(),
                    generation,
                    self.config.negotiation_timeout,
                    TimerReason::NegotiationTimeout,
                ));
                self.records.insert(remote, record);
            }
            Err(e) => {
                // The remote's timeout will offer again.
                tracing::warn!(peer = %remote, error = %e, "failed to answer offer");
                record.close().await;
            }
        }
    }

    async fn accept(
        &self,
        record: &mut Negotiation<F::Connectivity>,
        offer: SessionDescription,
    ) -> Result<(), EndpointError> {
        record.apply(Input::RemoteOffer)?;
        let answer = record.connectivity().accept_offer(offer).await?;
        apply_queued(record).await;
        self.out
            .negotiation(NegotiationKind::Answer, record.remote(), answer.to_payload()?);
        record.apply(Input::AnswerSent)?;
        Ok(())
    }

    /// Removes and closes the record for `id`. Emits `Disconnected` if
    /// its channel was open.
    async fn discard(&mut self, id: &PeerId) {
        let Some(mut record) = self.records.remove(id) else {
            return;
        };
        let was_connected = record.phase() == Phase::Connected;
        record.close().await;
        if was_connected {
            self.out.emit(PeerEvent::Disconnected { id: id.clone() });
        }
    }

    async fn shutdown(&mut self) {
        let ids: Vec<PeerId> = self.records.keys().cloned().collect();
        for id in ids {
            self.discard(&id).await;
        }
    }

    // -- connectivity events ----------------------------------------------

    async fn handle_connectivity(&mut self, tagged: TaggedEvent) {
        let TaggedEvent {
            remote,
            generation,
            event,
        } = tagged;
        let Some(record) = self
            .records
            .get_mut(&remote)
            .filter(|r| r.generation() == generation)
        else {
            tracing::debug!(peer = %remote, generation, "stale connectivity event");
            return;
        };

        match event {
            ConnectivityEvent::LocalCandidate(candidate) => match candidate.to_payload() {
                Ok(payload) => {
                    self.out
                        .negotiation(NegotiationKind::IceCandidate, &remote, payload);
                }
                Err(e) => tracing::warn!(peer = %remote, error = %e, "unencodable candidate"),
            },

            ConnectivityEvent::Link(LinkState::Connected) => {
                record.cancel_timer_for(TimerReason::DisconnectGrace);
                // A record that is not Connected always has a pending timer.
                if record.phase() != Phase::Connected && record.timer_reason().is_none() {
                    tracing::debug!(peer = %remote, "link recovered before channel open");
                    record.set_timer(self.scheduler.schedule(
                        remote.clone(),
                        generation,
                        self.config.negotiation_timeout,
                        TimerReason::NegotiationTimeout,
                    ));
                }
            }

            ConnectivityEvent::Link(LinkState::Disconnected) => {
                if record.timer_reason() != Some(TimerReason::Reconnect) {
                    tracing::debug!(peer = %remote, "link disconnected, waiting for recovery");
                    record.set_timer(self.scheduler.schedule(
                        remote.clone(),
                        generation,
                        self.config.disconnect_grace,
                        TimerReason::DisconnectGrace,
                    ));
                }
            }

            ConnectivityEvent::Link(LinkState::Failed) => {
                tracing::info!(peer = %remote, "link failed");
                if let Err(e) = record.connectivity().restart().await {
                    tracing::debug!(peer = %remote, error = %e, "restart failed");
                }
                let was_connected = record.phase() == Phase::Connected;
                if matches!(record.phase(), Phase::Stable | Phase::Connected) {
                    let _ = record.apply(Input::LinkLost);
                }
                if record.timer_reason() != Some(TimerReason::Reconnect) {
                    record.set_timer(self.scheduler.schedule(
                        remote.clone(),
                        generation,
                        self.config.reconnect_delay,
                        TimerReason::Reconnect,
                    ));
                }
                if was_connected {
                    self.out.emit(PeerEvent::Disconnected { id: remote });
                }
            }

            ConnectivityEvent::Link(_) => {}

            ConnectivityEvent::ChannelOpen => match record.apply(Input::ChannelOpen) {
                Ok(_) => {
                    record.cancel_timer();
                    tracing::info!(peer = %remote, generation, "channel open");
                    self.out.emit(PeerEvent::Connected { id: remote });
                }
                Err(e) => tracing::debug!(peer = %remote, error = %e, "ignoring channel open"),
            },

            ConnectivityEvent::ChannelClosed => {
                let was_connected = record.phase() == Phase::Connected;
                if record.apply(Input::ChannelClosed).is_err() {
                    return;
                }
                tracing::info!(peer = %remote, "channel closed");
                record.set_timer(self.scheduler.schedule(
                    remote.clone(),
                    generation,
                    self.config.reconnect_delay,
                    TimerReason::Reconnect,
                ));
                if was_connected {
                    self.out.emit(PeerEvent::Disconnected { id: remote });
                }
            }

            ConnectivityEvent::ChannelMessage(text) => {
                let (content, security) = unseal(&self.cipher, &remote, &text);
                self.out.emit(PeerEvent::MessageReceived {
                    from: remote,
                    content,
                    via: Via::Direct,
                    security,
                });
            }
        }
    }

    // -- timers -----------------------------------------------------------

    async fn handle_timer(&mut self, fired: TimerFired) {
        let live = self.records.get(&fired.remote).is_some_and(|r| {
            r.generation() == fired.generation && r.timer_seq() == Some(fired.seq)
        });
        if !live {
            tracing::debug!(peer = %fired.remote, reason = %fired.reason, "stale timer");
            return;
        }

        tracing::info!(peer = %fired.remote, reason = %fired.reason, "reconnecting");
        self.discard(&fired.remote).await;
        self.start_offer(fired.remote, Phase::Reconnecting).await;
    }
}

/// Releases the record's candidate queue and applies it in order.
async fn apply_queued<C: Connectivity>(record: &mut Negotiation<C>) {
    for candidate in record.candidates_mut().release() {
        add_candidate(record, candidate).await;
    }
}

async fn add_candidate<C: Connectivity>(record: &Negotiation<C>, candidate: IceCandidate) {
    if let Err(e) = record.connectivity().add_candidate(candidate).await {
        tracing::warn!(peer = %record.remote(), error = %e, "failed to add candidate");
    }
}

/// Decodes an inbound payload for delivery.
fn unseal(cipher: &Cipher, from: &PeerId, text: &str) -> (String, Security) {
    let (bytes, security) = match cipher.decode(text) {
        Decoded::Decrypted(bytes) => (bytes, Security::Encrypted),
        Decoded::Plaintext(bytes) => (bytes, Security::Plaintext),
        Decoded::Undecryptable(bytes) => {
            tracing::warn!(peer = %from, "undecryptable payload, delivering raw");
            (bytes, Security::Undecryptable)
        }
    };
    (String::from_utf8_lossy(&bytes).into_owned(), security)
}
