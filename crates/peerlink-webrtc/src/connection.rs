//! `RTCPeerConnection` behind the endpoint's connectivity seam.

use std::sync::Arc;

use peerlink_endpoint::{
    Connectivity, ConnectivityError, ConnectivityEvent, ConnectivityFactory,
    ConnectivityRequest, EventSink, LinkState,
};
use peerlink_protocol::{IceCandidate, SdpKind, SessionDescription};
use tokio::sync::RwLock;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::WebRtcConfig;

type ChannelSlot = Arc<RwLock<Option<Arc<RTCDataChannel>>>>;

fn backend(e: webrtc::Error) -> ConnectivityError {
    ConnectivityError::Backend(e.to_string())
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Checking,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

fn to_protocol(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Creates one [`WebRtcConnectivity`] per negotiation.
///
/// Cheap to clone; every clone shares the same `webrtc` API instance.
#[derive(Clone)]
pub struct WebRtcFactory {
    api: Arc<API>,
    config: WebRtcConfig,
}

impl WebRtcFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self {
            api: Arc::new(
                APIBuilder::new()
                    .with_setting_engine(config.setting_engine())
                    .build(),
            ),
            config,
        }
    }

    pub fn config(&self) -> &WebRtcConfig {
        &self.config
    }
}

impl Default for WebRtcFactory {
    fn default() -> Self {
        Self::new(WebRtcConfig::default())
    }
}

impl ConnectivityFactory for WebRtcFactory {
    type Connectivity = WebRtcConnectivity;

    async fn create(
        &self,
        request: ConnectivityRequest,
        events: EventSink,
    ) -> Result<WebRtcConnectivity, ConnectivityError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.config.rtc_configuration())
                .await
                .map_err(backend)?,
        );
        let channel: ChannelSlot = Arc::new(RwLock::new(None));

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.emit(ConnectivityEvent::LocalCandidate(to_protocol(init)));
                    }
                    Err(e) => tracing::warn!(error = %e, "unserializable local candidate"),
                }
            })
        }));

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = sink.clone();
            Box::pin(async move {
                tracing::debug!(peer = %sink.remote(), ?state, "peer connection state");
                sink.emit(ConnectivityEvent::Link(link_state(state)));
            })
        }));

        if request.initiator {
            let init = RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            };
            let dc = pc
                .create_data_channel(&self.config.channel_label, Some(init))
                .await
                .map_err(backend)?;
            *channel.write().await = Some(Arc::clone(&dc));
            wire_channel(&dc, &events);
        } else {
            let slot = Arc::clone(&channel);
            let sink = events.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let slot = Arc::clone(&slot);
                let sink = sink.clone();
                Box::pin(async move {
                    tracing::debug!(peer = %sink.remote(), label = dc.label(), "remote data channel");
                    *slot.write().await = Some(Arc::clone(&dc));
                    wire_channel(&dc, &sink);
                })
            }));
        }

        tracing::debug!(
            peer = %request.remote,
            generation = request.generation,
            initiator = request.initiator,
            "peer connection created"
        );
        Ok(WebRtcConnectivity { pc, channel })
    }
}

/// Forwards a data channel's open/close/message callbacks to `sink`.
fn wire_channel(dc: &Arc<RTCDataChannel>, sink: &EventSink) {
    let on_open = sink.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            on_open.emit(ConnectivityEvent::ChannelOpen);
        })
    }));

    let on_close = sink.clone();
    dc.on_close(Box::new(move || {
        let on_close = on_close.clone();
        Box::pin(async move {
            on_close.emit(ConnectivityEvent::ChannelClosed);
        })
    }));

    let on_message = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let on_message = on_message.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    on_message.emit(ConnectivityEvent::ChannelMessage(text));
                }
                Err(_) => tracing::warn!(peer = %on_message.remote(), "dropping non-UTF-8 channel message"),
            }
        })
    }));
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// One peer connection and its data channel.
pub struct WebRtcConnectivity {
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
}

impl WebRtcConnectivity {
    async fn open_channel(&self) -> Result<Arc<RTCDataChannel>, ConnectivityError> {
        self.channel
            .read()
            .await
            .clone()
            .filter(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .ok_or(ConnectivityError::ChannelNotOpen)
    }
}

impl Connectivity for WebRtcConnectivity {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectivityError> {
        let offer = self.pc.create_offer(None).await.map_err(backend)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(backend)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, ConnectivityError> {
        if offer.kind != SdpKind::Offer {
            return Err(ConnectivityError::Negotiation("expected an offer".into()));
        }
        let remote = RTCSessionDescription::offer(offer.sdp).map_err(backend)?;
        self.pc.set_remote_description(remote).await.map_err(backend)?;

        let answer = self.pc.create_answer(None).await.map_err(backend)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(backend)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), ConnectivityError> {
        if answer.kind != SdpKind::Answer {
            return Err(ConnectivityError::Negotiation("expected an answer".into()));
        }
        let remote = RTCSessionDescription::answer(answer.sdp).map_err(backend)?;
        self.pc.set_remote_description(remote).await.map_err(backend)
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectivityError> {
        self.pc
            .add_ice_candidate(to_rtc(candidate))
            .await
            .map_err(backend)
    }

    /// Restarts ICE locally: fresh credentials, fresh candidates.
    ///
    /// The restart offer is applied but not signalled: an offer reaching
    /// the remote replaces its whole record. Both sides recover through a
    /// fresh negotiation after the reconnect delay.
    async fn restart(&self) -> Result<(), ConnectivityError> {
        let options = RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        };
        let offer = self.pc.create_offer(Some(options)).await.map_err(backend)?;
        self.pc.set_local_description(offer).await.map_err(backend)?;
        tracing::debug!("ice restarted");
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), ConnectivityError> {
        let dc = self.open_channel().await?;
        dc.send_text(text.to_string()).await.map_err(backend)?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(dc) = self.channel.write().await.take() {
            if let Err(e) = dc.close().await {
                tracing::debug!(error = %e, "data channel close");
            }
        }
        if let Err(e) = self.pc.close().await {
            tracing::debug!(error = %e, "peer connection close");
        }
    }
}
