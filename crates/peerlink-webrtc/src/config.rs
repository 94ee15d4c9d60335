//! WebRTC settings.

use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Public STUN servers used when none are configured.
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Label of the data channel the offering side creates.
pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

/// Settings shared by every peer connection a factory creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs. Empty means host candidates only, which is enough
    /// on a single machine or LAN.
    pub ice_servers: Vec<String>,
    pub channel_label: String,
    /// Also gather loopback candidates, so two endpoints on a host with
    /// no other interface can still reach each other.
    pub include_loopback: bool,
}

impl WebRtcConfig {
    /// Host and loopback candidates only, no STUN.
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback: true,
            ..Self::default()
        }
    }

    pub(crate) fn setting_engine(&self) -> SettingEngine {
        let mut setting = SettingEngine::default();
        setting.set_include_loopback_candidate(self.include_loopback);
        setting
    }

    pub(crate) fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            include_loopback: false,
        }
    }
}
