//! Parameter types crossing the Media Engine boundary.
//!
//! RTP capabilities, RTP parameters, DTLS parameters and ICE data are opaque
//! to the gateway: they are relayed between client and engine verbatim, so
//! they are kept as JSON values behind transparent newtypes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receive capabilities of a router or a client device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// RTP send parameters of a producer or consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// Remote DTLS parameters supplied when connecting a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// A codec the router is able to route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

/// Codecs every meeting router is created with: Opus audio and VP8 video.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    let mut vp8_parameters = Map::new();
    vp8_parameters.insert("x-google-start-bitrate".to_string(), json!(1000));

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: Some(2),
            parameters: Map::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            channels: None,
            parameters: vp8_parameters,
        },
    ]
}

/// An address the engine listens on for media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenIp {
    pub ip: String,
    /// Public address announced in ICE candidates (for NAT deployments).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,
}

/// Options for creating a WebRTC transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcTransportOptions {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub initial_available_outgoing_bitrate: u32,
}

/// Transport parameters returned to the client after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Forwarding type of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    Simple,
    Simulcast,
    Svc,
}

/// Preferred spatial/temporal layers for a simulcast or SVC consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    pub spatial_layer: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_default_codecs_cover_both_kinds() {
        let codecs = default_media_codecs();
        assert!(codecs.iter().any(|c| c.kind == MediaKind::Audio));
        assert!(codecs.iter().any(|c| c.kind == MediaKind::Video));
    }

    #[test]
    fn test_codec_serializes_camel_case() {
        let codecs = default_media_codecs();
        let video = serde_json::to_value(&codecs[1]).unwrap();
        assert_eq!(video["mimeType"], "video/VP8");
        assert_eq!(video["clockRate"], 90_000);
        assert_eq!(video["parameters"]["x-google-start-bitrate"], 1000);
        assert!(video.get("channels").is_none());
    }

    #[test]
    fn test_media_kind_wire_format() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
        let kind: MediaKind = serde_json::from_str("\"audio\"").unwrap();
        assert_eq!(kind, MediaKind::Audio);
    }
}
