//! Media Engine traits.
//!
//! Object lifetimes follow ownership: whoever holds the boxed handle owns the
//! engine object and is expected to call `close()` when done. Engine-initiated
//! closure is reported through the `on_*` hooks, each of which fires at most
//! once and never while the engine holds internal locks.

use crate::error::MediaError;
use crate::types::{
    ConsumerLayers, ConsumerType, DtlsParameters, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpParameters, TransportParams, WebRtcTransportOptions,
};
use async_trait::async_trait;

/// Callback invoked once when an engine object is closed.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// A media worker process able to host routers.
#[async_trait]
pub trait MediaWorker: Send + Sync {
    /// Worker identifier (for logging and load accounting).
    fn id(&self) -> &str;

    /// Allocate a routing context supporting the given codecs.
    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<Box<dyn Router>, MediaError>;
}

/// Routing context for one meeting.
#[async_trait]
pub trait Router: Send + Sync {
    fn id(&self) -> &str;

    /// Capabilities clients must load before producing or consuming.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether `producer_id` can be forwarded to a device with `rtp_capabilities`.
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Box<dyn Transport>, MediaError>;
}

/// A bidirectional WebRTC transport.
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> &str;

    /// ICE and DTLS parameters to hand to the client.
    fn params(&self) -> TransportParams;

    /// Cap the bitrate the remote side may send on this transport.
    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), MediaError>;

    /// Complete the DTLS handshake parameters. Fails on malformed parameters.
    async fn connect(&self, dtls_parameters: &DtlsParameters) -> Result<(), MediaError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<Box<dyn Producer>, MediaError>;

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Box<dyn Consumer>, MediaError>;

    /// Register a hook fired when the transport closes for any reason.
    fn on_close(&self, hook: CloseHook);

    /// Close the transport, cascading to every producer and consumer on it.
    fn close(&self);
}

/// A published media source.
pub trait Producer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Register a hook fired when the owning transport closes.
    fn on_transport_close(&self, hook: CloseHook);

    /// Close the producer. Consumers of it observe a producer-close.
    fn close(&self);
}

/// A subscription to one producer.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;

    fn producer_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn consumer_type(&self) -> ConsumerType;

    fn producer_paused(&self) -> bool;

    async fn set_preferred_layers(&self, layers: ConsumerLayers) -> Result<(), MediaError>;

    /// Register a hook fired when the upstream producer closes.
    fn on_producer_close(&self, hook: CloseHook);

    /// Register a hook fired when the owning transport closes.
    fn on_transport_close(&self, hook: CloseHook);

    fn close(&self);
}
