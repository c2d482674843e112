//! In-process Media Engine.
//!
//! `LocalWorker` implements the full Media Engine contract (object creation,
//! parameter validation, capability checks and close cascades) without opening
//! sockets or forwarding packets. Each router keeps its objects in one shared
//! table guarded by a `parking_lot::Mutex`; close hooks are collected while the
//! table is locked and fired after the lock is released.

use crate::engine::{CloseHook, Consumer, MediaWorker, Producer, Router, Transport};
use crate::error::MediaError;
use crate::types::{
    ConsumerLayers, ConsumerType, DtlsParameters, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpParameters, TransportParams, WebRtcTransportOptions,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Default first port handed out in ICE candidates.
pub const DEFAULT_RTC_MIN_PORT: u16 = 10_000;

/// Default last port handed out in ICE candidates.
pub const DEFAULT_RTC_MAX_PORT: u16 = 10_200;

/// Settings for a [`LocalWorker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWorkerSettings {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for LocalWorkerSettings {
    fn default() -> Self {
        Self {
            rtc_min_port: DEFAULT_RTC_MIN_PORT,
            rtc_max_port: DEFAULT_RTC_MAX_PORT,
        }
    }
}

/// Rotating port assignment within the configured range.
#[derive(Debug, Clone)]
struct PortRange {
    min: u16,
    max: u16,
    next: Arc<AtomicU32>,
}

impl PortRange {
    fn new(settings: &LocalWorkerSettings) -> Self {
        let (min, max) = if settings.rtc_min_port <= settings.rtc_max_port {
            (settings.rtc_min_port, settings.rtc_max_port)
        } else {
            (settings.rtc_max_port, settings.rtc_min_port)
        };
        Self {
            min,
            max,
            next: Arc::new(AtomicU32::new(0)),
        }
    }

    fn next_port(&self) -> u16 {
        let span = u32::from(self.max - self.min) + 1;
        let offset = self.next.fetch_add(1, Ordering::Relaxed) % span;
        self.min
            .saturating_add(u16::try_from(offset).unwrap_or_default())
    }
}

/// In-process media worker.
#[derive(Debug)]
pub struct LocalWorker {
    id: String,
    ports: PortRange,
}

impl LocalWorker {
    #[must_use]
    pub fn new(id: impl Into<String>, settings: &LocalWorkerSettings) -> Self {
        Self {
            id: id.into(),
            ports: PortRange::new(settings),
        }
    }

    /// Build a pool of `count` workers sharing the same settings.
    #[must_use]
    pub fn pool(count: usize, settings: &LocalWorkerSettings) -> Vec<Arc<dyn MediaWorker>> {
        (0..count)
            .map(|i| Arc::new(Self::new(format!("local-worker-{i}"), settings)) as Arc<dyn MediaWorker>)
            .collect()
    }
}

#[async_trait]
impl MediaWorker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<Box<dyn Router>, MediaError> {
        if media_codecs.is_empty() {
            return Err(MediaError::InvalidParameters(
                "router requires at least one codec".to_string(),
            ));
        }

        let router = LocalRouter::new(media_codecs.to_vec(), self.ports.clone());
        debug!(
            target: "mg.media.local",
            worker_id = %self.id,
            router_id = %router.id,
            "Router created"
        );
        Ok(Box::new(router))
    }
}

// ----------------------------------------------------------------------------
// Object table
// ----------------------------------------------------------------------------

struct TransportSlot {
    connected: bool,
    max_incoming_bitrate: Option<u32>,
    producers: Vec<String>,
    consumers: Vec<String>,
    close_hooks: Vec<CloseHook>,
}

struct ProducerSlot {
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    transport_id: String,
    consumers: Vec<String>,
    transport_close_hooks: Vec<CloseHook>,
}

struct ConsumerSlot {
    producer_id: String,
    transport_id: String,
    producer_close_hooks: Vec<CloseHook>,
    transport_close_hooks: Vec<CloseHook>,
}

#[derive(Default)]
struct RouterTable {
    transports: HashMap<String, TransportSlot>,
    producers: HashMap<String, ProducerSlot>,
    consumers: HashMap<String, ConsumerSlot>,
}

impl RouterTable {
    /// Remove a consumer closed by its owner. No hooks fire.
    fn close_consumer(&mut self, consumer_id: &str) {
        if let Some(slot) = self.consumers.remove(consumer_id) {
            if let Some(producer) = self.producers.get_mut(&slot.producer_id) {
                producer.consumers.retain(|id| id != consumer_id);
            }
            if let Some(transport) = self.transports.get_mut(&slot.transport_id) {
                transport.consumers.retain(|id| id != consumer_id);
            }
        }
    }

    /// Remove a producer; its consumers observe a producer-close.
    fn close_producer(&mut self, producer_id: &str, fired: &mut Vec<CloseHook>) {
        let Some(slot) = self.producers.remove(producer_id) else {
            return;
        };
        if let Some(transport) = self.transports.get_mut(&slot.transport_id) {
            transport.producers.retain(|id| id != producer_id);
        }
        for consumer_id in slot.consumers {
            if let Some(consumer) = self.consumers.remove(&consumer_id) {
                if let Some(transport) = self.transports.get_mut(&consumer.transport_id) {
                    transport.consumers.retain(|id| *id != consumer_id);
                }
                fired.extend(consumer.producer_close_hooks);
            }
        }
    }

    /// Remove a transport and everything created on it.
    fn close_transport(&mut self, transport_id: &str, fired: &mut Vec<CloseHook>) {
        let Some(slot) = self.transports.remove(transport_id) else {
            return;
        };

        for producer_id in &slot.producers {
            if let Some(producer) = self.producers.get_mut(producer_id) {
                fired.extend(producer.transport_close_hooks.drain(..));
            }
            self.close_producer(producer_id, fired);
        }

        for consumer_id in &slot.consumers {
            if let Some(consumer) = self.consumers.remove(consumer_id) {
                if let Some(producer) = self.producers.get_mut(&consumer.producer_id) {
                    producer.consumers.retain(|id| id != consumer_id);
                }
                fired.extend(consumer.transport_close_hooks);
            }
        }

        fired.extend(slot.close_hooks);
    }
}

fn fire(hooks: Vec<CloseHook>) {
    for hook in hooks {
        hook();
    }
}

/// Whether `capabilities` contain a codec of `kind` that the router also routes.
fn capabilities_match(
    codecs: &[RtpCodecCapability],
    kind: MediaKind,
    capabilities: &RtpCapabilities,
) -> bool {
    let Some(remote) = capabilities.0.get("codecs").and_then(Value::as_array) else {
        return false;
    };
    remote.iter().any(|codec| {
        let same_kind = codec.get("kind").and_then(Value::as_str) == Some(kind.as_str());
        let mime = codec.get("mimeType").and_then(Value::as_str).unwrap_or_default();
        same_kind
            && codecs
                .iter()
                .any(|local| local.kind == kind && local.mime_type.eq_ignore_ascii_case(mime))
    })
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

struct LocalRouter {
    id: String,
    codecs: Arc<Vec<RtpCodecCapability>>,
    table: Arc<Mutex<RouterTable>>,
    ports: PortRange,
}

impl LocalRouter {
    fn new(codecs: Vec<RtpCodecCapability>, ports: PortRange) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            codecs: Arc::new(codecs),
            table: Arc::new(Mutex::new(RouterTable::default())),
            ports,
        }
    }
}

#[async_trait]
impl Router for LocalRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        let codecs: Vec<Value> = self
            .codecs
            .iter()
            .zip(100u32..)
            .map(|(codec, payload_type)| {
                let mut value = serde_json::to_value(codec).unwrap_or(Value::Null);
                if let Some(object) = value.as_object_mut() {
                    object.insert("preferredPayloadType".to_string(), json!(payload_type));
                }
                value
            })
            .collect();
        RtpCapabilities(json!({ "codecs": codecs, "headerExtensions": [] }))
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let kind = match self.table.lock().producers.get(producer_id) {
            Some(producer) => producer.kind,
            None => return false,
        };
        capabilities_match(&self.codecs, kind, rtp_capabilities)
    }

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Box<dyn Transport>, MediaError> {
        if !options.enable_udp && !options.enable_tcp {
            return Err(MediaError::InvalidParameters(
                "at least one of UDP or TCP must be enabled".to_string(),
            ));
        }
        if options.listen_ips.is_empty() {
            return Err(MediaError::InvalidParameters(
                "at least one listen ip is required".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let mut candidates = Vec::new();
        for listen_ip in &options.listen_ips {
            let address = listen_ip.announced_ip.as_ref().unwrap_or(&listen_ip.ip);
            let port = self.ports.next_port();
            let (udp_priority, tcp_priority) = if options.prefer_udp {
                (1_076_302_079_u32, 1_076_276_479_u32)
            } else {
                (1_076_276_479, 1_076_302_079)
            };
            if options.enable_udp {
                candidates.push(json!({
                    "foundation": "udpcandidate",
                    "priority": udp_priority,
                    "ip": address,
                    "port": port,
                    "protocol": "udp",
                    "type": "host",
                }));
            }
            if options.enable_tcp {
                candidates.push(json!({
                    "foundation": "tcpcandidate",
                    "priority": tcp_priority,
                    "ip": address,
                    "port": port,
                    "protocol": "tcp",
                    "type": "host",
                    "tcpType": "passive",
                }));
            }
        }

        let params = TransportParams {
            id: id.clone(),
            ice_parameters: json!({
                "usernameFragment": Uuid::new_v4().simple().to_string(),
                "password": Uuid::new_v4().simple().to_string(),
                "iceLite": true,
            }),
            ice_candidates: Value::Array(candidates),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": Uuid::new_v4().simple().to_string(),
                }],
            }),
        };

        self.table.lock().transports.insert(
            id.clone(),
            TransportSlot {
                connected: false,
                max_incoming_bitrate: None,
                producers: Vec::new(),
                consumers: Vec::new(),
                close_hooks: Vec::new(),
            },
        );

        Ok(Box::new(LocalTransport {
            id,
            params,
            codecs: Arc::clone(&self.codecs),
            table: Arc::clone(&self.table),
        }))
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

struct LocalTransport {
    id: String,
    params: TransportParams,
    codecs: Arc<Vec<RtpCodecCapability>>,
    table: Arc<Mutex<RouterTable>>,
}

impl LocalTransport {
    fn closed_error() -> MediaError {
        MediaError::Closed("Transport".to_string())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn params(&self) -> TransportParams {
        self.params.clone()
    }

    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), MediaError> {
        let mut table = self.table.lock();
        let slot = table
            .transports
            .get_mut(&self.id)
            .ok_or_else(Self::closed_error)?;
        slot.max_incoming_bitrate = Some(bitrate);
        Ok(())
    }

    async fn connect(&self, dtls_parameters: &DtlsParameters) -> Result<(), MediaError> {
        let has_fingerprint = dtls_parameters
            .0
            .get("fingerprints")
            .and_then(Value::as_array)
            .is_some_and(|fingerprints| !fingerprints.is_empty());
        if !has_fingerprint {
            return Err(MediaError::InvalidParameters(
                "dtlsParameters must carry at least one fingerprint".to_string(),
            ));
        }

        let mut table = self.table.lock();
        let slot = table
            .transports
            .get_mut(&self.id)
            .ok_or_else(Self::closed_error)?;
        if slot.connected {
            return Err(MediaError::InvalidParameters(
                "transport already connected".to_string(),
            ));
        }
        slot.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<Box<dyn Producer>, MediaError> {
        if !self.codecs.iter().any(|codec| codec.kind == kind) {
            return Err(MediaError::UnsupportedKind(kind));
        }
        if !rtp_parameters.0.is_object() {
            return Err(MediaError::InvalidParameters(
                "rtpParameters must be an object".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        {
            let mut table = self.table.lock();
            let transport = table
                .transports
                .get_mut(&self.id)
                .ok_or_else(Self::closed_error)?;
            transport.producers.push(id.clone());
            table.producers.insert(
                id.clone(),
                ProducerSlot {
                    kind,
                    rtp_parameters: rtp_parameters.clone(),
                    transport_id: self.id.clone(),
                    consumers: Vec::new(),
                    transport_close_hooks: Vec::new(),
                },
            );
        }

        Ok(Box::new(LocalProducer {
            id,
            kind,
            table: Arc::clone(&self.table),
        }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Box<dyn Consumer>, MediaError> {
        let id = Uuid::new_v4().to_string();
        let mut table = self.table.lock();

        if !table.transports.contains_key(&self.id) {
            return Err(Self::closed_error());
        }
        let producer = table
            .producers
            .get_mut(producer_id)
            .ok_or_else(|| MediaError::NotFound(format!("producer {producer_id}")))?;
        if !capabilities_match(&self.codecs, producer.kind, rtp_capabilities) {
            return Err(MediaError::CannotConsume {
                producer_id: producer_id.to_string(),
            });
        }

        let layered = producer
            .rtp_parameters
            .0
            .get("encodings")
            .and_then(Value::as_array)
            .is_some_and(|encodings| encodings.len() > 1);
        let consumer_type = if layered {
            ConsumerType::Simulcast
        } else {
            ConsumerType::Simple
        };
        let kind = producer.kind;
        let rtp_parameters = producer.rtp_parameters.clone();
        producer.consumers.push(id.clone());

        if let Some(transport) = table.transports.get_mut(&self.id) {
            transport.consumers.push(id.clone());
        }
        table.consumers.insert(
            id.clone(),
            ConsumerSlot {
                producer_id: producer_id.to_string(),
                transport_id: self.id.clone(),
                producer_close_hooks: Vec::new(),
                transport_close_hooks: Vec::new(),
            },
        );

        Ok(Box::new(LocalConsumer {
            id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters,
            consumer_type,
            paused,
            table: Arc::clone(&self.table),
        }))
    }

    fn on_close(&self, hook: CloseHook) {
        let already_closed = {
            let mut table = self.table.lock();
            match table.transports.get_mut(&self.id) {
                Some(slot) => {
                    slot.close_hooks.push(hook);
                    None
                }
                None => Some(hook),
            }
        };
        if let Some(hook) = already_closed {
            hook();
        }
    }

    fn close(&self) {
        let mut fired = Vec::new();
        self.table.lock().close_transport(&self.id, &mut fired);
        fire(fired);
    }
}

// ----------------------------------------------------------------------------
// Producer / Consumer
// ----------------------------------------------------------------------------

struct LocalProducer {
    id: String,
    kind: MediaKind,
    table: Arc<Mutex<RouterTable>>,
}

impl Producer for LocalProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn on_transport_close(&self, hook: CloseHook) {
        if let Some(slot) = self.table.lock().producers.get_mut(&self.id) {
            slot.transport_close_hooks.push(hook);
        }
    }

    fn close(&self) {
        let mut fired = Vec::new();
        self.table.lock().close_producer(&self.id, &mut fired);
        fire(fired);
    }
}

struct LocalConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    consumer_type: ConsumerType,
    paused: bool,
    table: Arc<Mutex<RouterTable>>,
}

#[async_trait]
impl Consumer for LocalConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn consumer_type(&self) -> ConsumerType {
        self.consumer_type
    }

    fn producer_paused(&self) -> bool {
        self.paused
    }

    async fn set_preferred_layers(&self, _layers: ConsumerLayers) -> Result<(), MediaError> {
        if !self.table.lock().consumers.contains_key(&self.id) {
            return Err(MediaError::Closed("Consumer".to_string()));
        }
        if self.consumer_type == ConsumerType::Simple {
            return Err(MediaError::InvalidParameters(
                "layers apply to simulcast and SVC consumers only".to_string(),
            ));
        }
        Ok(())
    }

    fn on_producer_close(&self, hook: CloseHook) {
        if let Some(slot) = self.table.lock().consumers.get_mut(&self.id) {
            slot.producer_close_hooks.push(hook);
        }
    }

    fn on_transport_close(&self, hook: CloseHook) {
        if let Some(slot) = self.table.lock().consumers.get_mut(&self.id) {
            slot.transport_close_hooks.push(hook);
        }
    }

    fn close(&self) {
        self.table.lock().close_consumer(&self.id);
    }
}
