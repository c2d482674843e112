//! Gateway and client fixtures for MG testing.
//!
//! Provides:
//! - `TestGateway`: a running gateway over mock or in-process workers
//! - `TestClient`: one signaling connection with typed request helpers and
//!   a recorder for pushed events
//! - Canned client parameters (capabilities, DTLS, RTP)

use common::types::{ConnectionId, ConnectionMetadata};
use media_engine::{
    DtlsParameters, LocalWorker, LocalWorkerSettings, MediaKind, MediaWorker, RtpCapabilities,
    RtpParameters, TransportParams,
};
use meeting_gateway::actors::messages::{
    ClientRequest, ConnectTransportRequest, ConsumeRequest, ConsumerParams, CloseProducerRequest,
    CreateTransportRequest, MeetingRef, MemberInfo, MemberRef, PendingMemberInfo, ProduceRequest,
    ProducerEntry,
};
use meeting_gateway::actors::{
    ActorMetrics, ConnectionActorHandle, GatewayActorHandle, Response, ServerEvent,
};
use meeting_gateway::config::MediaSettings;
use meeting_gateway::errors::GatewayError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::mock_engine::MockWorker;

/// How long event and routing helpers wait before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Device capabilities able to receive the default Opus and VP8 codecs.
#[must_use]
pub fn rtp_capabilities() -> RtpCapabilities {
    RtpCapabilities(json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ],
        "headerExtensions": []
    }))
}

/// Device capabilities that can receive audio only.
#[must_use]
pub fn audio_only_capabilities() -> RtpCapabilities {
    RtpCapabilities(json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 }
        ]
    }))
}

#[must_use]
pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters(json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD:EF" }]
    }))
}

/// Single-encoding RTP parameters for `kind`.
#[must_use]
pub fn rtp_parameters(kind: MediaKind) -> RtpParameters {
    let (mime_type, clock_rate) = match kind {
        MediaKind::Audio => ("audio/opus", 48_000),
        MediaKind::Video => ("video/VP8", 90_000),
    };
    RtpParameters(json!({
        "codecs": [{ "mimeType": mime_type, "payloadType": 101, "clockRate": clock_rate }],
        "encodings": [{ "ssrc": 1111 }]
    }))
}

/// Three-layer simulcast video parameters.
#[must_use]
pub fn simulcast_parameters() -> RtpParameters {
    RtpParameters(json!({
        "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }],
        "encodings": [
            { "rid": "r0", "maxBitrate": 100_000 },
            { "rid": "r1", "maxBitrate": 300_000 },
            { "rid": "r2", "maxBitrate": 900_000 }
        ]
    }))
}

/// Random meeting id, unique per test.
#[must_use]
pub fn random_meeting_id() -> String {
    format!("meeting-{}", Uuid::new_v4())
}

/// A running gateway for tests.
#[derive(Debug, Clone)]
pub struct TestGateway {
    pub handle: GatewayActorHandle,
}

impl TestGateway {
    /// Gateway over two fault-free in-process workers.
    ///
    /// # Panics
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_workers(LocalWorker::pool(2, &LocalWorkerSettings::default()))
    }

    /// Gateway over a single mock worker.
    #[must_use]
    pub fn with_worker(worker: Arc<MockWorker>) -> Self {
        Self::with_workers(vec![worker as Arc<dyn MediaWorker>])
    }

    #[must_use]
    pub fn with_workers(workers: Vec<Arc<dyn MediaWorker>>) -> Self {
        Self::with_settings(workers, MediaSettings::default())
    }

    #[must_use]
    pub fn with_settings(workers: Vec<Arc<dyn MediaWorker>>, settings: MediaSettings) -> Self {
        let handle = GatewayActorHandle::new(
            "mg-test".to_string(),
            workers,
            Arc::new(settings),
            ActorMetrics::new(),
        )
        .expect("test gateway needs at least one worker");
        Self { handle }
    }

    /// Connect a host.
    #[must_use]
    pub fn host(&self, name: &str) -> TestClient {
        self.connect(ConnectionMetadata::host(name))
    }

    /// Connect a guest.
    #[must_use]
    pub fn guest(&self, name: &str) -> TestClient {
        self.connect(ConnectionMetadata::guest(name))
    }

    /// Connect with explicit metadata.
    #[must_use]
    pub fn connect(&self, metadata: ConnectionMetadata) -> TestClient {
        let name = metadata.name.clone();
        let (handle, events) = self
            .handle
            .connect(metadata)
            .expect("gateway is accepting connections");
        TestClient {
            name,
            handle,
            events,
        }
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// One signaling connection plus the events pushed to it.
#[derive(Debug)]
pub struct TestClient {
    pub name: String,
    pub handle: ConnectionActorHandle,
    events: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    pub async fn request(&self, request: ClientRequest) -> Result<Response, GatewayError> {
        self.handle.request(request).await
    }

    pub async fn create_meeting(&self, meeting_id: &str) -> Result<Response, GatewayError> {
        self.request(ClientRequest::CreateMeeting(MeetingRef {
            meeting_id: meeting_id.to_string(),
        }))
        .await
    }

    pub async fn join(&self, meeting_id: &str) -> Result<Response, GatewayError> {
        self.request(ClientRequest::JoinMeeting(MeetingRef {
            meeting_id: meeting_id.to_string(),
        }))
        .await
    }

    /// Create `meeting_id` and join it. Host only.
    pub async fn create_and_join(&self, meeting_id: &str) {
        self.create_meeting(meeting_id)
            .await
            .expect("create meeting");
        self.join(meeting_id).await.expect("join meeting");
    }

    pub async fn accept(&self, target: ConnectionId) -> Result<Response, GatewayError> {
        self.request(ClientRequest::AcceptPendingMember(MemberRef {
            connection_id: target,
        }))
        .await
    }

    pub async fn reject(&self, target: ConnectionId) -> Result<Response, GatewayError> {
        self.request(ClientRequest::RejectPendingMember(MemberRef {
            connection_id: target,
        }))
        .await
    }

    pub async fn evict(&self, target: ConnectionId) -> Result<Response, GatewayError> {
        self.request(ClientRequest::EvictMember(MemberRef {
            connection_id: target,
        }))
        .await
    }

    pub async fn leave(&self) -> Result<Response, GatewayError> {
        self.request(ClientRequest::LeaveMeeting).await
    }

    pub async fn room_members(&self) -> Result<Vec<MemberInfo>, GatewayError> {
        match self.request(ClientRequest::ListRoomMembers).await? {
            Response::Members(members) => Ok(members),
            other => panic!("unexpected response to listRoomMembers: {other:?}"),
        }
    }

    pub async fn pending_members(&self) -> Result<Vec<PendingMemberInfo>, GatewayError> {
        match self.request(ClientRequest::ListPendingMembers).await? {
            Response::PendingMembers(members) => Ok(members),
            other => panic!("unexpected response to listPendingMembers: {other:?}"),
        }
    }

    pub async fn routing_capabilities(&self) -> Result<RtpCapabilities, GatewayError> {
        match self.request(ClientRequest::GetRoutingCapabilities).await? {
            Response::RoutingCapabilities(caps) => Ok(caps),
            other => panic!("unexpected response to getRoutingCapabilities: {other:?}"),
        }
    }

    /// Poll the routing capabilities until the routing context is allocated.
    pub async fn wait_for_routing(&self) -> RtpCapabilities {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match self.routing_capabilities().await {
                    Ok(caps) => return caps,
                    Err(GatewayError::RoutingNotReady) => {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Err(e) => panic!("routing context failed: {e}"),
                }
            }
        })
        .await
        .expect("routing context ready in time")
    }

    pub async fn list_producers(&self) -> Result<Vec<ProducerEntry>, GatewayError> {
        match self.request(ClientRequest::ListProducers).await? {
            Response::Producers(producers) => Ok(producers),
            other => panic!("unexpected response to listProducers: {other:?}"),
        }
    }

    pub async fn create_transport(&self) -> Result<TransportParams, GatewayError> {
        match self
            .request(ClientRequest::CreateTransport(
                CreateTransportRequest::default(),
            ))
            .await?
        {
            Response::Transport(params) => Ok(params),
            other => panic!("unexpected response to createTransport: {other:?}"),
        }
    }

    pub async fn connect_transport(&self, transport_id: &str) -> Result<Response, GatewayError> {
        self.request(ClientRequest::ConnectTransport(ConnectTransportRequest {
            transport_id: transport_id.to_string(),
            dtls_parameters: dtls_parameters(),
        }))
        .await
    }

    /// Publish `kind` on `transport_id`; returns the producer id.
    pub async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
    ) -> Result<String, GatewayError> {
        self.produce_with(transport_id, kind, rtp_parameters(kind), false)
            .await
    }

    pub async fn produce_with(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        is_screen_share: bool,
    ) -> Result<String, GatewayError> {
        match self
            .request(ClientRequest::Produce(ProduceRequest {
                transport_id: transport_id.to_string(),
                kind,
                rtp_parameters,
                is_screen_share,
            }))
            .await?
        {
            Response::Produced(produced) => Ok(produced.producer_id),
            other => panic!("unexpected response to produce: {other:?}"),
        }
    }

    /// Transport ready for use: created and connected.
    pub async fn connected_transport(&self) -> String {
        let params = self.create_transport().await.expect("create transport");
        self.connect_transport(&params.id)
            .await
            .expect("connect transport");
        params.id
    }

    pub async fn close_producer(&self, producer_id: &str) -> Result<Response, GatewayError> {
        self.request(ClientRequest::CloseProducer(CloseProducerRequest {
            producer_id: producer_id.to_string(),
        }))
        .await
    }

    pub async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
    ) -> Result<ConsumerParams, GatewayError> {
        self.consume_with(transport_id, producer_id, rtp_capabilities())
            .await
    }

    pub async fn consume_with(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerParams, GatewayError> {
        match self
            .request(ClientRequest::Consume(ConsumeRequest {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
                rtp_capabilities,
            }))
            .await?
        {
            Response::Consumer(params) => Ok(params),
            other => panic!("unexpected response to consume: {other:?}"),
        }
    }

    /// Drop the connection, as a closed socket would.
    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    /// Next pushed event, failing the test after [`EVENT_TIMEOUT`].
    pub async fn next_event(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .unwrap_or_else(|_| panic!("{}: no event within {EVENT_TIMEOUT:?}", self.name))
            .unwrap_or_else(|| panic!("{}: event stream ended", self.name))
    }

    /// Next pushed event, if one arrives within `wait`.
    pub async fn try_next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(wait, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert nothing is pushed for a short while.
    pub async fn assert_no_event(&mut self) {
        if let Some(event) = self.try_next_event(Duration::from_millis(50)).await {
            panic!("{}: unexpected event {event:?}", self.name);
        }
    }

    /// Every event already queued, without waiting.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Wait for the event stream to end, discarding anything still queued.
    ///
    /// Returns `false` if it is still open after [`EVENT_TIMEOUT`].
    pub async fn wait_for_event_stream_end(&mut self) -> bool {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while self.events.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }
}
