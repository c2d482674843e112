//! Message types for actor communication and the signaling payloads they carry.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.
//!
//! Payload structs use the camelCase field names of the signaling wire format.

use crate::errors::GatewayError;

use super::connection::EventSender;
use super::meeting::MeetingActorHandle;

use common::types::{ConnectionId, ConnectionMetadata, MeetingId};
use media_engine::{
    ConsumerType, DtlsParameters, MediaError, MediaKind, Router, RtpCapabilities, RtpParameters,
    TransportParams,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Messages sent to `GatewayActor`.
#[derive(Debug)]
pub enum GatewayMessage {
    /// Register a Session and its Pending Pool for a meeting id.
    CreateMeeting {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },

    /// Look up the actor owning a meeting.
    GetMeeting {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<MeetingActorHandle, GatewayError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<GatewayStatus>,
    },

    /// Stop accepting meetings and cancel every actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },
}

/// Messages sent to `MeetingActor`.
///
/// `connection_id` is always the calling connection; authorization by role
/// happens in the connection actor before the message is sent.
#[derive(Debug)]
pub enum MeetingMessage {
    Join {
        connection_id: ConnectionId,
        metadata: ConnectionMetadata,
        events: EventSender,
        respond_to: oneshot::Sender<Result<Placement, GatewayError>>,
    },

    ListRoomMembers {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<Vec<MemberInfo>, GatewayError>>,
    },

    ListPendingMembers {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<Vec<PendingMemberInfo>, GatewayError>>,
    },

    AcceptPendingMember {
        connection_id: ConnectionId,
        target: ConnectionId,
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },

    RejectPendingMember {
        connection_id: ConnectionId,
        target: ConnectionId,
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },

    EvictMember {
        connection_id: ConnectionId,
        target: ConnectionId,
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },

    /// Explicit leave; the caller tears the connection down afterwards.
    Leave {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },

    /// The connection went away. Same cleanup as `Leave`, nobody to reply to.
    Disconnect { connection_id: ConnectionId },

    GetRoutingCapabilities {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<RtpCapabilities, GatewayError>>,
    },

    ListProducers {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<Vec<ProducerEntry>, GatewayError>>,
    },

    CreateTransport {
        connection_id: ConnectionId,
        force_tcp: bool,
        respond_to: oneshot::Sender<Result<TransportParams, GatewayError>>,
    },

    ConnectTransport {
        connection_id: ConnectionId,
        transport_id: String,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), GatewayError>>,
    },

    Produce {
        connection_id: ConnectionId,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        is_screen_share: bool,
        respond_to: oneshot::Sender<Result<String, GatewayError>>,
    },

    /// Fire-and-forget; unknown producers are ignored.
    CloseProducer {
        connection_id: ConnectionId,
        producer_id: String,
    },

    Consume {
        connection_id: ConnectionId,
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
        respond_to: oneshot::Sender<Result<ConsumerParams, GatewayError>>,
    },

    GetState {
        respond_to: oneshot::Sender<MeetingState>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// A signaling request from the client, answered in arrival order.
    Request {
        request: ClientRequest,
        respond_to: oneshot::Sender<Result<Response, GatewayError>>,
    },
}

/// Notifications from the Media Engine, delivered into the meeting loop.
pub enum EngineEvent {
    /// The routing context allocation finished.
    RouterReady(Result<Box<dyn Router>, MediaError>),

    TransportClosed {
        connection_id: ConnectionId,
        transport_id: String,
    },

    /// A producer was closed because its transport closed.
    ProducerTransportClosed {
        connection_id: ConnectionId,
        producer_id: String,
    },

    /// A consumer was closed because the producer it forwards closed.
    ConsumerProducerClosed {
        connection_id: ConnectionId,
        consumer_id: String,
    },

    /// A consumer was closed because its transport closed.
    ConsumerTransportClosed {
        connection_id: ConnectionId,
        consumer_id: String,
    },
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::RouterReady(Ok(router)) => {
                f.debug_tuple("RouterReady").field(&router.id()).finish()
            }
            EngineEvent::RouterReady(Err(e)) => f.debug_tuple("RouterReady").field(e).finish(),
            EngineEvent::TransportClosed {
                connection_id,
                transport_id,
            } => f
                .debug_struct("TransportClosed")
                .field("connection_id", connection_id)
                .field("transport_id", transport_id)
                .finish(),
            EngineEvent::ProducerTransportClosed {
                connection_id,
                producer_id,
            } => f
                .debug_struct("ProducerTransportClosed")
                .field("connection_id", connection_id)
                .field("producer_id", producer_id)
                .finish(),
            EngineEvent::ConsumerProducerClosed {
                connection_id,
                consumer_id,
            } => f
                .debug_struct("ConsumerProducerClosed")
                .field("connection_id", connection_id)
                .field("consumer_id", consumer_id)
                .finish(),
            EngineEvent::ConsumerTransportClosed {
                connection_id,
                consumer_id,
            } => f
                .debug_struct("ConsumerTransportClosed")
                .field("connection_id", connection_id)
                .field("consumer_id", consumer_id)
                .finish(),
        }
    }
}

// ----------------------------------------------------------------------------
// Client requests
// ----------------------------------------------------------------------------

/// A decoded signaling request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    CreateMeeting(MeetingRef),
    JoinMeeting(MeetingRef),
    ListRoomMembers,
    ListPendingMembers,
    AcceptPendingMember(MemberRef),
    RejectPendingMember(MemberRef),
    EvictMember(MemberRef),
    LeaveMeeting,
    GetRoutingCapabilities,
    ListProducers,
    CreateTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    CloseProducer(CloseProducerRequest),
    Consume(ConsumeRequest),
}

impl ClientRequest {
    /// Wire event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientRequest::CreateMeeting(_) => "createMeeting",
            ClientRequest::JoinMeeting(_) => "joinMeeting",
            ClientRequest::ListRoomMembers => "listRoomMembers",
            ClientRequest::ListPendingMembers => "listPendingMembers",
            ClientRequest::AcceptPendingMember(_) => "acceptPendingMember",
            ClientRequest::RejectPendingMember(_) => "rejectPendingMember",
            ClientRequest::EvictMember(_) => "evictMember",
            ClientRequest::LeaveMeeting => "leaveMeeting",
            ClientRequest::GetRoutingCapabilities => "getRoutingCapabilities",
            ClientRequest::ListProducers => "listProducers",
            ClientRequest::CreateTransport(_) => "createTransport",
            ClientRequest::ConnectTransport(_) => "connectTransport",
            ClientRequest::Produce(_) => "produce",
            ClientRequest::CloseProducer(_) => "closeProducer",
            ClientRequest::Consume(_) => "consume",
        }
    }

    /// Whether the request is only allowed for host connections.
    #[must_use]
    pub const fn requires_host(&self) -> bool {
        matches!(
            self,
            ClientRequest::CreateMeeting(_)
                | ClientRequest::ListPendingMembers
                | ClientRequest::AcceptPendingMember(_)
                | ClientRequest::RejectPendingMember(_)
                | ClientRequest::EvictMember(_)
        )
    }
}

/// Raw meeting id as sent by the client; normalized by the connection actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRef {
    pub meeting_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRef {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    #[serde(default)]
    pub force_tcp: bool,
    /// Device capabilities; accepted for compatibility, not needed to build
    /// the transport.
    #[serde(default)]
    pub rtp_capabilities: Option<RtpCapabilities>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(default)]
    pub is_screen_share: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerRequest {
    pub producer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub transport_id: String,
    pub producer_id: String,
    pub rtp_capabilities: RtpCapabilities,
}

// ----------------------------------------------------------------------------
// Responses and pushes
// ----------------------------------------------------------------------------

/// Successful outcome of a client request (the `res` field of a reply).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack(String),
    Members(Vec<MemberInfo>),
    PendingMembers(Vec<PendingMemberInfo>),
    RoutingCapabilities(RtpCapabilities),
    Producers(Vec<ProducerEntry>),
    Transport(TransportParams),
    Produced(ProducedInfo),
    Consumer(ConsumerParams),
    /// Fire-and-forget request; nothing is sent back.
    NoReply,
}

impl Response {
    pub fn ack(message: impl Into<String>) -> Self {
        Response::Ack(message.into())
    }
}

/// A Session member as listed to other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: ConnectionId,
    pub name: String,
    pub is_host: bool,
}

/// A Pending Pool member as listed to hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMemberInfo {
    pub id: ConnectionId,
    pub name: String,
}

/// One entry of the producer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerEntry {
    pub producer_id: String,
    /// Owning connection.
    pub user_id: ConnectionId,
    pub is_screen_share: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducedInfo {
    pub producer_id: String,
}

/// Parameters the client needs to receive a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    pub producer_paused: bool,
}

/// `{message}` push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `{message, user}` push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberNotice {
    pub message: String,
    pub user: MemberInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerClosedNotice {
    pub producer_id: String,
    pub user_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerClosedNotice {
    pub consumer_id: String,
}

/// Server-initiated push to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    UserJoined(MemberNotice),
    UserJoinedWaitingArea(MemberNotice),
    UserLeft(MemberNotice),
    UserLeftWaitingArea(MemberNotice),
    MemberAccepted(Notice),
    MemberRejected(Notice),
    MemberEvicted(Notice),
    NewProducers(Vec<ProducerEntry>),
    ProducerClosed(ProducerClosedNotice),
    ConsumerClosed(ConsumerClosedNotice),
}

impl ServerEvent {
    /// Wire event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserJoined(_) => "userJoined",
            ServerEvent::UserJoinedWaitingArea(_) => "userJoinedWaitingArea",
            ServerEvent::UserLeft(_) => "userLeft",
            ServerEvent::UserLeftWaitingArea(_) => "userLeftWaitingArea",
            ServerEvent::MemberAccepted(_) => "memberAccepted",
            ServerEvent::MemberRejected(_) => "memberRejected",
            ServerEvent::MemberEvicted(_) => "memberEvicted",
            ServerEvent::NewProducers(_) => "newProducers",
            ServerEvent::ProducerClosed(_) => "producerClosed",
            ServerEvent::ConsumerClosed(_) => "consumerClosed",
        }
    }
}

// ----------------------------------------------------------------------------
// Status types
// ----------------------------------------------------------------------------

/// Where a join placed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Session,
    PendingPool,
}

impl Placement {
    /// Acknowledgement sent to the joining client.
    #[must_use]
    pub const fn ack_message(&self) -> &'static str {
        match self {
            Placement::Session => "Room Joined Successfully",
            Placement::PendingPool => "Waiting Room Joined Successfully",
        }
    }
}

/// Routing context readiness, as reported in [`MeetingState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStatus {
    Pending,
    Ready,
    Failed,
}

/// Snapshot of one meeting (diagnostics and tests).
#[derive(Debug, Clone)]
pub struct MeetingState {
    pub meeting_id: String,
    pub session_members: Vec<MemberInfo>,
    pub pending_members: Vec<PendingMemberInfo>,
    pub routing: RoutingStatus,
    pub producer_count: usize,
    pub consumer_count: usize,
}

/// Gateway status (health checks).
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub meeting_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
