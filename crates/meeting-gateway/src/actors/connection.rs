//! `ConnectionActor` - per-signaling-connection actor.
//!
//! Each `ConnectionActor`:
//! - Holds the connection metadata fixed at connect time
//! - Serializes the connection's requests (answered in arrival order)
//! - Rejects host-only requests from guests before anything is forwarded
//! - Joins at most one meeting and forwards media and admission requests to it
//!
//! # Lifecycle
//!
//! 1. Spawned by the gateway when a client connects
//! 2. Runs until the client leaves, disconnects, or the gateway shuts down
//! 3. On exit, tells the joined meeting about the disconnect
//!
//! Pushes to the client do not pass through this actor's mailbox; they go
//! through the connection's [`EventSender`].

use crate::errors::GatewayError;
use crate::observability::metrics as prom;

use super::gateway::GatewayActorHandle;
use super::meeting::MeetingActorHandle;
use super::messages::{ClientRequest, ConnectionMessage, ProducedInfo, Response, ServerEvent};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ConnectionId, ConnectionMetadata, MeetingId};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Outbound push channel of one connection.
///
/// Pushes never block: a full channel drops the event.
#[derive(Clone, Debug)]
pub struct EventSender {
    connection_id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
}

impl EventSender {
    /// Create a push channel with the given capacity.
    #[must_use]
    pub fn channel(
        connection_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                connection_id,
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event for the client.
    pub fn push(&self, event: ServerEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    target: "mg.actor.connection",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Event dropped, client is not reading"
                );
                prom::record_event_dropped(event.name());
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    target: "mg.actor.connection",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Event for closed connection discarded"
                );
            }
        }
    }
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Submit a client request and wait for its outcome.
    pub async fn request(&self, request: ClientRequest) -> Result<Response, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionMessage::Request {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GatewayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Tear the connection down. The joined meeting is told about the
    /// disconnect; nothing is sent back.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }

    /// Wait until the connection has been torn down.
    pub async fn closed(&self) {
        self.cancel_token.cancelled().await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    metadata: ConnectionMetadata,
    receiver: mpsc::Receiver<ConnectionMessage>,
    gateway: GatewayActorHandle,
    /// Joined meeting, at most one per connection lifetime.
    meeting: Option<MeetingActorHandle>,
    has_joined: bool,
    events: EventSender,
    /// Cancellation token (child of the gateway's token).
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        metadata: ConnectionMetadata,
        gateway: GatewayActorHandle,
        events: EventSender,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        metrics.connection_created();

        let actor = Self {
            connection_id,
            metadata,
            receiver,
            gateway,
            meeting: None,
            has_joined: false,
            events,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "mg.actor.connection",
        fields(connection_id = %self.connection_id, is_host = self.metadata.role.is_host())
    )]
    async fn run(mut self) {
        debug!(
            target: "mg.actor.connection",
            connection_id = %self.connection_id,
            name = %self.metadata.name,
            is_host = self.metadata.role.is_host(),
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mg.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "mg.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.teardown().await;

        debug!(
            target: "mg.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a message. Returns true once the connection should close.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Request {
                request,
                respond_to,
            } => {
                let name = request.name();
                let is_leave = matches!(request, ClientRequest::LeaveMeeting);
                let started = std::time::Instant::now();

                let result = self.handle_request(request).await;

                let outcome = if result.is_ok() { "success" } else { "error" };
                prom::record_request_duration(name, outcome, started.elapsed());
                if let Err(ref e) = result {
                    debug!(
                        target: "mg.actor.connection",
                        connection_id = %self.connection_id,
                        request = name,
                        error = %e,
                        "Request failed"
                    );
                }

                // Leave ends a joined connection whatever the outcome; before
                // any join it is a plain NotInMeeting error.
                let left = is_leave && self.has_joined;
                let _ = respond_to.send(result);
                left
            }
        }
    }

    async fn handle_request(&mut self, request: ClientRequest) -> Result<Response, GatewayError> {
        if request.requires_host() && !self.metadata.role.is_host() {
            let message = match request {
                ClientRequest::CreateMeeting(_) => "You are not authorized to create a room",
                _ => "You are not authorized to manage members",
            };
            return Err(GatewayError::PermissionDenied(message.to_string()));
        }

        match request {
            ClientRequest::CreateMeeting(meeting) => {
                let meeting_id = parse_meeting_id(&meeting.meeting_id)?;
                self.gateway.create_meeting(meeting_id).await?;
                Ok(Response::ack("Room Created Successfully"))
            }

            ClientRequest::JoinMeeting(meeting) => {
                let meeting_id = parse_meeting_id(&meeting.meeting_id)?;
                self.join_meeting(meeting_id).await
            }

            ClientRequest::ListRoomMembers => {
                let members = self
                    .meeting()?
                    .list_room_members(self.connection_id)
                    .await?;
                Ok(Response::Members(members))
            }

            ClientRequest::ListPendingMembers => {
                let pending = self
                    .meeting()?
                    .list_pending_members(self.connection_id)
                    .await?;
                Ok(Response::PendingMembers(pending))
            }

            ClientRequest::AcceptPendingMember(member) => {
                self.meeting()?
                    .accept_pending_member(self.connection_id, member.connection_id)
                    .await?;
                Ok(Response::ack("User accepted successfully"))
            }

            ClientRequest::RejectPendingMember(member) => {
                self.meeting()?
                    .reject_pending_member(self.connection_id, member.connection_id)
                    .await?;
                Ok(Response::ack("User rejected successfully"))
            }

            ClientRequest::EvictMember(member) => {
                self.meeting()?
                    .evict_member(self.connection_id, member.connection_id)
                    .await?;
                Ok(Response::ack("User removed from room"))
            }

            ClientRequest::LeaveMeeting => {
                self.meeting()?.leave(self.connection_id).await?;
                self.meeting = None;
                Ok(Response::ack("Left room successfully"))
            }

            ClientRequest::GetRoutingCapabilities => {
                let capabilities = self
                    .meeting()?
                    .get_routing_capabilities(self.connection_id)
                    .await?;
                Ok(Response::RoutingCapabilities(capabilities))
            }

            ClientRequest::ListProducers => {
                let producers = self.meeting()?.list_producers(self.connection_id).await?;
                Ok(Response::Producers(producers))
            }

            ClientRequest::CreateTransport(options) => {
                let params = self
                    .meeting()?
                    .create_transport(self.connection_id, options.force_tcp)
                    .await?;
                Ok(Response::Transport(params))
            }

            ClientRequest::ConnectTransport(connect) => {
                self.meeting()?
                    .connect_transport(
                        self.connection_id,
                        connect.transport_id,
                        connect.dtls_parameters,
                    )
                    .await?;
                Ok(Response::ack("Transport connected"))
            }

            ClientRequest::Produce(produce) => {
                let producer_id = self
                    .meeting()?
                    .produce(
                        self.connection_id,
                        produce.transport_id,
                        produce.kind,
                        produce.rtp_parameters,
                        produce.is_screen_share,
                    )
                    .await?;
                Ok(Response::Produced(ProducedInfo { producer_id }))
            }

            ClientRequest::CloseProducer(close) => {
                self.meeting()?
                    .close_producer(self.connection_id, close.producer_id)
                    .await?;
                Ok(Response::NoReply)
            }

            ClientRequest::Consume(consume) => {
                let params = self
                    .meeting()?
                    .consume(
                        self.connection_id,
                        consume.transport_id,
                        consume.producer_id,
                        consume.rtp_capabilities,
                    )
                    .await?;
                Ok(Response::Consumer(params))
            }
        }
    }

    async fn join_meeting(&mut self, meeting_id: MeetingId) -> Result<Response, GatewayError> {
        if self.has_joined {
            return Err(GatewayError::Conflict(
                "You have already joined a meeting".to_string(),
            ));
        }

        let meeting = match self.gateway.get_meeting(meeting_id).await {
            Ok(meeting) => meeting,
            Err(GatewayError::MeetingNotFound(id)) if !self.metadata.role.is_host() => {
                return Err(GatewayError::WaitingAreaNotFound(id));
            }
            Err(e) => return Err(e),
        };

        let placement = meeting
            .join(
                self.connection_id,
                self.metadata.clone(),
                self.events.clone(),
            )
            .await?;

        info!(
            target: "mg.actor.connection",
            connection_id = %self.connection_id,
            meeting_id = %meeting.meeting_id(),
            placement = ?placement,
            "Connection joined meeting"
        );

        self.meeting = Some(meeting);
        self.has_joined = true;
        Ok(Response::ack(placement.ack_message()))
    }

    fn meeting(&self) -> Result<&MeetingActorHandle, GatewayError> {
        self.meeting
            .as_ref()
            .ok_or_else(|| GatewayError::NotInMeeting("You have not joined a meeting".to_string()))
    }

    /// Leave the joined meeting (if still joined) and release the connection.
    async fn teardown(&mut self) {
        if let Some(meeting) = self.meeting.take() {
            if let Err(e) = meeting.disconnect(self.connection_id).await {
                debug!(
                    target: "mg.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Meeting gone before disconnect"
                );
            }
        }
        self.cancel_token.cancel();
        self.metrics.connection_closed();
    }
}

fn parse_meeting_id(raw: &str) -> Result<MeetingId, GatewayError> {
    MeetingId::parse(raw).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::Notice;

    #[test]
    fn test_event_sender_drops_when_full() {
        let id = ConnectionId::new();
        let (events, mut rx) = EventSender::channel(id, 1);

        events.push(ServerEvent::MemberAccepted(Notice::new("first")));
        events.push(ServerEvent::MemberAccepted(Notice::new("second")));

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::MemberAccepted(Notice::new("first"))
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(events.connection_id(), id);
    }

    #[test]
    fn test_event_sender_ignores_closed_receiver() {
        let (events, rx) = EventSender::channel(ConnectionId::new(), 4);
        drop(rx);
        events.push(ServerEvent::MemberAccepted(Notice::new("late")));
    }

    #[test]
    fn test_blank_meeting_id_is_invalid() {
        assert!(matches!(
            parse_meeting_id("   "),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert_eq!(parse_meeting_id(" Room ").unwrap().as_str(), "room");
    }
}
