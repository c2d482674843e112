//! `MeetingActor` - per-meeting actor that owns the Session and its Pending Pool.
//!
//! Each `MeetingActor`:
//! - Owns the Session roster, the Pending Pool roster and the routing context
//! - Applies admission decisions (accept/reject/evict) as single messages, so a
//!   pool-to-session move is never observable half-done
//! - Computes broadcast audiences and pushes events to member connections
//! - Receives Media Engine notifications (router allocation, close cascades)
//!   on a separate engine-event channel drained by the same loop
//!
//! # Routing context
//!
//! The router is requested from the assigned worker right after spawn. Until
//! it resolves, media operations fail with `RoutingNotReady`; if allocation
//! fails, they fail with the Media Engine error.

use crate::config::MediaSettings;
use crate::endpoint::Endpoint;
use crate::errors::GatewayError;
use crate::observability::metrics as prom;
use crate::room::{Roster, RoutingState, Session};

use super::connection::EventSender;
use super::messages::{
    ConsumerClosedNotice, ConsumerParams, EngineEvent, MeetingMessage, MeetingState, MemberInfo,
    MemberNotice, Notice, PendingMemberInfo, Placement, ProducerClosedNotice, ProducerEntry,
    ServerEvent,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ConnectionId, ConnectionMetadata, MeetingId, Role};
use media_engine::{
    default_media_codecs, DtlsParameters, MediaKind, MediaWorker, RtpCapabilities, RtpParameters,
    TransportParams,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the meeting mailbox.
const MEETING_CHANNEL_BUFFER: usize = 500;

const NOT_IN_MEETING: &str = "You have not joined this meeting";
const NOT_IN_ROOM: &str = "You are not in the room";

/// Handle to a `MeetingActor`.
#[derive(Clone, Debug)]
pub struct MeetingActorHandle {
    sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    meeting_id: MeetingId,
}

impl MeetingActorHandle {
    #[must_use]
    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MeetingMessage,
    ) -> Result<T, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GatewayError::Internal(format!("response receive failed: {e}")))
    }

    /// Place a connection in the Session (hosts) or the Pending Pool (guests).
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        metadata: ConnectionMetadata,
        events: EventSender,
    ) -> Result<Placement, GatewayError> {
        self.call(|respond_to| MeetingMessage::Join {
            connection_id,
            metadata,
            events,
            respond_to,
        })
        .await?
    }

    pub async fn list_room_members(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<MemberInfo>, GatewayError> {
        self.call(|respond_to| MeetingMessage::ListRoomMembers {
            connection_id,
            respond_to,
        })
        .await?
    }

    pub async fn list_pending_members(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<PendingMemberInfo>, GatewayError> {
        self.call(|respond_to| MeetingMessage::ListPendingMembers {
            connection_id,
            respond_to,
        })
        .await?
    }

    pub async fn accept_pending_member(
        &self,
        connection_id: ConnectionId,
        target: ConnectionId,
    ) -> Result<(), GatewayError> {
        self.call(|respond_to| MeetingMessage::AcceptPendingMember {
            connection_id,
            target,
            respond_to,
        })
        .await?
    }

    pub async fn reject_pending_member(
        &self,
        connection_id: ConnectionId,
        target: ConnectionId,
    ) -> Result<(), GatewayError> {
        self.call(|respond_to| MeetingMessage::RejectPendingMember {
            connection_id,
            target,
            respond_to,
        })
        .await?
    }

    pub async fn evict_member(
        &self,
        connection_id: ConnectionId,
        target: ConnectionId,
    ) -> Result<(), GatewayError> {
        self.call(|respond_to| MeetingMessage::EvictMember {
            connection_id,
            target,
            respond_to,
        })
        .await?
    }

    pub async fn leave(&self, connection_id: ConnectionId) -> Result<(), GatewayError> {
        self.call(|respond_to| MeetingMessage::Leave {
            connection_id,
            respond_to,
        })
        .await?
    }

    /// Notify of a connection disconnect.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), GatewayError> {
        self.sender
            .send(MeetingMessage::Disconnect { connection_id })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_routing_capabilities(
        &self,
        connection_id: ConnectionId,
    ) -> Result<RtpCapabilities, GatewayError> {
        self.call(|respond_to| MeetingMessage::GetRoutingCapabilities {
            connection_id,
            respond_to,
        })
        .await?
    }

    pub async fn list_producers(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<ProducerEntry>, GatewayError> {
        self.call(|respond_to| MeetingMessage::ListProducers {
            connection_id,
            respond_to,
        })
        .await?
    }

    pub async fn create_transport(
        &self,
        connection_id: ConnectionId,
        force_tcp: bool,
    ) -> Result<TransportParams, GatewayError> {
        self.call(|respond_to| MeetingMessage::CreateTransport {
            connection_id,
            force_tcp,
            respond_to,
        })
        .await?
    }

    pub async fn connect_transport(
        &self,
        connection_id: ConnectionId,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), GatewayError> {
        self.call(|respond_to| MeetingMessage::ConnectTransport {
            connection_id,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    /// Returns the new producer's id.
    pub async fn produce(
        &self,
        connection_id: ConnectionId,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        is_screen_share: bool,
    ) -> Result<String, GatewayError> {
        self.call(|respond_to| MeetingMessage::Produce {
            connection_id,
            transport_id,
            kind,
            rtp_parameters,
            is_screen_share,
            respond_to,
        })
        .await?
    }

    /// Close a producer. Not acknowledged.
    pub async fn close_producer(
        &self,
        connection_id: ConnectionId,
        producer_id: String,
    ) -> Result<(), GatewayError> {
        self.sender
            .send(MeetingMessage::CloseProducer {
                connection_id,
                producer_id,
            })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn consume(
        &self,
        connection_id: ConnectionId,
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerParams, GatewayError> {
        self.call(|respond_to| MeetingMessage::Consume {
            connection_id,
            transport_id,
            producer_id,
            rtp_capabilities,
            respond_to,
        })
        .await?
    }

    /// Get current meeting state.
    pub async fn get_state(&self) -> Result<MeetingState, GatewayError> {
        self.call(|respond_to| MeetingMessage::GetState { respond_to })
            .await
    }

    /// Cancel the meeting actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `MeetingActor` implementation.
pub struct MeetingActor {
    meeting_id: MeetingId,
    receiver: mpsc::Receiver<MeetingMessage>,
    /// Engine notifications; the sender side is cloned into every close hook.
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    /// Cancellation token (child of the gateway's token).
    cancel_token: CancellationToken,
    session: Session,
    pool: Roster,
    settings: Arc<MediaSettings>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl MeetingActor {
    /// Spawn a new meeting actor and start allocating its routing context on
    /// `worker`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        meeting_id: MeetingId,
        worker: Arc<dyn MediaWorker>,
        settings: Arc<MediaSettings>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (MeetingActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MEETING_CHANNEL_BUFFER);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let allocation_tx = engine_tx.clone();
        let allocation_meeting = meeting_id.clone();
        tokio::spawn(async move {
            debug!(
                target: "mg.actor.meeting",
                meeting_id = %allocation_meeting,
                worker_id = %worker.id(),
                "Allocating routing context"
            );
            let result = worker.create_router(&default_media_codecs()).await;
            let _ = allocation_tx.send(EngineEvent::RouterReady(result));
        });

        let actor = Self {
            meeting_id: meeting_id.clone(),
            receiver,
            engine_rx,
            engine_tx,
            cancel_token: cancel_token.clone(),
            session: Session::new(),
            pool: Roster::new(),
            settings,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Meeting, meeting_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingActorHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "mg.actor.meeting", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            "MeetingActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mg.actor.meeting",
                        meeting_id = %self.meeting_id,
                        "MeetingActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                // Engine notifications first, so a request never observes an
                // object the engine has already closed.
                Some(event) = self.engine_rx.recv() => {
                    self.handle_engine_event(event);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "mg.actor.meeting",
                                meeting_id = %self.meeting_id,
                                "MeetingActor channel closed, exiting"
                            );
                            self.graceful_shutdown();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            messages_processed = self.mailbox.messages_processed(),
            "MeetingActor stopped"
        );
    }

    async fn handle_message(&mut self, message: MeetingMessage) {
        match message {
            MeetingMessage::Join {
                connection_id,
                metadata,
                events,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, metadata, events);
                let _ = respond_to.send(result);
            }

            MeetingMessage::ListRoomMembers {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_room_members(connection_id));
            }

            MeetingMessage::ListPendingMembers {
                connection_id,
                respond_to,
            } => {
                let result = self.require_host(connection_id).map(|_| {
                    self.pool
                        .iter()
                        .map(Endpoint::pending_info)
                        .collect::<Vec<_>>()
                });
                let _ = respond_to.send(result);
            }

            MeetingMessage::AcceptPendingMember {
                connection_id,
                target,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_accept(connection_id, target));
            }

            MeetingMessage::RejectPendingMember {
                connection_id,
                target,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_reject(connection_id, target));
            }

            MeetingMessage::EvictMember {
                connection_id,
                target,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_evict(connection_id, target));
            }

            MeetingMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_departure(connection_id));
            }

            MeetingMessage::Disconnect { connection_id } => {
                if self.handle_departure(connection_id).is_err() {
                    debug!(
                        target: "mg.actor.meeting",
                        meeting_id = %self.meeting_id,
                        connection_id = %connection_id,
                        "Disconnect for connection not in meeting"
                    );
                }
            }

            MeetingMessage::GetRoutingCapabilities {
                connection_id,
                respond_to,
            } => {
                let result = if self.is_member(connection_id) {
                    self.session
                        .routing
                        .router()
                        .map(|router| router.rtp_capabilities())
                } else {
                    Err(GatewayError::NotInMeeting(NOT_IN_MEETING.to_string()))
                };
                let _ = respond_to.send(result);
            }

            MeetingMessage::ListProducers {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_producers(connection_id));
            }

            MeetingMessage::CreateTransport {
                connection_id,
                force_tcp,
                respond_to,
            } => {
                let result = self
                    .session
                    .create_transport(connection_id, &self.settings, force_tcp)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::ConnectTransport {
                connection_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .session
                    .connect_transport(connection_id, &transport_id, &dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::Produce {
                connection_id,
                transport_id,
                kind,
                rtp_parameters,
                is_screen_share,
                respond_to,
            } => {
                let result = self
                    .handle_produce(
                        connection_id,
                        &transport_id,
                        kind,
                        &rtp_parameters,
                        is_screen_share,
                    )
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::CloseProducer {
                connection_id,
                producer_id,
            } => {
                self.handle_close_producer(connection_id, &producer_id);
            }

            MeetingMessage::Consume {
                connection_id,
                transport_id,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .session
                    .consume(connection_id, &transport_id, &producer_id, &rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------------

    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        metadata: ConnectionMetadata,
        events: EventSender,
    ) -> Result<Placement, GatewayError> {
        if self.is_member(connection_id) {
            return Err(GatewayError::Conflict(
                "You have already joined this meeting".to_string(),
            ));
        }

        let role = metadata.role;
        let endpoint = Endpoint::new(connection_id, metadata, events, self.engine_tx.clone());
        let user = endpoint.member_info();

        let placement = if role.is_host() {
            self.session
                .roster
                .admit(endpoint)
                .map_err(|_| GatewayError::Conflict("Already in the room".to_string()))?;
            self.session.roster.notify_all(
                &ServerEvent::UserJoined(MemberNotice {
                    message: format!("{} joined the room", user.name),
                    user: user.clone(),
                }),
                Some(connection_id),
            );
            prom::record_admission("host_joined");
            Placement::Session
        } else {
            self.pool
                .admit(endpoint)
                .map_err(|_| GatewayError::Conflict("Already in the waiting room".to_string()))?;
            self.session.roster.notify_hosts(
                &ServerEvent::UserJoinedWaitingArea(MemberNotice {
                    message: format!("{} is in waiting room", user.name),
                    user: user.clone(),
                }),
                None,
            );
            prom::record_admission("pending");
            Placement::PendingPool
        };

        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            connection_id = %connection_id,
            placement = ?placement,
            session_members = self.session.roster.len(),
            pending_members = self.pool.len(),
            "Connection joined"
        );

        Ok(placement)
    }

    fn list_room_members(&self, caller: ConnectionId) -> Result<Vec<MemberInfo>, GatewayError> {
        let role = self
            .member(caller)
            .map(Endpoint::role)
            .ok_or_else(|| GatewayError::NotInMeeting(NOT_IN_MEETING.to_string()))?;

        Ok(self
            .session
            .roster
            .iter()
            .filter(|endpoint| endpoint.id() != caller)
            .filter(|endpoint| role.is_host() || endpoint.is_host())
            .map(Endpoint::member_info)
            .collect())
    }

    fn handle_accept(
        &mut self,
        caller: ConnectionId,
        target: ConnectionId,
    ) -> Result<(), GatewayError> {
        self.require_host(caller)?;

        let endpoint = self.pool.dismiss(target)?;
        let name = endpoint.name().to_string();
        let events = endpoint.events().clone();

        if let Err(endpoint) = self.session.roster.admit(endpoint) {
            // Unreachable while membership is exclusive; keep the guest pending.
            error!(
                target: "mg.actor.meeting",
                meeting_id = %self.meeting_id,
                connection_id = %target,
                "Pending member already present in session"
            );
            let _ = self.pool.admit(endpoint);
            return Err(GatewayError::Internal(
                "pending member already in session".to_string(),
            ));
        }

        events.push(ServerEvent::MemberAccepted(Notice::new(
            "User accepted successfully",
        )));
        self.session.roster.notify_hosts(
            &ServerEvent::MemberAccepted(Notice::new(format!("{name} joined the room"))),
            None,
        );
        prom::record_admission("accepted");

        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            connection_id = %target,
            accepted_by = %caller,
            "Pending member accepted"
        );
        Ok(())
    }

    fn handle_reject(
        &mut self,
        caller: ConnectionId,
        target: ConnectionId,
    ) -> Result<(), GatewayError> {
        self.require_host(caller)?;

        let endpoint = self
            .pool
            .get(target)
            .ok_or_else(|| GatewayError::ParticipantNotFound(target.to_string()))?;

        // The target stays pending; its client is expected to leave.
        endpoint
            .events()
            .push(ServerEvent::MemberRejected(Notice::new(
                "User rejected successfully",
            )));
        prom::record_admission("rejected");

        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            connection_id = %target,
            rejected_by = %caller,
            "Pending member rejected"
        );
        Ok(())
    }

    fn handle_evict(
        &mut self,
        caller: ConnectionId,
        target: ConnectionId,
    ) -> Result<(), GatewayError> {
        self.require_host(caller)?;

        match self.session.roster.get(target) {
            None => return Err(GatewayError::ParticipantNotFound(target.to_string())),
            Some(endpoint) if endpoint.is_host() => {
                return Err(GatewayError::PermissionDenied(
                    "You cannot evict a host".to_string(),
                ));
            }
            Some(_) => {}
        }

        let endpoint = self.session.roster.dismiss(target)?;
        endpoint
            .events()
            .push(ServerEvent::MemberEvicted(Notice::new(
                "User removed from room",
            )));
        self.announce_producers_closed(&endpoint);

        let user = endpoint.member_info();
        endpoint.close();
        self.session.roster.notify_hosts(
            &ServerEvent::UserLeft(MemberNotice {
                message: format!("{} left the room", user.name),
                user,
            }),
            None,
        );
        prom::record_admission("evicted");

        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            connection_id = %target,
            evicted_by = %caller,
            "Member evicted"
        );
        Ok(())
    }

    /// Remove a connection from whichever roster holds it, close its media
    /// objects and tell the appropriate audience.
    fn handle_departure(&mut self, connection_id: ConnectionId) -> Result<(), GatewayError> {
        if let Ok(endpoint) = self.session.roster.dismiss(connection_id) {
            self.announce_producers_closed(&endpoint);

            let user = endpoint.member_info();
            let notice = ServerEvent::UserLeft(MemberNotice {
                message: format!("{} left the room", user.name),
                user,
            });
            if endpoint.is_host() {
                self.session.roster.notify_all(&notice, None);
            } else {
                self.session.roster.notify_hosts(&notice, None);
            }
            endpoint.close();
        } else if let Ok(endpoint) = self.pool.dismiss(connection_id) {
            let user = endpoint.member_info();
            self.session.roster.notify_hosts(
                &ServerEvent::UserLeftWaitingArea(MemberNotice {
                    message: format!("{} left the waiting room", user.name),
                    user,
                }),
                None,
            );
            endpoint.close();
        } else {
            return Err(GatewayError::ParticipantNotFound(connection_id.to_string()));
        }

        info!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            connection_id = %connection_id,
            session_members = self.session.roster.len(),
            pending_members = self.pool.len(),
            "Connection left"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------------

    fn list_producers(&self, caller: ConnectionId) -> Result<Vec<ProducerEntry>, GatewayError> {
        let endpoint = self
            .session
            .roster
            .get(caller)
            .ok_or_else(|| GatewayError::NotInMeeting(NOT_IN_ROOM.to_string()))?;
        self.session.routing.router()?;
        Ok(self
            .session
            .roster
            .visible_producers(caller, endpoint.role()))
    }

    async fn handle_produce(
        &mut self,
        connection_id: ConnectionId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        is_screen_share: bool,
    ) -> Result<String, GatewayError> {
        let entry = self
            .session
            .produce(
                connection_id,
                transport_id,
                kind,
                rtp_parameters,
                is_screen_share,
            )
            .await?;
        let role = self
            .session
            .roster
            .get(connection_id)
            .map_or(Role::Guest, Endpoint::role);

        let audience = self.session.roster.producer_audience(connection_id, role);
        self.session
            .roster
            .notify(&audience, &ServerEvent::NewProducers(vec![entry.clone()]));
        prom::record_producer_created(kind.as_str());

        debug!(
            target: "mg.actor.meeting",
            meeting_id = %self.meeting_id,
            connection_id = %connection_id,
            producer_id = %entry.producer_id,
            kind = %kind,
            is_screen_share,
            audience = audience.len(),
            "Producer created"
        );
        Ok(entry.producer_id)
    }

    fn handle_close_producer(&mut self, connection_id: ConnectionId, producer_id: &str) {
        let Some(endpoint) = self.session.roster.get_mut(connection_id) else {
            debug!(
                target: "mg.actor.meeting",
                meeting_id = %self.meeting_id,
                connection_id = %connection_id,
                "Close producer from connection not in room"
            );
            return;
        };
        let role = endpoint.role();
        if endpoint.close_producer(producer_id) {
            self.announce_producer_closed(connection_id, role, producer_id);
        } else {
            debug!(
                target: "mg.actor.meeting",
                meeting_id = %self.meeting_id,
                connection_id = %connection_id,
                producer_id = %producer_id,
                "Producer already closed"
            );
        }
    }

    /// Tell the audience of `endpoint` that each of its producers is gone.
    fn announce_producers_closed(&self, endpoint: &Endpoint) {
        for entry in endpoint.producer_entries() {
            self.announce_producer_closed(endpoint.id(), endpoint.role(), &entry.producer_id);
        }
    }

    fn announce_producer_closed(&self, owner: ConnectionId, role: Role, producer_id: &str) {
        let audience = self.session.roster.producer_audience(owner, role);
        self.session.roster.notify(
            &audience,
            &ServerEvent::ProducerClosed(ProducerClosedNotice {
                producer_id: producer_id.to_string(),
                user_id: owner,
            }),
        );
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::RouterReady(Ok(router)) => {
                info!(
                    target: "mg.actor.meeting",
                    meeting_id = %self.meeting_id,
                    router_id = %router.id(),
                    "Routing context ready"
                );
                self.session.routing = RoutingState::Ready(router);
            }

            EngineEvent::RouterReady(Err(e)) => {
                error!(
                    target: "mg.actor.meeting",
                    meeting_id = %self.meeting_id,
                    error = %e,
                    "Routing context allocation failed"
                );
                self.session.routing = RoutingState::Failed(e);
            }

            EngineEvent::TransportClosed {
                connection_id,
                transport_id,
            } => {
                let removed = self
                    .member_mut(connection_id)
                    .is_some_and(|endpoint| endpoint.remove_transport(&transport_id));
                if removed {
                    debug!(
                        target: "mg.actor.meeting",
                        meeting_id = %self.meeting_id,
                        connection_id = %connection_id,
                        transport_id = %transport_id,
                        "Transport closed by engine"
                    );
                }
            }

            EngineEvent::ProducerTransportClosed {
                connection_id,
                producer_id,
            } => {
                let Some(endpoint) = self.session.roster.get_mut(connection_id) else {
                    return;
                };
                let role = endpoint.role();
                if endpoint.remove_producer(&producer_id) {
                    self.announce_producer_closed(connection_id, role, &producer_id);
                }
            }

            EngineEvent::ConsumerProducerClosed {
                connection_id,
                consumer_id,
            } => {
                let Some(endpoint) = self.session.roster.get_mut(connection_id) else {
                    return;
                };
                if endpoint.remove_consumer(&consumer_id) {
                    debug!(
                        target: "mg.actor.meeting",
                        meeting_id = %self.meeting_id,
                        connection_id = %connection_id,
                        consumer_id = %consumer_id,
                        "Consumer closed because its producer closed"
                    );
                    endpoint
                        .events()
                        .push(ServerEvent::ConsumerClosed(ConsumerClosedNotice {
                            consumer_id,
                        }));
                }
            }

            EngineEvent::ConsumerTransportClosed {
                connection_id,
                consumer_id,
            } => {
                if let Some(endpoint) = self.member_mut(connection_id) {
                    endpoint.remove_consumer(&consumer_id);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn is_member(&self, connection_id: ConnectionId) -> bool {
        self.session.roster.contains(connection_id) || self.pool.contains(connection_id)
    }

    fn member(&self, connection_id: ConnectionId) -> Option<&Endpoint> {
        self.session
            .roster
            .get(connection_id)
            .or_else(|| self.pool.get(connection_id))
    }

    fn member_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Endpoint> {
        if self.session.roster.contains(connection_id) {
            self.session.roster.get_mut(connection_id)
        } else {
            self.pool.get_mut(connection_id)
        }
    }

    /// The caller must be a host admitted to the Session.
    fn require_host(&self, connection_id: ConnectionId) -> Result<&Endpoint, GatewayError> {
        let endpoint = self
            .session
            .roster
            .get(connection_id)
            .ok_or_else(|| GatewayError::NotInMeeting(NOT_IN_ROOM.to_string()))?;
        if !endpoint.is_host() {
            return Err(GatewayError::PermissionDenied(
                "Only hosts can manage members".to_string(),
            ));
        }
        Ok(endpoint)
    }

    fn get_state(&self) -> MeetingState {
        let endpoints = self.session.roster.iter().chain(self.pool.iter());
        let (producer_count, consumer_count) = endpoints.fold((0, 0), |(p, c), endpoint| {
            (p + endpoint.producer_count(), c + endpoint.consumer_count())
        });

        MeetingState {
            meeting_id: self.meeting_id.to_string(),
            session_members: self
                .session
                .roster
                .iter()
                .map(Endpoint::member_info)
                .collect(),
            pending_members: self.pool.iter().map(Endpoint::pending_info).collect(),
            routing: self.session.routing.status(),
            producer_count,
            consumer_count,
        }
    }

    /// Close every endpoint. Connection actors are cancelled through their
    /// own tokens.
    fn graceful_shutdown(&mut self) {
        let session_members = self.session.roster.len();
        let pending_members = self.pool.len();

        for endpoint in self.session.roster.drain() {
            endpoint.close();
        }
        for endpoint in self.pool.drain() {
            endpoint.close();
        }
        self.session.routing = RoutingState::Pending;

        if session_members + pending_members > 0 {
            warn!(
                target: "mg.actor.meeting",
                meeting_id = %self.meeting_id,
                session_members,
                pending_members,
                "Meeting shut down with members present"
            );
        }
    }
}
