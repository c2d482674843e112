//! `GatewayActor` - singleton owner of the meeting registry.
//!
//! The `GatewayActor` is the top-level actor of the gateway:
//!
//! - Singleton per gateway process
//! - Registers meetings (a Session and its Pending Pool) and supervises their actors
//! - Owns the routing-context allocator
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! Meeting creation is handled one message at a time, so create-if-absent
//! never races and the allocator's rotating index is advanced exactly once
//! per meeting.
//!
//! # Graceful Shutdown
//!
//! On shutdown, the gateway:
//! 1. Stops accepting new meetings and connections
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for meeting actors to close their endpoints

use crate::allocator::RouterAllocator;
use crate::config::MediaSettings;
use crate::errors::GatewayError;

use super::connection::{ConnectionActor, ConnectionActorHandle, EventSender};
use super::meeting::{MeetingActor, MeetingActorHandle};
use super::messages::{GatewayMessage, GatewayStatus, MeetingState, ServerEvent};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ConnectionId, ConnectionMetadata, MeetingId};
use media_engine::MediaWorker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the gateway mailbox.
const GATEWAY_CHANNEL_BUFFER: usize = 1000;

/// Capacity of each connection's outbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each meeting actor.
const MEETING_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `GatewayActor`.
///
/// This is the public interface of the gateway. All methods are async and
/// return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct GatewayActorHandle {
    sender: mpsc::Sender<GatewayMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl GatewayActorHandle {
    /// Create a new `GatewayActor` over a worker pool and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately. Fails if the
    /// worker pool is empty.
    pub fn new(
        gateway_id: String,
        workers: Vec<Arc<dyn MediaWorker>>,
        settings: Arc<MediaSettings>,
        metrics: Arc<ActorMetrics>,
    ) -> Result<Self, GatewayError> {
        let allocator = RouterAllocator::new(workers)?;
        let (sender, receiver) = mpsc::channel(GATEWAY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = GatewayActor::new(
            gateway_id,
            receiver,
            cancel_token.clone(),
            allocator,
            settings,
            Arc::clone(&metrics),
        );

        tokio::spawn(actor.run());

        Ok(Self {
            sender,
            cancel_token,
            metrics,
        })
    }

    /// Register a Session and its Pending Pool under `meeting_id`.
    pub async fn create_meeting(&self, meeting_id: MeetingId) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayMessage::CreateMeeting {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GatewayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up the actor owning a meeting.
    pub async fn get_meeting(
        &self,
        meeting_id: MeetingId,
    ) -> Result<MeetingActorHandle, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayMessage::GetMeeting {
                meeting_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GatewayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Snapshot of one meeting.
    pub async fn get_meeting_state(
        &self,
        meeting_id: MeetingId,
    ) -> Result<MeetingState, GatewayError> {
        self.get_meeting(meeting_id).await?.get_state().await
    }

    /// Get the current gateway status.
    pub async fn get_status(&self) -> Result<GatewayStatus, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GatewayError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| GatewayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GatewayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Accept a new signaling connection.
    ///
    /// Returns the connection handle and the stream of events pushed to it.
    /// The stream ends once the connection is torn down.
    pub fn connect(
        &self,
        metadata: ConnectionMetadata,
    ) -> Result<(ConnectionActorHandle, mpsc::Receiver<ServerEvent>), GatewayError> {
        if self.is_cancelled() {
            return Err(GatewayError::Draining);
        }

        let connection_id = ConnectionId::new();
        let (events, receiver) = EventSender::channel(connection_id, EVENT_CHANNEL_CAPACITY);
        let (handle, _task_handle) = ConnectionActor::spawn(
            connection_id,
            metadata,
            self.clone(),
            events,
            self.child_token(),
            Arc::clone(&self.metrics),
        );

        Ok((handle, receiver))
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed meeting.
struct ManagedMeeting {
    handle: MeetingActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    created_at: i64,
}

/// The `GatewayActor` implementation.
pub struct GatewayActor {
    gateway_id: String,
    receiver: mpsc::Receiver<GatewayMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    meetings: HashMap<MeetingId, ManagedMeeting>,
    allocator: RouterAllocator,
    settings: Arc<MediaSettings>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl GatewayActor {
    fn new(
        gateway_id: String,
        receiver: mpsc::Receiver<GatewayMessage>,
        cancel_token: CancellationToken,
        allocator: RouterAllocator,
        settings: Arc<MediaSettings>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Gateway, gateway_id.as_str());

        Self {
            gateway_id,
            receiver,
            cancel_token,
            meetings: HashMap::new(),
            allocator,
            settings,
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "mg.actor.gateway", fields(gateway_id = %self.gateway_id))]
    async fn run(mut self) {
        info!(
            target: "mg.actor.gateway",
            gateway_id = %self.gateway_id,
            workers = self.allocator.len(),
            "GatewayActor started"
        );

        loop {
            // Check for terminated meeting actors
            self.check_meeting_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mg.actor.gateway",
                        gateway_id = %self.gateway_id,
                        "GatewayActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "mg.actor.gateway",
                                gateway_id = %self.gateway_id,
                                "GatewayActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mg.actor.gateway",
            gateway_id = %self.gateway_id,
            meetings_remaining = self.meetings.len(),
            messages_processed = self.mailbox.messages_processed(),
            "GatewayActor stopped"
        );
    }

    fn handle_message(&mut self, message: GatewayMessage) {
        match message {
            GatewayMessage::CreateMeeting {
                meeting_id,
                respond_to,
            } => {
                let result = self.create_meeting(meeting_id);
                let _ = respond_to.send(result);
            }

            GatewayMessage::GetMeeting {
                meeting_id,
                respond_to,
            } => {
                let result = self
                    .meetings
                    .get(&meeting_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| GatewayError::MeetingNotFound(meeting_id.to_string()));
                let _ = respond_to.send(result);
            }

            GatewayMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            GatewayMessage::Shutdown { respond_to } => {
                info!(
                    target: "mg.actor.gateway",
                    gateway_id = %self.gateway_id,
                    meeting_count = self.meetings.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn create_meeting(&mut self, meeting_id: MeetingId) -> Result<(), GatewayError> {
        if !self.accepting_new {
            return Err(GatewayError::Draining);
        }

        // A meeting id also reserves its waiting-area id, in both directions.
        if self
            .meetings
            .keys()
            .any(|existing| ids_collide(existing, &meeting_id))
        {
            return Err(GatewayError::Conflict("Room already exists".to_string()));
        }

        let worker = self.allocator.next_worker()?;

        debug!(
            target: "mg.actor.gateway",
            gateway_id = %self.gateway_id,
            meeting_id = %meeting_id,
            worker_id = %worker.id(),
            "Creating new meeting actor"
        );

        let (handle, task_handle) = MeetingActor::spawn(
            meeting_id.clone(),
            worker,
            Arc::clone(&self.settings),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.meetings.insert(
            meeting_id.clone(),
            ManagedMeeting {
                handle,
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.meeting_created();

        info!(
            target: "mg.actor.gateway",
            gateway_id = %self.gateway_id,
            meeting_id = %meeting_id,
            waiting_area_id = %meeting_id.waiting_area_id(),
            total_meetings = self.meetings.len(),
            "Meeting created"
        );

        Ok(())
    }

    fn get_status(&self) -> GatewayStatus {
        GatewayStatus {
            meeting_count: self.meetings.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "mg.actor.gateway",
            gateway_id = %self.gateway_id,
            meeting_count = self.meetings.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.meetings.values() {
            managed.handle.cancel();
        }

        for (meeting_id, managed) in self.meetings.drain() {
            match tokio::time::timeout(MEETING_DRAIN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "mg.actor.gateway",
                        gateway_id = %self.gateway_id,
                        meeting_id = %meeting_id,
                        lifetime_secs = chrono::Utc::now().timestamp() - managed.created_at,
                        "Meeting actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "mg.actor.gateway",
                        gateway_id = %self.gateway_id,
                        meeting_id = %meeting_id,
                        error = ?e,
                        "Meeting actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "mg.actor.gateway",
                        gateway_id = %self.gateway_id,
                        meeting_id = %meeting_id,
                        "Meeting actor shutdown timed out"
                    );
                }
            }
            self.metrics.meeting_removed();
        }

        info!(
            target: "mg.actor.gateway",
            gateway_id = %self.gateway_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop meetings whose actor task has exited, freeing their ids.
    async fn check_meeting_health(&mut self) {
        let finished: Vec<MeetingId> = self
            .meetings
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(meeting_id, _)| meeting_id.clone())
            .collect();

        for meeting_id in finished {
            let Some(managed) = self.meetings.remove(&meeting_id) else {
                continue;
            };
            warn!(
                target: "mg.actor.gateway",
                gateway_id = %self.gateway_id,
                meeting_id = %meeting_id,
                "Meeting actor task finished unexpectedly"
            );

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "mg.actor.gateway",
                        gateway_id = %self.gateway_id,
                        meeting_id = %meeting_id,
                        "Meeting actor exited cleanly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "mg.actor.gateway",
                            gateway_id = %self.gateway_id,
                            meeting_id = %meeting_id,
                            error = ?join_error,
                            "Meeting actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Meeting);
                    }
                }
            }

            self.metrics.meeting_removed();
        }
    }
}

/// Whether two meeting ids name the same Session or Pending Pool.
fn ids_collide(existing: &MeetingId, candidate: &MeetingId) -> bool {
    existing == candidate
        || existing.waiting_area_id() == candidate.as_str()
        || candidate.waiting_area_id() == existing.as_str()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::{ClientRequest, MeetingRef, Response};
    use media_engine::{LocalWorker, LocalWorkerSettings};

    fn gateway(id: &str) -> GatewayActorHandle {
        let worker: Arc<dyn MediaWorker> =
            Arc::new(LocalWorker::new("worker-0", &LocalWorkerSettings::default()));
        GatewayActorHandle::new(
            id.to_string(),
            vec![worker],
            Arc::new(MediaSettings::default()),
            ActorMetrics::new(),
        )
        .unwrap()
    }

    fn meeting(id: &str) -> MeetingId {
        MeetingId::parse(id).unwrap()
    }

    #[test]
    fn test_ids_collide_with_waiting_area() {
        assert!(ids_collide(&meeting("abc"), &meeting("abc")));
        assert!(ids_collide(&meeting("abc"), &meeting("waiting-abc")));
        assert!(ids_collide(&meeting("waiting-abc"), &meeting("abc")));
        assert!(!ids_collide(&meeting("abc"), &meeting("abcd")));
    }

    #[tokio::test]
    async fn test_empty_worker_pool_rejected() {
        let result = GatewayActorHandle::new(
            "mg-test".to_string(),
            Vec::new(),
            Arc::new(MediaSettings::default()),
            ActorMetrics::new(),
        );
        assert!(matches!(result, Err(GatewayError::Internal(_))));
    }

    #[tokio::test]
    async fn test_create_and_get_meeting() {
        let handle = gateway("mg-test-001");

        handle.create_meeting(meeting("Team")).await.unwrap();

        let found = handle.get_meeting(meeting("team")).await.unwrap();
        assert_eq!(found.meeting_id().as_str(), "team");

        let state = handle.get_meeting_state(meeting("team")).await.unwrap();
        assert!(state.session_members.is_empty());
        assert!(state.pending_members.is_empty());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_meeting_is_conflict() {
        let handle = gateway("mg-test-002");

        handle.create_meeting(meeting("abc")).await.unwrap();
        let result = handle.create_meeting(meeting("ABC ")).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
        let result = handle.create_meeting(meeting("waiting-abc")).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_get_nonexistent_meeting() {
        let handle = gateway("mg-test-003");

        let result = handle.get_meeting(meeting("nope")).await;
        assert!(matches!(result, Err(GatewayError::MeetingNotFound(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_status_counts_meetings_and_connections() {
        let handle = gateway("mg-test-004");

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.meeting_count, 0);
        assert!(!status.is_draining);

        handle.create_meeting(meeting("m1")).await.unwrap();
        handle.create_meeting(meeting("m2")).await.unwrap();
        let (_conn, _events) = handle.connect(ConnectionMetadata::host("h")).unwrap();

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.meeting_count, 2);
        assert_eq!(status.connection_count, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_connection_create_meeting_through_gateway() {
        let handle = gateway("mg-test-005");
        let (host, _events) = handle.connect(ConnectionMetadata::host("h")).unwrap();
        let (guest, _guest_events) = handle.connect(ConnectionMetadata::guest("g")).unwrap();

        let response = host
            .request(ClientRequest::CreateMeeting(MeetingRef {
                meeting_id: "room".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(response, Response::ack("Room Created Successfully"));

        let result = guest
            .request(ClientRequest::CreateMeeting(MeetingRef {
                meeting_id: "other".to_string(),
            }))
            .await;
        assert!(matches!(result, Err(GatewayError::PermissionDenied(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_children() {
        let handle = gateway("mg-test-006");
        handle.create_meeting(meeting("bye")).await.unwrap();
        let (conn, _events) = handle.connect(ConnectionMetadata::guest("g")).unwrap();

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .expect("connection should be torn down");

        assert!(handle.is_cancelled());
        assert!(matches!(
            handle.connect(ConnectionMetadata::guest("late")),
            Err(GatewayError::Draining)
        ));
    }
}
