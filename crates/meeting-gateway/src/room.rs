//! Session (room) and Pending Pool state.
//!
//! A [`Roster`] is the connection-keyed set of endpoints shared by both the
//! Session and its paired Pending Pool. The Session adds the routing context
//! and the media operations; the producer directory is always rebuilt from the
//! live endpoints instead of being cached.

use crate::actors::messages::{ConsumerParams, ProducerEntry, RoutingStatus, ServerEvent};
use crate::config::MediaSettings;
use crate::endpoint::Endpoint;
use crate::errors::GatewayError;

use common::types::{ConnectionId, Role};
use media_engine::{
    DtlsParameters, MediaError, MediaKind, Router, RtpCapabilities, RtpParameters,
    TransportParams,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Whether `viewer` is told about producers owned by `owner`.
///
/// Hosts' producers are visible to everyone else; guests' producers are
/// visible to hosts only.
#[must_use]
pub fn can_see_producers(owner_role: Role, viewer_role: Role) -> bool {
    owner_role.is_host() || viewer_role.is_host()
}

/// Connection-keyed endpoints of a Session or Pending Pool.
#[derive(Default)]
pub struct Roster {
    endpoints: HashMap<ConnectionId, Endpoint>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint. Hands it back if its connection is already present.
    pub fn admit(&mut self, endpoint: Endpoint) -> Result<(), Endpoint> {
        match self.endpoints.entry(endpoint.id()) {
            Entry::Occupied(_) => Err(endpoint),
            Entry::Vacant(slot) => {
                slot.insert(endpoint);
                Ok(())
            }
        }
    }

    /// Remove and return an endpoint.
    pub fn dismiss(&mut self, connection_id: ConnectionId) -> Result<Endpoint, GatewayError> {
        self.endpoints
            .remove(&connection_id)
            .ok_or_else(|| GatewayError::ParticipantNotFound(connection_id.to_string()))
    }

    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<&Endpoint> {
        self.endpoints.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&connection_id)
    }

    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.endpoints.contains_key(&connection_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Every producer of every endpoint, rebuilt on each call.
    #[must_use]
    pub fn producer_directory(&self) -> Vec<ProducerEntry> {
        self.endpoints
            .values()
            .flat_map(Endpoint::producer_entries)
            .collect()
    }

    /// The producer directory as seen by `viewer`: never its own producers,
    /// and guests' producers only when the viewer is a host.
    #[must_use]
    pub fn visible_producers(&self, viewer: ConnectionId, viewer_role: Role) -> Vec<ProducerEntry> {
        self.producer_directory()
            .into_iter()
            .filter(|entry| {
                entry.user_id != viewer
                    && self
                        .endpoints
                        .get(&entry.user_id)
                        .is_some_and(|owner| can_see_producers(owner.role(), viewer_role))
            })
            .collect()
    }

    /// Connections told about producer changes of `owner`.
    #[must_use]
    pub fn producer_audience(&self, owner: ConnectionId, owner_role: Role) -> Vec<ConnectionId> {
        self.endpoints
            .values()
            .filter(|viewer| viewer.id() != owner && can_see_producers(owner_role, viewer.role()))
            .map(Endpoint::id)
            .collect()
    }

    /// Push `event` to each connection in `audience` that is still present.
    pub fn notify(&self, audience: &[ConnectionId], event: &ServerEvent) {
        for connection_id in audience {
            if let Some(endpoint) = self.endpoints.get(connection_id) {
                endpoint.events().push(event.clone());
            }
        }
    }

    /// Push `event` to every host, optionally skipping one connection.
    pub fn notify_hosts(&self, event: &ServerEvent, except: Option<ConnectionId>) {
        for endpoint in self.endpoints.values() {
            if endpoint.is_host() && Some(endpoint.id()) != except {
                endpoint.events().push(event.clone());
            }
        }
    }

    /// Push `event` to every endpoint, optionally skipping one connection.
    pub fn notify_all(&self, event: &ServerEvent, except: Option<ConnectionId>) {
        for endpoint in self.endpoints.values() {
            if Some(endpoint.id()) != except {
                endpoint.events().push(event.clone());
            }
        }
    }

    /// Remove every endpoint.
    pub fn drain(&mut self) -> impl Iterator<Item = Endpoint> + '_ {
        self.endpoints.drain().map(|(_, endpoint)| endpoint)
    }
}

/// Routing context of a Session, allocated asynchronously after creation.
pub enum RoutingState {
    Pending,
    Ready(Box<dyn Router>),
    Failed(MediaError),
}

impl RoutingState {
    /// The router, or why it cannot be used yet.
    pub fn router(&self) -> Result<&dyn Router, GatewayError> {
        match self {
            RoutingState::Pending => Err(GatewayError::RoutingNotReady),
            RoutingState::Ready(router) => Ok(router.as_ref()),
            RoutingState::Failed(e) => Err(GatewayError::Media(e.clone())),
        }
    }

    #[must_use]
    pub fn status(&self) -> RoutingStatus {
        match self {
            RoutingState::Pending => RoutingStatus::Pending,
            RoutingState::Ready(_) => RoutingStatus::Ready,
            RoutingState::Failed(_) => RoutingStatus::Failed,
        }
    }
}

/// The active room: admitted endpoints plus the routing context.
pub struct Session {
    pub roster: Roster,
    pub routing: RoutingState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            roster: Roster::new(),
            routing: RoutingState::Pending,
        }
    }

    fn endpoint_mut(&mut self, connection_id: ConnectionId) -> Result<&mut Endpoint, GatewayError> {
        self.roster
            .get_mut(connection_id)
            .ok_or_else(|| GatewayError::NotInMeeting("You are not in the room".to_string()))
    }

    /// Create a transport for `connection_id` and register it on its endpoint.
    ///
    /// A failure to apply the incoming bitrate cap is logged and ignored.
    pub async fn create_transport(
        &mut self,
        connection_id: ConnectionId,
        settings: &MediaSettings,
        force_tcp: bool,
    ) -> Result<TransportParams, GatewayError> {
        if !self.roster.contains(connection_id) {
            return Err(GatewayError::NotInMeeting(
                "You are not in the room".to_string(),
            ));
        }
        let transport = self
            .routing
            .router()?
            .create_webrtc_transport(&settings.transport_options(force_tcp))
            .await?;

        if let Some(cap) = settings.incoming_bitrate_cap() {
            if let Err(e) = transport.set_max_incoming_bitrate(cap).await {
                warn!(
                    target: "mg.actor.meeting",
                    connection_id = %connection_id,
                    transport_id = %transport.id(),
                    error = %e,
                    "Failed to apply incoming bitrate cap"
                );
            }
        }

        let params = transport.params();
        debug!(
            target: "mg.actor.meeting",
            connection_id = %connection_id,
            transport_id = %params.id,
            "Transport created"
        );
        self.endpoint_mut(connection_id)?.add_transport(transport);
        Ok(params)
    }

    pub async fn connect_transport(
        &mut self,
        connection_id: ConnectionId,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), GatewayError> {
        self.routing.router()?;
        self.endpoint_mut(connection_id)?
            .connect_transport(transport_id, dtls_parameters)
            .await
    }

    pub async fn produce(
        &mut self,
        connection_id: ConnectionId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        is_screen_share: bool,
    ) -> Result<ProducerEntry, GatewayError> {
        self.routing.router()?;
        self.endpoint_mut(connection_id)?
            .produce(transport_id, kind, rtp_parameters, is_screen_share)
            .await
    }

    /// Subscribe `connection_id` to a producer, after the router confirms the
    /// device capabilities can receive it.
    pub async fn consume(
        &mut self,
        connection_id: ConnectionId,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParams, GatewayError> {
        let router = self.routing.router()?;
        if !router.can_consume(producer_id, rtp_capabilities) {
            return Err(GatewayError::Media(MediaError::CannotConsume {
                producer_id: producer_id.to_string(),
            }));
        }
        self.endpoint_mut(connection_id)?
            .consume(transport_id, producer_id, rtp_capabilities)
            .await
    }
}
