//! Endpoint - server-side state of one participant.
//!
//! An `Endpoint` exclusively owns the Media Engine handles its connection
//! created. Engine-initiated closures are reported back to the owning meeting
//! through close hooks registered here at creation time; the hooks only send
//! an [`EngineEvent`], the meeting actor applies the removal in its own loop.

use crate::actors::connection::EventSender;
use crate::actors::messages::{
    ConsumerParams, EngineEvent, MemberInfo, PendingMemberInfo, ProducerEntry,
};
use crate::errors::GatewayError;

use common::types::{ConnectionId, ConnectionMetadata, Role};
use media_engine::{
    Consumer, ConsumerLayers, ConsumerType, DtlsParameters, MediaKind, Producer, RtpCapabilities,
    RtpParameters, Transport,
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Preferred layers requested for simulcast consumers.
const PREFERRED_SIMULCAST_LAYERS: ConsumerLayers = ConsumerLayers {
    spatial_layer: 2,
    temporal_layer: Some(2),
};

struct ProducerSlot {
    producer: Box<dyn Producer>,
    is_screen_share: bool,
}

/// One participant's server-side state.
pub struct Endpoint {
    id: ConnectionId,
    name: String,
    role: Role,
    /// Outbound push channel of the owning connection.
    events: EventSender,
    engine_events: mpsc::UnboundedSender<EngineEvent>,
    transports: HashMap<String, Box<dyn Transport>>,
    producers: HashMap<String, ProducerSlot>,
    consumers: HashMap<String, Box<dyn Consumer>>,
}

impl Endpoint {
    #[must_use]
    pub fn new(
        id: ConnectionId,
        metadata: ConnectionMetadata,
        events: EventSender,
        engine_events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            id,
            name: metadata.name,
            role: metadata.role,
            events,
            engine_events,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }

    /// Listing entry for the room-member view.
    #[must_use]
    pub fn member_info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id,
            name: self.name.clone(),
            is_host: self.is_host(),
        }
    }

    /// Listing entry for the pending-member view.
    #[must_use]
    pub fn pending_info(&self) -> PendingMemberInfo {
        PendingMemberInfo {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Push channel of the owning connection.
    #[must_use]
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Store a transport and watch for its closure.
    pub fn add_transport(&mut self, transport: Box<dyn Transport>) {
        let transport_id = transport.id().to_string();
        let engine_events = self.engine_events.clone();
        let connection_id = self.id;
        let hook_transport_id = transport_id.clone();
        transport.on_close(Box::new(move || {
            let _ = engine_events.send(EngineEvent::TransportClosed {
                connection_id,
                transport_id: hook_transport_id,
            });
        }));
        self.transports.insert(transport_id, transport);
    }

    /// Supply the client's DTLS parameters to one of this endpoint's transports.
    pub async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), GatewayError> {
        let transport = self.transport(transport_id)?;
        transport.connect(dtls_parameters).await?;
        Ok(())
    }

    /// Publish a media source on one of this endpoint's transports.
    ///
    /// Returns the directory entry of the new producer.
    pub async fn produce(
        &mut self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        is_screen_share: bool,
    ) -> Result<ProducerEntry, GatewayError> {
        let producer = self
            .transport(transport_id)?
            .produce(kind, rtp_parameters)
            .await?;
        let producer_id = producer.id().to_string();

        let engine_events = self.engine_events.clone();
        let connection_id = self.id;
        let hook_producer_id = producer_id.clone();
        producer.on_transport_close(Box::new(move || {
            let _ = engine_events.send(EngineEvent::ProducerTransportClosed {
                connection_id,
                producer_id: hook_producer_id,
            });
        }));

        self.producers.insert(
            producer_id.clone(),
            ProducerSlot {
                producer,
                is_screen_share,
            },
        );

        Ok(ProducerEntry {
            producer_id,
            user_id: self.id,
            is_screen_share,
        })
    }

    /// Subscribe to a producer on one of this endpoint's transports.
    pub async fn consume(
        &mut self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParams, GatewayError> {
        let consumer = self
            .transport(transport_id)?
            .consume(producer_id, rtp_capabilities, false)
            .await?;
        let consumer_id = consumer.id().to_string();

        if consumer.consumer_type() == ConsumerType::Simulcast {
            if let Err(e) = consumer
                .set_preferred_layers(PREFERRED_SIMULCAST_LAYERS)
                .await
            {
                warn!(
                    target: "mg.actor.meeting",
                    connection_id = %self.id,
                    consumer_id = %consumer_id,
                    error = %e,
                    "Failed to raise preferred simulcast layers"
                );
            }
        }

        let connection_id = self.id;
        let engine_events = self.engine_events.clone();
        let hook_consumer_id = consumer_id.clone();
        consumer.on_producer_close(Box::new(move || {
            let _ = engine_events.send(EngineEvent::ConsumerProducerClosed {
                connection_id,
                consumer_id: hook_consumer_id,
            });
        }));

        let engine_events = self.engine_events.clone();
        let hook_consumer_id = consumer_id.clone();
        consumer.on_transport_close(Box::new(move || {
            let _ = engine_events.send(EngineEvent::ConsumerTransportClosed {
                connection_id,
                consumer_id: hook_consumer_id,
            });
        }));

        let params = ConsumerParams {
            producer_id: consumer.producer_id().to_string(),
            id: consumer_id.clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
            consumer_type: consumer.consumer_type(),
            producer_paused: consumer.producer_paused(),
        };
        self.consumers.insert(consumer_id, consumer);
        Ok(params)
    }

    /// Close one of this endpoint's producers.
    ///
    /// Returns `false` if the producer was not owned (already closed).
    pub fn close_producer(&mut self, producer_id: &str) -> bool {
        match self.producers.remove(producer_id) {
            Some(slot) => {
                slot.producer.close();
                true
            }
            None => false,
        }
    }

    /// Forget a producer the engine already closed.
    pub fn remove_producer(&mut self, producer_id: &str) -> bool {
        self.producers.remove(producer_id).is_some()
    }

    /// Forget a consumer the engine already closed.
    pub fn remove_consumer(&mut self, consumer_id: &str) -> bool {
        self.consumers.remove(consumer_id).is_some()
    }

    /// Forget a transport the engine already closed.
    pub fn remove_transport(&mut self, transport_id: &str) -> bool {
        self.transports.remove(transport_id).is_some()
    }

    /// Directory entries for every producer this endpoint owns.
    #[must_use]
    pub fn producer_entries(&self) -> Vec<ProducerEntry> {
        self.producers
            .iter()
            .map(|(producer_id, slot)| ProducerEntry {
                producer_id: producer_id.clone(),
                user_id: self.id,
                is_screen_share: slot.is_screen_share,
            })
            .collect()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Close every owned transport. The engine cascades the closure to the
    /// producers and consumers living on them.
    pub fn close(mut self) {
        debug!(
            target: "mg.actor.meeting",
            connection_id = %self.id,
            transports = self.transports.len(),
            producers = self.producers.len(),
            consumers = self.consumers.len(),
            "Closing endpoint"
        );
        for (_, transport) in self.transports.drain() {
            transport.close();
        }
        for (_, consumer) in self.consumers.drain() {
            consumer.close();
        }
        for (_, slot) in self.producers.drain() {
            slot.producer.close();
        }
    }

    fn transport(&self, transport_id: &str) -> Result<&dyn Transport, GatewayError> {
        self.transports
            .get(transport_id)
            .map(|transport| transport.as_ref())
            .ok_or_else(|| GatewayError::TransportNotFound(transport_id.to_string()))
    }
}
