//! Controllable Media Engine worker for gateway tests.
//!
//! `MockWorker` delegates to the in-process [`LocalWorker`] and can be
//! configured to:
//! - Hold router allocation until released (routing context stays pending)
//! - Fail router allocation
//! - Reject the incoming bitrate cap or the DTLS connect on every transport
//!
//! # Example
//!
//! ```rust,ignore
//! use mg_test_utils::MockWorker;
//!
//! let worker = MockWorker::builder()
//!     .id("worker-test-1")
//!     .reject_bitrate_cap()
//!     .build();
//!
//! // Hand `worker` to the gateway as an `Arc<dyn MediaWorker>`...
//! ```

use async_trait::async_trait;
use media_engine::{
    CloseHook, Consumer, DtlsParameters, LocalWorker, LocalWorkerSettings, MediaError, MediaKind,
    MediaWorker, Producer, Router, RtpCapabilities, RtpCodecCapability, RtpParameters, Transport,
    TransportParams, WebRtcTransportOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Behaviour switches shared by a worker and every object it creates.
#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    reject_bitrate_cap: bool,
    reject_connect: bool,
}

/// Media worker with injectable faults.
#[derive(Debug)]
pub struct MockWorker {
    inner: LocalWorker,
    hold_router: bool,
    fail_router: bool,
    faults: Faults,
    released: watch::Sender<bool>,
    routers_created: AtomicUsize,
}

impl MockWorker {
    /// Create a new MockWorker builder.
    #[must_use]
    pub fn builder() -> MockWorkerBuilder {
        MockWorkerBuilder::default()
    }

    /// A worker without faults.
    #[must_use]
    pub fn healthy() -> Arc<Self> {
        Self::builder().build()
    }

    /// Let held router allocations complete.
    pub fn release_router(&self) {
        self.released.send_replace(true);
    }

    /// Number of routers this worker has handed out.
    #[must_use]
    pub fn routers_created(&self) -> usize {
        self.routers_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaWorker for MockWorker {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<Box<dyn Router>, MediaError> {
        if self.hold_router {
            let mut released = self.released.subscribe();
            // Sender lives as long as the worker, so this only errors on teardown.
            let _ = released.wait_for(|released| *released).await;
        }
        if self.fail_router {
            return Err(MediaError::Unavailable("worker is down".to_string()));
        }

        let router = self.inner.create_router(media_codecs).await?;
        self.routers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRouter {
            inner: router,
            faults: self.faults,
        }))
    }
}

/// Builder for MockWorker configuration.
#[derive(Debug, Default)]
pub struct MockWorkerBuilder {
    id: Option<String>,
    hold_router: bool,
    fail_router: bool,
    faults: Faults,
}

impl MockWorkerBuilder {
    /// Set the worker ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Block router allocation until [`MockWorker::release_router`] is called.
    #[must_use]
    pub fn hold_router(mut self) -> Self {
        self.hold_router = true;
        self
    }

    /// Fail every router allocation with `Unavailable`.
    #[must_use]
    pub fn fail_router(mut self) -> Self {
        self.fail_router = true;
        self
    }

    /// Reject `set_max_incoming_bitrate` on every transport.
    #[must_use]
    pub fn reject_bitrate_cap(mut self) -> Self {
        self.faults.reject_bitrate_cap = true;
        self
    }

    /// Reject `connect` on every transport.
    #[must_use]
    pub fn reject_connect(mut self) -> Self {
        self.faults.reject_connect = true;
        self
    }

    /// Build the MockWorker.
    #[must_use]
    pub fn build(self) -> Arc<MockWorker> {
        let id = self.id.unwrap_or_else(|| "worker-test-default".to_string());
        let (released, _) = watch::channel(false);
        Arc::new(MockWorker {
            inner: LocalWorker::new(id, &LocalWorkerSettings::default()),
            hold_router: self.hold_router,
            fail_router: self.fail_router,
            faults: self.faults,
            released,
            routers_created: AtomicUsize::new(0),
        })
    }
}

struct MockRouter {
    inner: Box<dyn Router>,
    faults: Faults,
}

#[async_trait]
impl Router for MockRouter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        self.inner.can_consume(producer_id, rtp_capabilities)
    }

    async fn create_webrtc_transport(
        &self,
        options: &WebRtcTransportOptions,
    ) -> Result<Box<dyn Transport>, MediaError> {
        let transport = self.inner.create_webrtc_transport(options).await?;
        Ok(Box::new(MockTransport {
            inner: transport,
            faults: self.faults,
        }))
    }
}

struct MockTransport {
    inner: Box<dyn Transport>,
    faults: Faults,
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn params(&self) -> TransportParams {
        self.inner.params()
    }

    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), MediaError> {
        if self.faults.reject_bitrate_cap {
            return Err(MediaError::Unavailable(format!(
                "bitrate cap {bitrate} not supported"
            )));
        }
        self.inner.set_max_incoming_bitrate(bitrate).await
    }

    async fn connect(&self, dtls_parameters: &DtlsParameters) -> Result<(), MediaError> {
        if self.faults.reject_connect {
            return Err(MediaError::InvalidParameters(
                "dtls handshake rejected".to_string(),
            ));
        }
        self.inner.connect(dtls_parameters).await
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<Box<dyn Producer>, MediaError> {
        self.inner.produce(kind, rtp_parameters).await
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Box<dyn Consumer>, MediaError> {
        self.inner
            .consume(producer_id, rtp_capabilities, paused)
            .await
    }

    fn on_close(&self, hook: CloseHook) {
        self.inner.on_close(hook);
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_engine::default_media_codecs;
    use meeting_gateway::config::MediaSettings;
    use std::time::Duration;

    #[tokio::test]
    async fn test_held_router_waits_for_release() {
        let worker = MockWorker::builder().hold_router().build();

        let pending = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.create_router(&default_media_codecs()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        assert_eq!(worker.routers_created(), 0);

        worker.release_router();
        let router = pending.await.unwrap();
        assert!(router.is_ok());
        assert_eq!(worker.routers_created(), 1);
    }

    #[tokio::test]
    async fn test_failed_router() {
        let worker = MockWorker::builder().fail_router().build();
        let result = worker.create_router(&default_media_codecs()).await;
        assert!(matches!(result, Err(MediaError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_transport_faults() {
        let worker = MockWorker::builder()
            .reject_bitrate_cap()
            .reject_connect()
            .build();
        let router = worker.create_router(&default_media_codecs()).await.unwrap();
        let transport = router
            .create_webrtc_transport(&MediaSettings::default().transport_options(false))
            .await
            .unwrap();

        assert!(transport.set_max_incoming_bitrate(1_000).await.is_err());
        assert!(matches!(
            transport.connect(&crate::fixtures::dtls_parameters()).await,
            Err(MediaError::InvalidParameters(_))
        ));
    }
}
