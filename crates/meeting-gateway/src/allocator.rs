//! Routing-context allocator.
//!
//! Spreads meetings across a fixed pool of media workers, round-robin. The
//! allocator is owned by the gateway actor, so reading and advancing the
//! rotating index is never concurrent.

use crate::errors::GatewayError;

use media_engine::MediaWorker;
use std::sync::Arc;

/// Round-robin selection over a fixed worker pool.
pub struct RouterAllocator {
    workers: Vec<Arc<dyn MediaWorker>>,
    next: usize,
}

impl RouterAllocator {
    /// Create an allocator over `workers`. The pool must not be empty.
    pub fn new(workers: Vec<Arc<dyn MediaWorker>>) -> Result<Self, GatewayError> {
        if workers.is_empty() {
            return Err(GatewayError::Internal(
                "media worker pool is empty".to_string(),
            ));
        }
        Ok(Self { workers, next: 0 })
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Pick the next worker, wrapping at the pool size.
    pub fn next_worker(&mut self) -> Result<Arc<dyn MediaWorker>, GatewayError> {
        let index = self.next % self.workers.len().max(1);
        let worker = self
            .workers
            .get(index)
            .map(Arc::clone)
            .ok_or_else(|| GatewayError::Internal("media worker pool is empty".to_string()))?;
        self.next = (index + 1) % self.workers.len().max(1);
        Ok(worker)
    }
}
