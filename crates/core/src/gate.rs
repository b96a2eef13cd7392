//! Process-wide bound on simultaneous network operations
//!
//! One [`ConcurrencyGate`] is created per process and cloned into every
//! fan-out level: a directory upload, the segment uploads of each file in it,
//! and the manifest writes all draw permits from the same semaphore. Each
//! level also schedules up to `capacity` children at once, so the number of
//! logical transfers in progress multiplies with nesting depth while the
//! number of requests on the wire never exceeds `capacity`.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Counting semaphore shared by every transfer in the process
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of gate capacity, released when dropped
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    /// Give the capacity back to the gate
    pub fn release(self) {}
}

impl ConcurrencyGate {
    /// Create a gate; a capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until capacity is available
    pub async fn acquire(&self) -> Result<Permit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::General("concurrency gate closed".into()))?;
        Ok(Permit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(1)
    }
}
