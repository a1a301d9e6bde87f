//! Concurrency slots
//!
//! Counting permits a worker holds while a job body executes.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Fixed pool of execution permits
#[derive(Debug, Clone)]
pub struct ConcurrencySlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot; released on drop
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencySlots {
    /// Create `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<SlotPermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        Ok(SlotPermit { _permit: permit })
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotPermit { _permit: permit })
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }
}
