//! Connection admission: bounds the number of concurrent in-flight transfers.
//!
//! Workers acquire a permit before starting an attempt and give it back by
//! dropping it. Permits are move-only, so a slot can never be released twice.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Default number of concurrent transfers.
pub const DEFAULT_CAPACITY: usize = 4;

/// Counting semaphore over concurrent active transfers.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    capacity: usize,
    slots: Arc<Semaphore>,
}

/// One admission slot. Released when dropped.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// Explicit release; equivalent to dropping.
    pub fn release(self) {}
}

impl AdmissionController {
    /// Create a controller with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait until a slot is free. Waiters are served in FIFO order.
    pub async fn acquire(&self) -> AdmissionPermit {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            // The semaphore is never closed while the controller exists.
            .unwrap_or_else(|_| unreachable!("admission semaphore closed"));
        AdmissionPermit { _permit: permit }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Some(AdmissionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
