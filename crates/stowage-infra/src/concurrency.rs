//! Bounded upload concurrency.
//!
//! Acquisition never waits: when every slot is taken the caller is turned away
//! immediately. A slot is returned when its [`UploadSlot`] is dropped, whether
//! the upload finished, failed, or its task was cancelled.

use std::sync::Arc;

use stowage_core::AppError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug, Clone)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl UploadLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn try_acquire(&self) -> Result<UploadSlot, AppError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                tracing::debug!(
                    in_flight = self.in_flight(),
                    capacity = self.capacity,
                    "Upload slot acquired"
                );
                Ok(UploadSlot { _permit: permit })
            }
            Err(TryAcquireError::NoPermits) => {
                tracing::warn!(
                    capacity = self.capacity,
                    "Max concurrent uploads reached, rejecting upload"
                );
                Err(AppError::ConcurrencyLimitReached {
                    capacity: self.capacity,
                })
            }
            Err(TryAcquireError::Closed) => {
                Err(AppError::Internal("Upload limiter is closed".to_string()))
            }
        }
    }

    /// Uploads currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Permission to run one upload. Dropping it releases the slot exactly once.
#[derive(Debug)]
#[must_use = "the slot is released as soon as it is dropped"]
pub struct UploadSlot {
    _permit: OwnedSemaphorePermit,
}

impl UploadSlot {
    /// Release the slot explicitly. Equivalent to dropping it.
    pub fn release(self) {}
}
