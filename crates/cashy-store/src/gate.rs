//! Single-permit admission gate.
//!
//! Every facade operation holds the gate's only permit for its whole engine
//! call sequence, so no two operations ever interleave. Waiters are admitted
//! strictly in arrival order (`tokio::sync::Semaphore` is fair). Dropping a
//! [`GatePermit`] only schedules the next waiter; it runs on a later turn of
//! the scheduler, never inside the releasing call.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::{Result, StoreError};

/// Mutual exclusion with FIFO admission and capacity fixed at one.
#[derive(Debug)]
pub struct AccessGate {
    permits: Arc<Semaphore>,
}

/// Proof of admission; releases the gate on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl AccessGate {
    /// A gate with its single permit available.
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the permit. Fails with [`StoreError::Closed`] once the gate
    /// is closed, including for callers already waiting.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Whether the permit is currently held.
    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Refuse all pending and future acquisitions. A permit already held
    /// stays valid until dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Whether [`AccessGate::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}
