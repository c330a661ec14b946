//! The connection slot shared by the facade and transaction handles.
//!
//! Engine calls are blocking, so [`SharedConnection::call`] moves each one to
//! tokio's blocking pool. The mutex is only ever contended when a caller
//! bypasses the gate, which the crate never does outside a held permit.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::Span;

use crate::errors::{Result, StoreError};
use crate::sqlite::executor::Executor;

#[derive(Clone)]
pub(crate) struct SharedConnection {
    slot: Arc<Mutex<Option<Connection>>>,
}

impl SharedConnection {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Executor<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::clone(&self.slot);
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let guard = slot.lock();
            let conn = guard.as_ref().ok_or(StoreError::Closed)?;
            f(&Executor::new(conn))
        })
        .await
        .map_err(|e| StoreError::Internal(format!("engine task failed: {e}")))?
    }

    /// Run `f` on the current thread. Used from `Drop`, where nothing can be
    /// awaited. Returns `None` once the connection is closed.
    pub(crate) fn call_blocking<T>(&self, f: impl FnOnce(&Executor<'_>) -> T) -> Option<T> {
        let guard = self.slot.lock();
        guard.as_ref().map(|conn| f(&Executor::new(conn)))
    }

    /// Take the connection out of the slot and close it. Closing twice is a
    /// no-op.
    pub(crate) async fn close(&self) -> Result<()> {
        let slot = Arc::clone(&self.slot);
        tokio::task::spawn_blocking(move || match slot.lock().take() {
            Some(conn) => conn.close().map_err(|(_, e)| StoreError::Engine(e)),
            None => Ok(()),
        })
        .await
        .map_err(|e| StoreError::Internal(format!("close task failed: {e}")))?
    }
}
