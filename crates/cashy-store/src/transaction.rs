//! Transaction coordination.
//!
//! A transaction holds the gate's permit from `BEGIN` until `COMMIT` or
//! `ROLLBACK`, so no other facade operation can observe or interleave with
//! it. The body talks to the engine through a [`Transaction`] handle that
//! skips the gate (the permit is already held) and has no way to start a
//! nested transaction.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::errors::{Result, StoreError};
use crate::gate::{AccessGate, GatePermit};
use crate::sqlite::shared::SharedConnection;
use crate::sqlite::{Executor, Params, Row, RunResult};

/// Engine access for the body of [`crate::Store::transaction`].
///
/// Clones share the same transaction. Once the transaction has committed or
/// rolled back, every call fails with [`StoreError::TransactionFinished`].
/// A statement that ends the transaction itself (`COMMIT`, `ROLLBACK`, `END`)
/// fails with [`StoreError::TransactionControl`] and finishes the handle.
#[derive(Clone)]
pub struct Transaction {
    conn: SharedConnection,
    active: Arc<AtomicBool>,
}

impl Transaction {
    /// First row of `sql`, if any.
    pub async fn get(&self, sql: impl Into<String>, params: Params) -> Result<Option<Row>> {
        let sql = sql.into();
        self.call(move |exec| exec.get(&sql, &params)).await
    }

    /// Every row of `sql`.
    pub async fn all(&self, sql: impl Into<String>, params: Params) -> Result<Vec<Row>> {
        let sql = sql.into();
        self.call(move |exec| exec.all(&sql, &params)).await
    }

    /// Execute one data-modifying statement.
    pub async fn run(&self, sql: impl Into<String>, params: Params) -> Result<RunResult> {
        let sql = sql.into();
        self.call(move |exec| exec.run(&sql, &params)).await
    }

    /// Execute several statements without parameters.
    pub async fn execute_batch(&self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.call(move |exec| exec.execute_batch(&sql)).await
    }

    /// Whether the transaction is still open.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Executor<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let active = Arc::clone(&self.active);
        self.conn
            .call(move |exec| {
                if !active.load(Ordering::Acquire) {
                    return Err(StoreError::TransactionFinished);
                }
                let out = f(exec);
                if exec.in_transaction() {
                    return out;
                }
                // The statement itself ended the transaction.
                active.store(false, Ordering::Release);
                out.and_then(|_| Err(StoreError::TransactionControl))
            })
            .await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Scope guard for one open transaction.
///
/// If it is dropped before [`TransactionSpan::commit`] or
/// [`TransactionSpan::rollback`] finished (the body panicked, or the caller
/// dropped the future), the drop rolls back synchronously. The permit is a
/// field, so it is released only after that rollback.
struct TransactionSpan {
    conn: SharedConnection,
    active: Arc<AtomicBool>,
    _permit: GatePermit,
}

impl TransactionSpan {
    async fn begin(conn: SharedConnection, permit: GatePermit) -> Result<Self> {
        conn.call(|exec| exec.execute_batch("BEGIN")).await?;
        debug!("transaction started");
        Ok(Self {
            conn,
            active: Arc::new(AtomicBool::new(true)),
            _permit: permit,
        })
    }

    fn handle(&self) -> Transaction {
        Transaction {
            conn: self.conn.clone(),
            active: Arc::clone(&self.active),
        }
    }

    async fn commit(self) -> Result<()> {
        let active = Arc::clone(&self.active);
        let committed = self
            .conn
            .call(move |exec| {
                active.store(false, Ordering::Release);
                if !exec.in_transaction() {
                    return Err(StoreError::TransactionControl);
                }
                exec.execute_batch("COMMIT")
            })
            .await;

        match committed {
            Ok(()) => {
                debug!("transaction committed");
                Ok(())
            }
            Err(StoreError::TransactionControl) => {
                warn!("transaction was ended by its own body; nothing left to commit");
                Err(StoreError::TransactionControl)
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }

    /// Best-effort: a failed rollback is logged and otherwise ignored.
    async fn rollback(self) {
        let active = Arc::clone(&self.active);
        let rolled_back = self
            .conn
            .call(move |exec| {
                active.store(false, Ordering::Release);
                exec.execute_batch("ROLLBACK")
            })
            .await;

        match rolled_back {
            Ok(()) => debug!("transaction rolled back"),
            Err(e) => warn!(error = %e, "rollback failed; keeping the original error"),
        }
    }
}

impl Drop for TransactionSpan {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        let outcome = self.conn.call_blocking(|exec| {
            if exec.in_transaction() {
                Some(exec.execute_batch("ROLLBACK"))
            } else {
                None
            }
        });
        match outcome.flatten() {
            Some(Ok(())) => warn!("transaction abandoned; rolled back"),
            Some(Err(e)) => warn!(error = %e, "rollback of abandoned transaction failed"),
            None => {}
        }
    }
}

/// Run `body` as one transaction behind `gate`.
///
/// The body's error type only needs to absorb [`StoreError`], so callers can
/// use their own error enum and still get gate and engine failures through it.
pub(crate) async fn run<F, Fut, T, E>(
    conn: &SharedConnection,
    gate: &AccessGate,
    body: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<StoreError>,
{
    let permit = gate.acquire().await?;
    let span = TransactionSpan::begin(conn.clone(), permit).await?;

    match body(span.handle()).await {
        Ok(value) => {
            span.commit().await?;
            Ok(value)
        }
        Err(err) => {
            span.rollback().await;
            Err(err)
        }
    }
}
