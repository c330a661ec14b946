//! The store facade.
//!
//! [`Store::open`] negotiates identity and runs migrations before anything
//! else can reach the connection, so the open sequence needs no gate. After
//! that every operation goes through the [`AccessGate`]: one permit, held for
//! the operation's whole engine-call sequence, granted in arrival order.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{Span, debug, info, instrument, warn};

use crate::errors::{Result, StoreError};
use crate::gate::AccessGate;
use crate::identity::negotiate;
use crate::migrations::{MigrationReport, run_migrations};
use crate::options::StoreOptions;
use crate::sqlite::shared::SharedConnection;
use crate::sqlite::{Executor, Params, Row, RunResult, connection};
use crate::transaction::{self, Transaction};

/// What the open sequence found and did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenInfo {
    /// The file had no user tables and was claimed for this identity.
    pub created: bool,
    /// Minor identifier stored in the file. For an existing store this is
    /// what creation wrote, not what the opener asked for.
    pub minor_id: u32,
    /// Migrations applied during this open.
    pub migration: MigrationReport,
}

/// Header fields as currently stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreMetadata {
    /// Raw application identifier.
    pub application_id: i64,
    /// Schema version counter.
    pub schema_version: u32,
}

struct StoreInner {
    conn: SharedConnection,
    gate: AccessGate,
    path: PathBuf,
    info: OpenInfo,
}

/// An open store. Cheap to clone; clones share the connection and the gate.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open (or create) the backing file, check its identity and bring its
    /// schema up to date.
    ///
    /// Fails with [`StoreError::IncompatibleStore`],
    /// [`StoreError::UnsafeState`], [`StoreError::FutureSchema`] or
    /// [`StoreError::MigrationStep`] without retrying. The connection is
    /// closed on any failure.
    #[instrument(skip_all, fields(path = %options.path.display()))]
    pub async fn open(options: StoreOptions) -> Result<Self> {
        let StoreOptions {
            path,
            create,
            identity,
            migrations,
            connection: config,
        } = options;

        let span = Span::current();
        let open_path = path.clone();
        let (conn, info) = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let conn = connection::open(&open_path, create, &config)?;
            let info = {
                let exec = Executor::new(&conn);
                let negotiated = negotiate(&exec, &identity)?;
                let migration = run_migrations(&exec, negotiated.version, &migrations)?;
                OpenInfo {
                    created: negotiated.created,
                    minor_id: negotiated.minor,
                    migration,
                }
            };
            Ok::<_, StoreError>((conn, info))
        })
        .await
        .map_err(|e| StoreError::Internal(format!("open task failed: {e}")))??;

        info!(
            created = info.created,
            minor_id = info.minor_id,
            schema_version = info.migration.to_version,
            applied = info.migration.applied.len(),
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: SharedConnection::new(conn),
                gate: AccessGate::new(),
                path,
                info,
            }),
        })
    }

    /// First row of `sql`, or `None`.
    pub async fn get(&self, sql: impl Into<String>, params: Params) -> Result<Option<Row>> {
        let sql = sql.into();
        self.gated(move |exec| exec.get(&sql, &params)).await
    }

    /// Every row of `sql`.
    pub async fn all(&self, sql: impl Into<String>, params: Params) -> Result<Vec<Row>> {
        let sql = sql.into();
        self.gated(move |exec| exec.all(&sql, &params)).await
    }

    /// Execute one data-modifying statement.
    pub async fn run(&self, sql: impl Into<String>, params: Params) -> Result<RunResult> {
        let sql = sql.into();
        self.gated(move |exec| exec.run(&sql, &params)).await
    }

    /// Execute several statements without parameters.
    ///
    /// Transaction control belongs to [`Store::transaction`]: a batch that
    /// leaves a transaction open is rolled back and fails with
    /// [`StoreError::TransactionControl`].
    pub async fn execute_batch(&self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.gated(move |exec| exec.execute_batch(&sql)).await
    }

    /// Run `body` inside `BEGIN` / `COMMIT`.
    ///
    /// The gate is held from `BEGIN` until the transaction ends, so nothing
    /// else observes the body's writes before they commit. If the body fails
    /// the transaction is rolled back and the body's error returned; a failed
    /// rollback is only logged. Dropping the returned future (or a panic in
    /// the body) also rolls back.
    ///
    /// ```ignore
    /// let id = store
    ///     .transaction(|tx| async move {
    ///         let res = tx.run("INSERT INTO accounts (name) VALUES (?1)", sql_params!["cash".to_owned()]).await?;
    ///         Ok::<_, StoreError>(res.last_insert_rowid)
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<F, Fut, T, E>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        transaction::run(&self.inner.conn, &self.inner.gate, body).await
    }

    /// Read the stored identifier and version counter.
    pub async fn metadata(&self) -> Result<StoreMetadata> {
        self.gated(|exec| {
            Ok(StoreMetadata {
                application_id: exec.application_id()?,
                schema_version: exec.user_version()?,
            })
        })
        .await
    }

    /// Wait for the operation in progress, then close the connection.
    ///
    /// Operations still queued, and any issued later, fail with
    /// [`StoreError::Closed`]. Closing again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let permit = match self.inner.gate.acquire().await {
            Ok(permit) => permit,
            Err(StoreError::Closed) => {
                debug!("store already closed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.inner.gate.close();
        let closed = self.inner.conn.close().await;
        drop(permit);

        if closed.is_ok() {
            info!(path = %self.inner.path.display(), "store closed");
        }
        closed
    }

    /// Whether [`Store::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.gate.is_closed()
    }

    /// What the open sequence negotiated.
    pub fn info(&self) -> &OpenInfo {
        &self.inner.info
    }

    /// Minor identifier stored in the file.
    pub fn minor_id(&self) -> u32 {
        self.inner.info.minor_id
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn gated<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Executor<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.inner.gate.acquire().await?;
        self.inner
            .conn
            .call(move |exec| {
                let out = f(exec);
                if !exec.in_transaction() {
                    return out;
                }
                // A stray BEGIN must not outlive the permit.
                if let Err(e) = exec.execute_batch("ROLLBACK") {
                    warn!(error = %e, "rollback of stray transaction failed");
                }
                out.and_then(|_| Err(StoreError::TransactionControl))
            })
            .await
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("info", &self.inner.info)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
