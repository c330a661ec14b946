//! Error types for the store lifecycle.
//!
//! Open-time failures ([`StoreError::IncompatibleStore`],
//! [`StoreError::UnsafeState`], [`StoreError::FutureSchema`],
//! [`StoreError::MigrationStep`]) are fatal for that open attempt and never
//! retried. Engine failures during normal operation surface as
//! [`StoreError::Engine`] with the gate already released.

use thiserror::Error;

/// Error a migration step may return. The runner keeps it as the `source` of
/// [`StoreError::MigrationStep`] so callers can downcast to their own type.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine rejected a statement or failed on I/O.
    #[error("engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    /// Filesystem error while preparing the backing file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be turned into open options.
    #[error("settings error: {0}")]
    Settings(#[from] cashy_settings::SettingsError),

    /// The file does not exist and creation was disabled.
    #[error("store not found: {0}")]
    NotFound(String),

    /// The store belongs to a different application family.
    #[error("incompatible store: expected major id {expected_major:#x}, found application id {found:#x}")]
    IncompatibleStore {
        /// Major identifier the caller requires.
        expected_major: u32,
        /// Raw application identifier stored in the file.
        found: i64,
    },

    /// The version counter is odd: an earlier migration never confirmed.
    #[error("unsafe store state: schema version {version} marks an interrupted migration; repair manually")]
    UnsafeState {
        /// The odd counter found on open.
        version: u32,
    },

    /// The store was migrated by a longer migration list than supplied.
    #[error("store schema version {version} is newer than the {supported} supplied migrations")]
    FutureSchema {
        /// Counter found on open.
        version: u32,
        /// Number of migrations the caller supplied.
        supported: usize,
    },

    /// A migration step failed; the counter is left odd.
    #[error("migration {index} ({description}) failed: {source}")]
    MigrationStep {
        /// Zero-based position of the failing step.
        index: usize,
        /// The step's description.
        description: String,
        /// The step's own error.
        #[source]
        source: StepError,
    },

    /// Identifier parts do not fit the 31-bit layout.
    #[error("invalid application identity: {0}")]
    InvalidIdentity(String),

    /// A metadata field holds a value the store cannot interpret.
    #[error("invalid store metadata: {0}")]
    InvalidMetadata(String),

    /// A typed row accessor could not read a column.
    #[error("column {column}: {detail}")]
    Column {
        /// Column name requested.
        column: String,
        /// Why the read failed.
        detail: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// A transaction handle was used after its transaction ended.
    #[error("transaction already finished")]
    TransactionFinished,

    /// A statement began, committed or rolled back a transaction that the
    /// store manages itself. Use [`crate::Store::transaction`] instead.
    #[error("statement changed the transaction state managed by the store")]
    TransactionControl,

    /// Background engine task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the error came from the open-time identity or version checks.
    pub fn is_open_rejection(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleStore { .. }
                | Self::UnsafeState { .. }
                | Self::FutureSchema { .. }
                | Self::MigrationStep { .. }
        )
    }
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
