//! # cashy-store
//!
//! Lifecycle of a single embedded `SQLite` store:
//!
//! - **Identity**: a 31-bit application identifier splits into a major part
//!   (must match on every open) and a minor part (written at creation, then
//!   only reported). A file with no user tables is treated as new.
//! - **Migrations**: an ordered list of steps, each applied exactly once. The
//!   version counter goes odd before a step and even after it, so an
//!   interrupted step is detected on the next open.
//! - **Gate**: every operation, transactions included, holds a single FIFO
//!   permit for its whole engine-call sequence.
//! - **Facade**: [`Store`] with `get`, `all`, `run`, `transaction` and `close`.
//!
//! ```ignore
//! let store = Store::open(
//!     StoreOptions::new("books.sqlite", AppIdentity::new(0x0266_E000, 2, 3)?)
//!         .migrations(vec![Migration::sql("accounts", "CREATE TABLE accounts (name TEXT);")]),
//! )
//! .await?;
//! store.run("INSERT INTO accounts (name) VALUES (?1)", sql_params!["cash".to_owned()]).await?;
//! store.close().await?;
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod gate;
pub mod identity;
pub mod migrations;
pub mod options;
pub mod sqlite;
pub mod store;
pub mod transaction;

pub use errors::{Result, StepError, StoreError};
pub use gate::{AccessGate, GatePermit};
pub use identity::{AppIdentity, IDENTIFIER_BITS, Negotiated};
pub use migrations::{Migration, MigrationReport, SchemaState};
pub use options::StoreOptions;
pub use rusqlite::types::Value;
pub use sqlite::{ConnectionConfig, Executor, MEMORY_PATH, Params, Row, RunResult};
pub use store::{OpenInfo, Store, StoreMetadata};
pub use transaction::Transaction;

/// Build a [`Params`] list, converting each argument with [`Value::from`].
///
/// ```ignore
/// store.run("INSERT INTO t (a, b) VALUES (?1, ?2)", sql_params![1_i64, "x".to_owned()]).await?;
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($param:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($param)),+]
    };
}
