//! `SQLite` plumbing beneath the store facade.
//!
//! - **[`connection`]**: opening the backing file and per-connection pragmas.
//! - **[`executor`]**: the synchronous `get`/`all`/`run`/`execute_batch`
//!   primitives plus the [`Row`] and [`RunResult`] value types.
//! - **[`metadata`]**: application identifier, schema version counter and the
//!   user-table probe used to recognise a new store.
//! - **`shared`**: the connection slot shared by the facade and transaction
//!   handles, driving the executor on the blocking pool.

pub mod connection;
pub mod executor;
pub mod metadata;
pub(crate) mod shared;

pub use connection::{ConnectionConfig, MEMORY_PATH, open};
pub use executor::{Executor, Params, Row, RunResult};
