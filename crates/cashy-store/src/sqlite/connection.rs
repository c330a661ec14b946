//! Opening the backing file.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::errors::{Result, StoreError};

/// Path that opens a private in-memory store.
pub const MEMORY_PATH: &str = ":memory:";

/// Per-connection engine settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

/// Open `path`, creating it (and its parent directories) only when `create`
/// is set.
///
/// Every connection gets foreign keys, the busy timeout, and
/// `synchronous = FULL` so that each autocommit write, the migration markers
/// included, is durable once it returns.
pub fn open(path: &Path, create: bool, config: &ConnectionConfig) -> Result<Connection> {
    let in_memory = path == Path::new(MEMORY_PATH);

    if !in_memory && !path.exists() {
        if !create {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut flags = OpenFlags::default();
    if !create {
        flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
    }

    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "synchronous", 2)?;

    debug!(path = %path.display(), create, "connection opened");
    Ok(conn)
}
