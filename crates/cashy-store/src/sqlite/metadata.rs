//! Header fields outside ordinary tables.
//!
//! The application identifier lives in `PRAGMA application_id` and the schema
//! version counter in `PRAGMA user_version`; both are signed 32-bit header
//! words, so writes are range-checked here.

use crate::errors::{Result, StoreError};
use crate::sqlite::executor::Executor;

const USER_TABLES_SQL: &str = "SELECT COUNT(*) FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'";

impl Executor<'_> {
    /// Raw stored application identifier.
    pub fn application_id(&self) -> Result<i64> {
        Ok(self
            .connection()
            .pragma_query_value(None, "application_id", |r| r.get(0))?)
    }

    /// Overwrite the application identifier. Only identity negotiation and
    /// the migration runner write the header.
    pub(crate) fn set_application_id(&self, id: u32) -> Result<()> {
        let id = i32::try_from(id)
            .map_err(|_| StoreError::InvalidIdentity(format!("{id:#x} exceeds 31 bits")))?;
        self.connection()
            .pragma_update(None, "application_id", id)?;
        Ok(())
    }

    /// Stored schema version counter.
    pub fn user_version(&self) -> Result<u32> {
        let raw: i64 = self
            .connection()
            .pragma_query_value(None, "user_version", |r| r.get(0))?;
        u32::try_from(raw)
            .map_err(|_| StoreError::InvalidMetadata(format!("negative schema version {raw}")))
    }

    /// Overwrite the schema version counter. Outside an explicit transaction
    /// this is its own durable write.
    pub(crate) fn set_user_version(&self, version: u32) -> Result<()> {
        let version = i32::try_from(version).map_err(|_| {
            StoreError::InvalidMetadata(format!("schema version {version} out of range"))
        })?;
        self.connection()
            .pragma_update(None, "user_version", version)?;
        Ok(())
    }

    /// Number of user-defined tables; internal `sqlite_*` tables are ignored.
    pub fn user_table_count(&self) -> Result<u64> {
        let count: i64 = self
            .connection()
            .query_row(USER_TABLES_SQL, [], |r| r.get(0))?;
        u64::try_from(count)
            .map_err(|_| StoreError::InvalidMetadata(format!("table count {count}")))
    }
}
