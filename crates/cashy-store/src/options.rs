//! Open options for [`crate::Store`].

use std::path::PathBuf;

use cashy_settings::StoreSettings;

use crate::errors::Result;
use crate::identity::AppIdentity;
use crate::migrations::Migration;
use crate::sqlite::ConnectionConfig;

/// Everything [`crate::Store::open`] needs.
///
/// `create` defaults to `true` and the migration list to empty.
#[derive(Debug)]
pub struct StoreOptions {
    /// Backing file, or [`crate::sqlite::MEMORY_PATH`].
    pub path: PathBuf,
    /// Allow creating the file when it is missing.
    pub create: bool,
    /// Identity the store must carry (or receive, when new).
    pub identity: AppIdentity,
    /// Ordered schema steps.
    pub migrations: Vec<Migration>,
    /// Per-connection engine settings.
    pub connection: ConnectionConfig,
}

impl StoreOptions {
    /// Options for `path` with creation allowed and no migrations.
    pub fn new(path: impl Into<PathBuf>, identity: AppIdentity) -> Self {
        Self {
            path: path.into(),
            create: true,
            identity,
            migrations: Vec::new(),
            connection: ConnectionConfig::default(),
        }
    }

    /// Whether a missing file may be created.
    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Replace the migration list.
    #[must_use]
    pub fn migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    /// Engine busy timeout.
    #[must_use]
    pub fn busy_timeout_ms(mut self, ms: u32) -> Self {
        self.connection.busy_timeout_ms = ms;
        self
    }

    /// Build options from loaded settings. Migrations are code, not
    /// settings, so the list starts empty.
    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        settings.validate()?;
        let identity = AppIdentity::new(
            settings.required_major_id,
            settings.minor_id,
            settings.minor_bit_width,
        )?;
        Ok(Self::new(&settings.file, identity)
            .create(settings.create)
            .busy_timeout_ms(settings.busy_timeout_ms))
    }
}
