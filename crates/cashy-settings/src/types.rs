//! Settings type definitions.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Widest minor field the 31-bit identifier can carry next to a non-empty major.
pub const MAX_MINOR_BITS: u8 = 30;

/// Options recognised when opening a store.
///
/// Field names are camelCase on disk. Every field has a default, so a partial
/// file is fine:
///
/// ```json
/// { "file": "/var/lib/cashy/books.sqlite", "minorId": 2, "minorBitWidth": 3 }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Path of the backing file, or `:memory:`.
    pub file: String,
    /// Allow creating the file when it does not exist.
    pub create: bool,
    /// Major part of the application identifier this store family uses.
    pub required_major_id: u32,
    /// Minor part written when a new store is created.
    pub minor_id: u32,
    /// Number of low identifier bits reserved for the minor part.
    pub minor_bit_width: u8,
    /// How long the engine waits on a locked file before failing.
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            file: String::new(),
            create: true,
            required_major_id: 0,
            minor_id: 0,
            minor_bit_width: 0,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreSettings {
    /// Settings for `file` with every other field defaulted.
    pub fn for_file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// Reject settings that can never open a store.
    pub fn validate(&self) -> Result<()> {
        if self.file.trim().is_empty() {
            return Err(SettingsError::InvalidValue("file must not be empty".into()));
        }
        if self.minor_bit_width > MAX_MINOR_BITS {
            return Err(SettingsError::InvalidValue(format!(
                "minorBitWidth {} exceeds {MAX_MINOR_BITS}",
                self.minor_bit_width
            )));
        }
        Ok(())
    }
}
