//! Application identity negotiation.
//!
//! The identifier is a 31-bit word `(major << minor_bits) | minor`. The major
//! part names the file family and must match on every open; the minor part is
//! written once at creation and afterwards only reported (a store created
//! with minor 1 stays minor 1 no matter what later openers ask for).

use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::sqlite::Executor;

/// Width of the identifier word.
pub const IDENTIFIER_BITS: u8 = 31;

/// The identity a caller requires of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppIdentity {
    major: u32,
    minor: u32,
    minor_bits: u8,
}

impl AppIdentity {
    /// Build an identity, checking that both parts fit the 31-bit word.
    pub fn new(major: u32, minor: u32, minor_bits: u8) -> Result<Self> {
        if minor_bits >= IDENTIFIER_BITS {
            return Err(StoreError::InvalidIdentity(format!(
                "minor width {minor_bits} leaves no room for a major part"
            )));
        }
        if u64::from(minor) >> minor_bits != 0 {
            return Err(StoreError::InvalidIdentity(format!(
                "minor {minor} does not fit in {minor_bits} bits"
            )));
        }
        if (u64::from(major) << minor_bits) >> IDENTIFIER_BITS != 0 {
            return Err(StoreError::InvalidIdentity(format!(
                "major {major:#x} shifted by {minor_bits} exceeds {IDENTIFIER_BITS} bits"
            )));
        }
        Ok(Self {
            major,
            minor,
            minor_bits,
        })
    }

    /// Identity with no minor part.
    pub fn major_only(major: u32) -> Result<Self> {
        Self::new(major, 0, 0)
    }

    /// Required major part.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor part written on creation.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Bits reserved for the minor part.
    pub fn minor_bits(&self) -> u8 {
        self.minor_bits
    }

    /// The combined identifier word.
    pub fn application_id(&self) -> u32 {
        (self.major << self.minor_bits) | self.minor
    }

    /// Split a stored identifier into `(major, minor)` using this identity's
    /// layout. `None` when the value cannot be a 31-bit identifier at all.
    pub fn split(&self, stored: i64) -> Option<(u32, u32)> {
        let word = u32::try_from(stored).ok().filter(|w| w >> IDENTIFIER_BITS == 0)?;
        let mask = (1u32 << self.minor_bits) - 1;
        Some((word >> self.minor_bits, word & mask))
    }
}

/// What negotiation found out about the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Negotiated {
    /// Whether the store had no user tables and was claimed just now.
    pub created: bool,
    /// Minor part in effect for this store.
    pub minor: u32,
    /// Schema version counter to start migrating from.
    pub version: u32,
}

/// Decide new-store vs existing-store and validate the identifier.
///
/// A store with no user tables is new whatever its header says: the
/// identifier is written and the version reported as 0. Any other store must
/// carry the required major part or the open is refused without writing.
pub fn negotiate(exec: &Executor<'_>, identity: &AppIdentity) -> Result<Negotiated> {
    if exec.user_table_count()? == 0 {
        exec.set_application_id(identity.application_id())?;
        info!(
            application_id = identity.application_id(),
            "claimed empty store"
        );
        return Ok(Negotiated {
            created: true,
            minor: identity.minor(),
            version: 0,
        });
    }

    let stored = exec.application_id()?;
    let minor = match identity.split(stored) {
        Some((major, minor)) if major == identity.major() => minor,
        _ => {
            return Err(StoreError::IncompatibleStore {
                expected_major: identity.major(),
                found: stored,
            });
        }
    };

    let version = exec.user_version()?;
    debug!(minor, version, "existing store accepted");
    Ok(Negotiated {
        created: false,
        minor,
        version,
    })
}
