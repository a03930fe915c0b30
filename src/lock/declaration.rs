use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{AtomqError, Result};

/// Strength of a table lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockStrength {
    /// Shared lock: concurrent readers allowed, writers wait.
    Read,
    /// Exclusive lock: everyone else waits.
    Write,
}

impl LockStrength {
    pub fn code(self) -> u8 {
        match self {
            LockStrength::Read => 1,
            LockStrength::Write => 2,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            LockStrength::Read => "READ",
            LockStrength::Write => "WRITE",
        }
    }
}

impl fmt::Display for LockStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl TryFrom<u8> for LockStrength {
    type Error = AtomqError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(LockStrength::Read),
            2 => Ok(LockStrength::Write),
            other => Err(AtomqError::InvalidLockStrength(other.to_string())),
        }
    }
}

impl FromStr for LockStrength {
    type Err = AtomqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(LockStrength::Read),
            "write" => Ok(LockStrength::Write),
            _ => Err(AtomqError::InvalidLockStrength(s.to_string())),
        }
    }
}

/// A table the caller declared it will touch.
///
/// `sequence` is resolved when the declaration is accepted: it holds the name of the
/// table's auto-increment sequence if one was requested and exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDeclaration {
    pub table: String,
    pub strength: LockStrength,
    pub lock_sequence: bool,
    pub sequence: Option<String>,
}

/// A single lock request handed to the database handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableLock {
    pub name: String,
    pub strength: LockStrength,
}

impl TableLock {
    pub fn new(name: impl Into<String>, strength: LockStrength) -> Self {
        Self {
            name: name.into(),
            strength,
        }
    }
}

impl fmt::Display for TableLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.strength)
    }
}
