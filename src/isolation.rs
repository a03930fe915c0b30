use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{AtomqError, Result};

/// Defines the isolation levels an atomic unit of work can request.
///
/// Each level documents which [`Anomaly`] values remain possible under it (see
/// [`anomalies_for`]). The numeric codes returned by [`IsolationLevel::code`] are the
/// ones used by the database layer's configuration and are stable.
///
/// Only [`IsolationLevel::Serializable`] is currently accepted by the coordinator; the
/// other levels are described so callers can reason about the risks they would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// **Read Uncommitted:**
    ///
    /// Uncommitted changes of concurrent units of work are visible. Every anomaly is possible.
    ReadUncommitted,
    /// **Read Committed:**
    ///
    /// Only committed data is visible, but two reads of the same row may disagree and
    /// range reads may see new rows.
    ReadCommitted,
    /// **Repeatable Read:**
    ///
    /// Rows read once keep their value for the rest of the unit of work. Range reads may
    /// still see phantoms.
    RepeatableRead,
    /// **Serializable:**
    ///
    /// The unit of work behaves as if it ran alone. No anomaly is possible.
    Serializable,
}

/// Classical read/write anomalies a concurrent unit of work may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anomaly {
    /// Two concurrent writers overwrite each other and one update vanishes.
    LostUpdate,
    /// A reader sees data another unit of work has not committed (and may roll back).
    DirtyRead,
    /// Reading the same row twice yields different values.
    NonRepeatableRead,
    /// Repeating a range read yields rows that were not there before.
    Phantom,
}

/// All isolation levels, weakest first.
pub const ISOLATION_LEVELS: [IsolationLevel; 4] = [
    IsolationLevel::ReadUncommitted,
    IsolationLevel::ReadCommitted,
    IsolationLevel::RepeatableRead,
    IsolationLevel::Serializable,
];

/// All known anomalies.
pub const ANOMALIES: [Anomaly; 4] = [
    Anomaly::LostUpdate,
    Anomaly::DirtyRead,
    Anomaly::NonRepeatableRead,
    Anomaly::Phantom,
];

const READ_UNCOMMITTED_RISKS: &[Anomaly] = &ANOMALIES;
const READ_COMMITTED_RISKS: &[Anomaly] = &[Anomaly::NonRepeatableRead, Anomaly::Phantom];
const REPEATABLE_READ_RISKS: &[Anomaly] = &[Anomaly::Phantom];
const SERIALIZABLE_RISKS: &[Anomaly] = &[];

/// Returns the anomalies still possible at `level`.
pub fn anomalies_for(level: IsolationLevel) -> &'static [Anomaly] {
    match level {
        IsolationLevel::ReadUncommitted => READ_UNCOMMITTED_RISKS,
        IsolationLevel::ReadCommitted => READ_COMMITTED_RISKS,
        IsolationLevel::RepeatableRead => REPEATABLE_READ_RISKS,
        IsolationLevel::Serializable => SERIALIZABLE_RISKS,
    }
}

/// Returns `true` if `anomaly` can occur at `level`.
pub fn is_anomaly_possible(level: IsolationLevel, anomaly: Anomaly) -> bool {
    anomalies_for(level).contains(&anomaly)
}

/// Checks a pair of raw codes, as stored in configuration, for anomaly exposure.
///
/// # Errors
///
/// Returns [`AtomqError::InvalidArgument`] if either code is unknown.
pub fn is_anomaly_possible_code(level: u8, anomaly: u8) -> Result<bool> {
    let level = IsolationLevel::try_from(level)?;
    let anomaly = Anomaly::try_from(anomaly)?;
    Ok(is_anomaly_possible(level, anomaly))
}

/// Fails unless the coordinator is able to honour `level`.
///
/// # Errors
///
/// Returns [`AtomqError::UnsupportedIsolation`] for every level except `Serializable`.
pub fn validate_level(level: IsolationLevel) -> Result<()> {
    match level {
        IsolationLevel::Serializable => Ok(()),
        IsolationLevel::ReadUncommitted
        | IsolationLevel::ReadCommitted
        | IsolationLevel::RepeatableRead => Err(AtomqError::UnsupportedIsolation(level)),
    }
}

/// Validates a raw isolation code.
///
/// # Errors
///
/// Unknown codes yield [`AtomqError::InvalidArgument`], known levels other than
/// `Serializable` yield [`AtomqError::UnsupportedIsolation`].
pub fn validate_level_code(code: u8) -> Result<IsolationLevel> {
    let level = IsolationLevel::try_from(code)?;
    validate_level(level)?;
    Ok(level)
}

impl IsolationLevel {
    pub fn code(self) -> u8 {
        match self {
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::ReadCommitted => 2,
            IsolationLevel::RepeatableRead => 3,
            IsolationLevel::Serializable => 4,
        }
    }

    /// SQL spelling, as used in `SET TRANSACTION ISOLATION LEVEL ...`.
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl TryFrom<u8> for IsolationLevel {
    type Error = AtomqError;

    fn try_from(code: u8) -> Result<Self> {
        ISOLATION_LEVELS
            .into_iter()
            .find(|level| level.code() == code)
            .ok_or_else(|| AtomqError::InvalidArgument(format!("unknown isolation level {code}")))
    }
}

impl FromStr for IsolationLevel {
    type Err = AtomqError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = squash(s);
        ISOLATION_LEVELS
            .into_iter()
            .find(|level| squash(level.as_sql()) == wanted)
            .ok_or_else(|| AtomqError::InvalidArgument(format!("unknown isolation level {s:?}")))
    }
}

impl Anomaly {
    pub fn code(self) -> u8 {
        match self {
            Anomaly::LostUpdate => 1,
            Anomaly::DirtyRead => 2,
            Anomaly::NonRepeatableRead => 3,
            Anomaly::Phantom => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Anomaly::LostUpdate => "lost update",
            Anomaly::DirtyRead => "dirty read",
            Anomaly::NonRepeatableRead => "non-repeatable read",
            Anomaly::Phantom => "phantom",
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Anomaly {
    type Error = AtomqError;

    fn try_from(code: u8) -> Result<Self> {
        ANOMALIES
            .into_iter()
            .find(|anomaly| anomaly.code() == code)
            .ok_or_else(|| AtomqError::InvalidArgument(format!("unknown anomaly {code}")))
    }
}

impl FromStr for Anomaly {
    type Err = AtomqError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = squash(s);
        ANOMALIES
            .into_iter()
            .find(|anomaly| squash(anomaly.name()) == wanted)
            .ok_or_else(|| AtomqError::InvalidArgument(format!("unknown anomaly {s:?}")))
    }
}

// "Read_Committed", "read-committed" and "READ COMMITTED" all name the same level.
fn squash(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
