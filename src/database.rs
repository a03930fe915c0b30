use std::fmt;
use std::time::Duration;

use crate::errors::DatabaseError;
use crate::isolation::IsolationLevel;
use crate::lock::TableLock;

/// How an engine keeps concurrent units of work apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyModel {
    /// The engine has no transactions worth the name (e.g. MyISAM). Isolation comes from
    /// explicit table locks held for the whole unit of work. Nothing can be rolled back.
    TableLocks,
    /// The engine runs serializable transactions natively. Isolation comes from a
    /// transaction started at the requested level; conflicts roll back.
    Transactions,
}

/// A literal that can be rendered into SQL through [`Database::quote`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ansi(self))
    }
}

/// Renders `value` as an ANSI SQL literal.
///
/// SQL has no literal for NaN or the infinities; they render as `NULL`.
pub fn quote_ansi(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) if !v.is_finite() => "NULL".to_string(),
        Value::Float(v) => v.to_string(),
        Value::Boolean(v) => String::from(if *v { "1" } else { "0" }),
        Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
    }
}

/// The capability a coordinator needs from an already-connected database handle.
///
/// The handle is owned by the caller and outlives every coordinator built on it.
/// Implementations decide how statements reach the engine; the coordinator only
/// orders the calls.
///
/// Locking and transaction primitives are only called by the coordinator. Operations
/// should restrict themselves to [`Database::execute`] and whatever engine-specific
/// methods the concrete handle exposes.
pub trait Database {
    fn table_exists(&self, table: &str) -> bool;

    /// Whether `table` has an associated auto-increment sequence.
    fn sequence_exists(&self, table: &str) -> bool;

    /// Name of the sequence object backing `table`.
    fn sequence_name_for(&self, table: &str) -> String {
        format!("{table}_seq")
    }

    fn quote(&self, value: &Value) -> String {
        quote_ansi(value)
    }

    /// Executes a statement, returning the number of affected rows.
    fn execute(&self, statement: &str) -> Result<u64, DatabaseError>;

    fn concurrency_model(&self) -> ConcurrencyModel;

    /// Acquires every lock in `locks` or none of them, waiting at most `wait`.
    ///
    /// Implementations should return [`DatabaseError::LockWaitTimeout`] when the budget
    /// runs out.
    fn lock_tables(&self, locks: &[TableLock], wait: Duration) -> Result<(), DatabaseError>;

    /// Releases all table locks held through this handle.
    fn unlock_tables(&self) -> Result<(), DatabaseError>;

    fn begin_transaction(&self, level: IsolationLevel) -> Result<(), DatabaseError>;

    fn commit(&self) -> Result<(), DatabaseError>;

    fn rollback(&self) -> Result<(), DatabaseError>;
}
