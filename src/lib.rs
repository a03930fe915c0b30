//! Atomic query coordination.
//!
//! A [`Coordinator`] bundles database operations so they run exactly once, atomically,
//! under an explicit [`IsolationLevel`], optionally protected by table locks. The
//! database handle is supplied by the caller through the [`Database`] trait.

pub mod config;
pub mod coordinator;
pub mod database;
pub mod errors;
pub mod isolation;
pub mod lock;
pub mod operation;

// Re-export key types and structs for easier access
pub use config::{CoordinatorConfig, ITERATIONS};
pub use coordinator::{Coordinator, CoordinatorState};
pub use database::{ConcurrencyModel, Database, Value};
pub use errors::{AtomqError, DatabaseError, Result};
pub use isolation::{Anomaly, IsolationLevel};
pub use lock::{LockDeclaration, LockPlan, LockStrength, TableLock};
pub use operation::{Operation, OperationQueue, Statement};

/// Atomq Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::coordinator::*;
    pub use crate::database::*;
    pub use crate::errors::*;
    pub use crate::isolation::*;
    pub use crate::lock::*;
    pub use crate::operation::*;
}
