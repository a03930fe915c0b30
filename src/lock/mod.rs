/// Lock strengths, declarations and the requests handed to the database.
pub mod declaration;
/// Ordered lock plan built by the caller before a run.
pub mod plan;

pub use declaration::{LockDeclaration, LockStrength, TableLock};
pub use plan::LockPlan;
