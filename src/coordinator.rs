use ahash::AHashSet as HashSet;
use log::{debug, warn};

use crate::config::CoordinatorConfig;
use crate::database::{ConcurrencyModel, Database};
use crate::errors::{AtomqError, DatabaseError, Result};
use crate::isolation::{self, Anomaly, IsolationLevel};
use crate::lock::{LockDeclaration, LockPlan, LockStrength, TableLock};
use crate::operation::{Operation, OperationQueue};

/// Lifecycle of a [`Coordinator`].
///
/// `Building -> Validated -> Running -> Committed | Failed`. A validation failure moves
/// straight from `Validated` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Accepting lock declarations and operations.
    Building,
    /// `run` was called and the plan is being checked.
    Validated,
    /// Locks are held (or a transaction is open) and operations are executing.
    Running,
    Committed,
    Failed,
}

impl CoordinatorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CoordinatorState::Committed | CoordinatorState::Failed)
    }
}

/// Runs a bundle of database operations exactly once, atomically, under an explicit
/// isolation level.
///
/// A coordinator is built per unit of work: declare the tables you touch, enqueue the
/// operations, call [`Coordinator::run`]. It borrows the database handle and never owns
/// it.
///
/// Depending on the engine's [`ConcurrencyModel`] an attempt either holds the declared
/// table locks for the whole run or opens a transaction at the requested level. An
/// attempt failing with a serialization conflict is rolled back and replayed from the
/// first operation, up to [`CoordinatorConfig::iterations`] times. Table locks cannot be
/// rolled back, so there a conflict is only replayed when no operation had taken effect.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use atomq::prelude::*;
///
/// # struct Handle;
/// # type Done = std::result::Result<(), DatabaseError>;
/// # impl Database for Handle {
/// #     fn table_exists(&self, _table: &str) -> bool { true }
/// #     fn sequence_exists(&self, _table: &str) -> bool { true }
/// #     fn execute(&self, _statement: &str) -> std::result::Result<u64, DatabaseError> { Ok(1) }
/// #     fn concurrency_model(&self) -> ConcurrencyModel { ConcurrencyModel::Transactions }
/// #     fn lock_tables(&self, _locks: &[TableLock], _wait: Duration) -> Done { Ok(()) }
/// #     fn unlock_tables(&self) -> Done { Ok(()) }
/// #     fn begin_transaction(&self, _level: IsolationLevel) -> Done { Ok(()) }
/// #     fn commit(&self) -> Done { Ok(()) }
/// #     fn rollback(&self) -> Done { Ok(()) }
/// # }
/// # let db = Handle;
/// let new_obj_id = 312;
///
/// let mut atom = Coordinator::new(&db, IsolationLevel::Serializable);
/// atom.lock_table_write("object_data", true)?;
/// atom.enqueue(move |db: &Handle| {
///     db.execute(&format!("UPDATE object_data SET owner = 6 WHERE obj_id = {new_obj_id}"))?;
///     Ok(())
/// })?;
/// atom.enqueue_operation(
///     Statement::new("INSERT INTO object_reference (obj_id) VALUES (?)").bind(new_obj_id),
/// )?;
/// atom.run()?;
/// # Ok::<(), AtomqError>(())
/// ```
pub struct Coordinator<'a, D: Database + ?Sized> {
    db: &'a D,
    isolation_level: IsolationLevel,
    config: CoordinatorConfig,
    locks: LockPlan,
    queue: OperationQueue<'a, D>,
    state: CoordinatorState,
    attempts: usize,
}

impl<'a, D: Database + ?Sized> Coordinator<'a, D> {
    /// Creates a coordinator bound to `db` with the default configuration.
    ///
    /// The isolation level is fixed for the lifetime of the coordinator. It is checked
    /// when [`Coordinator::run`] is called, not here.
    pub fn new(db: &'a D, isolation_level: IsolationLevel) -> Self {
        Self::with_config(db, isolation_level, CoordinatorConfig::default())
    }

    pub fn with_config(
        db: &'a D,
        isolation_level: IsolationLevel,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            db,
            isolation_level,
            config,
            locks: LockPlan::new(),
            queue: OperationQueue::new(),
            state: CoordinatorState::Building,
            attempts: 0,
        }
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Anomalies the bound isolation level still lets through.
    pub fn risks(&self) -> HashSet<Anomaly> {
        isolation::anomalies_for(self.isolation_level)
            .iter()
            .copied()
            .collect()
    }

    pub fn is_there_risk_that(level: IsolationLevel, anomaly: Anomaly) -> bool {
        isolation::is_anomaly_possible(level, anomaly)
    }

    /// Declares that the unit of work touches `table` and needs a lock of `strength` on it.
    ///
    /// With `lock_sequence` set, the table's auto-increment sequence (if any) is locked
    /// as well. Engines running native transactions only use the declarations to check
    /// the locking policy.
    ///
    /// # Errors
    ///
    /// [`AtomqError::UnknownTable`] if the table does not exist,
    /// [`AtomqError::AlreadyRun`] once `run` has been called.
    pub fn declare_lock(
        &mut self,
        table: &str,
        strength: LockStrength,
        lock_sequence: bool,
    ) -> Result<()> {
        self.ensure_building()?;
        self.locks.declare(self.db, table, strength, lock_sequence)?;
        Ok(())
    }

    /// Same as [`Coordinator::declare_lock`] with a raw strength code (1 = read, 2 = write).
    pub fn declare_lock_code(
        &mut self,
        table: &str,
        strength: u8,
        lock_sequence: bool,
    ) -> Result<()> {
        self.ensure_building()?;
        self.locks.declare_code(self.db, table, strength, lock_sequence)?;
        Ok(())
    }

    pub fn lock_table_write(&mut self, table: &str, lock_sequence: bool) -> Result<()> {
        self.declare_lock(table, LockStrength::Write, lock_sequence)
    }

    pub fn lock_table_read(&mut self, table: &str, lock_sequence: bool) -> Result<()> {
        self.declare_lock(table, LockStrength::Read, lock_sequence)
    }

    /// Enqueues a closure taking the database handle.
    pub fn enqueue<F>(&mut self, operation: F) -> Result<()>
    where
        F: FnMut(&D) -> std::result::Result<(), DatabaseError> + 'a,
    {
        self.enqueue_operation(operation)
    }

    /// Enqueues any [`Operation`], validating it first.
    pub fn enqueue_operation<O>(&mut self, operation: O) -> Result<()>
    where
        O: Operation<D> + 'a,
    {
        self.ensure_building()?;
        self.queue.enqueue(operation)
    }

    /// Validates the plan and executes every operation atomically.
    ///
    /// Validation errors are returned before any lock is taken or operation runs. Once
    /// running, every exit path releases held locks and closes the transaction.
    ///
    /// # Errors
    ///
    /// * [`AtomqError::AlreadyRun`] if `run` was called before.
    /// * [`AtomqError::InvalidArgument`] if the configuration allows no attempt.
    /// * [`AtomqError::InvalidOperation`] if a queued operation no longer validates.
    /// * [`AtomqError::IncompatibleLockingPolicy`] for write locks below `Serializable`.
    /// * [`AtomqError::UnsupportedIsolation`] for any level other than `Serializable`.
    /// * [`AtomqError::LockTimeout`] if the tables could not be locked in time.
    /// * [`AtomqError::ConflictExhausted`] after the last attempt hit a conflict.
    /// * [`AtomqError::OperationFailed`] if an operation failed for any other reason, or
    ///   if a conflict hit a table-lock run after its first operation had completed.
    pub fn run(&mut self) -> Result<()> {
        self.ensure_building()?;
        self.state = CoordinatorState::Validated;

        if let Err(e) = self.check_before_run() {
            debug!("Atomic query rejected before running: {}", e);
            self.state = CoordinatorState::Failed;
            return Err(e);
        }

        let locks = self.locks.materialize();
        let model = self.db.concurrency_model();
        self.state = CoordinatorState::Running;

        if self.is_unprotected() {
            warn!(
                "No tables declared on a table-lock engine, {} operations run unisolated",
                self.queue.len()
            );
        }

        loop {
            self.attempts += 1;
            debug!(
                "Atomic query attempt {}/{} ({:?}, {} locks, {} operations)",
                self.attempts,
                self.config.iterations,
                model,
                locks.len(),
                self.queue.len()
            );

            let outcome = match model {
                ConcurrencyModel::TableLocks => self.attempt_with_locks(&locks),
                ConcurrencyModel::Transactions => self.attempt_with_transaction(),
            };

            match outcome {
                Ok(()) => {
                    debug!("Atomic query committed after {} attempt(s)", self.attempts);
                    self.state = CoordinatorState::Committed;
                    return Ok(());
                }
                Err(AttemptError::Retryable(e)) if self.attempts < self.config.iterations => {
                    warn!(
                        "Serialization conflict on attempt {}, retrying: {}",
                        self.attempts, e
                    );
                }
                Err(AttemptError::Retryable(e)) => {
                    warn!(
                        "Serialization conflict on final attempt {}: {}",
                        self.attempts, e
                    );
                    self.state = CoordinatorState::Failed;
                    return Err(self.exhausted(e));
                }
                Err(AttemptError::Fatal(e)) => {
                    self.state = CoordinatorState::Failed;
                    return Err(e);
                }
            }
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Index of the next operation to execute in the current or last attempt.
    pub fn cursor(&self) -> usize {
        self.queue.cursor()
    }

    /// Index of the operation that failed the last attempt, if one did.
    pub fn failed_at(&self) -> Option<usize> {
        self.queue.failed_at()
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn declarations(&self) -> &[LockDeclaration] {
        self.locks.declarations()
    }

    /// The lock list an attempt would hand to the database.
    pub fn lock_plan(&self) -> Vec<TableLock> {
        self.locks.materialize()
    }

    pub fn operation_count(&self) -> usize {
        self.queue.len()
    }

    /// `true` when a run would execute without any isolation: the engine only offers
    /// table locks and no table was declared.
    pub fn is_unprotected(&self) -> bool {
        self.locks.is_empty() && self.db.concurrency_model() == ConcurrencyModel::TableLocks
    }

    fn ensure_building(&self) -> Result<()> {
        if self.state == CoordinatorState::Building {
            Ok(())
        } else {
            Err(AtomqError::AlreadyRun)
        }
    }

    fn check_before_run(&self) -> Result<()> {
        if self.config.iterations == 0 {
            return Err(AtomqError::InvalidArgument(
                "at least one attempt is required".to_string(),
            ));
        }

        self.queue.validate()?;

        if self.locks.has_write_lock() && self.isolation_level != IsolationLevel::Serializable {
            return Err(AtomqError::IncompatibleLockingPolicy(self.isolation_level));
        }

        isolation::validate_level(self.isolation_level)
    }

    // Table-lock engines cannot undo anything, so only failures raised before the first
    // operation took effect may be replayed.
    fn attempt_with_locks(&mut self, locks: &[TableLock]) -> std::result::Result<(), AttemptError> {
        if !locks.is_empty() {
            if let Err(e) = self.db.lock_tables(locks, self.config.lock_wait) {
                // The handle may have taken part of the plan before failing.
                self.release_locks_quietly();
                return Err(if e.is_conflict() {
                    AttemptError::Retryable(e.into())
                } else {
                    AttemptError::Fatal(lock_error(e))
                });
            }
        }

        if let Err(e) = self.queue.replay(self.db) {
            if !locks.is_empty() {
                self.release_locks_quietly();
            }
            return Err(if e.is_conflict() && e.cursor() == Some(0) {
                AttemptError::Retryable(e)
            } else {
                AttemptError::Fatal(e)
            });
        }

        if !locks.is_empty() {
            self.db
                .unlock_tables()
                .map_err(|e| AttemptError::Fatal(e.into()))?;
        }
        Ok(())
    }

    fn attempt_with_transaction(&mut self) -> std::result::Result<(), AttemptError> {
        self.db
            .begin_transaction(self.isolation_level)
            .map_err(|e| AttemptError::classify(e.into()))?;

        if let Err(e) = self.queue.replay(self.db) {
            self.rollback_quietly();
            return Err(AttemptError::classify(e));
        }

        if let Err(e) = self.db.commit() {
            self.rollback_quietly();
            return Err(AttemptError::classify(e.into()));
        }
        Ok(())
    }

    fn release_locks_quietly(&self) {
        if let Err(e) = self.db.unlock_tables() {
            warn!("Failed to release table locks: {}", e);
        }
    }

    fn rollback_quietly(&self) {
        if let Err(e) = self.db.rollback() {
            warn!("Failed to roll back atomic query: {}", e);
        }
    }

    fn exhausted(&self, last: AtomqError) -> AtomqError {
        let (cursor, source) = match last {
            AtomqError::OperationFailed { cursor, source } => (Some(cursor), source),
            AtomqError::Database(source) => (None, source),
            other => (None, DatabaseError::Other(other.to_string())),
        };
        AtomqError::ConflictExhausted {
            attempts: self.attempts,
            cursor,
            source,
        }
    }
}

/// Outcome of a failed attempt: either safe to replay from the first operation or final.
enum AttemptError {
    Retryable(AtomqError),
    Fatal(AtomqError),
}

impl AttemptError {
    fn classify(e: AtomqError) -> Self {
        if e.is_conflict() {
            AttemptError::Retryable(e)
        } else {
            AttemptError::Fatal(e)
        }
    }
}

fn lock_error(e: DatabaseError) -> AtomqError {
    match e {
        DatabaseError::LockWaitTimeout(msg) => AtomqError::LockTimeout(msg),
        other => AtomqError::Database(other),
    }
}
