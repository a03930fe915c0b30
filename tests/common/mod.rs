//! Common utilities for Atomq integration tests.
#![allow(dead_code)]

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use atomq::{ConcurrencyModel, Database, DatabaseError, IsolationLevel, LockStrength, TableLock};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub type OpResult = std::result::Result<(), DatabaseError>;

// --- MockDatabase ---

#[derive(Debug, Default)]
struct Shared {
    /// Committed rows per table.
    tables: HashMap<String, Vec<String>>,
    sequences: HashSet<String>,
    /// Lock name -> (session, strength) holders.
    locks: HashMap<String, Vec<(u64, LockStrength)>>,
    /// Committed statements, in commit order.
    statements: Vec<String>,
    lock_requests: Vec<Vec<TableLock>>,
    unlock_calls: usize,
    began: Vec<IsolationLevel>,
    commits: usize,
    rollbacks: usize,
    pending_conflicts: usize,
    pending_deadlocks: usize,
    pending_unlock_failures: usize,
}

impl Shared {
    fn compatible(&self, name: &str, strength: LockStrength, session: u64) -> bool {
        let Some(holders) = self.locks.get(name) else {
            return true;
        };
        holders
            .iter()
            .filter(|(holder, _)| *holder != session)
            .all(|(_, held)| strength == LockStrength::Read && *held == LockStrength::Read)
    }

    fn release(&mut self, session: u64) {
        for holders in self.locks.values_mut() {
            holders.retain(|(holder, _)| *holder != session);
        }
        self.locks.retain(|_, holders| !holders.is_empty());
    }
}

/// An in-memory engine shared by several sessions.
///
/// Rows are plain strings appended to a table. Table locks follow `LOCK TABLES`
/// semantics: locking again releases what the session held before. Transactions buffer
/// their writes until commit.
#[derive(Debug)]
pub struct MockDatabase {
    model: ConcurrencyModel,
    state: Mutex<Shared>,
    released: Condvar,
    next_session: AtomicU64,
}

impl MockDatabase {
    pub fn new(model: ConcurrencyModel) -> Arc<Self> {
        Arc::new(Self {
            model,
            state: Mutex::new(Shared::default()),
            released: Condvar::new(),
            next_session: AtomicU64::new(1),
        })
    }

    pub fn create_table(&self, name: &str, with_sequence: bool) {
        let mut state = self.state.lock();
        state.tables.insert(name.to_string(), Vec::new());
        if with_sequence {
            state.sequences.insert(name.to_string());
        }
    }

    pub fn session(self: &Arc<Self>) -> MockSession {
        MockSession {
            db: Arc::clone(self),
            id: self.next_session.fetch_add(1, Ordering::SeqCst),
            tx: Mutex::new(None),
        }
    }

    /// The next `n` commits fail with a serialization failure.
    pub fn inject_conflicts(&self, n: usize) {
        self.state.lock().pending_conflicts = n;
    }

    /// The next `n` lock acquisitions fail as deadlock victims.
    pub fn inject_deadlocks(&self, n: usize) {
        self.state.lock().pending_deadlocks = n;
    }

    /// The next `n` unlocks report a serialization failure after releasing.
    pub fn inject_unlock_failures(&self, n: usize) {
        self.state.lock().pending_unlock_failures = n;
    }

    pub fn rows(&self, table: &str) -> Vec<String> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn held_locks(&self) -> usize {
        self.state.lock().locks.values().map(Vec::len).sum()
    }

    pub fn lock_requests(&self) -> Vec<Vec<TableLock>> {
        self.state.lock().lock_requests.clone()
    }

    pub fn unlock_calls(&self) -> usize {
        self.state.lock().unlock_calls
    }

    pub fn began(&self) -> Vec<IsolationLevel> {
        self.state.lock().began.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }
}

#[derive(Debug, Default)]
struct PendingWrites {
    rows: Vec<(String, String)>,
    statements: Vec<String>,
}

/// One connection to a [`MockDatabase`]; this is the handle coordinators borrow.
#[derive(Debug)]
pub struct MockSession {
    db: Arc<MockDatabase>,
    id: u64,
    tx: Mutex<Option<PendingWrites>>,
}

impl MockSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Appends `row` to `table`, inside the open transaction if there is one.
    pub fn insert(&self, table: &str, row: &str) -> OpResult {
        if !self.table_exists(table) {
            return Err(DatabaseError::Statement(format!("no such table {table}")));
        }
        let mut tx = self.tx.lock();
        match tx.as_mut() {
            Some(pending) => pending.rows.push((table.to_string(), row.to_string())),
            None => {
                let mut state = self.db.state.lock();
                if let Some(rows) = state.tables.get_mut(table) {
                    rows.push(row.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.lock().is_some()
    }
}

impl Database for MockSession {
    fn table_exists(&self, table: &str) -> bool {
        self.db.state.lock().tables.contains_key(table)
    }

    fn sequence_exists(&self, table: &str) -> bool {
        self.db.state.lock().sequences.contains(table)
    }

    fn execute(&self, statement: &str) -> std::result::Result<u64, DatabaseError> {
        if statement.trim_start().to_ascii_uppercase().starts_with("FAIL") {
            return Err(DatabaseError::Statement(statement.to_string()));
        }
        let mut tx = self.tx.lock();
        match tx.as_mut() {
            Some(pending) => pending.statements.push(statement.to_string()),
            None => self.db.state.lock().statements.push(statement.to_string()),
        }
        Ok(1)
    }

    fn concurrency_model(&self) -> ConcurrencyModel {
        self.db.model
    }

    fn lock_tables(
        &self,
        locks: &[TableLock],
        wait: Duration,
    ) -> std::result::Result<(), DatabaseError> {
        let deadline = Instant::now() + wait;
        let mut state = self.db.state.lock();
        state.lock_requests.push(locks.to_vec());

        if state.pending_deadlocks > 0 {
            state.pending_deadlocks -= 1;
            return Err(DatabaseError::SerializationFailure(
                "Deadlock found when trying to get lock".to_string(),
            ));
        }

        state.release(self.id);
        self.db.released.notify_all();

        loop {
            if locks
                .iter()
                .all(|lock| state.compatible(&lock.name, lock.strength, self.id))
            {
                for lock in locks {
                    state
                        .locks
                        .entry(lock.name.clone())
                        .or_default()
                        .push((self.id, lock.strength));
                }
                return Ok(());
            }
            if self.db.released.wait_until(&mut state, deadline).timed_out() {
                return Err(DatabaseError::LockWaitTimeout(format!(
                    "session {} gave up after {:?}",
                    self.id, wait
                )));
            }
        }
    }

    fn unlock_tables(&self) -> std::result::Result<(), DatabaseError> {
        let mut state = self.db.state.lock();
        state.unlock_calls += 1;
        state.release(self.id);
        self.db.released.notify_all();
        if state.pending_unlock_failures > 0 {
            state.pending_unlock_failures -= 1;
            return Err(DatabaseError::SerializationFailure(
                "Deadlock found when releasing table locks".to_string(),
            ));
        }
        Ok(())
    }

    fn begin_transaction(&self, level: IsolationLevel) -> std::result::Result<(), DatabaseError> {
        let mut tx = self.tx.lock();
        if tx.is_some() {
            return Err(DatabaseError::Other("transaction already open".to_string()));
        }
        *tx = Some(PendingWrites::default());
        self.db.state.lock().began.push(level);
        Ok(())
    }

    fn commit(&self) -> std::result::Result<(), DatabaseError> {
        let mut tx = self.tx.lock();
        let Some(pending) = tx.take() else {
            return Err(DatabaseError::Other("no open transaction".to_string()));
        };
        let mut state = self.db.state.lock();
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(DatabaseError::SerializationFailure(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }
        for (table, row) in pending.rows {
            if let Some(rows) = state.tables.get_mut(&table) {
                rows.push(row);
            }
        }
        state.statements.extend(pending.statements);
        state.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> std::result::Result<(), DatabaseError> {
        self.tx.lock().take();
        self.db.state.lock().rollbacks += 1;
        Ok(())
    }
}

// --- Helper Functions ---

/// Creates a database with tables `T` (with sequence) and `U` (without).
pub fn setup_db(model: ConcurrencyModel) -> Arc<MockDatabase> {
    let db = MockDatabase::new(model);
    db.create_table("T", true);
    db.create_table("U", false);
    db
}
