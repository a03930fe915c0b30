use log::debug;

use crate::database::{Database, Value};
use crate::errors::{AtomqError, DatabaseError, Result};

/// A unit of work run against the database handle.
///
/// Anything that takes the handle as its only input can be an operation: closures
/// `FnMut(&D) -> Result<(), DatabaseError>` implement this trait directly, and types
/// that need to carry state implement it by hand.
///
/// An operation may run more than once: when the engine reports a serialization
/// conflict the whole queue is replayed from the start in a fresh attempt.
pub trait Operation<D: ?Sized> {
    fn execute(&mut self, db: &D) -> std::result::Result<(), DatabaseError>;

    /// Checks that the operation is well formed before anything is locked.
    ///
    /// Called when the operation is enqueued and again right before a run.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl<D, F> Operation<D> for F
where
    D: ?Sized,
    F: FnMut(&D) -> std::result::Result<(), DatabaseError>,
{
    fn execute(&mut self, db: &D) -> std::result::Result<(), DatabaseError> {
        self(db)
    }
}

/// A SQL statement with `?` placeholders, bound through the handle's quoting.
///
/// ```no_run
/// use atomq::prelude::*;
///
/// let insert = Statement::new("INSERT INTO il_object (id, title) VALUES (?, ?)")
///     .bind(42)
///     .bind("Course");
/// assert_eq!(insert.placeholders(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Number of `?` placeholders outside quoted literals and identifiers.
    pub fn placeholders(&self) -> usize {
        placeholder_offsets(&self.sql).len()
    }

    /// Substitutes every placeholder with the quoted parameter.
    pub fn render<D: Database + ?Sized>(&self, db: &D) -> String {
        let mut rendered = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        let mut last = 0;
        for offset in placeholder_offsets(&self.sql) {
            rendered.push_str(&self.sql[last..offset]);
            if let Some(value) = params.next() {
                rendered.push_str(&db.quote(value));
            }
            last = offset + 1;
        }
        rendered.push_str(&self.sql[last..]);
        rendered
    }
}

/// Byte offsets of the `?` placeholders in `sql`.
///
/// A doubled quote inside a literal closes and reopens it, so `''` escapes need no
/// special case.
fn placeholder_offsets(sql: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '?') => offsets.push(i),
            (None, _) => {}
        }
    }
    offsets
}

impl<D: Database + ?Sized> Operation<D> for Statement {
    fn execute(&mut self, db: &D) -> std::result::Result<(), DatabaseError> {
        db.execute(&self.render(db)).map(|_| ())
    }

    fn validate(&self) -> Result<()> {
        if self.sql.trim().is_empty() {
            return Err(AtomqError::InvalidOperation(
                "statement must not be empty".to_string(),
            ));
        }
        if let Some(i) = self
            .params
            .iter()
            .position(|v| matches!(v, Value::Float(f) if !f.is_finite()))
        {
            return Err(AtomqError::InvalidOperation(format!(
                "parameter {i} is not a finite number"
            )));
        }
        if self.placeholders() != self.params.len() {
            return Err(AtomqError::InvalidOperation(format!(
                "statement has {} placeholders but {} parameters were bound",
                self.placeholders(),
                self.params.len()
            )));
        }
        Ok(())
    }
}

/// FIFO queue of operations forming one unit of work.
///
/// The queue is append-only. [`OperationQueue::replay`] runs every operation in order
/// and remembers where it stopped.
pub struct OperationQueue<'a, D: ?Sized> {
    operations: Vec<Box<dyn Operation<D> + 'a>>,
    /// Index of the next operation to execute.
    cursor: usize,
    failed_at: Option<usize>,
}

impl<'a, D: ?Sized> Default for OperationQueue<'a, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, D: ?Sized> OperationQueue<'a, D> {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            cursor: 0,
            failed_at: None,
        }
    }

    /// Appends `operation` after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`AtomqError::InvalidOperation`] (or whatever the operation's own
    /// `validate` reports) and leaves the queue unchanged.
    pub fn enqueue<O>(&mut self, operation: O) -> Result<()>
    where
        O: Operation<D> + 'a,
    {
        operation.validate()?;
        self.operations.push(Box::new(operation));
        Ok(())
    }

    /// Re-validates every queued operation.
    pub fn validate(&self) -> Result<()> {
        self.operations
            .iter()
            .try_for_each(|operation| operation.validate())
    }

    /// Runs every operation against `db` in enqueue order, starting from the first.
    ///
    /// Stops at the first failure. Operations before it have already taken effect; undoing
    /// them is up to whatever transaction surrounds the replay.
    ///
    /// # Errors
    ///
    /// Returns [`AtomqError::OperationFailed`] carrying the index of the failed operation.
    pub fn replay(&mut self, db: &D) -> Result<()> {
        self.cursor = 0;
        self.failed_at = None;
        for operation in self.operations.iter_mut() {
            if let Err(source) = operation.execute(db) {
                debug!("Operation {} failed: {}", self.cursor, source);
                self.failed_at = Some(self.cursor);
                return Err(AtomqError::OperationFailed {
                    cursor: self.cursor,
                    source,
                });
            }
            self.cursor += 1;
        }
        Ok(())
    }

    /// Index of the next operation to execute in the current (or last) replay.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Index of the operation that failed the last replay, if it failed.
    pub fn failed_at(&self) -> Option<usize> {
        self.failed_at
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
