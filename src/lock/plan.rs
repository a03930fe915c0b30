use log::debug;

use crate::database::Database;
use crate::errors::{AtomqError, Result};
use crate::lock::declaration::{LockDeclaration, LockStrength, TableLock};

/// Accumulates the tables a unit of work will touch and the locks it needs on them.
///
/// Declarations are kept in the order they were made. Duplicates are neither merged nor
/// dropped; the handle receives them verbatim.
#[derive(Debug, Default, Clone)]
pub struct LockPlan {
    declarations: Vec<LockDeclaration>,
}

impl LockPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a lock on `table`.
    ///
    /// If `lock_sequence` is set and the table has an auto-increment sequence, the
    /// sequence is locked with the same strength right after the table.
    ///
    /// # Errors
    ///
    /// Returns [`AtomqError::UnknownTable`] if `table` is empty or does not exist in `db`.
    pub fn declare<D: Database + ?Sized>(
        &mut self,
        db: &D,
        table: &str,
        strength: LockStrength,
        lock_sequence: bool,
    ) -> Result<&LockDeclaration> {
        if table.is_empty() || !db.table_exists(table) {
            return Err(AtomqError::UnknownTable(table.to_string()));
        }

        let sequence = if lock_sequence && db.sequence_exists(table) {
            Some(db.sequence_name_for(table))
        } else {
            None
        };

        debug!("Declared {} lock on {} (sequence: {:?})", strength, table, sequence);
        self.declarations.push(LockDeclaration {
            table: table.to_string(),
            strength,
            lock_sequence,
            sequence,
        });
        Ok(&self.declarations[self.declarations.len() - 1])
    }

    /// Declares a lock from a raw strength code (1 = read, 2 = write).
    ///
    /// # Errors
    ///
    /// Returns [`AtomqError::InvalidLockStrength`] for any other code, in addition to the
    /// errors of [`LockPlan::declare`].
    pub fn declare_code<D: Database + ?Sized>(
        &mut self,
        db: &D,
        table: &str,
        strength: u8,
        lock_sequence: bool,
    ) -> Result<&LockDeclaration> {
        if table.is_empty() || !db.table_exists(table) {
            return Err(AtomqError::UnknownTable(table.to_string()));
        }
        let strength = LockStrength::try_from(strength)?;
        self.declare(db, table, strength, lock_sequence)
    }

    pub fn has_write_lock(&self) -> bool {
        self.declarations
            .iter()
            .any(|declaration| declaration.strength == LockStrength::Write)
    }

    /// Flattens the plan into the lock list handed to the database, sequences included.
    pub fn materialize(&self) -> Vec<TableLock> {
        let mut locks = Vec::with_capacity(self.declarations.len());
        for declaration in &self.declarations {
            locks.push(TableLock::new(&declaration.table, declaration.strength));
            if let Some(sequence) = &declaration.sequence {
                locks.push(TableLock::new(sequence, declaration.strength));
            }
        }
        locks
    }

    pub fn declarations(&self) -> &[LockDeclaration] {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }
}
