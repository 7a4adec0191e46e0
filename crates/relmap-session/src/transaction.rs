//! Transaction scopes.
//!
//! A [`Transaction`] either owns the physical transaction (a root scope) or
//! a savepoint inside it (a nested scope, also named [`NestedTransaction`]).
//! [`Session::begin_transaction`] opens a root scope when none is active and
//! a nested one otherwise, so code holding only `&mut Session` can open its
//! own scope without knowing whether its caller already did.
//!
//! Every scope borrows the session mutably and dereferences to it, so entity
//! work inside a scope goes through the guard. A scope that is dropped while
//! still active rolls back.
//!
//! Scope state machine:
//!
//! ```text
//! Active -> Committed   (Committing, Committed, Finished)
//! Active -> RolledBack  (Finished)
//! ```
//!
//! Both terminal states reject further commit or rollback.
//!
//! # Rolling back in-memory state
//!
//! The database forgets a rolled-back scope; the entities must too. Each
//! scope records a mark: the pending queue as it stood and the
//! length of the session's write journal. Every write made while a
//! transaction is active first journals the entity's bookkeeping (id,
//! version, deleted flag and change log). Rolling back a scope replays the
//! journal backwards to its mark and restores the pending queue, so an
//! insert that never committed loses its id and its cache entry, and an
//! update becomes dirty again at its old version.

use crate::Session;
use relmap_core::{
    ChangeTracker, Connection, EntityRef, Error, IsolationLevel, Result, TransactionErrorKind,
    is_valid_identifier,
};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

/// State of a transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open; commit and rollback are allowed.
    Active,
    /// Committed or, for a nested scope, released.
    Committed,
    /// Rolled back explicitly or on drop.
    RolledBack,
}

impl TransactionState {
    /// Whether the scope reached a terminal state.
    pub const fn is_finished(self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}

fn ensure_active(state: TransactionState, action: &str) -> Result<()> {
    if state.is_finished() {
        return Err(Error::InvalidOperation(format!(
            "cannot {} a transaction that is already {:?}",
            action, state
        )));
    }
    Ok(())
}

// ============================================================================
// Journal
// ============================================================================

/// Bookkeeping of one entity as it stood before a write.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    entity: EntityRef,
    id: i64,
    version: i64,
    deleted: bool,
    changes: ChangeTracker,
}

impl Snapshot {
    pub(crate) fn capture(entity: &EntityRef) -> Self {
        let guard = entity.read();
        Self {
            entity: entity.clone(),
            id: guard.id,
            version: guard.version,
            deleted: guard.deleted,
            changes: guard.changes().clone(),
        }
    }

    /// Put the bookkeeping back. Field values are left as they are.
    pub(crate) fn restore(self) -> EntityRef {
        {
            let mut guard = self.entity.write();
            guard.id = self.id;
            guard.version = self.version;
            guard.deleted = self.deleted;
            *guard.changes_mut() = self.changes;
        }
        self.entity
    }
}

/// Where a scope started.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeMark {
    pub(crate) pending: Vec<EntityRef>,
    journal_len: usize,
}

/// Savepoint bookkeeping for the current root transaction.
#[derive(Debug, Default)]
pub(crate) struct TransactionStack {
    active: bool,
    isolation: Option<IsolationLevel>,
    counter: u64,
    /// Every savepoint name used since the root began.
    names: HashSet<String>,
    /// Root mark first, then one per open nested scope.
    scopes: Vec<ScopeMark>,
    /// Caller-created savepoints still live, oldest first.
    named: Vec<(String, ScopeMark)>,
    journal: Vec<Snapshot>,
}

impl TransactionStack {
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Nested scopes currently open.
    pub(crate) fn depth(&self) -> usize {
        self.scopes.len().saturating_sub(1)
    }

    fn mark(&self, pending: &[EntityRef]) -> ScopeMark {
        ScopeMark {
            pending: pending.to_vec(),
            journal_len: self.journal.len(),
        }
    }

    pub(crate) fn begin(&mut self, isolation: IsolationLevel, pending: &[EntityRef]) {
        *self = Self {
            active: true,
            isolation: Some(isolation),
            scopes: vec![ScopeMark {
                pending: pending.to_vec(),
                journal_len: 0,
            }],
            ..Self::default()
        };
    }

    pub(crate) fn end(&mut self) {
        *self = Self::default();
    }

    /// Mark of the root scope, for rolling the whole transaction back.
    pub(crate) fn root_mark(&self) -> Option<ScopeMark> {
        self.scopes.first().cloned()
    }

    /// Fresh savepoint name for a nested scope.
    pub(crate) fn push_scope(&mut self, pending: &[EntityRef]) -> String {
        loop {
            self.counter += 1;
            let name = format!("relmap_sp_{}", self.counter);
            if self.names.insert(name.clone()) {
                let mark = self.mark(pending);
                self.scopes.push(mark);
                return name;
            }
        }
    }

    /// Close the innermost nested scope. The root mark is never popped.
    pub(crate) fn pop_scope(&mut self) -> Option<ScopeMark> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Journal an entity before it is written. Outside a transaction there
    /// is nothing to roll back to.
    pub(crate) fn record(&mut self, entity: &EntityRef) {
        if self.active {
            self.journal.push(Snapshot::capture(entity));
        }
    }

    /// Snapshots taken since `mark`, newest first.
    pub(crate) fn unwind(&mut self, mark: &ScopeMark) -> Vec<Snapshot> {
        let at = mark.journal_len.min(self.journal.len());
        let mut undone = self.journal.split_off(at);
        undone.reverse();
        undone
    }

    pub(crate) fn claim(&mut self, name: &str, pending: &[EntityRef]) -> Result<()> {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidOperation(format!(
                "'{}' is not a valid savepoint name",
                name
            )));
        }
        if !self.names.insert(name.to_string()) {
            return Err(Error::InvalidOperation(format!(
                "savepoint '{}' already exists in this transaction",
                name
            )));
        }
        let mark = self.mark(pending);
        self.named.push((name.to_string(), mark));
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.named.iter().position(|(n, _)| n == name).ok_or_else(|| {
            Error::transaction(
                TransactionErrorKind::SavepointNotFound,
                format!("savepoint '{}' does not exist", name),
            )
        })
    }

    /// Savepoints created after `name` are gone once it is rolled back to.
    /// `name` itself stays live.
    pub(crate) fn rolled_back_to(&mut self, name: &str) -> Result<ScopeMark> {
        let pos = self.position(name)?;
        self.named.truncate(pos + 1);
        Ok(self.named[pos].1.clone())
    }

    pub(crate) fn check_named(&self, name: &str) -> Result<()> {
        self.position(name).map(|_| ())
    }

    pub(crate) fn released(&mut self, name: &str) -> Result<()> {
        let pos = self.position(name)?;
        self.named.truncate(pos);
        Ok(())
    }
}

// ============================================================================
// Scope guard
// ============================================================================

/// A transaction scope over the session's connection.
///
/// A root scope begins and ends the physical transaction. A nested scope
/// is backed by a generated savepoint: committing releases it, rolling back
/// returns to it. Nested scopes reject the named-savepoint operations.
#[derive(Debug)]
pub struct Transaction<'s, C: Connection> {
    session: &'s mut Session<C>,
    savepoint: Option<String>,
    state: TransactionState,
}

/// A transaction scope backed by a savepoint inside an active transaction.
pub type NestedTransaction<'s, C> = Transaction<'s, C>;

impl<'s, C: Connection> Transaction<'s, C> {
    pub(crate) fn begin(session: &'s mut Session<C>, isolation: IsolationLevel) -> Result<Self> {
        session.begin_root(isolation)?;
        Ok(Self {
            session,
            savepoint: None,
            state: TransactionState::Active,
        })
    }

    pub(crate) fn nested(session: &'s mut Session<C>) -> Result<Self> {
        let savepoint = session.begin_nested()?;
        Ok(Self {
            session,
            savepoint: Some(savepoint),
            state: TransactionState::Active,
        })
    }

    /// Current state of this scope.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether commit or rollback can still be called.
    pub fn is_active(&self) -> bool {
        !self.state.is_finished()
    }

    /// Whether this scope is backed by a savepoint.
    pub fn is_nested(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Name of the savepoint backing a nested scope; `None` for a root.
    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    /// Flush according to the flush mode, then commit the transaction or
    /// release the savepoint.
    ///
    /// A failed commit leaves the scope active; dropping it rolls back.
    pub fn commit(&mut self) -> Result<()> {
        ensure_active(self.state, "commit")?;
        match self.savepoint.as_deref() {
            None => self.session.prepare_commit()?,
            Some(savepoint) => self.session.prepare_nested_commit(savepoint)?,
        }
        self.state = TransactionState::Committed;
        self.session.finish_commit()
    }

    /// Roll back the transaction, or back to this scope's savepoint.
    ///
    /// Entities saved or deleted inside the scope return to the state they
    /// had when it began.
    pub fn rollback(&mut self) -> Result<()> {
        ensure_active(self.state, "roll back")?;
        self.state = TransactionState::RolledBack;
        self.roll_back_scope()
    }

    fn roll_back_scope(&mut self) -> Result<()> {
        match self.savepoint.as_deref() {
            None => self.session.rollback_root(),
            Some(savepoint) => self.session.rollback_nested(savepoint),
        }
    }

    /// Open a nested scope backed by a fresh savepoint.
    pub fn begin_transaction(&mut self) -> Result<NestedTransaction<'_, C>> {
        ensure_active(self.state, "nest inside")?;
        Transaction::nested(self.session)
    }

    fn ensure_root(&self, action: &str) -> Result<()> {
        if self.is_nested() {
            return Err(Error::NotSupported(format!(
                "nested transactions cannot {}",
                action
            )));
        }
        Ok(())
    }

    /// Create a named savepoint. Names are unique per transaction.
    pub fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_root("create savepoints")?;
        ensure_active(self.state, "create a savepoint in")?;
        self.session.named_savepoint(name)
    }

    /// Roll back to a named savepoint, which stays usable.
    pub fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.ensure_root("roll back to a savepoint")?;
        ensure_active(self.state, "roll back within")?;
        self.session.rollback_to_named(name)
    }

    /// Release a named savepoint, along with every savepoint created after
    /// it.
    pub fn release(&mut self, name: &str) -> Result<()> {
        self.ensure_root("release a savepoint")?;
        ensure_active(self.state, "release a savepoint in")?;
        self.session.release_named(name)
    }
}

impl<C: Connection> Deref for Transaction<'_, C> {
    type Target = Session<C>;

    fn deref(&self) -> &Session<C> {
        self.session
    }
}

impl<C: Connection> DerefMut for Transaction<'_, C> {
    fn deref_mut(&mut self) -> &mut Session<C> {
        self.session
    }
}

impl<C: Connection> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::RolledBack;
            if let Err(e) = self.roll_back_scope() {
                tracing::warn!(savepoint = ?self.savepoint, error = %e, "Rollback on drop failed");
            }
        }
    }
}
