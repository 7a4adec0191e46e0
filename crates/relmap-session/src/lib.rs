//! Session and unit of work for relmap.
//!
//! `relmap-session` is the **persistence layer**. A [`Session`] owns one
//! connection and coordinates entity identity, cascading saves and soft
//! deletes, transaction scopes and the moment pending changes reach the
//! database.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: [`Cache`] keeps one live instance per (type, id).
//! - **Cascade resolution**: [`CascadeResolver`] computes what a save or
//!   delete reaches.
//! - **Flush**: [`FlushPlan`] writes parents before children with optimistic
//!   version checks.
//! - **Transactions**: [`Transaction`] guards over physical transactions and,
//!   when nested, savepoints. Rolling a scope back also restores the
//!   entities it touched.
//!
//! A session is single-threaded. Use a [`SessionFactory`] to hand sessions
//! out across threads.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::open(conn, registry, SessionConfig::default())?;
//!
//! let artist = EntityRef::new(Entity::new("Artist"));
//! artist.write().set("Alias", "Nico");
//!
//! let mut tx = session.begin_transaction(None)?;
//! tx.save(&artist)?;
//! tx.commit()?;
//! ```

pub mod cascade;
pub mod factory;
pub mod flush;
pub mod identity_map;
mod materialize;
#[cfg(test)]
mod mock;
pub mod transaction;

pub use cascade::CascadeResolver;
pub use factory::SessionFactory;
pub use flush::{FlushPlan, FlushResult};
pub use identity_map::{Cache, CacheInsert};
pub use transaction::{NestedTransaction, Transaction, TransactionState};

use flush::log_command;
use materialize::materialize;
use relmap_core::{
    Cascade, Command, ConfigError, Connection, EntityRef, EntitySchema, Error, IsolationLevel,
    QueryErrorKind, Reference, Result, Row, SchemaRegistry, TypeError, Value,
};
use relmap_query::{FilterCatalog, ProcedureRegistry, Query, select_by_id_command};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use transaction::{ScopeMark, TransactionStack};

// ============================================================================
// Session Events
// ============================================================================

/// Type alias for session event callbacks.
///
/// Returning `Err` aborts the operation where that is still possible
/// (a failing `Committing` callback prevents the commit).
type SessionEventFn = Box<dyn FnMut() -> Result<()> + Send>;

/// Registered session-level event callbacks.
#[derive(Default)]
pub struct SessionEventCallbacks {
    before_flush: Vec<SessionEventFn>,
    after_flush: Vec<SessionEventFn>,
    committing: Vec<SessionEventFn>,
    committed: Vec<SessionEventFn>,
    finished: Vec<SessionEventFn>,
}

impl std::fmt::Debug for SessionEventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventCallbacks")
            .field("before_flush", &self.before_flush.len())
            .field("after_flush", &self.after_flush.len())
            .field("committing", &self.committing.len())
            .field("committed", &self.committed.len())
            .field("finished", &self.finished.len())
            .finish()
    }
}

impl SessionEventCallbacks {
    fn slot(&mut self, event: SessionEvent) -> &mut Vec<SessionEventFn> {
        match event {
            SessionEvent::BeforeFlush => &mut self.before_flush,
            SessionEvent::AfterFlush => &mut self.after_flush,
            SessionEvent::Committing => &mut self.committing,
            SessionEvent::Committed => &mut self.committed,
            SessionEvent::Finished => &mut self.finished,
        }
    }

    fn fire(&mut self, event: SessionEvent) -> Result<()> {
        let callbacks = self.slot(event);
        if !callbacks.is_empty() {
            tracing::trace!(?event, count = callbacks.len(), "Firing session event");
        }
        for cb in callbacks.iter_mut() {
            cb()?;
        }
        Ok(())
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Before pending changes are written.
    BeforeFlush,
    /// After a flush wrote every pending entity.
    AfterFlush,
    /// Before a commit or savepoint release, after the commit-time flush.
    Committing,
    /// After a successful commit.
    Committed,
    /// After any transaction scope ends, committed or rolled back.
    Finished,
}

// ============================================================================
// Session Configuration
// ============================================================================

/// When pending changes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlushMode {
    /// Only on [`Session::save_changes`].
    Manual,
    /// On every save and delete.
    #[default]
    Always,
    /// When a transaction scope commits.
    Commit,
    /// When a transaction scope commits, writing only entities with recorded
    /// changes (new entities included).
    Intelligent,
}

impl FlushMode {
    const fn flushes_on_commit(self) -> bool {
        matches!(self, FlushMode::Commit | FlushMode::Intelligent)
    }
}

/// What [`Session::delete`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionBehavior {
    /// Delete is a no-op.
    None,
    /// Set `Deleted` on the cascade closure.
    #[default]
    Soft,
}

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub flush_mode: FlushMode,
    pub deletion_behavior: DeletionBehavior,
    /// Isolation used by `begin_transaction(None)`.
    pub default_isolation: IsolationLevel,
    /// Log every statement with its parameters at debug level.
    pub statement_log: bool,
}

impl SessionConfig {
    /// Default configuration: flush on every save, soft deletes,
    /// `READ COMMITTED`, no statement log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set when pending changes are written.
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Set what [`Session::delete`] does.
    pub fn deletion_behavior(mut self, behavior: DeletionBehavior) -> Self {
        self.deletion_behavior = behavior;
        self
    }

    /// Set the isolation used when `begin_transaction` is given `None`.
    pub fn default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Log every statement with its parameters at debug level.
    ///
    /// Parameter values can carry user data; leave this off in production.
    pub fn statement_log(mut self, enabled: bool) -> Self {
        self.statement_log = enabled;
        self
    }

    /// Parse a JSON configuration; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid session config: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// A unit of work over one connection.
pub struct Session<C: Connection> {
    connection: C,
    registry: Arc<SchemaRegistry>,
    filters: Arc<FilterCatalog>,
    procedures: Arc<ProcedureRegistry>,
    config: SessionConfig,
    cache: Cache,
    /// Saved or deleted entities not yet written.
    pending: Vec<EntityRef>,
    tx: TransactionStack,
    events: SessionEventCallbacks,
    disposed: bool,
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.connection.dialect().kind())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .field("pending", &self.pending.len())
            .field("transaction", &self.tx)
            .field("events", &self.events)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Session<C> {
    /// Create a session over an already-open connection with the default
    /// configuration.
    ///
    /// Use [`Session::open`] when the connection still needs opening.
    pub fn new(connection: C, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(connection, registry, SessionConfig::default())
    }

    /// Create a session over an already-open connection.
    pub fn with_config(connection: C, registry: Arc<SchemaRegistry>, config: SessionConfig) -> Self {
        Self {
            connection,
            registry,
            filters: Arc::new(FilterCatalog::new()),
            procedures: Arc::new(ProcedureRegistry::new()),
            config,
            cache: Cache::new(),
            pending: Vec::new(),
            tx: TransactionStack::default(),
            events: SessionEventCallbacks::default(),
            disposed: false,
        }
    }

    /// Open `connection` and create a session over it.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn open(mut connection: C, registry: Arc<SchemaRegistry>, config: SessionConfig) -> Result<Self> {
        connection.open()?;
        tracing::debug!(dialect = ?connection.dialect().kind(), "Opened session");
        Ok(Self::with_config(connection, registry, config))
    }

    /// Share a global filter catalog with this session.
    ///
    /// Filters registered on the catalog later apply to this session's next
    /// query; compiled queries notice the change and rebuild.
    pub fn with_filters(mut self, filters: Arc<FilterCatalog>) -> Self {
        self.filters = filters;
        self
    }

    /// Share a stored-procedure registry with this session.
    pub fn with_procedures(mut self, procedures: Arc<ProcedureRegistry>) -> Self {
        self.procedures = procedures;
        self
    }

    /// The configuration this session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Schema registry used to map entities and compile queries.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Global filter catalog applied to every query.
    pub fn filters(&self) -> &Arc<FilterCatalog> {
        &self.filters
    }

    /// The identity map. Read-only; use [`Session::attach`] and
    /// [`Session::detach`] to change membership.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Mutable access to the underlying connection.
    ///
    /// Statements sent this way bypass the unit of work: the cache and the
    /// rollback journal do not see them.
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Entities saved or deleted but not yet written.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a root transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_active()
    }

    /// Isolation of the active root transaction.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.tx.isolation()
    }

    /// Number of nested scopes currently open.
    pub fn transaction_depth(&self) -> usize {
        self.tx.depth()
    }

    /// Whether [`Session::dispose`] has run. A disposed session rejects
    /// further work.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::InvalidOperation(
                "session has been disposed".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Register a callback for `event`.
    ///
    /// Callbacks run in registration order. An `Err` from a `BeforeFlush` or
    /// `Committing` callback aborts the flush or commit.
    ///
    /// # Example
    ///
    /// ```ignore
    /// session.on(SessionEvent::Committed, || {
    ///     tracing::info!("saved");
    ///     Ok(())
    /// });
    /// ```
    pub fn on(&mut self, event: SessionEvent, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.events.slot(event).push(Box::new(f));
    }

    /// Shorthand for `on(SessionEvent::BeforeFlush, f)`.
    pub fn on_before_flush(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.on(SessionEvent::BeforeFlush, f);
    }

    /// Shorthand for `on(SessionEvent::AfterFlush, f)`.
    pub fn on_after_flush(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.on(SessionEvent::AfterFlush, f);
    }

    /// Shorthand for `on(SessionEvent::Committing, f)`.
    pub fn on_committing(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.on(SessionEvent::Committing, f);
    }

    /// Shorthand for `on(SessionEvent::Committed, f)`.
    pub fn on_committed(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.on(SessionEvent::Committed, f);
    }

    /// Shorthand for `on(SessionEvent::Finished, f)`.
    pub fn on_finished(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.on(SessionEvent::Finished, f);
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Save an entity and its Save-cascade closure.
    ///
    /// New entities are inserted, persisted ones updated with a version
    /// check. Under [`FlushMode::Always`] the writes happen here; otherwise
    /// they wait for the next flush.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn save<'e>(&mut self, entity: impl Into<Option<&'e EntityRef>>) -> Result<()> {
        self.ensure_open()?;
        let entity = entity.into().ok_or(Error::ArgumentNull("entity"))?;
        if entity.is_deleted() {
            return Err(Error::InvalidOperation(format!(
                "cannot save deleted entity {:?}",
                entity
            )));
        }
        let closure = CascadeResolver::new(&self.registry).closure(entity, Cascade::Save)?;
        self.link_collections(&closure)?;
        let mut enqueued = 0usize;
        for e in &closure {
            if e.is_deleted() {
                continue;
            }
            self.enqueue(e)?;
            enqueued += 1;
        }
        tracing::debug!(root = ?entity, closure = enqueued, "Saved entity graph");
        if self.config.flush_mode == FlushMode::Always {
            self.flush()?;
        }
        Ok(())
    }

    /// Soft-delete an entity and its SaveDelete-cascade closure.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn delete<'e>(&mut self, entity: impl Into<Option<&'e EntityRef>>) -> Result<()> {
        self.ensure_open()?;
        let entity = entity.into().ok_or(Error::ArgumentNull("entity"))?;
        if self.config.deletion_behavior == DeletionBehavior::None {
            tracing::debug!(entity = ?entity, "Deletion disabled; ignoring delete");
            return Ok(());
        }
        let closure = CascadeResolver::new(&self.registry).closure(entity, Cascade::SaveDelete)?;
        for e in &closure {
            self.tx.record(e);
            e.write().mark_deleted();
            self.enqueue(e)?;
        }
        tracing::debug!(root = ?entity, closure = closure.len(), "Deleted entity graph");
        if self.config.flush_mode == FlushMode::Always {
            self.flush()?;
        }
        Ok(())
    }

    /// Write pending changes now, whatever the flush mode.
    ///
    /// Under [`FlushMode::Intelligent`] only entities with recorded changes
    /// are written, including cached entities that were edited without an
    /// explicit save.
    ///
    /// # Errors
    ///
    /// A stale version fails with [`Error::Concurrency`]; rows written
    /// before the failure stay written unless the surrounding transaction
    /// rolls back.
    pub fn save_changes(&mut self) -> Result<FlushResult> {
        self.ensure_open()?;
        self.flush()
    }

    /// Collection items cascade-saved with their owner point back at it.
    fn link_collections(&self, closure: &[EntityRef]) -> Result<()> {
        for owner in closure {
            let schema = self.registry.require(owner.entity_type())?;
            for list in &schema.list_fields {
                if !list.cascade.covers(Cascade::Save) {
                    continue;
                }
                let items = owner.read().collection(list.name).to_vec();
                for item in items {
                    let unlinked = item.read().reference(list.reference_field).is_none();
                    if unlinked {
                        item.write().set_reference(
                            list.reference_field,
                            Some(Reference::Entity(owner.clone())),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, entity: &EntityRef) -> Result<()> {
        if !self.pending.iter().any(|p| p.ptr_eq(entity)) {
            self.pending.push(entity.clone());
        }
        if entity.id() != 0 {
            if let CacheInsert::Conflict(existing) = self.cache.insert(entity) {
                return Err(Error::InvalidOperation(format!(
                    "{:?} is already tracked by this session as another instance",
                    existing
                )));
            }
        }
        entity.write().evicted = false;
        Ok(())
    }

    /// Entities the next flush writes.
    fn flush_targets(&self) -> Vec<EntityRef> {
        if self.config.flush_mode != FlushMode::Intelligent {
            return self.pending.clone();
        }
        let mut seen = HashSet::new();
        self.pending
            .iter()
            .chain(self.cache.iter())
            .filter(|e| seen.insert(e.addr()) && e.read().is_dirty())
            .cloned()
            .collect()
    }

    fn flush(&mut self) -> Result<FlushResult> {
        let targets = self.flush_targets();
        if targets.is_empty() {
            self.pending.clear();
            return Ok(FlushResult::default());
        }
        self.events.fire(SessionEvent::BeforeFlush)?;
        let plan = FlushPlan::new(&targets);
        tracing::debug!(
            mode = ?self.config.flush_mode,
            entities = plan.len(),
            skipped = self.pending.len().saturating_sub(plan.len()),
            "Flushing session"
        );
        for e in plan.entities() {
            self.tx.record(e);
        }
        let registry = Arc::clone(&self.registry);
        let result = plan.execute(&mut self.connection, &registry, self.config.statement_log)?;
        for e in plan.entities() {
            if e.is_deleted() {
                continue;
            }
            if let CacheInsert::Conflict(existing) = self.cache.insert(e) {
                tracing::warn!(entity = ?e, existing = ?existing, "Flushed entity shadows a cached instance");
            }
        }
        self.pending.clear();
        self.events.fire(SessionEvent::AfterFlush)?;
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    fn read_rows(&mut self, cmd: &Command) -> Result<Vec<Row>> {
        log_command(cmd, self.config.statement_log);
        self.connection.execute_reader(cmd)
    }

    /// Materialize rows, returning the cached instance for known ids.
    fn materialize_rows(&mut self, schema: &EntitySchema, rows: Vec<Row>) -> Result<Vec<EntityRef>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity = materialize(schema, row)?;
            if entity.deleted {
                out.push(EntityRef::new(entity));
                continue;
            }
            match self.cache.get(schema.name, entity.id) {
                Some(hit) => out.push(hit),
                None => {
                    let fresh = EntityRef::new(entity);
                    self.cache.insert(&fresh);
                    out.push(fresh);
                }
            }
        }
        Ok(out)
    }

    /// Load an entity by id, from the cache when possible.
    ///
    /// Returns `Ok(None)` when no row matches. Soft-deleted entities are
    /// never answered from the cache.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn get(&mut self, entity_type: &str, id: i64) -> Result<Option<EntityRef>> {
        self.ensure_open()?;
        let registry = Arc::clone(&self.registry);
        let schema = registry.require(entity_type)?;
        if let Some(hit) = self.cache.get(schema.name, id) {
            return Ok(Some(hit));
        }
        let cmd = select_by_id_command(schema, id);
        let rows = self.read_rows(&cmd)?;
        Ok(self.materialize_rows(schema, rows)?.into_iter().next())
    }

    /// Run a query, applying global filters and the dialect's pagination.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = query.entity_type()))]
    pub fn query(&mut self, query: &mut Query) -> Result<Vec<EntityRef>> {
        self.ensure_open()?;
        let registry = Arc::clone(&self.registry);
        let cmd = query.to_command(&registry, &self.filters, self.connection.dialect())?;
        let schema = registry.require(query.entity_type())?;
        let rows = self.read_rows(&cmd)?;
        let entities = self.materialize_rows(schema, rows)?;
        tracing::debug!(rows = entities.len(), "Query returned");
        Ok(entities)
    }

    /// Run a query that must match exactly one row.
    pub fn query_single(&mut self, query: &mut Query) -> Result<EntityRef> {
        let mut found = self.query(query)?;
        match found.len() {
            1 => found.pop().ok_or_else(|| Error::InvalidOperation("query returned no rows".to_string())),
            0 => Err(Error::InvalidOperation("query returned no rows".to_string())),
            n => Err(Error::InvalidOperation(format!(
                "query returned {} rows, expected one",
                n
            ))),
        }
    }

    /// Count matching rows. Sorting and pagination are ignored.
    pub fn count(&mut self, query: &Query) -> Result<u64> {
        self.ensure_open()?;
        let cmd = query.count_command(&self.registry, &self.filters)?;
        log_command(&cmd, self.config.statement_log);
        let value = self.connection.execute_scalar(&cmd)?;
        value
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                Error::Type(TypeError {
                    expected: "BIGINT",
                    actual: value.type_name().to_string(),
                    column: None,
                })
            })
    }

    /// Resolve a navigation to an entity, loading it by id when only the
    /// foreign key is known.
    pub fn load_reference(&mut self, entity: &EntityRef, nav: &str) -> Result<Option<EntityRef>> {
        self.ensure_open()?;
        let (entity_type, current) = {
            let guard = entity.read();
            (guard.entity_type(), guard.reference(nav).cloned())
        };
        let registry = Arc::clone(&self.registry);
        let schema = registry.require(entity_type)?;
        let target = schema
            .get_field(nav)
            .and_then(|f| f.references)
            .ok_or_else(|| {
                Error::query_path(
                    QueryErrorKind::UnresolvedPath,
                    entity_type,
                    nav,
                    "not a navigation",
                )
            })?;
        match current {
            None => Ok(None),
            Some(Reference::Entity(loaded)) => Ok(Some(loaded)),
            Some(Reference::Id(id)) => {
                let loaded = self.get(target, id)?;
                if let Some(found) = &loaded {
                    entity
                        .write()
                        .load_reference(nav, Some(Reference::Entity(found.clone())));
                }
                Ok(loaded)
            }
        }
    }

    /// Call a registered stored procedure and return its rows.
    pub fn call_procedure(&mut self, signature: &str, args: Vec<Value>) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let cmd = self
            .procedures
            .command(signature, args, self.connection.dialect())?;
        self.read_rows(&cmd)
    }

    /// Call a registered stored procedure for its affected-row count.
    pub fn execute_procedure(&mut self, signature: &str, args: Vec<Value>) -> Result<u64> {
        self.ensure_open()?;
        let cmd = self
            .procedures
            .command(signature, args, self.connection.dialect())?;
        log_command(&cmd, self.config.statement_log);
        self.connection.execute_non_query(&cmd)
    }

    // ------------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------------

    /// Take ownership of an entity loaded elsewhere.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] when another instance with the same id is
    /// already cached.
    pub fn attach<'e>(&mut self, entity: impl Into<Option<&'e EntityRef>>) -> Result<()> {
        self.ensure_open()?;
        let entity = entity.into().ok_or(Error::ArgumentNull("entity"))?;
        if let CacheInsert::Conflict(existing) = self.cache.insert(entity) {
            return Err(Error::InvalidOperation(format!(
                "{:?} is already tracked by this session as another instance",
                existing
            )));
        }
        entity.write().evicted = false;
        Ok(())
    }

    /// Stop tracking an entity. Returns whether it was cached.
    pub fn detach<'e>(&mut self, entity: impl Into<Option<&'e EntityRef>>) -> Result<bool> {
        self.ensure_open()?;
        let entity = entity.into().ok_or(Error::ArgumentNull("entity"))?;
        self.pending.retain(|p| !p.ptr_eq(entity));
        Ok(self.cache.remove_entity(entity))
    }

    /// Clear the cache and close the connection. Idempotent.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        if !self.pending.is_empty() {
            tracing::warn!(pending = self.pending.len(), "Disposing session with unflushed changes");
            self.pending.clear();
        }
        self.cache.clear();
        if self.tx.is_active() {
            self.tx.end();
            if let Err(e) = self.connection.rollback() {
                tracing::warn!(error = %e, "Rollback during dispose failed");
            }
        }
        tracing::debug!("Disposed session");
        self.connection.close()
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Begin a transaction scope.
    ///
    /// With no transaction active this begins a physical transaction at
    /// `isolation`; `None` uses [`SessionConfig::default_isolation`]. Inside
    /// an active transaction it opens a nested scope on a fresh savepoint
    /// instead, and `isolation` is ignored since the physical transaction
    /// already fixed it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// fn import(session: &mut Session<C>, artist: &EntityRef) -> Result<()> {
    ///     // A root transaction, or a savepoint if the caller already began one.
    ///     let mut scope = session.begin_transaction(None)?;
    ///     scope.save(artist)?;
    ///     scope.commit()
    /// }
    /// ```
    pub fn begin_transaction(
        &mut self,
        isolation: impl Into<Option<IsolationLevel>>,
    ) -> Result<Transaction<'_, C>> {
        if self.tx.is_active() {
            tracing::trace!("Transaction active; nesting on a savepoint");
            return Transaction::nested(self);
        }
        let isolation = isolation.into().unwrap_or(self.config.default_isolation);
        Transaction::begin(self, isolation)
    }

    pub(crate) fn begin_root(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        if self.tx.is_active() {
            return Err(Error::InvalidOperation(
                "a transaction is already active; nest through it".to_string(),
            ));
        }
        self.connection.begin_transaction(isolation)?;
        self.tx.begin(isolation, &self.pending);
        tracing::debug!(isolation = isolation.as_sql(), "Began transaction");
        Ok(())
    }

    /// Flush, fire `Committing` and commit. Nothing is committed if any step
    /// fails.
    pub(crate) fn prepare_commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.config.flush_mode.flushes_on_commit() {
            self.flush()?;
        }
        self.events.fire(SessionEvent::Committing)?;
        self.connection.commit()?;
        self.tx.end();
        tracing::debug!("Committed transaction");
        Ok(())
    }

    pub(crate) fn finish_commit(&mut self) -> Result<()> {
        let committed = self.events.fire(SessionEvent::Committed);
        let finished = self.events.fire(SessionEvent::Finished);
        committed.and(finished)
    }

    pub(crate) fn rollback_root(&mut self) -> Result<()> {
        let rolled_back = self.connection.rollback();
        if let Some(mark) = self.tx.root_mark() {
            self.restore_to(mark);
        }
        self.tx.end();
        tracing::debug!(ok = rolled_back.is_ok(), "Rolled back transaction");
        let finished = self.events.fire(SessionEvent::Finished);
        rolled_back.and(finished)
    }

    pub(crate) fn begin_nested(&mut self) -> Result<String> {
        self.ensure_open()?;
        if !self.tx.is_active() {
            return Err(Error::InvalidOperation(
                "nested transaction requires an active transaction".to_string(),
            ));
        }
        let name = self.tx.push_scope(&self.pending);
        if let Err(e) = self.connection.savepoint(&name) {
            self.tx.pop_scope();
            return Err(e);
        }
        tracing::debug!(savepoint = %name, depth = self.tx.depth(), "Began nested transaction");
        Ok(name)
    }

    pub(crate) fn prepare_nested_commit(&mut self, savepoint: &str) -> Result<()> {
        self.ensure_open()?;
        if self.config.flush_mode.flushes_on_commit() {
            self.flush()?;
        }
        self.events.fire(SessionEvent::Committing)?;
        self.connection.release_savepoint(savepoint)?;
        self.tx.pop_scope();
        tracing::debug!(savepoint, "Committed nested transaction");
        Ok(())
    }

    pub(crate) fn rollback_nested(&mut self, savepoint: &str) -> Result<()> {
        let rolled_back = self.connection.rollback_to_savepoint(savepoint);
        if let Some(mark) = self.tx.pop_scope() {
            self.restore_to(mark);
        }
        tracing::debug!(savepoint, ok = rolled_back.is_ok(), "Rolled back nested transaction");
        let finished = self.events.fire(SessionEvent::Finished);
        rolled_back.and(finished)
    }

    pub(crate) fn named_savepoint(&mut self, name: &str) -> Result<()> {
        self.tx.claim(name, &self.pending)?;
        self.connection.savepoint(name)
    }

    pub(crate) fn rollback_to_named(&mut self, name: &str) -> Result<()> {
        self.tx.check_named(name)?;
        self.connection.rollback_to_savepoint(name)?;
        let mark = self.tx.rolled_back_to(name)?;
        self.restore_to(mark);
        Ok(())
    }

    /// Undo in-memory effects of writes made since `mark`.
    ///
    /// Journaled entities get their id, version, deleted flag and change log
    /// back, newest write first. Inserts that no longer have an id leave the
    /// cache, and the pending queue returns to what it held at the mark.
    fn restore_to(&mut self, mark: ScopeMark) {
        let undone = self.tx.unwind(&mark);
        let restored = undone.len();
        let mut touched: Vec<EntityRef> = Vec::with_capacity(restored);
        for snapshot in undone {
            let entity = snapshot.restore();
            if !touched.iter().any(|t| t.ptr_eq(&entity)) {
                touched.push(entity);
            }
        }
        let mut evicted = 0usize;
        for entity in &touched {
            if entity.id() == 0 && self.cache.remove_entity(entity) {
                evicted += 1;
            }
        }
        self.pending = mark.pending;
        tracing::debug!(
            restored,
            evicted,
            pending = self.pending.len(),
            "Restored entities to scope start"
        );
    }

    pub(crate) fn release_named(&mut self, name: &str) -> Result<()> {
        self.tx.check_named(name)?;
        self.connection.release_savepoint(name)?;
        self.tx.released(name)
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!(error = %e, "Session dispose on drop failed");
        }
    }
}
