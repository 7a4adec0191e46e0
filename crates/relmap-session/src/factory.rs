//! Session factory.
//!
//! Hands out one [`Session`] per logical unit of work. The factory itself
//! is shared across threads; acquisition is serialized by a mutex so that
//! connection setup never interleaves.

use crate::{Session, SessionConfig};
use relmap_core::{Connection, Result, SchemaRegistry};
use relmap_query::{FilterCatalog, ProcedureRegistry};
use std::sync::{Arc, Mutex};

type Connector<C> = Box<dyn Fn() -> Result<C> + Send + Sync>;

pub struct SessionFactory<C: Connection> {
    connect: Connector<C>,
    registry: Arc<SchemaRegistry>,
    filters: Arc<FilterCatalog>,
    procedures: Arc<ProcedureRegistry>,
    config: SessionConfig,
    /// Sessions opened so far; the lock is the acquisition gate.
    opened: Mutex<u64>,
}

impl<C: Connection> std::fmt::Debug for SessionFactory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("entities", &self.registry.len())
            .field("filters", &self.filters.len())
            .field("config", &self.config)
            .field("opened", &self.sessions_opened())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> SessionFactory<C> {
    /// `connect` builds an unopened connection for each session.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        connect: impl Fn() -> Result<C> + Send + Sync + 'static,
    ) -> Self {
        Self {
            connect: Box::new(connect),
            registry,
            filters: Arc::new(FilterCatalog::new()),
            procedures: Arc::new(ProcedureRegistry::new()),
            config: SessionConfig::default(),
            opened: Mutex::new(0),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_filters(mut self, filters: Arc<FilterCatalog>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_procedures(mut self, procedures: Arc<ProcedureRegistry>) -> Self {
        self.procedures = procedures;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The catalog every session from this factory shares.
    pub fn filters(&self) -> &Arc<FilterCatalog> {
        &self.filters
    }

    /// Open a connection and wrap it in a new session.
    pub fn open_session(&self) -> Result<Session<C>> {
        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
        let connection = (self.connect)()?;
        let session = Session::open(connection, Arc::clone(&self.registry), self.config.clone())?
            .with_filters(Arc::clone(&self.filters))
            .with_procedures(Arc::clone(&self.procedures));
        *opened += 1;
        tracing::debug!(opened = *opened, "Handed out session");
        Ok(session)
    }

    pub fn sessions_opened(&self) -> u64 {
        *self.opened.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, registry};
    use crate::FlushMode;
    use relmap_core::{Error, Value};
    use relmap_query::QueryCondition;

    fn factory() -> SessionFactory<MockConnection> {
        SessionFactory::new(registry().finish().unwrap(), || Ok(MockConnection::new()))
    }

    #[test]
    fn sessions_are_opened_with_factory_config() {
        let factory = factory().with_config(SessionConfig::new().flush_mode(FlushMode::Manual));
        let session = factory.open_session().unwrap();
        assert_eq!(session.config().flush_mode, FlushMode::Manual);
        assert_eq!(session.connection().log(), vec!["OPEN"]);
        assert_eq!(factory.sessions_opened(), 1);
    }

    #[test]
    fn sessions_share_the_filter_catalog() {
        let factory = factory();
        let a = factory.open_session().unwrap();
        let b = factory.open_session().unwrap();
        factory
            .filters()
            .register("Artist", QueryCondition::ne("Artist", "Alias", Value::Null).into())
            .unwrap();
        assert_eq!(a.filters().len(), 1);
        assert!(Arc::ptr_eq(a.filters(), b.filters()));
    }

    #[test]
    fn connect_failure_propagates() {
        let factory: SessionFactory<MockConnection> =
            SessionFactory::new(registry().finish().unwrap(), || {
                Err(Error::Custom("no route to host".to_string()))
            });
        assert!(factory.open_session().is_err());
        assert_eq!(factory.sessions_opened(), 0);
    }

    #[test]
    fn concurrent_acquisition() {
        let factory = Arc::new(factory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = Arc::clone(&factory);
                std::thread::spawn(move || {
                    let mut session = factory.open_session().unwrap();
                    session.dispose().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(factory.sessions_opened(), 8);
    }
}
