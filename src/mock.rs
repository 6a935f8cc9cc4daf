//! A dependency-free, in-memory driver, suitable for both this crate's own test suite and
//! downstream integration tests that want to exercise a [`crate::Cluster`] without talking to
//! a real database.
//!
//! Register it once (usually at the top of a test) and build a [`crate::ClusterOptions`]
//! pointed at [`MOCK_DRIVER_NAME`]:
//!
//! ```
//! use dbcluster::mock;
//!
//! mock::ensure_registered();
//! let options = dbcluster::ClusterOptions::builder()
//!     .driver(mock::MOCK_DRIVER_NAME)
//!     .build();
//! ```

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;

use crate::{
    connection::Connection,
    driver::{
        Analyzer, ConnectionConstructor, Description, DriverConnection, DriverFactory,
        DriverRegistry, QueryBuilder, QueryCompiler,
    },
    error::{Error, Result},
    options::NodeOptions,
    query::QueryContext,
};

/// The name [`MockDriverFactory`] is conventionally registered under.
pub const MOCK_DRIVER_NAME: &str = "mock";

/// Registers [`MockDriverFactory`] under [`MOCK_DRIVER_NAME`] if it isn't already registered.
pub fn ensure_registered() {
    if DriverRegistry::global().get(MOCK_DRIVER_NAME).is_err() {
        DriverRegistry::global().register(MOCK_DRIVER_NAME, Arc::new(MockDriverFactory::default()));
    }
}

/// A [`DriverFactory`] backed entirely by in-memory state; connections never perform real
/// I/O.
#[derive(Default)]
pub struct MockDriverFactory;

impl DriverFactory for MockDriverFactory {
    fn connection_constructor(&self) -> Arc<dyn ConnectionConstructor> {
        Arc::new(MockConnectionConstructor)
    }

    fn query_builder(&self, _connection: &Connection) -> Box<dyn QueryBuilder> {
        Box::new(MockQueryBuilder)
    }

    fn query_compiler(&self) -> Arc<dyn QueryCompiler> {
        Arc::new(MockQueryCompiler)
    }

    fn analyzer(&self, _connection: &Connection) -> Box<dyn Analyzer> {
        Box::new(MockAnalyzer)
    }
}

struct MockConnectionConstructor;

#[async_trait]
impl ConnectionConstructor for MockConnectionConstructor {
    async fn connect(&self, _node: &NodeOptions) -> Result<Box<dyn DriverConnection>> {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Ok(Box::new(MockConnection {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
        }))
    }
}

struct MockConnection {
    #[allow(dead_code)]
    id: u64,
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn execute(&mut self, ctx: &mut QueryContext) -> Result<()> {
        ctx.sql = Some(format!("-- mock execution of {:?}", ctx.ast));
        Ok(())
    }
}

/// A connection with no behavior beyond satisfying [`DriverConnection`], for tests that only
/// care about pool/queue bookkeeping and never actually execute a query.
pub(crate) fn noop_connection() -> impl DriverConnection {
    MockConnection { id: 0 }
}

struct MockQueryBuilder;

#[async_trait]
impl QueryBuilder for MockQueryBuilder {
    async fn render(&self, ctx: &mut QueryContext) -> Result<()> {
        ctx.ast
            .get_or_insert_with(|| format!("select from {}", ctx.pool));
        Ok(())
    }
}

struct MockQueryCompiler;

#[async_trait]
impl QueryCompiler for MockQueryCompiler {
    async fn compile(&self, ctx: &mut QueryContext) -> Result<()> {
        let ast = ctx
            .ast
            .clone()
            .ok_or_else(|| Error::internal("compile called before render"))?;
        ctx.sql = Some(ast);
        Ok(())
    }
}

struct MockAnalyzer;

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, names: &[String]) -> Result<Description> {
        let mut fields = HashMap::new();
        for name in names {
            fields.insert(name.clone(), vec!["id".to_string()]);
        }
        Ok(Description { fields })
    }
}
