//! The plug-in surface a database driver implements to be usable with a [`crate::Cluster`].
//!
//! A driver is resolved once, by name, from [`ClusterOptions::driver`](crate::ClusterOptions)
//! when a cluster is constructed. Everything downstream of that lookup -- establishing
//! connections, rendering queries, describing schemas -- goes through the trait objects a
//! [`DriverFactory`] hands back.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock, RwLock},
};

use async_trait::async_trait;

use crate::{
    connection::Connection,
    error::{Error, Result},
    options::NodeOptions,
    query::QueryContext,
};

/// A live connection to a physical server, as established by a driver.
///
/// This is intentionally minimal: everything this crate needs from a physical connection is
/// the ability to execute a query that has already been rendered into a [`QueryContext`].
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// Executes the query described by `ctx` against this connection.
    async fn execute(&mut self, ctx: &mut QueryContext) -> Result<()>;
}

/// Builds new physical connections for a single node.
#[async_trait]
pub trait ConnectionConstructor: Send + Sync {
    /// Establishes one new connection using the given node configuration.
    async fn connect(&self, node: &NodeOptions) -> Result<Box<dyn DriverConnection>>;
}

/// Renders an in-progress query against a particular connection, e.g. interpolating
/// connection-specific parameters before it is compiled.
#[async_trait]
pub trait QueryBuilder: Send + Sync {
    async fn render(&self, ctx: &mut QueryContext) -> Result<()>;
}

/// Compiles a rendered query into the final form the connection will execute.
#[async_trait]
pub trait QueryCompiler: Send + Sync {
    async fn compile(&self, ctx: &mut QueryContext) -> Result<()>;
}

/// A description of a named schema object, as produced by [`Analyzer::analyze`].
#[derive(Debug, Clone, Default)]
pub struct Description {
    /// Maps an object name to the column/field names the analyzer discovered for it.
    pub fields: HashMap<String, Vec<String>>,
}

/// Inspects schema objects on behalf of the query façade's `describe` operation.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, names: &[String]) -> Result<Description>;
}

/// Produces the trait objects that implement a single driver's behavior.
///
/// Implementations are registered once, by name, with [`DriverRegistry::register`].
pub trait DriverFactory: Send + Sync {
    /// Returns the constructor used to establish new physical connections.
    fn connection_constructor(&self) -> Arc<dyn ConnectionConstructor>;

    /// Returns a query builder bound to `connection`, used to render a single request.
    fn query_builder(&self, connection: &Connection) -> Box<dyn QueryBuilder>;

    /// Returns the compiler used to turn rendered queries into their final executable form.
    fn query_compiler(&self) -> Arc<dyn QueryCompiler>;

    /// Returns an analyzer bound to `connection`, used to describe a single set of schema
    /// objects.
    fn analyzer(&self, connection: &Connection) -> Box<dyn Analyzer>;
}

impl fmt::Debug for dyn DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DriverFactory")
    }
}

/// A process-wide registry mapping driver names to the factories that implement them.
///
/// This stands in for the dynamic, load-by-name-string resolution that database drivers in
/// dynamically typed languages get for free: here, a driver author registers their
/// [`DriverFactory`] once (typically in a `ctor`-style initializer or at the top of `main`),
/// and [`crate::Cluster`] looks it up by the name in [`ClusterOptions::driver`](crate::ClusterOptions).
pub struct DriverRegistry {
    factories: RwLock<HashMap<String, Arc<dyn DriverFactory>>>,
}

impl DriverRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static DriverRegistry {
        static REGISTRY: OnceLock<DriverRegistry> = OnceLock::new();
        REGISTRY.get_or_init(DriverRegistry::new)
    }

    /// Registers `factory` under `name`, replacing any factory previously registered under
    /// the same name.
    pub fn register(&self, name: impl Into<String>, factory: Arc<dyn DriverFactory>) {
        let mut factories = self.factories.write().unwrap();
        factories.insert(name.into(), factory);
    }

    pub(crate) fn get(&self, name: &str) -> Result<Arc<dyn DriverFactory>> {
        let factories = self.factories.read().unwrap();
        factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::driver_load(name, "no driver registered under this name"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockDriverFactory;

    #[test]
    fn unregistered_driver_is_a_load_error() {
        let err = DriverRegistry::global()
            .get("does-not-exist-unit-test")
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::DriverLoad { .. }
        ));
    }

    #[test]
    fn registered_driver_round_trips() {
        DriverRegistry::global().register(
            "mock-driver-registry-test",
            Arc::new(MockDriverFactory::default()),
        );
        assert!(DriverRegistry::global()
            .get("mock-driver-registry-test")
            .is_ok());
    }
}
