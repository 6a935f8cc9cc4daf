//! The query façade: `query`, `describe`, and the context type they share.
//!
//! This module is deliberately thin. The driver plug-in surface in [`crate::driver`] owns
//! the actual rendering/compiling/executing behavior; this module only wires those steps
//! together in the order the dispatch contract specifies.

use crate::{
    cluster::Cluster,
    driver::Description,
    error::{Error, Result},
};

/// Carries a query from its caller-supplied AST through rendering/compilation to execution.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// The pool this query should run against.
    pub pool: String,
    /// An opaque, driver-specific AST payload. Left `None` once `sql` has been populated.
    pub ast: Option<String>,
    /// The final, executable form of the query, once rendering or compilation has run.
    pub sql: Option<String>,
}

impl QueryContext {
    /// Creates a new context for `pool` carrying `ast` as its starting payload.
    pub fn new(pool: impl Into<String>, ast: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            ast: Some(ast.into()),
            sql: None,
        }
    }

    /// Creates a new context for `pool` whose SQL is already final, skipping render/compile.
    pub fn with_sql(pool: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            ast: None,
            sql: Some(sql.into()),
        }
    }

    /// True once `sql` is final and render/compile can be skipped.
    pub fn is_ready(&self) -> bool {
        self.sql.is_some()
    }
}

impl Cluster {
    /// Runs `ctx` to completion: compiling an AST if present and the context isn't already
    /// ready, acquiring a pooled connection, rendering if necessary, then executing.
    ///
    /// The acquired connection is pooled (not detached), so it returns to idle on its own
    /// once this call returns, re-entering the scheduler exactly as an idle connection
    /// reported by a node would.
    pub async fn query(&self, mut ctx: QueryContext) -> Result<QueryContext> {
        if ctx.pool.trim().is_empty() {
            return Err(Error::bad_input("QueryContext.pool must not be empty"));
        }

        if !ctx.is_ready() {
            if let Some(ast) = ctx.ast.clone() {
                let compiler = self.driver_factory().query_compiler();
                compiler.compile(&mut ctx).await?;
                if let Some(sql) = ctx.sql.as_mut() {
                    sql.push(';');
                } else {
                    ctx.sql = Some(format!("{};", ast));
                }
            }
        }

        let mut connection = self.get_db_connection(ctx.pool.clone()).await?;

        if ctx.is_ready() {
            connection.query(&mut ctx).await?;
        } else {
            let builder = self.driver_factory().query_builder(&connection);
            builder.render(&mut ctx).await?;
            connection.query(&mut ctx).await?;
        }

        Ok(ctx)
    }

    /// Describes `names` using a detached `"read"` connection, always ending the connection
    /// whether the analyzer succeeds or fails.
    pub async fn describe(&self, names: &[String]) -> Result<Description> {
        let connection = self.get_connection("read").await?;
        let analyzer = self.driver_factory().analyzer(&connection);
        let result = analyzer.analyze(names).await;
        connection.end().await;
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_context_with_sql_is_ready() {
        let ctx = QueryContext::with_sql("read", "select 1;");
        assert!(ctx.is_ready());
    }

    #[test]
    fn query_context_with_ast_is_not_ready() {
        let ctx = QueryContext::new("read", "select * from t");
        assert!(!ctx.is_ready());
    }
}
