//! The connection handle returned to callers by [`crate::Cluster`].

use std::sync::Arc;

use derive_where::derive_where;
use tokio::sync::mpsc;

use crate::{
    driver::DriverConnection,
    error::Result,
    query::QueryContext,
    {ClusterCommand, ConnId, NodeId},
};

/// A connection owned by exactly one of: a [`crate::Cluster`]'s pools, or a caller that holds
/// it directly.
///
/// While `pooled` is `true`, dropping a `Connection` returns it to its owning cluster as idle
/// rather than closing it -- the same automatic check-in behavior the donor gets from
/// `Drop for Connection` over a weak pool reference, generalized here to a plain channel send
/// since the cluster is addressed by an unbounded sender rather than a shared pool handle.
/// [`Connection::remove_from_pool`] detaches a connection from this lifecycle, at which point
/// the caller is responsible for calling [`Connection::end`].
#[derive_where(Debug)]
pub struct Connection {
    id: ConnId,
    node_id: NodeId,
    pools: Arc<[Arc<str>]>,
    #[derive_where(skip)]
    inner: Option<Box<dyn DriverConnection>>,
    #[derive_where(skip)]
    cluster: mpsc::UnboundedSender<ClusterCommand>,
    pooled: bool,
}

/// An established connection that has not yet been handed to a caller or parked in a pool.
pub(crate) struct IdleConnection {
    pub(crate) id: ConnId,
    pub(crate) node_id: NodeId,
    pub(crate) pools: Arc<[Arc<str>]>,
    pub(crate) inner: Box<dyn DriverConnection>,
}

impl Connection {
    pub(crate) fn from_idle(
        idle: IdleConnection,
        cluster: mpsc::UnboundedSender<ClusterCommand>,
    ) -> Self {
        Self {
            id: idle.id,
            node_id: idle.node_id,
            pools: idle.pools,
            inner: Some(idle.inner),
            cluster,
            pooled: true,
        }
    }

    /// Tears this handle apart without running `Drop`, handing the raw connection back to the
    /// caller. Used when a dispatch attempt fails because the request's receiver was dropped
    /// and the connection needs to go back through the dispatcher unharmed.
    pub(crate) fn into_idle(mut self) -> IdleConnection {
        let inner = self.inner.take().expect("connection already consumed");
        IdleConnection {
            id: self.id,
            node_id: self.node_id,
            pools: self.pools.clone(),
            inner,
        }
    }

    /// The id this connection was assigned when it was established. Unique for the lifetime
    /// of the process.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// The id of the node this connection belongs to.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The pools this connection serves.
    pub fn pools(&self) -> &[Arc<str>] {
        &self.pools
    }

    /// Detaches this connection from its owning pool. After this call, dropping the
    /// connection without calling [`Connection::end`] still closes it, but it will never be
    /// returned to idle.
    pub fn remove_from_pool(&mut self) {
        self.pooled = false;
    }

    /// Executes `ctx` against this connection.
    pub async fn query(&mut self, ctx: &mut QueryContext) -> Result<()> {
        let inner = self
            .inner
            .as_mut()
            .expect("query() called on a connection with no underlying driver connection");
        inner.execute(ctx).await
    }

    /// Closes this connection for good. Only meaningful for connections detached via
    /// [`Connection::remove_from_pool`]; pooled connections should simply be dropped so they
    /// return to idle.
    pub async fn end(mut self) {
        self.pooled = false;
        self.inner.take();
        let _ = self.cluster.send(ClusterCommand::ConnectionEnded {
            id: self.id,
            node_id: self.node_id,
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        if self.pooled {
            let _ = self.cluster.send(ClusterCommand::ConnectionIdle(IdleConnection {
                id: self.id,
                node_id: self.node_id,
                pools: self.pools.clone(),
                inner,
            }));
        } else {
            let _ = self.cluster.send(ClusterCommand::ConnectionEnded {
                id: self.id,
                node_id: self.node_id,
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock;
    use tokio::sync::mpsc;

    fn idle_connection(id: ConnId) -> IdleConnection {
        IdleConnection {
            id,
            node_id: 1,
            pools: Arc::from(vec![Arc::from("read")].into_boxed_slice()),
            inner: Box::new(mock::noop_connection()),
        }
    }

    #[tokio::test]
    async fn drop_while_pooled_sends_connection_idle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::from_idle(idle_connection(1), tx);
        drop(conn);

        let cmd = rx.recv().await.expect("command sent");
        assert!(matches!(cmd, ClusterCommand::ConnectionIdle(_)));
    }

    #[tokio::test]
    async fn drop_after_remove_from_pool_sends_connection_ended() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = Connection::from_idle(idle_connection(2), tx);
        conn.remove_from_pool();
        drop(conn);

        let cmd = rx.recv().await.expect("command sent");
        assert!(matches!(cmd, ClusterCommand::ConnectionEnded { id: 2, .. }));
    }

    #[tokio::test]
    async fn end_sends_connection_ended_and_suppresses_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::from_idle(idle_connection(3), tx);
        conn.end().await;

        let cmd = rx.recv().await.expect("command sent");
        assert!(matches!(cmd, ClusterCommand::ConnectionEnded { id: 3, .. }));
        assert!(rx.try_recv().is_err());
    }
}
