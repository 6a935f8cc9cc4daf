//! Tracks idle connections, indexed both by the pool names they serve and by id.
//!
//! A connection that serves more than one pool (the common case: a node's connections serve
//! both `"read"` and `"write"` by default) conceptually sits in every one of those pools at
//! once. Rust ownership makes storing the same `Box<dyn DriverConnection>` in more than one
//! map impossible, so this keeps exactly one canonical copy and lets each pool's
//! [`OrderedIndex`] hold only the connection's id -- the FIFO order a pool needs to serve
//! requests fairly, without duplicating the connection itself.

use std::{collections::HashMap, sync::Arc};

use crate::{connection::IdleConnection, ordered_index::OrderedIndex, ConnId, NodeId};

struct PoolEntry {
    ids: OrderedIndex<ConnId, ()>,
    node_count: u32,
}

impl PoolEntry {
    fn new() -> Self {
        Self {
            ids: OrderedIndex::new(),
            node_count: 0,
        }
    }
}

#[derive(Default)]
pub(crate) struct PoolRegistry {
    pools: HashMap<Arc<str>, PoolEntry>,
    connections: HashMap<ConnId, IdleConnection>,
}

impl PoolRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a node as a servicer of `pools`, creating any pool entries that don't yet
    /// exist.
    pub(crate) fn register(&mut self, pools: &[Arc<str>]) {
        for pool in pools {
            self.pools
                .entry(pool.clone())
                .or_insert_with(PoolEntry::new)
                .node_count += 1;
        }
    }

    /// Removes one node's servicing of `pools`, dropping any pool entry whose node count
    /// reaches zero. Idle connections belonging to the departing node must be purged
    /// separately via [`PoolRegistry::drop_node_connections`] before this is called.
    pub(crate) fn unregister(&mut self, pools: &[Arc<str>]) {
        for pool in pools {
            if let Some(entry) = self.pools.get_mut(pool) {
                entry.node_count = entry.node_count.saturating_sub(1);
                if entry.node_count == 0 {
                    self.pools.remove(pool);
                }
            }
        }
    }

    /// Parks `conn` as idle in every pool it serves.
    pub(crate) fn park(&mut self, conn: IdleConnection) {
        let id = conn.id;
        for pool in conn.pools.iter() {
            if let Some(entry) = self.pools.get_mut(pool) {
                entry.ids.push(id, ());
            }
        }
        self.connections.insert(id, conn);
    }

    /// Removes and returns the oldest idle connection serving `pool`, if any.
    pub(crate) fn unpark(&mut self, pool: &str) -> Option<IdleConnection> {
        let id = self.pools.get_mut(pool)?.ids.shift()?.0;
        let conn = self.connections.remove(&id)?;
        for sibling in conn.pools.iter() {
            if sibling.as_ref() != pool {
                if let Some(entry) = self.pools.get_mut(sibling) {
                    entry.ids.remove(&id);
                }
            }
        }
        Some(conn)
    }

    /// Removes every idle connection belonging to `node_id` from all pools it serves,
    /// returning them so the caller can close them.
    pub(crate) fn drop_node_connections(&mut self, node_id: NodeId, pools: &[Arc<str>]) -> Vec<IdleConnection> {
        let ids: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.node_id == node_id)
            .map(|(id, _)| *id)
            .collect();

        let mut dropped = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(conn) = self.connections.remove(&id) {
                dropped.push(conn);
            }
        }
        for pool in pools {
            if let Some(entry) = self.pools.get_mut(pool) {
                for conn in &dropped {
                    entry.ids.remove(&conn.id);
                }
            }
        }
        dropped
    }

    pub(crate) fn node_count(&self, pool: &str) -> u32 {
        self.pools.get(pool).map(|e| e.node_count).unwrap_or(0)
    }

    pub(crate) fn idle_count(&self, pool: &str) -> usize {
        self.pools.get(pool).map(|e| e.ids.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock;

    fn conn(id: ConnId, node_id: NodeId, pools: &[&str]) -> IdleConnection {
        IdleConnection {
            id,
            node_id,
            pools: Arc::from(
                pools
                    .iter()
                    .map(|p| Arc::from(*p))
                    .collect::<Vec<Arc<str>>>()
                    .into_boxed_slice(),
            ),
            inner: Box::new(mock::noop_connection()),
        }
    }

    #[test]
    fn parked_connection_is_visible_from_every_pool_it_serves() {
        let mut registry = PoolRegistry::new();
        registry.register(&[Arc::from("read"), Arc::from("write")]);
        registry.park(conn(1, 10, &["read", "write"]));

        assert_eq!(registry.idle_count("read"), 1);
        assert_eq!(registry.idle_count("write"), 1);
    }

    #[test]
    fn unpark_removes_from_every_sibling_pool() {
        let mut registry = PoolRegistry::new();
        registry.register(&[Arc::from("read"), Arc::from("write")]);
        registry.park(conn(1, 10, &["read", "write"]));

        let unparked = registry.unpark("read").expect("connection present");
        assert_eq!(unparked.id, 1);
        assert_eq!(registry.idle_count("read"), 0);
        assert_eq!(registry.idle_count("write"), 0);
    }

    #[test]
    fn drop_node_connections_purges_only_that_node() {
        let mut registry = PoolRegistry::new();
        registry.register(&[Arc::from("read")]);
        registry.park(conn(1, 10, &["read"]));
        registry.park(conn(2, 20, &["read"]));

        let dropped = registry.drop_node_connections(10, &[Arc::from("read")]);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, 1);
        assert_eq!(registry.idle_count("read"), 1);
    }
}
