//! Tracks queued [`ConnectionRequest`]s, indexed by the composite set of pools that can
//! serve them.
//!
//! A request for pool `P` is enqueued into every queue whose composite key includes `P` --
//! there may be several, if more than one combination of co-served pools can satisfy it. This
//! mirrors the donor's single wait queue per pool, generalized to the cluster's requirement
//! that a node can serve more than one pool through the same physical connections.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{ordered_index::OrderedIndex, request::ConnectionRequest, request::ReqId};

/// The sorted, slash-joined set of pool names a single node serves. Requests are queued per
/// composite key rather than per pool so that a connection serving `{read, write}` is only
/// ever handed to one in-flight request at a time, regardless of which pool it was requested
/// under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CompositeKey(Arc<str>);

impl CompositeKey {
    pub(crate) fn from_pools(pools: &[Arc<str>]) -> Self {
        let mut sorted: Vec<&str> = pools.iter().map(|p| p.as_ref()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        CompositeKey(Arc::from(sorted.join("/")))
    }
}

struct QueueEntry {
    queue: OrderedIndex<ReqId, Arc<ConnectionRequest>>,
    node_count: u32,
}

impl QueueEntry {
    fn new() -> Self {
        Self {
            queue: OrderedIndex::new(),
            node_count: 0,
        }
    }
}

#[derive(Default)]
pub(crate) struct QueueRegistry {
    queues: HashMap<CompositeKey, QueueEntry>,
    queue_map: HashMap<Arc<str>, HashSet<CompositeKey>>,
}

impl QueueRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, key: &CompositeKey, pools: &[Arc<str>]) {
        self.queues
            .entry(key.clone())
            .or_insert_with(QueueEntry::new)
            .node_count += 1;
        for pool in pools {
            self.queue_map
                .entry(pool.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    /// True if at least one live queue can serve `pool`.
    pub(crate) fn services(&self, pool: &str) -> bool {
        self.queue_map
            .get(pool)
            .map(|keys| !keys.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn enqueue(&mut self, req: Arc<ConnectionRequest>) {
        let Some(keys) = self.queue_map.get(req.pool()) else {
            return;
        };
        for key in keys {
            if let Some(entry) = self.queues.get_mut(key) {
                entry.queue.push(req.id(), req.clone());
            }
        }
    }

    /// Pops the oldest request queued under `key`, removing it from every other queue it
    /// also appears in.
    pub(crate) fn claim_for_composite(&mut self, key: &CompositeKey) -> Option<Arc<ConnectionRequest>> {
        let (_, req) = self.queues.get_mut(key)?.queue.shift()?;
        self.strip_from_siblings(&req, key);
        Some(req)
    }

    fn strip_from_siblings(&mut self, req: &Arc<ConnectionRequest>, already_removed_from: &CompositeKey) {
        let Some(keys) = self.queue_map.get(req.pool()) else {
            return;
        };
        for key in keys {
            if key == already_removed_from {
                continue;
            }
            if let Some(entry) = self.queues.get_mut(key) {
                entry.queue.remove(&req.id());
            }
        }
    }

    /// Sweeps every queue for requests past `ttl`, removing them from all queues and
    /// returning them for the caller to abort. A request enqueued in more than one
    /// composite queue (overlapping pool membership) is stripped from every queue it
    /// appears in but returned only once.
    pub(crate) fn reap_expired(&mut self, ttl: std::time::Duration) -> Vec<Arc<ConnectionRequest>> {
        let keys: Vec<CompositeKey> = self.queues.keys().cloned().collect();
        let mut expired = Vec::new();
        let mut seen = HashSet::new();

        for key in &keys {
            loop {
                let due = match self.queues.get(key).and_then(|entry| entry.queue.front()) {
                    Some((_, req)) => req.is_expired(ttl) || req.is_cancelled(),
                    None => false,
                };
                if !due {
                    break;
                }
                let entry = self.queues.get_mut(key).expect("checked present above");
                let (_, req) = entry.queue.shift().expect("front() just confirmed present");
                self.strip_from_siblings(&req, key);
                if seen.insert(req.id()) {
                    expired.push(req);
                }
            }
        }
        expired
    }

    /// Decrements `key`'s node count; once it reaches zero, removes the queue and its
    /// footprint from `queue_map`. Requests that can no longer be served by any remaining
    /// queue are removed from their surviving siblings and returned for the caller to abort.
    pub(crate) fn unregister(&mut self, key: &CompositeKey, pools: &[Arc<str>]) -> Vec<Arc<ConnectionRequest>> {
        let mut orphaned = Vec::new();

        let Some(entry) = self.queues.get_mut(key) else {
            return orphaned;
        };
        entry.node_count = entry.node_count.saturating_sub(1);
        if entry.node_count > 0 {
            return orphaned;
        }

        for pool in pools {
            if let Some(set) = self.queue_map.get_mut(pool) {
                set.remove(key);
                if set.is_empty() {
                    self.queue_map.remove(pool);
                }
            }
        }

        let removed = self.queues.remove(key).expect("checked present above");
        for (_, req) in removed.queue.into_iter() {
            let still_servable = self
                .queue_map
                .get(req.pool())
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if still_servable {
                continue;
            }
            self.strip_from_siblings(&req, key);
            orphaned.push(req);
        }
        orphaned
    }

    pub(crate) fn total_len(&self) -> usize {
        self.queues.values().map(|e| e.queue.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::request::ConnectionRequest;

    fn pools(names: &[&str]) -> Vec<Arc<str>> {
        names.iter().map(|n| Arc::from(*n)).collect()
    }

    #[test]
    fn composite_key_ignores_order() {
        let a = CompositeKey::from_pools(&pools(&["write", "read"]));
        let b = CompositeKey::from_pools(&pools(&["read", "write"]));
        assert_eq!(a, b);
    }

    #[test]
    fn enqueue_lands_request_in_every_compatible_queue() {
        let mut registry = QueueRegistry::new();
        let read_write = CompositeKey::from_pools(&pools(&["read", "write"]));
        let read_only = CompositeKey::from_pools(&pools(&["read"]));
        registry.register(&read_write, &pools(&["read", "write"]));
        registry.register(&read_only, &pools(&["read"]));

        let (req, _rx) = ConnectionRequest::new(Arc::from("read"));
        registry.enqueue(req.clone());

        assert_eq!(registry.total_len(), 2);
    }

    #[test]
    fn claiming_from_one_queue_removes_from_siblings() {
        let mut registry = QueueRegistry::new();
        let read_write = CompositeKey::from_pools(&pools(&["read", "write"]));
        let read_only = CompositeKey::from_pools(&pools(&["read"]));
        registry.register(&read_write, &pools(&["read", "write"]));
        registry.register(&read_only, &pools(&["read"]));

        let (req, _rx) = ConnectionRequest::new(Arc::from("read"));
        registry.enqueue(req.clone());

        let claimed = registry.claim_for_composite(&read_write).expect("present");
        assert_eq!(claimed.id(), req.id());
        assert_eq!(registry.total_len(), 0);
    }

    #[test]
    fn unregister_orphans_requests_with_no_remaining_queue() {
        let mut registry = QueueRegistry::new();
        let read_only = CompositeKey::from_pools(&pools(&["read"]));
        registry.register(&read_only, &pools(&["read"]));

        let (req, _rx) = ConnectionRequest::new(Arc::from("read"));
        registry.enqueue(req.clone());

        let orphaned = registry.unregister(&read_only, &pools(&["read"]));
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].id(), req.id());
        assert!(!registry.services("read"));
    }

    #[test]
    fn unregister_keeps_request_alive_when_sibling_queue_remains() {
        let mut registry = QueueRegistry::new();
        let read_write = CompositeKey::from_pools(&pools(&["read", "write"]));
        let read_only = CompositeKey::from_pools(&pools(&["read"]));
        registry.register(&read_write, &pools(&["read", "write"]));
        registry.register(&read_only, &pools(&["read"]));

        let (req, _rx) = ConnectionRequest::new(Arc::from("read"));
        registry.enqueue(req.clone());

        let orphaned = registry.unregister(&read_only, &pools(&["read"]));
        assert!(orphaned.is_empty());
        assert_eq!(registry.total_len(), 1);
    }
}
