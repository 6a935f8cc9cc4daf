//! The cluster actor and the public façade in front of it.
//!
//! Every piece of cluster state -- pools, queues, the node table, pending-request
//! accounting -- is owned by a single `tokio` task and mutated only from within its
//! `tokio::select!` loop. This is the Rust-idiomatic rendering of "a single-threaded
//! scheduler serializes all state transitions": rather than guard shared maps with locks,
//! the maps live behind a channel, grounded directly in the donor's
//! `ConnectionPoolWorker::execute` loop.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::{Connection, IdleConnection},
    driver::{DriverFactory, DriverRegistry},
    error::{Error, Result},
    event::{
        ClusterEndEvent, ClusterEventHandler, ConnectionEndedEvent, ConnectionIdleEvent,
        NodeEndedEvent, RequestAbortReason, RequestAbortedEvent, RequestEnqueuedEvent,
        RequestResolvedEvent,
    },
    node,
    options::{ClusterOptions, NodeOptions},
    pool::PoolRegistry,
    queue::{CompositeKey, QueueRegistry},
    request::ConnectionRequest,
    runtime::worker_handle::{WorkerHandle, WorkerHandleListener},
    ConnId, NodeId,
};

pub(crate) enum ClusterCommand {
    AddNode {
        opts: NodeOptions,
        ack: oneshot::Sender<Result<NodeId>>,
    },
    RemoveNode {
        node_id: NodeId,
        ack: oneshot::Sender<Result<()>>,
    },
    GetConnection {
        pool: String,
        ack: oneshot::Sender<Result<GetConnectionOutcome>>,
    },
    ConnectionIdle(IdleConnection),
    ConnectionEnded {
        id: ConnId,
        node_id: NodeId,
    },
    End {
        now: bool,
        ack: oneshot::Sender<Result<()>>,
    },
    Stats {
        ack: oneshot::Sender<ClusterStats>,
    },
}

pub(crate) enum GetConnectionOutcome {
    Ready(Connection),
    Pending(oneshot::Receiver<Result<Connection>>),
}

/// A point-in-time snapshot of cluster load, returned by [`Cluster::queue_length`] and
/// [`Cluster::pending_requests`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterStats {
    /// Total number of requests currently sitting in any wait queue (a request enqueued in
    /// more than one composite queue is counted once).
    pub pending_requests: usize,
    /// Sum of queue lengths across every composite queue. A request servable by more than
    /// one composite key is counted once per queue it appears in.
    pub queue_length: usize,
}

struct NodeMeta {
    pools: Arc<[Arc<str>]>,
    composite: CompositeKey,
}

/// A handle to a running cluster.
///
/// Cloning a `Cluster` is cheap and shares the same underlying actor; the actor keeps
/// running as long as at least one clone is alive, draining any requests still in flight
/// when the last one is dropped.
#[derive(Clone)]
pub struct Cluster {
    commands: mpsc::UnboundedSender<ClusterCommand>,
    driver: Arc<dyn DriverFactory>,
    _handle: WorkerHandle,
}

impl Cluster {
    /// Constructs a new cluster, resolving `options.driver` from the process-wide
    /// [`DriverRegistry`] immediately so that a missing driver fails synchronously rather
    /// than on the first `add_node` call.
    pub fn new(options: ClusterOptions) -> Result<Self> {
        options.validate()?;
        let factory = DriverRegistry::global().get(&options.driver)?;

        let event_handler = options.event_handler.clone();

        let (commands, receiver) = mpsc::unbounded_channel();
        let (handle, listener) = WorkerHandleListener::channel();
        let worker = ClusterWorker {
            options,
            driver: factory.clone(),
            pools: PoolRegistry::new(),
            queues: QueueRegistry::new(),
            nodes: HashMap::new(),
            ended: false,
            pending_requests: 0,
            drain_waiters: Vec::new(),
            self_sender: commands.clone(),
            event_handler,
        };
        tokio::spawn(worker.run(receiver, listener));

        Ok(Self {
            commands,
            driver: factory,
            _handle: handle,
        })
    }

    /// The driver factory this cluster was constructed with. Exposed directly (rather than
    /// through a round trip to the actor) since it never changes after construction.
    pub(crate) fn driver_factory(&self) -> &Arc<dyn DriverFactory> {
        &self.driver
    }

    /// Registers a new node, suspending until its initial connections have all been
    /// attempted (successfully or not) -- the node's `load` event.
    pub async fn add_node(&self, opts: NodeOptions) -> Result<NodeId> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(ClusterCommand::AddNode { opts, ack })
            .map_err(|_| Error::ended())?;
        rx.await.map_err(|_| Error::ended())?
    }

    /// Simulates a node's `end` event, as would fire if the node died or an operator removed
    /// it: unregisters it from every pool and queue and orphans requests no other node can
    /// serve.
    pub async fn remove_node(&self, node_id: NodeId) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(ClusterCommand::RemoveNode { node_id, ack })
            .map_err(|_| Error::ended())?;
        rx.await.map_err(|_| Error::ended())?
    }

    /// Acquires a connection still owned by its pool. Dropping the returned [`Connection`]
    /// returns it to idle automatically.
    pub async fn get_db_connection(&self, pool: impl Into<String>) -> Result<Connection> {
        match self.request_connection(pool.into()).await? {
            GetConnectionOutcome::Ready(conn) => Ok(conn),
            GetConnectionOutcome::Pending(rx) => rx
                .await
                .map_err(|_| Error::internal("request dropped without being completed"))?,
        }
    }

    /// Acquires a connection detached from its pool. The caller is responsible for calling
    /// [`Connection::end`] on it; it will never be returned to idle automatically.
    pub async fn get_connection(&self, pool: impl Into<String>) -> Result<Connection> {
        let mut conn = self.get_db_connection(pool).await?;
        conn.remove_from_pool();
        Ok(conn)
    }

    async fn request_connection(&self, pool: String) -> Result<GetConnectionOutcome> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(ClusterCommand::GetConnection { pool, ack })
            .map_err(|_| Error::ended())?;
        rx.await.map_err(|_| Error::ended())?
    }

    /// Ends the cluster. If `end_now` is `true`, every pending request is aborted
    /// immediately with [`crate::error::ErrorKind::Shutdown`] and every node is torn down at
    /// once. Otherwise this suspends until every wait queue has drained naturally, then tears
    /// nodes down.
    pub async fn end(&self, end_now: bool) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(ClusterCommand::End { now: end_now, ack })
            .map_err(|_| Error::ended())?;
        rx.await.map_err(|_| Error::ended())?
    }

    async fn stats(&self) -> ClusterStats {
        let (ack, rx) = oneshot::channel();
        if self.commands.send(ClusterCommand::Stats { ack }).is_err() {
            return ClusterStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// The total number of requests currently queued across all pools.
    pub async fn queue_length(&self) -> usize {
        self.stats().await.queue_length
    }

    /// The precise count of requests currently pending (deduplicated across sibling
    /// queues), used by [`Cluster::end`] to decide when a graceful drain is complete.
    pub async fn pending_requests(&self) -> usize {
        self.stats().await.pending_requests
    }
}

struct ClusterWorker {
    options: ClusterOptions,
    driver: Arc<dyn DriverFactory>,
    pools: PoolRegistry,
    queues: QueueRegistry,
    nodes: HashMap<NodeId, NodeMeta>,
    ended: bool,
    pending_requests: usize,
    drain_waiters: Vec<oneshot::Sender<Result<()>>>,
    self_sender: mpsc::UnboundedSender<ClusterCommand>,
    event_handler: Option<Arc<dyn ClusterEventHandler>>,
}

static NEXT_NODE_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

impl ClusterWorker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ClusterCommand>, mut listener: WorkerHandleListener) {
        let mut reap_interval = tokio::time::interval(self.options.ttl_check_interval);
        reap_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; discard it so reaping starts on cadence.
        reap_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = listener.wait_for_all_handle_drops() => break,
                Some(cmd) = receiver.recv() => self.handle(cmd),
                _ = reap_interval.tick(), if !self.ended => self.reap(),
                else => break,
            }
        }
        tracing::info!("cluster actor stopped");
    }

    fn handle(&mut self, cmd: ClusterCommand) {
        match cmd {
            ClusterCommand::AddNode { opts, ack } => self.handle_add_node(opts, ack),
            ClusterCommand::RemoveNode { node_id, ack } => {
                let _ = ack.send(self.handle_remove_node(node_id));
            }
            ClusterCommand::GetConnection { pool, ack } => self.handle_get_connection(pool, ack),
            ClusterCommand::ConnectionIdle(idle) => self.route_idle(idle),
            ClusterCommand::ConnectionEnded { id, node_id } => {
                tracing::debug!(connection_id = id, node_id, "connection ended");
                if let Some(handler) = &self.event_handler {
                    handler.handle_connection_ended_event(ConnectionEndedEvent {
                        connection_id: id,
                        node_id,
                    });
                }
            }
            ClusterCommand::End { now, ack } => self.handle_end(now, ack),
            ClusterCommand::Stats { ack } => {
                let _ = ack.send(ClusterStats {
                    pending_requests: self.pending_requests,
                    queue_length: self.queues.total_len(),
                });
            }
        }
    }

    fn handle_add_node(&mut self, opts: NodeOptions, ack: oneshot::Sender<Result<NodeId>>) {
        if self.ended {
            let _ = ack.send(Err(Error::ended()));
            return;
        }
        if let Err(e) = opts.validate() {
            let _ = ack.send(Err(e));
            return;
        }

        let node_id = NEXT_NODE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut sorted_pools = opts.pools.clone();
        sorted_pools.sort_unstable();
        sorted_pools.dedup();
        let pools: Arc<[Arc<str>]> = Arc::from(
            sorted_pools
                .iter()
                .map(|p| Arc::from(p.as_str()))
                .collect::<Vec<Arc<str>>>()
                .into_boxed_slice(),
        );
        let composite = CompositeKey::from_pools(&pools);

        self.pools.register(&pools);
        self.queues.register(&composite, &pools);
        self.nodes.insert(
            node_id,
            NodeMeta {
                pools: pools.clone(),
                composite,
            },
        );

        let connector = self.driver.connection_constructor();
        let commands = self.self_sender.clone();
        let event_handler = self.event_handler.clone();
        tokio::spawn(node::spawn_establishment(
            node_id,
            Arc::new(opts),
            pools,
            connector,
            commands,
            ack,
            event_handler,
        ));
    }

    fn handle_remove_node(&mut self, node_id: NodeId) -> Result<()> {
        let Some(meta) = self.nodes.remove(&node_id) else {
            return Err(Error::internal(format!("node {node_id} is not registered")));
        };

        self.pools.drop_node_connections(node_id, &meta.pools);
        self.pools.unregister(&meta.pools);

        let orphaned = self.queues.unregister(&meta.composite, &meta.pools);
        for req in orphaned {
            self.emit_aborted(req.pool(), RequestAbortReason::NoServer);
            req.abort(Error::no_server(req.pool()));
            self.complete_request();
        }
        if let Some(handler) = &self.event_handler {
            handler.handle_node_ended_event(NodeEndedEvent { node_id });
        }
        Ok(())
    }

    fn emit_aborted(&self, pool: &str, reason: RequestAbortReason) {
        if let Some(handler) = &self.event_handler {
            handler.handle_request_aborted_event(RequestAbortedEvent {
                pool: pool.to_string(),
                reason,
            });
        }
    }

    fn handle_get_connection(&mut self, pool: String, ack: oneshot::Sender<Result<GetConnectionOutcome>>) {
        if self.ended {
            let _ = ack.send(Err(Error::ended()));
            return;
        }

        if let Some(idle) = self.pools.unpark(&pool) {
            let conn = Connection::from_idle(idle, self.self_sender.clone());
            let _ = ack.send(Ok(GetConnectionOutcome::Ready(conn)));
            return;
        }

        if !self.queues.services(&pool) {
            let _ = ack.send(Err(Error::no_server(pool)));
            return;
        }

        if self.queues.total_len() >= self.options.max_queue_length {
            let _ = ack.send(Err(Error::queue_full(self.options.max_queue_length)));
            return;
        }

        let (req, receiver) = ConnectionRequest::new(Arc::from(pool.as_str()));
        self.queues.enqueue(req);
        self.pending_requests += 1;
        if let Some(handler) = &self.event_handler {
            handler.handle_request_enqueued_event(RequestEnqueuedEvent { pool: pool.clone() });
        }
        let _ = ack.send(Ok(GetConnectionOutcome::Pending(receiver)));
    }

    fn handle_end(&mut self, now: bool, ack: oneshot::Sender<Result<()>>) {
        self.ended = true;
        if now {
            self.abort_all(Error::shutdown(), RequestAbortReason::Shutdown);
            self.teardown_all_nodes();
            self.emit_cluster_end();
            let _ = ack.send(Ok(()));
        } else if self.pending_requests == 0 {
            self.teardown_all_nodes();
            self.emit_cluster_end();
            let _ = ack.send(Ok(()));
        } else {
            self.drain_waiters.push(ack);
        }
    }

    fn abort_all(&mut self, err: Error, reason: RequestAbortReason) {
        for meta in self.nodes.values() {
            let orphaned = self.queues.unregister(&meta.composite, &meta.pools);
            for req in orphaned {
                if let Some(handler) = &self.event_handler {
                    handler.handle_request_aborted_event(RequestAbortedEvent {
                        pool: req.pool().to_string(),
                        reason: reason.clone(),
                    });
                }
                req.abort(err.clone());
            }
        }
        self.pending_requests = 0;
    }

    fn teardown_all_nodes(&mut self) {
        let node_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for node_id in node_ids {
            if let Some(meta) = self.nodes.remove(&node_id) {
                self.pools.drop_node_connections(node_id, &meta.pools);
                self.pools.unregister(&meta.pools);
                if let Some(handler) = &self.event_handler {
                    handler.handle_node_ended_event(NodeEndedEvent { node_id });
                }
            }
        }
    }

    fn emit_cluster_end(&self) {
        if let Some(handler) = &self.event_handler {
            handler.handle_cluster_end_event(ClusterEndEvent);
        }
    }

    fn complete_request(&mut self) {
        self.pending_requests = self.pending_requests.saturating_sub(1);
        if self.ended && self.pending_requests == 0 && !self.drain_waiters.is_empty() {
            self.teardown_all_nodes();
            self.emit_cluster_end();
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    fn reap(&mut self) {
        let expired = self.queues.reap_expired(self.options.ttl);
        for req in expired {
            if !req.is_cancelled() {
                self.emit_aborted(req.pool(), RequestAbortReason::Timeout);
                req.abort(Error::timeout(req.age()));
            }
            self.complete_request();
        }
    }

    /// The dispatcher: routes a connection that just became idle either straight to the
    /// oldest compatible queued request, or into the pools it serves if none is waiting.
    fn route_idle(&mut self, idle: IdleConnection) {
        let Some(meta) = self.nodes.get(&idle.node_id) else {
            // Node was removed while this connection was in flight (establishing, or
            // checked out); just let it drop, closing the physical connection.
            return;
        };
        let key = meta.composite.clone();
        let node_id = idle.node_id;
        let mut idle = idle;

        loop {
            let Some(req) = self.queues.claim_for_composite(&key) else {
                let connection_id = idle.id;
                self.pools.park(idle);
                if let Some(handler) = &self.event_handler {
                    handler.handle_connection_idle_event(ConnectionIdleEvent {
                        connection_id,
                        node_id,
                    });
                }
                return;
            };
            let pool = req.pool().to_string();
            let conn = Connection::from_idle(idle, self.self_sender.clone());
            match req.execute(conn) {
                Ok(()) => {
                    if let Some(handler) = &self.event_handler {
                        handler.handle_request_resolved_event(RequestResolvedEvent { pool });
                    }
                    self.complete_request();
                    return;
                }
                Err(conn) => {
                    // The caller who issued this request dropped its future before it was
                    // fulfilled; that request was already removed from every queue, so we
                    // just retry with the next one.
                    self.complete_request();
                    idle = conn.into_idle();
                }
            }
        }
    }
}
