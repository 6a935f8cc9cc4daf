//! Establishes the physical connections for a newly added node.
//!
//! A node's only ongoing responsibility, once added, is the bounded-concurrency burst of
//! `ConnectionConstructor::connect` calls that brings it up to `max_connections`. There is no
//! replenishment loop afterward: a connection that ends is simply gone, by design (see
//! Non-goals -- no automatic reconnection or failover). This mirrors the donor's
//! `create_pending_connection`/`establish_connection` pair with its `max_connecting` bound,
//! minus the donor's `ensure_min_connections` maintenance loop, which has no counterpart
//! here.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::{
    driver::ConnectionConstructor,
    error::Result,
    event::{ClusterEventHandler, NodeLoadEvent},
    options::NodeOptions,
    {ClusterCommand, ConnId, NodeId},
};

const MAX_CONCURRENT_CONNECTS: usize = 2;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Establishes up to `opts.max_connections` connections for `node_id`, reporting each
/// success through `commands` as it completes, then resolves `ack` once every attempt --
/// successful or not -- has finished. This is the node's `load` event.
pub(crate) async fn spawn_establishment(
    node_id: NodeId,
    opts: Arc<NodeOptions>,
    pools: Arc<[Arc<str>]>,
    connector: Arc<dyn ConnectionConstructor>,
    commands: mpsc::UnboundedSender<ClusterCommand>,
    ack: oneshot::Sender<Result<NodeId>>,
    event_handler: Option<Arc<dyn ClusterEventHandler>>,
) {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTS));
    let mut attempts = tokio::task::JoinSet::new();

    for _ in 0..opts.max_connections {
        let semaphore = semaphore.clone();
        let connector = connector.clone();
        let opts = opts.clone();
        let pools = pools.clone();
        let commands = commands.clone();
        attempts.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            match connector.connect(&opts).await {
                Ok(inner) => {
                    let id = next_connection_id();
                    let _ = commands.send(ClusterCommand::ConnectionIdle(
                        crate::connection::IdleConnection {
                            id,
                            node_id,
                            pools,
                            inner,
                        },
                    ));
                    true
                }
                Err(err) => {
                    tracing::warn!(node_id, error = %err, "connection establishment failed");
                    false
                }
            }
        });
    }

    let mut established = 0usize;
    while let Some(result) = attempts.join_next().await {
        if matches!(result, Ok(true)) {
            established += 1;
        }
    }

    tracing::info!(
        node_id,
        established,
        requested = opts.max_connections,
        "node load complete"
    );
    if let Some(handler) = &event_handler {
        handler.handle_node_load_event(NodeLoadEvent { node_id, established });
    }
    let _ = ack.send(Ok(node_id));
}
