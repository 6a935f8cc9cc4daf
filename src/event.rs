//! Test- and operator-observable lifecycle events, mirroring the donor's CMAP event handler.
//!
//! Unlike `tracing` output, these are structured values delivered synchronously to a
//! registered [`ClusterEventHandler`], so a test can assert ordering without scraping logs.

use crate::{ConnId, NodeId};

/// Emitted once a newly added node has finished its initial connection-establishment burst
/// (the node's `load` event).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct NodeLoadEvent {
    /// The id assigned to the node.
    pub node_id: NodeId,
    /// How many of the node's initial connection attempts succeeded.
    pub established: usize,
}

/// Emitted once a node has been fully torn down, after [`crate::Cluster::remove_node`] or a
/// cluster-wide shutdown.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct NodeEndedEvent {
    /// The id of the node that ended.
    pub node_id: NodeId,
}

/// Emitted each time a connection becomes idle, whether freshly established or checked back in.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionIdleEvent {
    /// The id of the connection that became idle.
    pub connection_id: ConnId,
    /// The node that owns this connection.
    pub node_id: NodeId,
}

/// Emitted when a connection is permanently closed.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionEndedEvent {
    /// The id of the connection that ended.
    pub connection_id: ConnId,
    /// The node that owned this connection.
    pub node_id: NodeId,
}

/// Emitted when a request could not be served immediately and was queued.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct RequestEnqueuedEvent {
    /// The pool the request was issued against.
    pub pool: String,
}

/// Emitted when a queued request is handed a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct RequestResolvedEvent {
    /// The pool the request was issued against.
    pub pool: String,
}

/// Why a request was aborted, for [`RequestAbortedEvent`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestAbortReason {
    /// The request's TTL elapsed before it was served.
    Timeout,
    /// The node(s) able to serve it were all removed.
    NoServer,
    /// The cluster was force-ended with this request still pending.
    Shutdown,
}

/// Emitted when a queued request is aborted without ever being served.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct RequestAbortedEvent {
    /// The pool the request was issued against.
    pub pool: String,
    /// Why the request was aborted.
    pub reason: RequestAbortReason,
}

/// Emitted when a composite queue's last pending request leaves it, whether by resolution,
/// abort, or expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct QueueDrainEvent {
    /// The composite key (sorted, slash-joined pool names) of the queue that drained.
    pub composite_key: String,
}

/// Emitted once the cluster has finished ending: every node has been torn down and every
/// pending request has either resolved or aborted.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ClusterEndEvent;

/// Registered via [`crate::ClusterOptions`] to observe cluster-internal lifecycle events.
///
/// All methods default to a no-op, mirroring the donor's `CmapEventHandler`: implement only
/// the events you care about.
pub trait ClusterEventHandler: Send + Sync {
    /// Called once a newly added node's initial connections have all been attempted.
    fn handle_node_load_event(&self, _event: NodeLoadEvent) {}

    /// Called once a node has been fully torn down.
    fn handle_node_ended_event(&self, _event: NodeEndedEvent) {}

    /// Called each time a connection becomes idle.
    fn handle_connection_idle_event(&self, _event: ConnectionIdleEvent) {}

    /// Called when a connection is permanently closed.
    fn handle_connection_ended_event(&self, _event: ConnectionEndedEvent) {}

    /// Called when a request could not be served immediately and was queued.
    fn handle_request_enqueued_event(&self, _event: RequestEnqueuedEvent) {}

    /// Called when a queued request is handed a connection.
    fn handle_request_resolved_event(&self, _event: RequestResolvedEvent) {}

    /// Called when a queued request is aborted without ever being served.
    fn handle_request_aborted_event(&self, _event: RequestAbortedEvent) {}

    /// Called when a composite queue's last pending request leaves it.
    fn handle_queue_drain_event(&self, _event: QueueDrainEvent) {}

    /// Called once the cluster has finished ending.
    fn handle_cluster_end_event(&self, _event: ClusterEndEvent) {}
}
