//! Black-box scenario tests exercising a real [`Cluster`] end to end, registered against the
//! `mock` driver. Mirrors the donor's split between inline unit tests and these integration
//! tests.

use std::time::Duration;

use dbcluster::{error::ErrorKind, mock, Cluster, ClusterOptions, NodeOptions};

fn cluster_options() -> ClusterOptions {
    mock::ensure_registered();
    ClusterOptions::builder().driver(mock::MOCK_DRIVER_NAME).build()
}

fn node(pools: &[&str], max_connections: u32) -> NodeOptions {
    NodeOptions::builder()
        .pools(pools.iter().map(|p| p.to_string()).collect())
        .max_connections(max_connections)
        .build()
}

#[tokio::test]
async fn single_node_happy_path() {
    let cluster = Cluster::new(cluster_options()).unwrap();
    cluster.add_node(node(&["read", "write"], 1)).await.unwrap();

    assert_eq!(cluster.queue_length().await, 0);

    let conn = cluster.get_connection("read").await.unwrap();
    conn.end().await;
}

#[tokio::test]
async fn queued_wait_resolves_fifo() {
    let cluster = Cluster::new(cluster_options()).unwrap();
    cluster.add_node(node(&["read", "write"], 1)).await.unwrap();

    // Drain the node's single idle connection so the next two requests queue.
    let held = cluster.get_db_connection("read").await.unwrap();

    let first = tokio::spawn({
        let cluster = cluster.clone();
        async move { cluster.get_db_connection("read").await }
    });
    // Give the first request time to land in the queue before the second is issued, so FIFO
    // order between them is deterministic.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn({
        let cluster = cluster.clone();
        async move { cluster.get_db_connection("read").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(cluster.pending_requests().await, 2);

    // Releasing the held connection dispatches it to whichever request is at the front of the
    // queue -- the first one issued.
    drop(held);
    let first_conn = first.await.unwrap().unwrap();
    assert_eq!(cluster.pending_requests().await, 1);

    drop(first_conn);
    let second_conn = second.await.unwrap().unwrap();
    assert_eq!(cluster.pending_requests().await, 0);
    drop(second_conn);
}

#[tokio::test]
async fn multi_pool_routing_only_dispatches_from_a_compatible_node() {
    let cluster = Cluster::new(cluster_options()).unwrap();
    // Node A serves only `read`; no node yet serves `write` at all.
    cluster.add_node(node(&["read"], 1)).await.unwrap();

    let err = cluster.get_db_connection("write").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoServer { .. }));

    // Node B serves both pools, through one connection shared by both.
    cluster.add_node(node(&["read", "write"], 1)).await.unwrap();

    // B's only connection is claimed to satisfy `write`...
    let write_conn = cluster.get_db_connection("write").await.unwrap();
    // ...which leaves A's `read`-only connection as the sole remaining option for `read`.
    let read_conn = cluster.get_db_connection("read").await.unwrap();
    assert_ne!(write_conn.id(), read_conn.id());
    drop(write_conn);
    drop(read_conn);
}

#[tokio::test]
async fn ttl_expiry_rejects_and_clears_the_queue() {
    mock::ensure_registered();
    let options = ClusterOptions::builder()
        .driver(mock::MOCK_DRIVER_NAME)
        .ttl(Duration::from_millis(150))
        .ttl_check_interval(Duration::from_millis(30))
        .build();
    let cluster = Cluster::new(options).unwrap();
    cluster.add_node(node(&["analytics"], 1)).await.unwrap();

    // Hold the node's only connection so the next request can never be served.
    let held = cluster.get_db_connection("analytics").await.unwrap();

    let err = cluster.get_db_connection("analytics").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout { .. }));
    assert_eq!(cluster.pending_requests().await, 0);

    drop(held);
}

#[tokio::test]
async fn node_death_orphans_its_queued_requests() {
    let cluster = Cluster::new(cluster_options()).unwrap();
    let node_id = cluster.add_node(node(&["analytics"], 1)).await.unwrap();

    let held = cluster.get_db_connection("analytics").await.unwrap();
    let pending = tokio::spawn({
        let cluster = cluster.clone();
        async move { cluster.get_db_connection("analytics").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    cluster.remove_node(node_id).await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoServer { .. }));
    assert_eq!(cluster.pending_requests().await, 0);

    drop(held);
}

#[tokio::test]
async fn graceful_end_waits_for_every_queued_request_to_drain() {
    let cluster = Cluster::new(cluster_options()).unwrap();
    cluster.add_node(node(&["analytics"], 3)).await.unwrap();

    // Drain all three idle connections so three more requests queue behind them.
    let conn_a = cluster.get_db_connection("analytics").await.unwrap();
    let conn_b = cluster.get_db_connection("analytics").await.unwrap();
    let conn_c = cluster.get_db_connection("analytics").await.unwrap();

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let cluster = cluster.clone();
            tokio::spawn(async move { cluster.get_db_connection("analytics").await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cluster.pending_requests().await, 3);

    let end = tokio::spawn({
        let cluster = cluster.clone();
        async move { cluster.end(false).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!end.is_finished());

    drop(conn_a);
    drop(conn_b);
    drop(conn_c);

    for handle in pending {
        handle.await.unwrap().unwrap();
    }
    end.await.unwrap().unwrap();
}

#[tokio::test]
async fn forced_end_aborts_pending_requests_with_shutdown() {
    let cluster = Cluster::new(cluster_options()).unwrap();
    cluster.add_node(node(&["analytics"], 1)).await.unwrap();
    let held = cluster.get_db_connection("analytics").await.unwrap();

    let pending = tokio::spawn({
        let cluster = cluster.clone();
        async move { cluster.get_db_connection("analytics").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    cluster.end(true).await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Shutdown));

    drop(held);
}
