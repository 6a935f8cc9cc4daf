//! A single caller's wait for a connection.
//!
//! Grounded in the donor's `ConnectionRequester`/`ConnectionRequest` pair: a request is a
//! one-shot completion slot that lives in zero or more wait queues until it is either
//! executed with a connection or aborted with an error. Unlike the donor, a single request
//! here can be enqueued into several queues at once (one per composite pool-membership key
//! that can serve it), so completion is guarded by a mutex rather than consumed by value.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::oneshot;

use crate::{connection::Connection, error::Error, error::Result};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type ReqId = u64;

pub(crate) struct ConnectionRequest {
    id: ReqId,
    pool: Arc<str>,
    created_at: Instant,
    completion: Mutex<Option<oneshot::Sender<Result<Connection>>>>,
}

impl ConnectionRequest {
    /// Creates a new request and the receiver a caller awaits for its outcome.
    pub(crate) fn new(pool: Arc<str>) -> (Arc<Self>, oneshot::Receiver<Result<Connection>>) {
        let (sender, receiver) = oneshot::channel();
        let request = Arc::new(Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            pool,
            created_at: Instant::now(),
            completion: Mutex::new(Some(sender)),
        });
        (request, receiver)
    }

    pub(crate) fn id(&self) -> ReqId {
        self.id
    }

    pub(crate) fn pool(&self) -> &str {
        &self.pool
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// True if the caller awaiting this request has already dropped the future, making the
    /// request unreachable. Checked lazily, never eagerly scanned for.
    pub(crate) fn is_cancelled(&self) -> bool {
        match self.completion.lock().unwrap().as_ref() {
            Some(sender) => sender.is_closed(),
            None => true,
        }
    }

    /// Fulfills this request with a connection. Returns the connection back to the caller if
    /// the awaiting receiver was already dropped, so it can be rerouted to another request.
    pub(crate) fn execute(&self, conn: Connection) -> std::result::Result<(), Connection> {
        let sender = self
            .completion
            .lock()
            .unwrap()
            .take()
            .expect("ConnectionRequest fulfilled more than once");
        match sender.send(Ok(conn)) {
            Ok(()) => Ok(()),
            Err(Ok(conn)) => Err(conn),
            Err(Err(_)) => unreachable!("execute() never sends an Err payload"),
        }
    }

    /// Aborts this request with `err`. A no-op (logged in release, panicking in debug) if the
    /// request was already fulfilled, since that indicates a bookkeeping bug: requests are
    /// removed from every queue before being completed.
    pub(crate) fn abort(&self, err: Error) {
        let mut slot = self.completion.lock().unwrap();
        match slot.take() {
            Some(sender) => {
                let _ = sender.send(Err(err));
            }
            None => {
                if cfg!(debug_assertions) {
                    panic!("ConnectionRequest aborted after already being fulfilled");
                }
                tracing::error!(request_id = self.id, "request aborted after already being fulfilled");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn abort_delivers_error_to_receiver() {
        let (req, rx) = ConnectionRequest::new(Arc::from("read"));
        req.abort(Error::timeout(Duration::from_secs(1)));
        let result = rx.await.expect("sender not dropped without sending");
        assert!(result.is_err());
    }

    #[test]
    fn is_expired_respects_ttl() {
        let (req, _rx) = ConnectionRequest::new(Arc::from("read"));
        assert!(!req.is_expired(Duration::from_secs(60)));
        assert!(req.is_expired(Duration::from_nanos(0)));
    }

    #[tokio::test]
    async fn is_cancelled_once_receiver_dropped() {
        let (req, rx) = ConnectionRequest::new(Arc::from("read"));
        assert!(!req.is_cancelled());
        drop(rx);
        assert!(req.is_cancelled());
    }
}
