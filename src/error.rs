//! Error and result types returned by this crate.

use std::{fmt, sync::Arc, time::Duration};

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that occurred while operating a [`crate::Cluster`].
///
/// `Error` wraps an [`ErrorKind`] and, where applicable, the error that caused it. It is
/// cheap to clone: cloning an `Error` clones the `Arc` around its source chain rather than
/// deep-copying it, which matters because the same error is often fanned out to every
/// connection request aborted by a single event (a node dying, a forced shutdown, ...).
#[derive(Clone, Debug)]
pub struct Error {
    kind: Arc<ErrorKind>,
    source: Option<Arc<Error>>,
    #[cfg(feature = "error-backtrace")]
    backtrace: Arc<backtrace::Backtrace>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Arc::new(kind),
            source: None,
            #[cfg(feature = "error-backtrace")]
            backtrace: Arc::new(backtrace::Backtrace::new()),
        }
    }

    /// The backtrace captured when this error was constructed, if the `error-backtrace`
    /// feature is enabled.
    #[cfg(feature = "error-backtrace")]
    pub fn backtrace(&self) -> &backtrace::Backtrace {
        &self.backtrace
    }

    /// Attaches a lower-level error as the cause of this one.
    pub(crate) fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The kind of error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The error that caused this one, if any.
    pub fn source_error(&self) -> Option<&Error> {
        self.source.as_deref()
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config {
            message: message.into(),
        })
    }

    pub(crate) fn driver_load(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DriverLoad {
            driver: driver.into(),
            message: message.into(),
        })
    }

    pub(crate) fn ended() -> Self {
        Self::new(ErrorKind::Ended)
    }

    pub(crate) fn no_server(pool: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoServer { pool: pool.into() })
    }

    pub(crate) fn queue_full(max_queue_length: usize) -> Self {
        Self::new(ErrorKind::QueueFull { max_queue_length })
    }

    pub(crate) fn timeout(waited: Duration) -> Self {
        Self::new(ErrorKind::Timeout { waited })
    }

    pub(crate) fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown)
    }

    pub(crate) fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput {
            message: message.into(),
        })
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }
}

/// The category of error that occurred.
///
/// This enum is non-exhaustive: new variants may be added in future minor releases without
/// that being considered a breaking change.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A [`crate::ClusterOptions`] or [`crate::NodeOptions`] value failed validation.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The driver named in [`crate::ClusterOptions::driver`] is not registered, or its
    /// connection constructor failed to initialize.
    #[error("failed to load driver `{driver}`: {message}")]
    DriverLoad { driver: String, message: String },

    /// The cluster has already been told to end and is no longer accepting new nodes or
    /// connection requests.
    #[error("the cluster has ended")]
    Ended,

    /// No node currently serves the requested pool.
    #[error("no node serves pool `{pool}`")]
    NoServer { pool: String },

    /// The wait queue for the requested pool is already at its configured maximum length.
    #[error("wait queue is full (max_queue_length = {max_queue_length})")]
    QueueFull { max_queue_length: usize },

    /// A queued connection request was not fulfilled before its time-to-live elapsed.
    #[error("timed out waiting for a connection after {waited:?}")]
    Timeout { waited: Duration },

    /// The cluster was shut down with this request still unresolved.
    #[error("the cluster was shut down while this request was pending")]
    Shutdown,

    /// A caller passed a value that fails a precondition (an empty pool name, for example).
    #[error("invalid input: {message}")]
    BadInput { message: String },

    /// An invariant that this crate is responsible for maintaining was violated. Seeing this
    /// means there is a bug in this crate, not in caller code.
    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_chains_source() {
        let root = Error::no_server("read");
        let wrapped = Error::internal("dispatch failed").with_source(root);
        let rendered = wrapped.to_string();
        assert!(rendered.contains("internal invariant violated"));
        assert!(rendered.contains("no node serves pool"));
    }

    #[test]
    fn clone_is_cheap_and_shares_kind() {
        let err = Error::timeout(Duration::from_secs(5));
        let cloned = err.clone();
        assert!(Arc::ptr_eq(&err.kind, &cloned.kind));
    }
}
