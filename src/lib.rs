#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]
#![cfg_attr(
    feature = "cargo-clippy",
    allow(
        clippy::unreadable_literal,
        clippy::cognitive_complexity,
        clippy::float_cmp,
        clippy::match_like_matches_macro,
        clippy::derive_partial_eq_without_eq
    )
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for assembling and driving a [`Cluster`]: a multi-node pool of database
//! connections dispatched to waiting callers through per-node wait queues.
//!
//! A node serves one or more named pools (`"read"`, `"write"`, ...); a caller asks for a
//! connection by pool name and either gets one immediately, waits in that pool's queue, or
//! is told no node serves it. Connections check themselves back in when dropped.

pub mod cluster;
pub mod connection;
pub mod driver;
pub mod error;
pub mod event;
pub mod mock;
pub mod options;
pub mod query;

mod node;
mod ordered_index;
mod pool;
mod queue;
mod request;
mod runtime;

pub use cluster::{Cluster, ClusterStats};
pub use connection::Connection;
pub use driver::{
    Analyzer, ConnectionConstructor, Description, DriverConnection, DriverFactory,
    DriverRegistry, QueryBuilder, QueryCompiler,
};
pub use error::{Error, ErrorKind, Result};
pub use event::ClusterEventHandler;
pub use options::{ClusterOptions, NodeOptions};
pub use query::QueryContext;

pub(crate) use cluster::ClusterCommand;

/// Uniquely identifies a node for the lifetime of the process.
pub type NodeId = u64;

/// Uniquely identifies a connection for the lifetime of the process.
pub type ConnId = u64;
