//! Configuration types for [`crate::Cluster`] and the nodes added to it.

use std::{sync::Arc, time::Duration};

use derive_where::derive_where;
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    event::ClusterEventHandler,
};

fn default_host() -> String {
    "localhost".to_string()
}

fn default_pools() -> Vec<String> {
    vec!["read".to_string(), "write".to_string()]
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_ttl() -> Duration {
    Duration::from_secs(60)
}

const fn default_ttl_check_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_queue_length() -> usize {
    10_000
}

/// Cluster-wide configuration, shared by every node added to the [`crate::Cluster`].
#[derive_where(Debug)]
#[derive(Clone, TypedBuilder)]
pub struct ClusterOptions {
    /// The name under which a driver was registered with the crate's driver registry. Every
    /// node in a cluster is served by the same driver.
    #[builder(setter(into))]
    pub driver: String,

    /// How long a queued connection request may wait before it is aborted with
    /// [`crate::error::ErrorKind::Timeout`].
    #[builder(default = default_ttl())]
    pub ttl: Duration,

    /// How often the cluster sweeps its wait queues for expired requests.
    #[builder(default = default_ttl_check_interval())]
    pub ttl_check_interval: Duration,

    /// The maximum number of requests that may be queued for a single pool combination at
    /// once. Additional requests are rejected with [`crate::error::ErrorKind::QueueFull`].
    #[builder(default = default_max_queue_length())]
    pub max_queue_length: usize,

    /// An optional observer for cluster-internal lifecycle events, analogous to the donor's
    /// `cmap_event_handler`.
    #[derive_where(skip)]
    #[builder(default, setter(strip_option))]
    pub event_handler: Option<Arc<dyn ClusterEventHandler>>,
}

impl ClusterOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(Error::config("driver name must not be empty"));
        }
        if self.max_queue_length == 0 {
            return Err(Error::config("max_queue_length must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration for a single node added to a cluster via [`crate::Cluster::add_node`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct NodeOptions {
    /// The host the driver should connect to.
    #[builder(default = default_host(), setter(into))]
    pub host: String,

    /// The port the driver should connect to.
    #[builder(default)]
    pub port: Option<u16>,

    /// An optional username passed through to the driver's connection constructor.
    #[builder(default, setter(strip_option, into))]
    pub username: Option<String>,

    /// An optional password passed through to the driver's connection constructor.
    #[builder(default, setter(strip_option, into))]
    pub password: Option<String>,

    /// An optional default database/schema passed through to the driver's connection
    /// constructor.
    #[builder(default, setter(strip_option, into))]
    pub database: Option<String>,

    /// The maximum number of connections this node will establish.
    #[builder(default = default_max_connections())]
    pub max_connections: u32,

    /// The pools this node serves. Defaults to `["read", "write"]`.
    #[builder(default = default_pools())]
    pub pools: Vec<String>,
}

impl NodeOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than zero"));
        }
        if self.pools.is_empty() {
            return Err(Error::config("a node must serve at least one pool"));
        }
        if self.pools.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::config("pool names must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn node_options_defaults() {
        let opts = NodeOptions::builder().build();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.max_connections, 100);
        assert_eq!(opts.pools, vec!["read".to_string(), "write".to_string()]);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn node_options_rejects_empty_pools() {
        let opts = NodeOptions::builder().pools(vec![]).build();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn cluster_options_rejects_empty_driver() {
        let opts = ClusterOptions::builder().driver("").build();
        assert!(opts.validate().is_err());
    }
}
