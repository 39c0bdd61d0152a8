//! Configuration for the routing layer.
//!
//! Everything here is construction-time input: the router takes its config
//! once and never re-reads it. Structs derive `serde` so embedders can load
//! them from whatever format their deployment uses.
//!
//! # Quick Start
//!
//! ```rust
//! use replica_router::config::RouterConfig;
//!
//! let config = RouterConfig {
//!     read_only_functions: ["app_current_tenant".to_string()].into_iter().collect(),
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Top-level router configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// User-declared functions known not to mutate state.
    ///
    /// A statement calling a function outside this set (and outside the
    /// standard read-only builtins) routes to main.
    #[serde(default)]
    pub read_only_functions: HashSet<String>,

    /// Widen write-keyword detection from statement-leading to anywhere in
    /// the statement text.
    ///
    /// Best-effort compatibility with the stricter classification of
    /// earlier releases; roll out behind a flag and drop once confident.
    #[serde(default)]
    pub compatibility_mode: bool,
}

impl RouterConfig {
    /// Minimal config for tests.
    pub fn for_testing() -> Self {
        Self::default()
    }
}

/// Propagation window for
/// [`PessimisticPropagationConsistency`](crate::consistency::PessimisticPropagationConsistency).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// How long writes take to propagate from main to replicas, worst case.
    #[serde(default = "default_max_propagation")]
    pub max_propagation: Duration,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_propagation: default_max_propagation(),
        }
    }
}

fn default_max_propagation() -> Duration {
    Duration::from_millis(100)
}

/// Retry schedule for
/// [`WaitingConsistency`](crate::consistency::WaitingConsistency).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingConfig {
    /// Pause between consistency checks.
    #[serde(default = "default_waiting_interval")]
    pub interval: Duration,

    /// Hard bound on checks before giving up.
    #[serde(default = "default_waiting_attempts")]
    pub max_attempts: u32,
}

impl Default for WaitingConfig {
    /// Default: up to 30 checks a second apart.
    fn default() -> Self {
        Self {
            interval: default_waiting_interval(),
            max_attempts: default_waiting_attempts(),
        }
    }
}

impl WaitingConfig {
    /// Fast schedule for tests.
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        }
    }
}

fn default_waiting_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_waiting_attempts() -> u32 {
    30
}

/// Staleness bound for [`CachedReplicaSet`](crate::cluster::CachedReplicaSet).
///
/// Balance discovery overhead against how quickly cluster membership
/// changes become visible to the multi-replica consistency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSetCacheConfig {
    #[serde(default = "default_replica_set_ttl")]
    pub ttl: Duration,
}

impl Default for ReplicaSetCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_replica_set_ttl(),
        }
    }
}

fn default_replica_set_ttl() -> Duration {
    Duration::from_secs(5)
}
