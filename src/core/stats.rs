// src/core/stats.rs

//! Read-only snapshots of shard state for introspection, keyed by
//! `host:port` rather than by the internal `ConnectionInfo` ordering, since
//! callers querying stats think in terms of endpoints.

use std::collections::HashMap;
use std::time::Duration;

use crate::core::instance::ConnectionState;

/// A snapshot of one instance's observable state at the moment `statistics`
/// was called.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStatistics {
    pub server_host: String,
    pub server_port: u16,
    pub state: ConnectionState,
    pub running_commands: usize,
    pub ping_latency: Duration,
}

/// Aggregate of instances matching the requested master/replica side.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardStatistics {
    pub instances: HashMap<String, InstanceStatistics>,
    pub is_ready: bool,
}

impl ShardStatistics {
    pub fn empty() -> Self {
        Self {
            instances: HashMap::new(),
            is_ready: false,
        }
    }
}

fn endpoint_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

pub(crate) fn insert_instance(
    map: &mut HashMap<String, InstanceStatistics>,
    stats: InstanceStatistics,
) {
    let key = endpoint_key(&stats.server_host, stats.server_port);
    map.insert(key, stats);
}
