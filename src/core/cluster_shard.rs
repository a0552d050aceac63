// src/core/cluster_shard.rs

//! `ClusterShard`: the Cluster-mode shard router. Unlike `SentinelShard`,
//! membership is fixed by topology rather than discovered: exactly one
//! master and a known set of replicas, both supplied by the caller (who
//! tracks cluster slot ownership) via `set_master`/`set_replicas`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::core::command::{Command, RoutingStrategy};
use crate::core::connection_info::ConnectionInfo;
use crate::core::instance::{BufferingSettings, ConnectionState, InstanceHandle};
use crate::core::rate_limit::RateLimiter;
use crate::core::routing_policy;
use crate::core::stats::{InstanceStatistics, ShardStatistics, insert_instance};

/// Readiness predicate for [`ClusterShard::is_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    NoWait,
    Master,
    Slave,
    MasterOrSlave,
    MasterAndSlave,
}

struct Replica {
    info: ConnectionInfo,
    handle: Arc<dyn InstanceHandle>,
}

struct ClusterState {
    master_info: ConnectionInfo,
    master: Arc<dyn InstanceHandle>,
    replicas: Vec<Replica>,
}

/// The Cluster-mode shard: one master, `N` replicas, both role-stable — a
/// role change here means a failover, handled by the caller calling
/// `set_master` with the promoted replica's handle, not by this type
/// discovering it on its own.
pub struct ClusterShard {
    shard_name: String,
    state: RwLock<ClusterState>,
    /// See `SentinelShard::current`: incremented while only the shared
    /// (read) lock is held, so it must be lock-free itself.
    current: AtomicU64,
    all_candidates_refused_limiter: RateLimiter,
}

impl ClusterShard {
    pub fn new(
        shard_name: impl Into<String>,
        master_info: ConnectionInfo,
        master: Arc<dyn InstanceHandle>,
    ) -> Self {
        Self {
            shard_name: shard_name.into(),
            state: RwLock::new(ClusterState {
                master_info,
                master,
                replicas: Vec::new(),
            }),
            current: AtomicU64::new(0),
            all_candidates_refused_limiter: RateLimiter::default(),
        }
    }

    pub fn set_master(&self, info: ConnectionInfo, handle: Arc<dyn InstanceHandle>) {
        let mut guard = self.state.write();
        guard.master_info = info;
        guard.master = handle;
    }

    pub fn set_replicas(&self, replicas: Vec<(ConnectionInfo, Arc<dyn InstanceHandle>)>) {
        let mut guard = self.state.write();
        guard.replicas = replicas
            .into_iter()
            .map(|(info, handle)| Replica { info, handle })
            .collect();
    }

    pub fn set_buffering(&self, settings: BufferingSettings) {
        let guard = self.state.read();
        guard.master.set_buffering(settings);
        for r in &guard.replicas {
            r.handle.set_buffering(settings);
        }
    }

    pub fn is_ready(&self, mode: ReadyMode) -> bool {
        let guard = self.state.read();
        let master_ready = guard.master.state() == ConnectionState::Connected;
        let any_replica_ready = guard
            .replicas
            .iter()
            .any(|r| r.handle.state() == ConnectionState::Connected);

        match mode {
            ReadyMode::NoWait => true,
            ReadyMode::Master => master_ready,
            ReadyMode::Slave => any_replica_ready,
            ReadyMode::MasterOrSlave => master_ready || any_replica_ready,
            ReadyMode::MasterAndSlave => master_ready && any_replica_ready,
        }
    }

    pub fn statistics(&self, master_side: bool) -> ShardStatistics {
        let guard = self.state.read();
        let mut map = std::collections::HashMap::new();
        let mut is_ready = false;

        if master_side {
            is_ready = guard.master.state() == ConnectionState::Connected;
            insert_instance(
                &mut map,
                InstanceStatistics {
                    server_host: guard.master.server_host(),
                    server_port: guard.master.server_port(),
                    state: guard.master.state(),
                    running_commands: guard.master.running_commands(),
                    ping_latency: guard.master.ping_latency(),
                },
            );
        } else {
            for r in &guard.replicas {
                if r.handle.state() == ConnectionState::Connected {
                    is_ready = true;
                }
                insert_instance(
                    &mut map,
                    InstanceStatistics {
                        server_host: r.handle.server_host(),
                        server_port: r.handle.server_port(),
                        state: r.handle.state(),
                        running_commands: r.handle.running_commands(),
                        ping_latency: r.handle.ping_latency(),
                    },
                );
            }
        }

        ShardStatistics {
            instances: map,
            is_ready,
        }
    }

    /// A writable command always goes to the master; a pinned command is
    /// resolved by a linear scan of master + replicas.
    /// Otherwise falls through to the read candidate vector and attempt
    /// loop built from [`routing_policy::cluster_candidates`].
    pub fn submit(&self, command: &mut Command) -> bool {
        let guard = self.state.read();

        if !command.control.force_server_id.is_any() {
            if command.control.force_server_id == guard.master.server_id() {
                return guard.master.submit(command);
            }
            for r in &guard.replicas {
                if r.handle.server_id() == command.control.force_server_id {
                    return r.handle.submit(command);
                }
            }
            if self.all_candidates_refused_limiter.allow() {
                warn!(
                    shard_name = %self.shard_name,
                    server_id = %command.control.force_server_id,
                    "pinned server id not found in cluster shard"
                );
            }
            return false;
        }

        if !command.read_only {
            return guard.master.submit(command);
        }

        let replicas: Vec<Arc<dyn InstanceHandle>> =
            guard.replicas.iter().map(|r| r.handle.clone()).collect();
        let candidates = routing_policy::cluster_candidates(
            guard.master.clone(),
            &replicas,
            command.control.strategy,
            command.control.allow_reads_from_master,
            command.control.best_dc_count,
        );

        if candidates.is_empty() {
            return false;
        }

        let is_nearest_ping = matches!(command.control.strategy, RoutingStrategy::NearestServerPing);
        let max_attempts = replicas.len() + 2;
        let current_val = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        let mut prev_idx: Option<usize> = None;

        for attempt in 0..max_attempts {
            let first_try = attempt == 0;
            let idx = routing_policy::cluster_start_index(
                attempt,
                first_try,
                is_nearest_ping,
                command.control.allow_reads_from_master,
                prev_idx,
                current_val,
                candidates.len(),
                command.control.best_dc_count,
            );
            prev_idx = Some(idx);

            let handle = &candidates[idx];
            if handle.is_syncing() || handle.is_destroying() || handle.state() != ConnectionState::Connected
            {
                continue;
            }

            command.instance_idx = Some(idx);
            if handle.submit(command) {
                return true;
            }
        }

        if self.all_candidates_refused_limiter.allow() {
            warn!(
                shard_name = %self.shard_name,
                read_only = command.read_only,
                "all read candidates refused the command"
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::CommandControl;
    use crate::core::instance::ServerId;
    use crate::core::mocks::MockInstanceHandle;

    fn connected(id: &str) -> Arc<MockInstanceHandle> {
        MockInstanceHandle::connected(ServerId::new(id), "h", 6379)
    }

    #[test]
    fn writable_command_always_goes_to_master() {
        let master = connected("m");
        let replica = connected("r");
        let shard = ClusterShard::new(
            "s",
            ConnectionInfo::new("m", 6379, false),
            master.clone() as Arc<dyn InstanceHandle>,
        );
        shard.set_replicas(vec![(
            ConnectionInfo::new("r", 6379, true),
            replica.clone() as Arc<dyn InstanceHandle>,
        )]);

        let mut cmd = Command::new(false);
        assert!(shard.submit(&mut cmd));
        assert_eq!(master.submit_count(), 1);
    }

    #[test]
    fn pinned_command_resolves_by_server_id() {
        let master = connected("m");
        let replica = connected("r");
        let shard = ClusterShard::new(
            "s",
            ConnectionInfo::new("m", 6379, false),
            master as Arc<dyn InstanceHandle>,
        );
        shard.set_replicas(vec![(
            ConnectionInfo::new("r", 6379, true),
            replica.clone() as Arc<dyn InstanceHandle>,
        )]);

        let mut cmd = Command::new(true);
        cmd.control.force_server_id = ServerId::new("r");
        assert!(shard.submit(&mut cmd));
        assert_eq!(replica.submit_count(), 1);
    }

    #[test]
    fn pinned_unknown_server_id_fails_closed() {
        let master = connected("m");
        let shard = ClusterShard::new(
            "s",
            ConnectionInfo::new("m", 6379, false),
            master as Arc<dyn InstanceHandle>,
        );

        let mut cmd = Command::new(true);
        cmd.control.force_server_id = ServerId::new("ghost");
        assert!(!shard.submit(&mut cmd));
    }

    #[test]
    fn read_only_prefers_replicas_over_master_by_default() {
        let master = connected("m");
        let replica = connected("r");
        let shard = ClusterShard::new(
            "s",
            ConnectionInfo::new("m", 6379, false),
            master.clone() as Arc<dyn InstanceHandle>,
        );
        shard.set_replicas(vec![(
            ConnectionInfo::new("r", 6379, true),
            replica.clone() as Arc<dyn InstanceHandle>,
        )]);

        for _ in 0..4 {
            let mut cmd = Command::new(true);
            assert!(shard.submit(&mut cmd));
        }
        assert_eq!(master.submit_count(), 0);
        assert_eq!(replica.submit_count(), 4);
    }

    #[test]
    fn read_only_falls_back_to_master_when_no_replica_connected() {
        let master = connected("m");
        let down_replica = MockInstanceHandle::new(ServerId::new("r"), "h", 6379);
        down_replica.set_state(ConnectionState::Disconnected);
        let shard = ClusterShard::new(
            "s",
            ConnectionInfo::new("m", 6379, false),
            master.clone() as Arc<dyn InstanceHandle>,
        );
        shard.set_replicas(vec![(
            ConnectionInfo::new("r", 6379, true),
            Arc::new(down_replica) as Arc<dyn InstanceHandle>,
        )]);

        let mut cmd = Command::new(true);
        cmd.control = CommandControl {
            allow_reads_from_master: true,
            ..Default::default()
        };
        assert!(shard.submit(&mut cmd));
        assert_eq!(master.submit_count(), 1);
    }

    #[test]
    fn is_ready_reflects_master_and_replica_state() {
        let master = connected("m");
        let shard = ClusterShard::new(
            "s",
            ConnectionInfo::new("m", 6379, false),
            master as Arc<dyn InstanceHandle>,
        );
        assert!(shard.is_ready(ReadyMode::Master));
        assert!(!shard.is_ready(ReadyMode::Slave));
        assert!(shard.is_ready(ReadyMode::MasterOrSlave));
        assert!(!shard.is_ready(ReadyMode::MasterAndSlave));
        assert!(shard.is_ready(ReadyMode::NoWait));
    }
}
