// tests/cluster_shard_test.rs

//! A cluster read without reads-from-master, where the only healthy replica
//! refuses before the master is ever tried as the last resort.

use std::sync::Arc;

use redis_shard_router::core::cluster_shard::{ClusterShard, ReadyMode};
use redis_shard_router::core::command::{Command, CommandControl, RoutingStrategy};
use redis_shard_router::core::connection_info::ConnectionInfo;
use redis_shard_router::core::instance::{ConnectionState, InstanceHandle, ServerId};
use redis_shard_router::core::mocks::MockInstanceHandle;

fn connected(id: &str) -> Arc<MockInstanceHandle> {
    MockInstanceHandle::connected(ServerId::new(id), "h", 6379)
}

#[test]
fn replica_refusal_eventually_falls_back_to_master_as_last_resort() {
    // A single refusing replica makes the attempt sequence deterministic:
    // the first attempt is confined to the replica-only window, and the
    // master is only ever reachable once that window is exhausted.
    let master = connected("m");
    let r1 = connected("r1");
    r1.set_refuse_after(0);

    let shard = ClusterShard::new(
        "shard-0",
        ConnectionInfo::new("m", 6379, false),
        master.clone() as Arc<dyn InstanceHandle>,
    );
    shard.set_replicas(vec![(
        ConnectionInfo::new("r1", 6379, true),
        r1.clone() as Arc<dyn InstanceHandle>,
    )]);

    let mut cmd = Command::new(true);
    cmd.control = CommandControl {
        strategy: RoutingStrategy::Default,
        allow_reads_from_master: false,
        ..Default::default()
    };

    assert!(shard.submit(&mut cmd));
    assert_eq!(master.submit_count(), 1);
    assert!(r1.submit_count() >= 1, "the replica-only window must be tried first");
}

#[test]
fn nearest_ping_read_excludes_master_window_when_reads_from_master_forbidden() {
    use std::time::Duration;

    let master = connected("m");
    master.set_ping_latency(Duration::from_millis(1)); // lowest ping, but ineligible for the window
    let r1 = connected("r1");
    r1.set_ping_latency(Duration::from_millis(50));
    let r2 = connected("r2");
    r2.set_ping_latency(Duration::from_millis(30));

    let shard = ClusterShard::new(
        "shard-0",
        ConnectionInfo::new("m", 6379, false),
        master.clone() as Arc<dyn InstanceHandle>,
    );
    shard.set_replicas(vec![
        (ConnectionInfo::new("r1", 6379, true), r1.clone() as Arc<dyn InstanceHandle>),
        (ConnectionInfo::new("r2", 6379, true), r2.clone() as Arc<dyn InstanceHandle>),
    ]);

    for _ in 0..10 {
        let mut cmd = Command::new(true);
        cmd.control = CommandControl {
            strategy: RoutingStrategy::NearestServerPing,
            allow_reads_from_master: false,
            best_dc_count: 1,
            ..Default::default()
        };
        assert!(shard.submit(&mut cmd));
    }

    assert_eq!(master.submit_count(), 0, "master must never be chosen while replicas are healthy");
}

#[test]
fn pinned_read_resolves_to_exact_replica() {
    let master = connected("m");
    let r1 = connected("r1");
    let shard = ClusterShard::new(
        "shard-0",
        ConnectionInfo::new("m", 6379, false),
        master as Arc<dyn InstanceHandle>,
    );
    shard.set_replicas(vec![(ConnectionInfo::new("r1", 6379, true), r1.clone() as Arc<dyn InstanceHandle>)]);

    let mut cmd = Command::new(true);
    cmd.control.force_server_id = ServerId::new("r1");
    assert!(shard.submit(&mut cmd));
    assert_eq!(r1.submit_count(), 1);
}

#[test]
fn readiness_modes_track_master_and_replica_connection_state() {
    let master = connected("m");
    let down_replica = MockInstanceHandle::new(ServerId::new("r1"), "h", 6379);
    down_replica.set_state(ConnectionState::Disconnected);

    let shard = ClusterShard::new(
        "shard-0",
        ConnectionInfo::new("m", 6379, false),
        master as Arc<dyn InstanceHandle>,
    );
    shard.set_replicas(vec![(
        ConnectionInfo::new("r1", 6379, true),
        Arc::new(down_replica) as Arc<dyn InstanceHandle>,
    )]);

    assert!(shard.is_ready(ReadyMode::Master));
    assert!(!shard.is_ready(ReadyMode::Slave));
    assert!(!shard.is_ready(ReadyMode::MasterAndSlave));
    assert!(shard.is_ready(ReadyMode::MasterOrSlave));
}
