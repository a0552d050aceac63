// src/core/sentinel_shard.rs

//! `SentinelShard`: the Sentinel-mode shard router. Owns the full connection
//! lifecycle (create, promote, demote, reap) against a declared set of
//! `ConnectionInfo`, and routes commands against whatever subset is
//! currently `Connected`.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::core::command::Command;
use crate::core::connection_info::ConnectionInfo;
use crate::core::instance::{
    BufferingSettings, ConnectionState, ConnectionStatus, InstanceHandle, ServerId,
};
use crate::core::observer::Observer;
use crate::core::rate_limit::RateLimiter;
use crate::core::routing_policy;
use crate::core::stats::{InstanceStatistics, ShardStatistics, insert_instance};

/// Constructs a fresh `InstanceHandle` for a desired `ConnectionInfo`.
/// Supplied by the caller at construction time — the router never decides on
/// its own what concrete connection type to create.
pub type HandleFactory = Box<dyn Fn(&ConnectionInfo) -> Arc<dyn InstanceHandle> + Send + Sync>;

/// The "callable worker" contract: something that can run a handle's
/// `connect` future to completion. The shard never spawns its own threads;
/// it only ever asks this collaborator to do so.
pub trait TaskExecutor: Send + Sync {
    fn spawn_connect(&self, handle: Arc<dyn InstanceHandle>, info: ConnectionInfo);
}

/// A `TaskExecutor` backed by `tokio::spawn`, the default for production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTaskExecutor;

impl TaskExecutor for TokioTaskExecutor {
    fn spawn_connect(&self, handle: Arc<dyn InstanceHandle>, info: ConnectionInfo) {
        tokio::spawn(async move {
            handle.connect(info).await;
        });
    }
}

struct SentinelState {
    connection_infos: BTreeSet<ConnectionInfo>,
    instances: Vec<ConnectionStatus>,
    clean_wait: Vec<ConnectionStatus>,
    destroying: bool,
    last_connected_time: Option<Instant>,
    last_ready_time: Option<Instant>,
    prev_connected: bool,
    buffering_defaults: BufferingSettings,
}

/// The Sentinel-mode shard: an unordered set of instances, each flagged
/// master or replica, reconciled against a desired `ConnectionInfo` set.
pub struct SentinelShard {
    shard_group: String,
    shard_name: String,
    state: RwLock<SentinelState>,
    /// Incremented under the shard's *shared* (read) lock: multiple
    /// concurrent `submit` callers only ever take the read lock, so this
    /// must itself be atomic rather than protected by the lock's exclusivity.
    current: AtomicU64,
    factory: HandleFactory,

    pub on_instance_state_change: Arc<Observer<(ServerId, ConnectionState)>>,
    pub on_instance_ready: Arc<Observer<(ServerId, bool)>>,
    pub on_not_in_cluster_mode: Arc<Observer<()>>,
    pub on_readiness_change: Arc<Observer<bool>>,

    all_candidates_refused_limiter: RateLimiter,
    server_not_found_limiter: RateLimiter,
}

impl SentinelShard {
    pub fn new(
        shard_group: impl Into<String>,
        shard_name: impl Into<String>,
        factory: HandleFactory,
    ) -> Self {
        Self {
            shard_group: shard_group.into(),
            shard_name: shard_name.into(),
            state: RwLock::new(SentinelState {
                connection_infos: BTreeSet::new(),
                instances: Vec::new(),
                clean_wait: Vec::new(),
                destroying: false,
                last_connected_time: None,
                last_ready_time: None,
                prev_connected: false,
                buffering_defaults: BufferingSettings::default(),
            }),
            current: AtomicU64::new(0),
            factory,
            on_instance_state_change: Arc::new(Observer::new()),
            on_instance_ready: Arc::new(Observer::new()),
            on_not_in_cluster_mode: Arc::new(Observer::new()),
            on_readiness_change: Arc::new(Observer::new()),
            all_candidates_refused_limiter: RateLimiter::default(),
            server_not_found_limiter: RateLimiter::default(),
        }
    }

    /// Replaces the desired connection set. Returns `true` iff it changed.
    /// Does not itself create or tear down connections — that happens on the
    /// next `reconcile_create`/`reconcile_state` pair, which the caller is
    /// expected to drive from the event thread whenever this returns `true`.
    pub fn set_connection_infos(&self, desired: BTreeSet<ConnectionInfo>) -> bool {
        let mut guard = self.state.write();
        if guard.connection_infos == desired {
            return false;
        }

        // An instance whose endpoint is already known but whose declared
        // fields (typically `read_only`) changed is a role flip, not an
        // add/remove: mutate the live entry in place so its connection
        // survives the change.
        for info in desired.iter() {
            if guard.connection_infos.contains(info) {
                continue;
            }
            let same_endpoint_known = guard
                .connection_infos
                .iter()
                .any(|existing| existing.endpoint_key() == info.endpoint_key());
            if same_endpoint_known {
                let new_info = info.clone();
                for status in guard.instances.iter_mut().chain(guard.clean_wait.iter_mut()) {
                    if status.info.endpoint_key() == new_info.endpoint_key() {
                        status.info = new_info.clone();
                    }
                }
            }
        }

        guard.connection_infos = desired;
        true
    }

    /// Creates `InstanceHandle`s for every desired info not yet known, wires
    /// their signals, starts connecting via `executor`, and places them in
    /// `clean_wait`. Also drops live/pending entries whose info vanished
    /// from the desired set. Returns `true` iff the live set changed.
    pub fn reconcile_create(&self, executor: &dyn TaskExecutor) -> bool {
        let mut guard = self.state.write();
        if guard.destroying {
            return false;
        }
        let mut changed = false;

        let desired = guard.connection_infos.clone();
        let before_instances = guard.instances.len();
        let before_wait = guard.clean_wait.len();
        guard.instances.retain(|s| desired.contains(&s.info));
        guard.clean_wait.retain(|s| desired.contains(&s.info));
        changed |= guard.instances.len() != before_instances || guard.clean_wait.len() != before_wait;

        let known_keys: HashSet<(String, u16)> = guard
            .instances
            .iter()
            .chain(guard.clean_wait.iter())
            .map(|s| (s.info.host.clone(), s.info.port))
            .collect();

        let buffering_defaults = guard.buffering_defaults;
        let mut to_connect = Vec::new();

        for info in desired.iter() {
            let key = (info.host.clone(), info.port);
            if known_keys.contains(&key) {
                continue;
            }

            let handle = (self.factory)(info);
            handle.set_buffering(buffering_defaults);

            let state_relay = Arc::new(Observer::<ConnectionState>::new());
            let outer_state = self.on_instance_state_change.clone();
            let sid = handle.server_id();
            state_relay.subscribe(move |new_state| outer_state.emit((sid.clone(), new_state)));
            handle.on_state_change(state_relay);

            let mode_relay = Arc::new(Observer::<()>::new());
            let outer_mode = self.on_not_in_cluster_mode.clone();
            mode_relay.subscribe(move |_| outer_mode.emit(()));
            handle.on_not_in_cluster_mode(mode_relay);

            to_connect.push((handle.clone(), info.clone()));
            guard.clean_wait.push(ConnectionStatus::new(info.clone(), handle));
            changed = true;
        }

        drop(guard);

        for (handle, info) in to_connect {
            executor.spawn_connect(handle, info);
        }

        changed
    }

    /// Promotes `Connected` entries from `clean_wait` to `instances`,
    /// demotes non-`Connected` entries from `instances` to `clean_wait`, and
    /// drains terminal entries. Emits `on_instance_ready` and the readiness
    /// signal after releasing the lock. Returns `true` iff the live set
    /// changed.
    pub fn reconcile_state(&self) -> bool {
        let mut guard = self.state.write();
        if guard.destroying {
            return false;
        }
        let mut changed = false;
        let mut newly_ready: Vec<(ServerId, bool)> = Vec::new();

        let drained_wait: Vec<_> = guard.clean_wait.drain(..).collect();
        let mut still_waiting = Vec::with_capacity(drained_wait.len());
        for status in drained_wait {
            match status.handle.state() {
                ConnectionState::Connected => {
                    newly_ready.push((status.handle.server_id(), status.info.read_only));
                    guard.instances.push(status);
                    changed = true;
                }
                s if s.is_terminal() => {
                    changed = true;
                }
                _ => still_waiting.push(status),
            }
        }
        guard.clean_wait = still_waiting;

        let drained_live: Vec<_> = guard.instances.drain(..).collect();
        let mut still_live = Vec::with_capacity(drained_live.len());
        for status in drained_live {
            match status.handle.state() {
                ConnectionState::Connected => still_live.push(status),
                s if s.is_terminal() => changed = true,
                _ => {
                    guard.clean_wait.push(status);
                    changed = true;
                }
            }
        }
        guard.instances = still_live;

        let now_connected = !guard.instances.is_empty();
        let readiness_flip = now_connected != guard.prev_connected;
        if readiness_flip {
            guard.prev_connected = now_connected;
            guard.last_ready_time = Some(Instant::now());
            if now_connected {
                guard.last_connected_time = Some(Instant::now());
            }
        }

        drop(guard);

        for ready in newly_ready {
            self.on_instance_ready.emit(ready);
        }
        if readiness_flip {
            self.on_readiness_change.emit(now_connected);
        }

        changed
    }

    pub fn is_connected_to_all(&self, allow_empty: bool) -> bool {
        let guard = self.state.read();
        if guard.instances.is_empty() && guard.clean_wait.is_empty() {
            return allow_empty;
        }
        guard.clean_wait.is_empty()
            && guard
                .instances
                .iter()
                .all(|s| s.handle.state() == ConnectionState::Connected)
    }

    pub fn all_ready_server_ids(&self) -> Vec<ServerId> {
        self.state
            .read()
            .instances
            .iter()
            .map(|s| s.handle.server_id())
            .collect()
    }

    pub fn statistics(&self, master_side: bool) -> ShardStatistics {
        let guard = self.state.read();
        let want_read_only = !master_side;
        let mut map = std::collections::HashMap::new();
        let mut is_ready = false;
        for status in guard.instances.iter().chain(guard.clean_wait.iter()) {
            if status.info.read_only != want_read_only {
                continue;
            }
            if status.handle.state() == ConnectionState::Connected {
                is_ready = true;
            }
            insert_instance(
                &mut map,
                InstanceStatistics {
                    server_host: status.handle.server_host(),
                    server_port: status.handle.server_port(),
                    state: status.handle.state(),
                    running_commands: status.handle.running_commands(),
                    ping_latency: status.handle.ping_latency(),
                },
            );
        }
        ShardStatistics {
            instances: map,
            is_ready,
        }
    }

    /// Propagates to every live and pending instance and records as the new
    /// default for instances created afterward.
    pub fn set_buffering(&self, settings: BufferingSettings) {
        let mut guard = self.state.write();
        guard.buffering_defaults = settings;
        for status in guard.instances.iter().chain(guard.clean_wait.iter()) {
            status.handle.set_buffering(settings);
        }
    }

    /// One-way teardown: after this call, every `submit` returns `false`.
    pub fn clean(&self) {
        let mut guard = self.state.write();
        guard.destroying = true;
        let was_connected = guard.prev_connected;
        guard.instances.clear();
        guard.clean_wait.clear();
        guard.prev_connected = false;
        if was_connected {
            guard.last_ready_time = Some(Instant::now());
        }
        drop(guard);
        if was_connected {
            self.on_readiness_change.emit(false);
        }
    }

    pub fn is_destroying(&self) -> bool {
        self.state.read().destroying
    }

    /// Returns `true` iff some instance accepted the command for dispatch.
    /// Never blocks on I/O. Always `false` once `clean()` has been called.
    pub fn submit(&self, command: &mut Command) -> bool {
        let guard = self.state.read();
        if guard.destroying {
            return false;
        }
        if guard.instances.is_empty() {
            drop(guard);
            if self.all_candidates_refused_limiter.allow() {
                warn!(
                    shard_group = %self.shard_group,
                    shard_name = %self.shard_name,
                    read_only = command.read_only,
                    "no live instances in shard; all candidates refused"
                );
            }
            return false;
        }

        let pairs: Vec<(ConnectionInfo, Arc<dyn InstanceHandle>)> = guard
            .instances
            .iter()
            .map(|s| (s.info.clone(), s.handle.clone()))
            .collect();
        let avail = routing_policy::sentinel_availability(&pairs, command);

        if avail.pin_missing && self.server_not_found_limiter.allow() {
            warn!(
                shard_group = %self.shard_group,
                shard_name = %self.shard_name,
                server_id = %command.control.force_server_id,
                "pinned server id not found in shard"
            );
        }

        let n = guard.instances.len();
        let max_attempts = n + 1;
        let original_idx = command.instance_idx;

        for attempt in 0..max_attempts {
            let (skip_idx, may_fallback_to_any) = if attempt == 0 {
                (original_idx, false)
            } else {
                (None, command.control.force_server_id.is_any())
            };

            let Some((idx, handle)) = self.select(
                &guard.instances,
                &avail.mask,
                may_fallback_to_any,
                skip_idx,
                command.read_only,
            ) else {
                continue;
            };

            command.instance_idx = Some(idx);

            // Can fire on attempt 0 too, e.g. when a pinned id was absent
            // and the mask is all-zero. The warning is emitted, never
            // silently suppressed.
            if idx >= avail.mask.len() || !avail.mask[idx] {
                info!(
                    shard_group = %self.shard_group,
                    shard_name = %self.shard_name,
                    idx,
                    attempt,
                    "falling back to any server"
                );
            }

            if handle.submit(command) {
                return true;
            }
        }

        if self.all_candidates_refused_limiter.allow() {
            warn!(
                shard_group = %self.shard_group,
                shard_name = %self.shard_name,
                read_only = command.read_only,
                "all candidates refused the command"
            );
        }
        false
    }

    /// Increments the round-robin counter, then scans
    /// instances starting at the new value, skipping ineligible ones, and
    /// returns the least-loaded eligible candidate.
    fn select(
        &self,
        instances: &[ConnectionStatus],
        availability: &[bool],
        may_fallback_to_any: bool,
        skip_idx: Option<usize>,
        command_read_only: bool,
    ) -> Option<(usize, Arc<dyn InstanceHandle>)> {
        let n = instances.len();
        if n == 0 {
            return None;
        }
        let start = (self.current.fetch_add(1, Ordering::Relaxed) + 1) as usize % n;

        let mut candidates: Vec<(usize, &Arc<dyn InstanceHandle>)> = Vec::new();
        for i in 0..n {
            let k = (start + i) % n;
            if Some(k) == skip_idx {
                continue;
            }
            let status = &instances[k];
            if status.info.read_only && !command_read_only {
                continue;
            }
            if !may_fallback_to_any && !availability.get(k).copied().unwrap_or(false) {
                continue;
            }
            if status.handle.is_destroying() || status.handle.state() != ConnectionState::Connected {
                continue;
            }
            candidates.push((k, &status.handle));
        }

        let idx = routing_policy::pick_least_loaded(candidates.iter().map(|(k, h)| (*k, *h)))?;
        Some((idx, instances[idx].handle.clone()))
    }
}
