// src/core/routing_policy.rs

//! The strategy layer shared by [`crate::core::sentinel_shard::SentinelShard`]
//! and [`crate::core::cluster_shard::ClusterShard`]: per-command selection of
//! a candidate instance vector (or availability mask) and a round-robin
//! start index. Every function here is pure — no locking, no I/O — so it can
//! be exercised directly by the property tests in `tests/property_test.rs`.

use std::sync::Arc;

use crate::core::command::{Command, RoutingStrategy};
use crate::core::connection_info::ConnectionInfo;
use crate::core::instance::InstanceHandle;

/// The per-instance availability bitmap for a `SentinelShard` submit, plus
/// whether a caller-pinned `force_server_id` went unmatched (the "mask is
/// all-zero because the pin is missing" case the source logs once for).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub mask: Vec<bool>,
    pub pin_missing: bool,
}

/// Computes which instances a command may run against.
///
/// `instances` and `command` are read-only here; the caller (`SentinelShard`)
/// still owns deciding what to do with a missing pin or an all-zero mask.
pub fn sentinel_availability(
    instances: &[(ConnectionInfo, Arc<dyn InstanceHandle>)],
    command: &Command,
) -> Availability {
    let n = instances.len();

    if !command.control.force_server_id.is_any() {
        let mut mask = vec![false; n];
        let mut found = false;
        for (i, (_, handle)) in instances.iter().enumerate() {
            if handle.server_id() == command.control.force_server_id {
                mask[i] = true;
                found = true;
                break;
            }
        }
        return Availability {
            mask,
            pin_missing: !found,
        };
    }

    let with_masters = command.wants_masters();
    let with_slaves = command.wants_slaves();
    let role_matches = |info: &ConnectionInfo| {
        if info.read_only {
            with_slaves
        } else {
            with_masters
        }
    };

    match command.control.strategy {
        RoutingStrategy::Default | RoutingStrategy::EveryDc => {
            let mask = instances.iter().map(|(info, _)| role_matches(info)).collect();
            Availability {
                mask,
                pin_missing: false,
            }
        }
        RoutingStrategy::NearestServerPing | RoutingStrategy::LocalDcConductor => {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by_key(|&i| instances[i].1.ping_latency());

            let window = if command.control.best_dc_count == 0 {
                n
            } else {
                command.control.best_dc_count.min(n)
            };

            let mut mask = vec![false; n];
            let mut matched = 0usize;
            for &i in &order {
                if matched >= window {
                    break;
                }
                if role_matches(&instances[i].0) {
                    mask[i] = true;
                    matched += 1;
                }
            }
            Availability {
                mask,
                pin_missing: false,
            }
        }
    }
}

/// Among the candidates yielded by `candidates` (index, handle pairs already
/// filtered for eligibility), returns the index with the smallest
/// `running_commands()`, ties broken by whichever was seen first — i.e. by
/// round-robin order, since callers iterate candidates in round-robin order.
pub fn pick_least_loaded<'a, I>(candidates: I) -> Option<usize>
where
    I: IntoIterator<Item = (usize, &'a Arc<dyn InstanceHandle>)>,
{
    let mut best: Option<(usize, usize)> = None;
    for (idx, handle) in candidates {
        let load = handle.running_commands();
        match best {
            None => best = Some((idx, load)),
            Some((_, best_load)) if load < best_load => best = Some((idx, load)),
            _ => {}
        }
    }
    best.map(|(idx, _)| idx)
}

/// Builds the `ClusterShard` read candidate vector for a given command.
///
/// - Non-nearest-ping strategies: `replicas ++ [master]`, master always last.
/// - Nearest-ping with reads-from-master allowed: `replicas ++ [master]`,
///   then the first `best_dc_count` entries are partial-sorted ascending by
///   ping — the master can land in that front window if it is the closest.
/// - Nearest-ping with reads-from-master forbidden: `replicas` alone are
///   partial-sorted, and `master` is appended afterwards, so it can never
///   enter the preferred window; it remains a strict last resort.
pub fn cluster_candidates(
    master: Arc<dyn InstanceHandle>,
    replicas: &[Arc<dyn InstanceHandle>],
    strategy: RoutingStrategy,
    allow_reads_from_master: bool,
    best_dc_count: usize,
) -> Vec<Arc<dyn InstanceHandle>> {
    let is_nearest_ping = matches!(strategy, RoutingStrategy::NearestServerPing);

    if !is_nearest_ping {
        let mut candidates: Vec<_> = replicas.to_vec();
        candidates.push(master);
        return candidates;
    }

    if allow_reads_from_master {
        let mut candidates: Vec<_> = replicas.to_vec();
        candidates.push(master);
        let window = effective_window(best_dc_count, candidates.len());
        partial_sort_by_ping(&mut candidates, window);
        candidates
    } else {
        let mut candidates: Vec<_> = replicas.to_vec();
        let window = effective_window(best_dc_count, candidates.len());
        partial_sort_by_ping(&mut candidates, window);
        candidates.push(master);
        candidates
    }
}

fn effective_window(best_dc_count: usize, len: usize) -> usize {
    if best_dc_count == 0 {
        len
    } else {
        best_dc_count.min(len)
    }
}

/// Partial-sorts `candidates` so the first `window` entries are the
/// `window` lowest-ping entries, in ascending order; the tail is left in
/// arbitrary order as pure fallback capacity.
fn partial_sort_by_ping(candidates: &mut [Arc<dyn InstanceHandle>], window: usize) {
    if window == 0 || candidates.is_empty() {
        return;
    }
    if window >= candidates.len() {
        candidates.sort_by_key(|h| h.ping_latency());
        return;
    }
    candidates.select_nth_unstable_by(window - 1, |a, b| a.ping_latency().cmp(&b.ping_latency()));
    candidates[..window].sort_by_key(|h| h.ping_latency());
}

/// The `ClusterShard` attempt-sequence start-index function.
///
/// Takes `best_dc_count` alongside the rest of the attempt state because the
/// nearest-ping first-attempt formula (`current mod min(best_dc_count,
/// effective_count)`) cannot be computed without it (see DESIGN.md).
#[allow(clippy::too_many_arguments)]
pub fn cluster_start_index(
    attempt: usize,
    first_try: bool,
    is_nearest_ping: bool,
    allow_reads_from_master: bool,
    prev_idx: Option<usize>,
    current: u64,
    count: usize,
    best_dc_count: usize,
) -> usize {
    if count == 0 {
        return 0;
    }

    let mut effective_count = count;
    if first_try && attempt == 0 && !allow_reads_from_master {
        effective_count = effective_count.saturating_sub(1).max(1);
    }

    let raw: u64 = if is_nearest_ping {
        if first_try && attempt == 0 {
            let window = effective_window(best_dc_count, effective_count).max(1);
            current % (window as u64)
        } else {
            prev_idx.unwrap_or(0) as u64 + 1 + attempt as u64
        }
    } else if first_try {
        current + attempt as u64
    } else {
        prev_idx.unwrap_or(0) as u64 + 1 + attempt as u64
    };

    (raw % effective_count as u64) as usize
}
