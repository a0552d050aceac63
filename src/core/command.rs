// src/core/command.rs

//! The command envelope the router dispatches, and the routing knobs that
//! travel with it.
//!
//! Encoding the actual Redis command (its name, arguments, and reply
//! decoding) is out of scope — that lives in the wire-protocol collaborator.
//! `Command` here only carries what the router needs to make a routing
//! decision.

use serde::{Deserialize, Serialize};

use crate::core::instance::ServerId;

/// Per-command routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoutingStrategy {
    /// Route by role only: masters for writes, any matching replica for reads.
    #[default]
    Default,
    /// Same role filtering as `Default`, but intended for commands that
    /// should fan out evenly across every datacenter's instances rather than
    /// preferring a local one.
    EveryDc,
    /// Prefer the instances nearest (by ping) that also serve as this
    /// shard's local-DC conductor.
    LocalDcConductor,
    /// Prefer the `best_dc_count` instances with the lowest ping latency,
    /// regardless of datacenter.
    NearestServerPing,
}

/// Policy knobs attached to a single command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandControl {
    pub strategy: RoutingStrategy,
    /// `ServerId::any()` means "no pin" — the caller did not ask for one
    /// specific server.
    #[serde(default)]
    pub force_server_id: ServerId,
    /// Permits the replica-read path to fall back onto the master once
    /// replicas are exhausted.
    #[serde(default)]
    pub allow_reads_from_master: bool,
    /// Window size for `NearestServerPing`/`LocalDcConductor`; `0` means
    /// "consider all eligible instances".
    #[serde(default)]
    pub best_dc_count: usize,
}

impl Default for CommandControl {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Default,
            force_server_id: ServerId::any(),
            allow_reads_from_master: false,
            best_dc_count: 0,
        }
    }
}

/// A command awaiting routing.
///
/// `instance_idx` is caller-maintained "last tried" state: on a retry, the
/// caller passes back whatever the router wrote into it on the previous
/// attempt, so the router can avoid immediately re-selecting the instance
/// that just refused the command.
#[derive(Debug, Clone)]
pub struct Command {
    pub control: CommandControl,
    pub read_only: bool,
    pub instance_idx: Option<usize>,
}

impl Command {
    pub fn new(read_only: bool) -> Self {
        Self {
            control: CommandControl::default(),
            read_only,
            instance_idx: None,
        }
    }

    pub fn with_control(mut self, control: CommandControl) -> Self {
        self.control = control;
        self
    }

    /// `with_masters` per the routing algorithm: writable commands always
    /// qualify masters, and reads may too if the caller opted in.
    pub fn wants_masters(&self) -> bool {
        !self.read_only || self.control.allow_reads_from_master
    }

    /// `with_slaves` per the routing algorithm: only read-only commands
    /// qualify replicas.
    pub fn wants_slaves(&self) -> bool {
        self.read_only
    }
}
