// src/core/instance.rs

//! The live side of an instance: the capability surface the router needs
//! from a connected (or connecting) Redis instance.
//!
//! Everything in this module is an *external collaborator interface*: the
//! actual socket I/O, wire protocol, and reconnection backoff live in
//! whatever concrete type implements [`InstanceHandle`]. The router only
//! ever sees `Arc<dyn InstanceHandle>`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::command::Command;
use crate::core::connection_info::ConnectionInfo;
use crate::core::observer::Observer;

/// A stable identifier for an instance across reconnects.
///
/// `ServerId::any()` is the sentinel meaning "no pin" — `CommandControl`
/// carries this value when the caller has not asked to be routed to one
/// specific server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId(Option<Arc<str>>);

impl ServerId {
    pub fn any() -> Self {
        ServerId(None)
    }

    pub fn new(id: impl Into<Arc<str>>) -> Self {
        ServerId(Some(id.into()))
    }

    pub fn is_any(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "<any>"),
        }
    }
}

/// The connection lifecycle state of a single instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Init,
    Connected,
    Disconnecting,
    Disconnected,
    DisconnectError,
    InitError,
}

impl ConnectionState {
    /// A connection in one of these states will never become `Connected`
    /// again on its own; reconciliation drops it instead of parking it in
    /// `clean_wait`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::DisconnectError
        )
    }
}

/// Command-batching knobs propagated to every live and pending instance.
/// Deliberately opaque at this layer — the router only threads the value
/// through, it never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferingSettings {
    pub max_batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for BufferingSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 1,
            flush_interval: Duration::from_millis(0),
        }
    }
}

/// The capability surface the router requires from a live Redis connection.
///
/// `connect` is the only method the router ever awaits, and only from the
/// single topology/event thread during reconciliation. Every other
/// method must return without suspending — `submit` in particular is defined
/// as non-blocking: it enqueues onto the connection's own send pipeline and
/// reports whether that enqueue succeeded.
#[async_trait]
pub trait InstanceHandle: Send + Sync + fmt::Debug {
    fn state(&self) -> ConnectionState;
    fn server_id(&self) -> ServerId;
    fn server_host(&self) -> String;
    fn server_port(&self) -> u16;
    fn ping_latency(&self) -> Duration;
    fn running_commands(&self) -> usize;
    fn is_destroying(&self) -> bool;

    /// Cluster-mode-only exclusion hint; sentinel-mode handles always report `false`.
    fn is_syncing(&self) -> bool {
        false
    }

    /// Non-blocking. Returns `false` iff the command could not be enqueued.
    fn submit(&self, command: &Command) -> bool;

    /// Idempotent. Transitions `Init` -> `{Connected, InitError, ...}`.
    /// The only suspending method on this trait.
    async fn connect(&self, info: ConnectionInfo);

    fn set_buffering(&self, settings: BufferingSettings);

    /// Registers a subscriber for state-transition events. Single-subscriber
    /// per shard instance; the shard is expected to call this exactly once,
    /// at construction, and never replace the subscriber afterwards.
    fn on_state_change(&self, observer: Arc<Observer<ConnectionState>>);

    /// Registers a subscriber fired when this instance discovers it is
    /// misconfigured for its deployment mode (e.g. a cluster-mode client
    /// talking to a non-cluster server).
    fn on_not_in_cluster_mode(&self, observer: Arc<Observer<()>>);
}

/// The router's unit of ownership: a declared identity paired with its live
/// handle. `info` is mutated in place when only the `read_only` flag changes
/// on an instance that remains present in `connection_infos` (see
/// `ConnectionInfo::endpoint_key`); everything else about a `ConnectionStatus`
/// is immutable after construction — a genuine add/remove always creates or
/// drops a whole new entry instead.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub info: ConnectionInfo,
    pub handle: Arc<dyn InstanceHandle>,
}

impl ConnectionStatus {
    pub fn new(info: ConnectionInfo, handle: Arc<dyn InstanceHandle>) -> Self {
        Self { info, handle }
    }
}
