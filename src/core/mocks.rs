// src/core/mocks.rs

//! An in-crate fake [`InstanceHandle`] for exercising routing logic without a
//! live server.
//!
//! Gated behind the `mocks` feature (mirroring the real `fred` crate's own
//! `mocks` feature, which exists for the same reason: letting callers test
//! against a client without a Redis process). Also compiled for the crate's
//! own `#[cfg(test)]` unit tests, which do not need to opt into the public
//! feature to use it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::command::Command;
use crate::core::connection_info::ConnectionInfo;
use crate::core::instance::{BufferingSettings, ConnectionState, InstanceHandle, ServerId};
use crate::core::observer::Observer;

/// A fully inspectable, hand-cranked `InstanceHandle`.
///
/// Every observable field is set directly by the test via the `set_*`
/// methods; `submit` can be made to always succeed, always fail, or fail
/// after a fixed number of calls via [`MockInstanceHandle::set_refuse_after`].
#[derive(Debug)]
pub struct MockInstanceHandle {
    server_id: ServerId,
    host: String,
    port: u16,
    state: Mutex<ConnectionState>,
    ping_latency: Mutex<Duration>,
    running_commands: AtomicUsize,
    destroying: AtomicBool,
    syncing: AtomicBool,
    refuse_after: Mutex<Option<usize>>,
    submit_count: AtomicUsize,
    buffering: Mutex<BufferingSettings>,
}

impl MockInstanceHandle {
    pub fn new(server_id: ServerId, host: impl Into<String>, port: u16) -> Self {
        Self {
            server_id,
            host: host.into(),
            port,
            state: Mutex::new(ConnectionState::Init),
            ping_latency: Mutex::new(Duration::from_millis(0)),
            running_commands: AtomicUsize::new(0),
            destroying: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
            refuse_after: Mutex::new(None),
            submit_count: AtomicUsize::new(0),
            buffering: Mutex::new(BufferingSettings::default()),
        }
    }

    pub fn connected(server_id: ServerId, host: impl Into<String>, port: u16) -> Arc<Self> {
        let h = Self::new(server_id, host, port);
        h.set_state(ConnectionState::Connected);
        Arc::new(h)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn set_ping_latency(&self, latency: Duration) {
        *self.ping_latency.lock() = latency;
    }

    pub fn set_running_commands(&self, count: usize) {
        self.running_commands.store(count, Ordering::SeqCst);
    }

    pub fn set_destroying(&self, value: bool) {
        self.destroying.store(value, Ordering::SeqCst);
    }

    pub fn set_syncing(&self, value: bool) {
        self.syncing.store(value, Ordering::SeqCst);
    }

    /// After `n` successful submits, every subsequent `submit` refuses.
    pub fn set_refuse_after(&self, n: usize) {
        *self.refuse_after.lock() = Some(n);
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn buffering(&self) -> BufferingSettings {
        *self.buffering.lock()
    }
}

#[async_trait]
impl InstanceHandle for MockInstanceHandle {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn server_id(&self) -> ServerId {
        self.server_id.clone()
    }

    fn server_host(&self) -> String {
        self.host.clone()
    }

    fn server_port(&self) -> u16 {
        self.port
    }

    fn ping_latency(&self) -> Duration {
        *self.ping_latency.lock()
    }

    fn running_commands(&self) -> usize {
        self.running_commands.load(Ordering::SeqCst)
    }

    fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::SeqCst)
    }

    fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    fn submit(&self, _command: &Command) -> bool {
        let count = self.submit_count.fetch_add(1, Ordering::SeqCst);
        match *self.refuse_after.lock() {
            Some(limit) if count >= limit => false,
            _ => {
                self.running_commands.fetch_add(1, Ordering::SeqCst);
                true
            }
        }
    }

    async fn connect(&self, _info: ConnectionInfo) {
        self.set_state(ConnectionState::Connected);
    }

    fn set_buffering(&self, settings: BufferingSettings) {
        *self.buffering.lock() = settings;
    }

    fn on_state_change(&self, _observer: Arc<Observer<ConnectionState>>) {
        // The mock never changes state on its own; tests drive it explicitly
        // via `set_state`, so there is nothing to wire the observer to.
    }

    fn on_not_in_cluster_mode(&self, _observer: Arc<Observer<()>>) {}
}
