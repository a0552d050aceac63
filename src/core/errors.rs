// src/core/errors.rs

//! Defines the error type for the shard router crate.
//!
//! The routing hot path (`submit`, `reconcile_*`) keeps its plain boolean
//! return contract; this enum exists for the handful of construction and
//! configuration paths that need a typed error instead of a bare `bool`.

use thiserror::Error;

use crate::core::instance::ServerId;

/// Errors surfaced by the router's construction and configuration paths.
///
/// Not the type `submit` returns: per the routing contract, dispatch failures
/// collapse to `bool` plus a log line, not a `Result`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardRouterError {
    #[error("server id {0:?} not found in this shard")]
    ServerNotFound(ServerId),

    #[error("invalid connection info: {0}")]
    InvalidConnectionInfo(String),

    #[error("invalid routing policy configuration: {0}")]
    InvalidRoutingPolicy(String),

    #[error("shard is being destroyed")]
    Destroying,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for ShardRouterError {
    fn from(e: config::ConfigError) -> Self {
        ShardRouterError::Config(e.to_string())
    }
}
