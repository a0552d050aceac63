// src/lib.rs

pub mod config;
pub mod core;

pub use crate::config::{ReconnectBackoff, ShardRouterConfig};
pub use crate::core::{
    ClusterShard, Command, CommandControl, ConnectionInfo, InstanceHandle, ReadyMode, RoutingStrategy,
    SentinelShard, ServerId, ShardRouterError, ShardStatistics, TaskExecutor, TokioTaskExecutor,
};
