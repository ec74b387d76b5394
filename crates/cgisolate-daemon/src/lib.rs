//! cgisolate Daemon
//!
//! Node agent entry point: loads isolation settings, resolves cgroup
//! hierarchies and assembles the resource handler chain.

pub mod config;
pub mod report;

pub use config::{Config, ConfigSource, LogConfig};
pub use report::{ChainReport, MountReport};
