//! cgisolate Core Library
//!
//! Coordination layer for per-container resource isolation on a node agent.
//! Discovers cgroup v1 hierarchies, lazily builds the shared resource
//! handlers and assembles them into an ordered enforcement chain.

pub mod cgroups;
pub mod chain;
pub mod config;
pub mod error;
pub mod handlers;
pub mod privileged;
pub mod registry;
pub mod traffic;

pub use cgroups::{resolve, CGroupsHandler, CgroupController, CgroupError, MountMapping};
pub use chain::{ChainBuilder, ResourceHandlerChain};
pub use config::IsolationConfig;
pub use error::{HandlerError, Result};
pub use handlers::{ContainerId, HandlerKind, OutboundBandwidthHandler, ResourceHandler};
pub use privileged::{OperationType, PrivilegedOperation, PrivilegedOperationExecutor};
pub use registry::{HandlerBackend, HandlerRegistry, LinuxBackend};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
