//! Resource handlers: per-dimension enforcement described as privileged operations

pub mod bandwidth;
pub mod disk;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::IsolationConfig;
use crate::privileged::PrivilegedOperation;
use crate::{HandlerError, Result};

pub use bandwidth::TrafficControlBandwidthHandler;
pub use disk::BlkioResourceHandler;

/// Identifier of a container, used as its cgroup name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id == "." || id == ".." || id.contains('/') {
            return Err(HandlerError::InvalidContainerId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = HandlerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

/// Resource dimension a handler enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    OutboundBandwidth,
    Disk,
    /// Several handlers applied in order
    Chain,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::OutboundBandwidth => write!(f, "outbound-bandwidth"),
            HandlerKind::Disk => write!(f, "disk"),
            HandlerKind::Chain => write!(f, "chain"),
        }
    }
}

/// Container lifecycle hooks for one resource dimension.
///
/// Hooks return the privileged operations the caller must run; handlers only
/// touch cgroup files they own.
pub trait ResourceHandler: Send + Sync + fmt::Debug {
    fn kind(&self) -> HandlerKind;

    /// Called once when the agent starts
    fn bootstrap(&self, config: &IsolationConfig) -> Result<Vec<PrivilegedOperation>>;

    /// Called before a container launches
    fn pre_start(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>>;

    /// Called for containers found running after an agent restart
    fn reacquire(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>>;

    /// Called after a container exits
    fn post_complete(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>>;

    /// Called once when the agent shuts down
    fn teardown(&self) -> Result<Vec<PrivilegedOperation>>;
}

/// Outbound bandwidth enforcement that also reports per-container usage
pub trait OutboundBandwidthHandler: ResourceHandler {
    /// Bytes sent per container, read through the privileged executor
    fn bytes_sent(&self) -> Result<BTreeMap<ContainerId, u64>>;

    fn into_resource_handler(self: Arc<Self>) -> Arc<dyn ResourceHandler>;
}
