use thiserror::Error;

use crate::cgroups::CgroupError;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Construction error: {0}")]
    Construction(String),

    #[error("Cgroup error: {0}")]
    Cgroup(#[from] CgroupError),

    #[error("Privileged operation failed: {0}")]
    PrivilegedOperation(String),

    #[error("Traffic control error: {0}")]
    TrafficControl(String),

    #[error("Invalid container id: {0:?}")]
    InvalidContainerId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    /// Wrap a collaborator failure as a construction error for `component`
    pub fn construction(component: &str, cause: impl std::fmt::Display) -> Self {
        HandlerError::Construction(format!("{}: {}", component, cause))
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;
