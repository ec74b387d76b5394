//! Error types for cgroup operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Cgroup operation errors
#[derive(Debug, Error)]
pub enum CgroupError {
    /// The cgroup mount root itself could not be enumerated
    #[error("Cgroup mount path not listable: {path:?}: {source}")]
    PathNotListable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cgroup not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Controller not mounted: {0}")]
    ControllerNotMounted(String),

    #[error("Unknown cgroup controller: {0}")]
    InvalidController(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CgroupError>;
