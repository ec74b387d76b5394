//! Utility functions for cgroup file access

use std::fs;
use std::path::Path;

use super::error::{CgroupError, Result};

/// Check a cgroup name is a single path component
pub fn validate_cgroup_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(CgroupError::NotFound(format!(
            "Invalid cgroup name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Safe read file to string
pub fn read_cgroup_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CgroupError::NotFound(format!("{:?}", path))
        } else if e.kind() == std::io::ErrorKind::PermissionDenied {
            CgroupError::PermissionDenied(format!("{:?}", path))
        } else {
            CgroupError::Io(e)
        }
    })
}

/// Safe write file
pub fn write_cgroup_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            CgroupError::PermissionDenied(format!("{:?}", path))
        } else {
            CgroupError::Io(e)
        }
    })
}
