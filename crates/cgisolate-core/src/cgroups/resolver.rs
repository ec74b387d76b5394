//! Discovery of cgroup v1 hierarchies under a mount root
//!
//! A co-mounted v1 hierarchy is conventionally named after the subsystems it
//! serves, joined by commas: `/sys/fs/cgroup/cpu,cpuacct` serves both `cpu`
//! and `cpuacct`. [`resolve`] scans a mount root for such directories so the
//! agent works with whatever layout the administrator chose.
//!
//! Two-tier error policy:
//! - the mount root cannot be listed => [`CgroupError::PathNotListable`]
//! - a single entry is malformed, not a directory or not writable => skipped

use nix::unistd::{access, AccessFlags};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::controller::CgroupController;
use super::error::{CgroupError, Result};

/// Hierarchy directory => controllers it serves, in directory-name order
pub type MountMapping = BTreeMap<PathBuf, Vec<CgroupController>>;

/// Default location of the kernel mount table
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Resolve the usable cgroup hierarchies directly under `mount_path`.
pub fn resolve(mount_path: impl AsRef<Path>) -> Result<MountMapping> {
    let mount_path = absolute(mount_path.as_ref())?;

    let entries = fs::read_dir(&mount_path).map_err(|source| CgroupError::PathNotListable {
        path: mount_path.clone(),
        source,
    })?;

    let mut mapping = MountMapping::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {:?}: {}", mount_path, e);
                continue;
            }
        };

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        let controllers = parse_controller_list(name);
        if controllers.is_empty() {
            continue;
        }

        let candidate = mount_path.join(name);
        if !candidate.is_dir() || !is_writable(&candidate) {
            debug!("Skipping unusable cgroup hierarchy {:?}", candidate);
            continue;
        }

        mapping.insert(candidate, controllers);
    }

    Ok(mapping)
}

/// Split a comma-joined name into the known controllers it lists.
///
/// Token order is kept, unknown tokens and repeats are dropped.
pub fn parse_controller_list(name: &str) -> Vec<CgroupController> {
    let mut controllers = Vec::new();
    for controller in name.split(',').filter_map(CgroupController::from_name) {
        if !controllers.contains(&controller) {
            controllers.push(controller);
        }
    }
    controllers
}

/// Parse `/proc/mounts` content into the same mapping shape as [`resolve`].
///
/// Format (one mount per line):
/// ```text
/// cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
/// ```
/// Only `cgroup` (v1) filesystems are considered; controllers come from the
/// mount options, not the mount point name.
pub fn parse_mounts(content: &str) -> MountMapping {
    let mut mapping = MountMapping::new();

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[2] != "cgroup" {
            continue;
        }

        let controllers = parse_controller_list(fields[3]);
        if controllers.is_empty() {
            continue;
        }

        mapping.insert(PathBuf::from(unescape_mount_path(fields[1])), controllers);
    }

    mapping
}

/// Read and parse a mounts file
pub fn read_mounts(path: impl AsRef<Path>) -> Result<MountMapping> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CgroupError::NotFound(format!("{:?}", path)),
        std::io::ErrorKind::PermissionDenied => {
            CgroupError::PermissionDenied(format!("{:?}", path))
        }
        _ => CgroupError::Io(e),
    })?;
    Ok(parse_mounts(&content))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| CgroupError::PathNotListable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}

fn is_writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK).is_ok()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`
fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
