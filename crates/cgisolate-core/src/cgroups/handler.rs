//! Shared handle over the agent's cgroup v1 hierarchies

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::controller::CgroupController;
use super::error::{CgroupError, Result};
use super::resolver::{self, MountMapping};
use super::utils::{read_cgroup_file, validate_cgroup_name, write_cgroup_file};
use crate::config::IsolationConfig;
use crate::privileged::{OperationType, PrivilegedOperation, PrivilegedOperationExecutor};

/// Cgroup hierarchy manager shared by every resource handler
pub trait CGroupsHandler: Send + Sync + Debug {
    /// Make sure the agent hierarchy exists under the controller's mount
    fn initialize_controller(&self, controller: CgroupController) -> Result<()>;

    /// Mount point serving `controller`, if any
    fn controller_path(&self, controller: CgroupController) -> Option<PathBuf>;

    /// Directory of cgroup `id` under the agent hierarchy
    fn path_for_cgroup(&self, controller: CgroupController, id: &str) -> Result<PathBuf>;

    fn create_cgroup(&self, controller: CgroupController, id: &str) -> Result<PathBuf>;

    fn delete_cgroup(&self, controller: CgroupController, id: &str) -> Result<()>;

    /// Write `<controller>.<param>` of cgroup `id`
    fn update_cgroup_param(
        &self,
        controller: CgroupController,
        id: &str,
        param: &str,
        value: &str,
    ) -> Result<()>;

    /// Read `<controller>.<param>` of cgroup `id`
    fn get_cgroup_param(&self, controller: CgroupController, id: &str, param: &str)
        -> Result<String>;

    /// Operation moving `pid` into cgroup `id`
    fn add_pid_operation(
        &self,
        controller: CgroupController,
        id: &str,
        pid: u32,
    ) -> Result<PrivilegedOperation>;
}

/// Filesystem-backed [`CGroupsHandler`]
#[derive(Debug)]
pub struct CgroupsHandlerImpl {
    hierarchy: String,
    controller_paths: BTreeMap<CgroupController, PathBuf>,
    executor: Arc<PrivilegedOperationExecutor>,
}

impl CgroupsHandlerImpl {
    /// Discover controller mounts.
    ///
    /// Uses `cgroups.mount_path` when configured, else the kernel mount table.
    pub fn new(config: &IsolationConfig, executor: Arc<PrivilegedOperationExecutor>) -> Result<Self> {
        let mapping = match &config.cgroups.mount_path {
            Some(mount_path) => resolver::resolve(mount_path)?,
            None => resolver::read_mounts(&config.cgroups.mounts_file)?,
        };

        let controller_paths = Self::controller_paths(&mapping);
        info!(
            "Discovered {} cgroup controllers across {} hierarchies",
            controller_paths.len(),
            mapping.len()
        );

        Ok(Self {
            hierarchy: config.cgroups.hierarchy.trim_matches('/').to_string(),
            controller_paths,
            executor,
        })
    }

    /// Invert a mount mapping; the first hierarchy serving a controller wins
    fn controller_paths(mapping: &MountMapping) -> BTreeMap<CgroupController, PathBuf> {
        let mut paths = BTreeMap::new();
        for (path, controllers) in mapping {
            for controller in controllers {
                paths.entry(*controller).or_insert_with(|| path.clone());
            }
        }
        paths
    }

    pub fn executor(&self) -> &Arc<PrivilegedOperationExecutor> {
        &self.executor
    }

    fn hierarchy_path(&self, controller: CgroupController) -> Result<PathBuf> {
        self.controller_paths
            .get(&controller)
            .map(|mount| mount.join(&self.hierarchy))
            .ok_or_else(|| CgroupError::ControllerNotMounted(controller.to_string()))
    }

    fn param_path(&self, controller: CgroupController, id: &str, param: &str) -> Result<PathBuf> {
        Ok(self
            .path_for_cgroup(controller, id)?
            .join(format!("{}.{}", controller, param)))
    }
}

impl CGroupsHandler for CgroupsHandlerImpl {
    fn initialize_controller(&self, controller: CgroupController) -> Result<()> {
        let path = self.hierarchy_path(controller)?;
        if !path.exists() {
            fs::create_dir_all(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    CgroupError::PermissionDenied(format!("{:?}", path))
                } else {
                    CgroupError::Io(e)
                }
            })?;
            info!("Created {} hierarchy {:?}", controller, path);
        }
        Ok(())
    }

    fn controller_path(&self, controller: CgroupController) -> Option<PathBuf> {
        self.controller_paths.get(&controller).cloned()
    }

    fn path_for_cgroup(&self, controller: CgroupController, id: &str) -> Result<PathBuf> {
        validate_cgroup_name(id)?;
        Ok(self.hierarchy_path(controller)?.join(id))
    }

    fn create_cgroup(&self, controller: CgroupController, id: &str) -> Result<PathBuf> {
        let path = self.path_for_cgroup(controller, id)?;
        if !path.exists() {
            fs::create_dir(&path)?;
            debug!("Created cgroup {:?}", path);
        }
        Ok(path)
    }

    fn delete_cgroup(&self, controller: CgroupController, id: &str) -> Result<()> {
        let path = self.path_for_cgroup(controller, id)?;
        match fs::remove_dir(&path) {
            Ok(()) => {
                debug!("Removed cgroup {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CgroupError::Io(e)),
        }
    }

    fn update_cgroup_param(
        &self,
        controller: CgroupController,
        id: &str,
        param: &str,
        value: &str,
    ) -> Result<()> {
        let path = self.param_path(controller, id, param)?;
        write_cgroup_file(&path, value)
    }

    fn get_cgroup_param(
        &self,
        controller: CgroupController,
        id: &str,
        param: &str,
    ) -> Result<String> {
        let path = self.param_path(controller, id, param)?;
        Ok(read_cgroup_file(&path)?.trim().to_string())
    }

    fn add_pid_operation(
        &self,
        controller: CgroupController,
        id: &str,
        pid: u32,
    ) -> Result<PrivilegedOperation> {
        let tasks = self.path_for_cgroup(controller, id)?.join("tasks");
        Ok(PrivilegedOperation::with_args(
            OperationType::AddPidToCgroup,
            [tasks.display().to_string(), pid.to_string()],
        ))
    }
}
