//! Disk I/O handler backed by the `blkio` controller

use std::sync::Arc;

use super::{ContainerId, HandlerKind, ResourceHandler};
use crate::cgroups::{CGroupsHandler, CgroupController};
use crate::config::IsolationConfig;
use crate::privileged::PrivilegedOperation;
use crate::Result;

const WEIGHT_PARAM: &str = "weight";

/// Gives every container a proportional blkio weight
#[derive(Debug)]
pub struct BlkioResourceHandler {
    cgroups: Arc<dyn CGroupsHandler>,
    weight: u32,
}

impl BlkioResourceHandler {
    pub fn new(cgroups: Arc<dyn CGroupsHandler>, config: &IsolationConfig) -> Self {
        Self {
            cgroups,
            weight: config.disk.weight,
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }
}

impl ResourceHandler for BlkioResourceHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Disk
    }

    fn bootstrap(&self, _config: &IsolationConfig) -> Result<Vec<PrivilegedOperation>> {
        self.cgroups.initialize_controller(CgroupController::Blkio)?;
        Ok(Vec::new())
    }

    fn pre_start(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        self.cgroups
            .create_cgroup(CgroupController::Blkio, container.as_str())?;
        self.cgroups.update_cgroup_param(
            CgroupController::Blkio,
            container.as_str(),
            WEIGHT_PARAM,
            &self.weight.to_string(),
        )?;
        Ok(Vec::new())
    }

    fn reacquire(&self, _container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }

    fn post_complete(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        self.cgroups
            .delete_cgroup(CgroupController::Blkio, container.as_str())?;
        Ok(Vec::new())
    }

    fn teardown(&self) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }
}
