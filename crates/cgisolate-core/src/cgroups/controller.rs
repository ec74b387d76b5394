//! Known cgroup v1 controllers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::CgroupError;

/// Cgroup v1 subsystems the agent knows how to interpret.
///
/// `Display` yields the kernel's subsystem name, which is also the directory
/// name used when a hierarchy is mounted for that controller alone
/// (e.g. `CgroupController::NetCls` => `net_cls`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CgroupController {
    Cpu,
    Cpuacct,
    Cpuset,
    Memory,
    Blkio,
    NetCls,
    Devices,
    Freezer,
}

impl CgroupController {
    pub const ALL: [CgroupController; 8] = [
        CgroupController::Cpu,
        CgroupController::Cpuacct,
        CgroupController::Cpuset,
        CgroupController::Memory,
        CgroupController::Blkio,
        CgroupController::NetCls,
        CgroupController::Devices,
        CgroupController::Freezer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CgroupController::Cpu => "cpu",
            CgroupController::Cpuacct => "cpuacct",
            CgroupController::Cpuset => "cpuset",
            CgroupController::Memory => "memory",
            CgroupController::Blkio => "blkio",
            CgroupController::NetCls => "net_cls",
            CgroupController::Devices => "devices",
            CgroupController::Freezer => "freezer",
        }
    }

    /// Membership test against the valid controller set
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn valid_names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(CgroupController::name)
    }
}

impl fmt::Display for CgroupController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CgroupController {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| CgroupError::InvalidController(s.to_string()))
    }
}
