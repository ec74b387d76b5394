//! Isolation settings consumed by the handler registry

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cgroups::resolver::PROC_MOUNTS;

/// Resource isolation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Outbound network bandwidth enforcement
    #[serde(default)]
    pub network: NetworkConfig,

    /// Disk (block I/O) enforcement
    #[serde(default)]
    pub disk: DiskConfig,

    /// Cgroup hierarchy discovery
    #[serde(default)]
    pub cgroups: CgroupsConfig,

    /// Privileged operation backend
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Outbound bandwidth settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Enable network resource enforcement (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Interface to shape (default: eth0)
    #[serde(default = "default_device")]
    pub device: String,

    /// Total outbound bandwidth available to containers, in mbit (default: 1000)
    #[serde(default = "default_root_rate")]
    pub root_rate_mbit: u32,

    /// Bandwidth guaranteed per container, in mbit (default: 50)
    #[serde(default = "default_container_rate")]
    pub container_rate_mbit: u32,
}

/// Block I/O settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Enable disk resource enforcement (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// blkio.weight given to each container, 10-1000 (default: 500)
    #[serde(default = "default_blkio_weight")]
    pub weight: u32,
}

/// Cgroup layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgroupsConfig {
    /// Root under which hierarchies are named `controller[,controller...]`.
    /// When unset, hierarchies are read from `mounts_file`.
    #[serde(default)]
    pub mount_path: Option<PathBuf>,

    /// Agent-owned hierarchy below each controller mount (default: cgisolate)
    #[serde(default = "default_hierarchy")]
    pub hierarchy: String,

    /// Kernel mount table (default: /proc/mounts)
    #[serde(default = "default_mounts_file")]
    pub mounts_file: PathBuf,
}

/// Privileged executor settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Setuid helper used for privileged operations.
    /// When unset, operations run as plain commands.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_device() -> String {
    "eth0".to_string()
}

fn default_root_rate() -> u32 {
    1000
}

fn default_container_rate() -> u32 {
    50
}

fn default_blkio_weight() -> u32 {
    500
}

fn default_hierarchy() -> String {
    "cgisolate".to_string()
}

fn default_mounts_file() -> PathBuf {
    PathBuf::from(PROC_MOUNTS)
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: default_device(),
            root_rate_mbit: default_root_rate(),
            container_rate_mbit: default_container_rate(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: default_blkio_weight(),
        }
    }
}

impl Default for CgroupsConfig {
    fn default() -> Self {
        Self {
            mount_path: None,
            hierarchy: default_hierarchy(),
            mounts_file: default_mounts_file(),
        }
    }
}

impl IsolationConfig {
    pub fn with_network_enabled(mut self, enabled: bool) -> Self {
        self.network.enabled = enabled;
        self
    }

    pub fn with_disk_enabled(mut self, enabled: bool) -> Self {
        self.disk.enabled = enabled;
        self
    }

    pub fn with_mount_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cgroups.mount_path = Some(path.into());
        self
    }

    /// Validate values are reasonable
    pub fn validate(&self) -> Result<(), String> {
        if self.network.device.trim().is_empty() {
            return Err("Network device must not be empty".to_string());
        }

        if self.network.root_rate_mbit == 0 {
            return Err("Network root rate must be > 0".to_string());
        }

        if self.network.container_rate_mbit == 0
            || self.network.container_rate_mbit > self.network.root_rate_mbit
        {
            return Err(format!(
                "Network container rate must be 1-{} mbit, got: {}",
                self.network.root_rate_mbit, self.network.container_rate_mbit
            ));
        }

        if !(10..=1000).contains(&self.disk.weight) {
            return Err(format!(
                "Disk weight must be 10-1000, got: {}",
                self.disk.weight
            ));
        }

        let hierarchy = self.cgroups.hierarchy.trim_matches('/');
        if hierarchy.is_empty() || hierarchy.contains("..") {
            return Err(format!(
                "Cgroup hierarchy must be a relative name, got: {:?}",
                self.cgroups.hierarchy
            ));
        }

        Ok(())
    }
}
