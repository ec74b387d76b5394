//! Lazily constructed, shared resource handlers
//!
//! Each handler kind lives in its own once-only cell. The first successful
//! construction is published to every thread and reused for the lifetime of
//! the registry, whatever configuration later callers pass. Disabled kinds
//! are answered with `Ok(None)` on every call and never cached; failed
//! constructions are not cached either, so the next call tries again.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cgroups::{CGroupsHandler, CgroupsHandlerImpl};
use crate::config::IsolationConfig;
use crate::handlers::{
    BlkioResourceHandler, OutboundBandwidthHandler, ResourceHandler,
    TrafficControlBandwidthHandler,
};
use crate::privileged::PrivilegedOperationExecutor;
use crate::traffic::TrafficController;
use crate::{HandlerError, Result};

/// Constructs the collaborators the registry hands out
pub trait HandlerBackend: Send + Sync {
    fn create_cgroups_handler(&self, config: &IsolationConfig) -> Result<Arc<dyn CGroupsHandler>>;

    fn create_bandwidth_handler(
        &self,
        config: &IsolationConfig,
        cgroups: Arc<dyn CGroupsHandler>,
    ) -> Result<Arc<dyn OutboundBandwidthHandler>>;

    fn create_disk_handler(
        &self,
        config: &IsolationConfig,
        cgroups: Arc<dyn CGroupsHandler>,
    ) -> Result<Arc<dyn ResourceHandler>>;
}

/// Production backend: cgroupfs, tc and the privileged executor
#[derive(Debug, Default)]
pub struct LinuxBackend {
    executor: OnceCell<Arc<PrivilegedOperationExecutor>>,
}

impl LinuxBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared privileged executor, created on first use
    pub fn executor(&self, config: &IsolationConfig) -> Result<Arc<PrivilegedOperationExecutor>> {
        self.executor
            .get_or_try_init(|| PrivilegedOperationExecutor::new(config).map(Arc::new))
            .map(Arc::clone)
    }
}

impl HandlerBackend for LinuxBackend {
    fn create_cgroups_handler(&self, config: &IsolationConfig) -> Result<Arc<dyn CGroupsHandler>> {
        let executor = self.executor(config)?;
        let handler = CgroupsHandlerImpl::new(config, executor)
            .map_err(|e| HandlerError::construction("cgroups handler", e))?;
        Ok(Arc::new(handler))
    }

    fn create_bandwidth_handler(
        &self,
        config: &IsolationConfig,
        cgroups: Arc<dyn CGroupsHandler>,
    ) -> Result<Arc<dyn OutboundBandwidthHandler>> {
        let executor = self.executor(config)?;
        let traffic = TrafficController::new(config, executor);
        Ok(Arc::new(TrafficControlBandwidthHandler::new(cgroups, traffic)))
    }

    fn create_disk_handler(
        &self,
        config: &IsolationConfig,
        cgroups: Arc<dyn CGroupsHandler>,
    ) -> Result<Arc<dyn ResourceHandler>> {
        Ok(Arc::new(BlkioResourceHandler::new(cgroups, config)))
    }
}

/// Holder of the shared handler instances
pub struct HandlerRegistry {
    backend: Box<dyn HandlerBackend>,
    cgroups: OnceCell<Arc<dyn CGroupsHandler>>,
    bandwidth: OnceCell<Arc<dyn OutboundBandwidthHandler>>,
    disk: OnceCell<Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new(backend: impl HandlerBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cgroups: OnceCell::new(),
            bandwidth: OnceCell::new(),
            disk: OnceCell::new(),
        }
    }

    /// Registry backed by [`LinuxBackend`]
    pub fn linux() -> Self {
        Self::new(LinuxBackend::new())
    }

    /// Shared cgroup hierarchy handle
    pub fn cgroups_handler(&self, config: &IsolationConfig) -> Result<Arc<dyn CGroupsHandler>> {
        self.cgroups
            .get_or_try_init(|| {
                let handler = self
                    .backend
                    .create_cgroups_handler(config)
                    .map_err(|e| log_failure("cgroups handler", e))?;
                info!("Cgroups handler initialized");
                Ok::<_, HandlerError>(handler)
            })
            .map(Arc::clone)
    }

    /// Bandwidth handler seen through its metrics interface.
    ///
    /// Same instance as [`Self::outbound_bandwidth_handler`].
    pub fn traffic_control_bandwidth_handler(
        &self,
        config: &IsolationConfig,
    ) -> Result<Option<Arc<dyn OutboundBandwidthHandler>>> {
        if !config.network.enabled {
            return Ok(None);
        }

        let handler = self.bandwidth.get_or_try_init(|| {
            let cgroups = self.cgroups_handler(config)?;
            let handler = self
                .backend
                .create_bandwidth_handler(config, cgroups)
                .map_err(|e| log_failure("outbound bandwidth handler", e))?;
            info!("Outbound bandwidth handler initialized");
            Ok::<_, HandlerError>(handler)
        })?;

        Ok(Some(Arc::clone(handler)))
    }

    /// Outbound bandwidth handler, or `None` when network enforcement is off
    pub fn outbound_bandwidth_handler(
        &self,
        config: &IsolationConfig,
    ) -> Result<Option<Arc<dyn ResourceHandler>>> {
        Ok(self
            .traffic_control_bandwidth_handler(config)?
            .map(|handler| handler.into_resource_handler()))
    }

    /// Disk handler, or `None` when disk enforcement is off
    pub fn disk_handler(&self, config: &IsolationConfig) -> Result<Option<Arc<dyn ResourceHandler>>> {
        if !config.disk.enabled {
            return Ok(None);
        }

        let handler = self.disk.get_or_try_init(|| {
            let cgroups = self.cgroups_handler(config)?;
            let handler = self
                .backend
                .create_disk_handler(config, cgroups)
                .map_err(|e| log_failure("disk handler", e))?;
            info!("Disk handler initialized");
            Ok::<_, HandlerError>(handler)
        })?;

        Ok(Some(Arc::clone(handler)))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("cgroups", &self.cgroups.get().is_some())
            .field("bandwidth", &self.bandwidth.get().is_some())
            .field("disk", &self.disk.get().is_some())
            .finish_non_exhaustive()
    }
}

fn log_failure(component: &str, err: HandlerError) -> HandlerError {
    warn!("Failed to construct {}: {}", component, err);
    err
}
