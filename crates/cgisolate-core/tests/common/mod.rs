// Fake collaborators shared by the integration tests

#![allow(dead_code)]

use cgisolate_core::cgroups::Result as CgroupResult;
use cgisolate_core::{
    CGroupsHandler, CgroupController, ContainerId, HandlerBackend, HandlerError, HandlerKind,
    IsolationConfig, OutboundBandwidthHandler, PrivilegedOperation, ResourceHandler, Result,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Counters {
    pub cgroups_created: AtomicUsize,
    pub bandwidth_created: AtomicUsize,
    pub disk_created: AtomicUsize,
    /// Number of upcoming cgroups constructions that fail
    pub cgroups_failures: AtomicUsize,
}

impl Counters {
    pub fn cgroups(&self) -> usize {
        self.cgroups_created.load(Ordering::SeqCst)
    }

    pub fn bandwidth(&self) -> usize {
        self.bandwidth_created.load(Ordering::SeqCst)
    }

    pub fn disk(&self) -> usize {
        self.disk_created.load(Ordering::SeqCst)
    }
}

/// Backend counting every construction, optionally slow or failing
#[derive(Debug)]
pub struct CountingBackend {
    pub counters: Arc<Counters>,
    pub delay: Duration,
}

impl CountingBackend {
    pub fn new() -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            Self {
                counters: counters.clone(),
                delay: Duration::ZERO,
            },
            counters,
        )
    }

    pub fn slow(delay: Duration) -> (Self, Arc<Counters>) {
        let (mut backend, counters) = Self::new();
        backend.delay = delay;
        (backend, counters)
    }
}

impl HandlerBackend for CountingBackend {
    fn create_cgroups_handler(&self, _config: &IsolationConfig) -> Result<Arc<dyn CGroupsHandler>> {
        thread::sleep(self.delay);

        let failing = self
            .counters
            .cgroups_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HandlerError::Construction("cgroups handler: injected".to_string()));
        }

        self.counters.cgroups_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeCgroups))
    }

    fn create_bandwidth_handler(
        &self,
        _config: &IsolationConfig,
        cgroups: Arc<dyn CGroupsHandler>,
    ) -> Result<Arc<dyn OutboundBandwidthHandler>> {
        thread::sleep(self.delay);
        self.counters.bandwidth_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeHandler {
            kind: HandlerKind::OutboundBandwidth,
            cgroups,
        }))
    }

    fn create_disk_handler(
        &self,
        _config: &IsolationConfig,
        cgroups: Arc<dyn CGroupsHandler>,
    ) -> Result<Arc<dyn ResourceHandler>> {
        thread::sleep(self.delay);
        self.counters.disk_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeHandler {
            kind: HandlerKind::Disk,
            cgroups,
        }))
    }
}

#[derive(Debug)]
pub struct FakeCgroups;

impl CGroupsHandler for FakeCgroups {
    fn initialize_controller(&self, _controller: CgroupController) -> CgroupResult<()> {
        Ok(())
    }

    fn controller_path(&self, controller: CgroupController) -> Option<PathBuf> {
        Some(PathBuf::from("/fake").join(controller.name()))
    }

    fn path_for_cgroup(&self, controller: CgroupController, id: &str) -> CgroupResult<PathBuf> {
        Ok(PathBuf::from("/fake").join(controller.name()).join(id))
    }

    fn create_cgroup(&self, controller: CgroupController, id: &str) -> CgroupResult<PathBuf> {
        self.path_for_cgroup(controller, id)
    }

    fn delete_cgroup(&self, _controller: CgroupController, _id: &str) -> CgroupResult<()> {
        Ok(())
    }

    fn update_cgroup_param(
        &self,
        _controller: CgroupController,
        _id: &str,
        _param: &str,
        _value: &str,
    ) -> CgroupResult<()> {
        Ok(())
    }

    fn get_cgroup_param(
        &self,
        _controller: CgroupController,
        _id: &str,
        _param: &str,
    ) -> CgroupResult<String> {
        Ok(String::new())
    }

    fn add_pid_operation(
        &self,
        _controller: CgroupController,
        _id: &str,
        _pid: u32,
    ) -> CgroupResult<PrivilegedOperation> {
        Ok(PrivilegedOperation::new(
            cgisolate_core::OperationType::AddPidToCgroup,
        ))
    }
}

#[derive(Debug)]
pub struct FakeHandler {
    pub kind: HandlerKind,
    pub cgroups: Arc<dyn CGroupsHandler>,
}

impl ResourceHandler for FakeHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn bootstrap(&self, _config: &IsolationConfig) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }

    fn pre_start(&self, _container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }

    fn reacquire(&self, _container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }

    fn post_complete(&self, _container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }

    fn teardown(&self) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }
}

impl OutboundBandwidthHandler for FakeHandler {
    fn bytes_sent(&self) -> Result<BTreeMap<ContainerId, u64>> {
        Ok(BTreeMap::new())
    }

    fn into_resource_handler(self: Arc<Self>) -> Arc<dyn ResourceHandler> {
        self
    }
}

pub fn config(network: bool, disk: bool) -> IsolationConfig {
    IsolationConfig::default()
        .with_network_enabled(network)
        .with_disk_enabled(disk)
}

/// Same allocation, regardless of the trait object it is viewed through
pub fn same_object<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
