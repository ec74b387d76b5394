//! Outbound bandwidth handler backed by tc classes and `net_cls`

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ContainerId, HandlerKind, OutboundBandwidthHandler, ResourceHandler};
use crate::cgroups::{CGroupsHandler, CgroupController};
use crate::config::IsolationConfig;
use crate::privileged::PrivilegedOperation;
use crate::traffic::{class_id_as_net_cls, class_id_from_net_cls, TrafficController};
use crate::{HandlerError, Result};

const CLASSID_PARAM: &str = "classid";

/// Gives each container its own htb class, tagged through `net_cls.classid`.
///
/// One instance serves both enforcement and usage metrics.
#[derive(Debug)]
pub struct TrafficControlBandwidthHandler {
    cgroups: Arc<dyn CGroupsHandler>,
    traffic: TrafficController,
    class_ids: Mutex<BTreeMap<ContainerId, u32>>,
}

impl TrafficControlBandwidthHandler {
    pub fn new(cgroups: Arc<dyn CGroupsHandler>, traffic: TrafficController) -> Self {
        Self {
            cgroups,
            traffic,
            class_ids: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn traffic_controller(&self) -> &TrafficController {
        &self.traffic
    }

    pub fn class_id(&self, container: &ContainerId) -> Option<u32> {
        self.class_ids.lock().get(container).copied()
    }

    fn tag_cgroup(&self, container: &ContainerId, class_id: u32) -> Result<()> {
        self.cgroups
            .create_cgroup(CgroupController::NetCls, container.as_str())?;
        self.cgroups.update_cgroup_param(
            CgroupController::NetCls,
            container.as_str(),
            CLASSID_PARAM,
            &class_id_as_net_cls(class_id),
        )?;
        Ok(())
    }
}

impl ResourceHandler for TrafficControlBandwidthHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::OutboundBandwidth
    }

    fn bootstrap(&self, _config: &IsolationConfig) -> Result<Vec<PrivilegedOperation>> {
        self.cgroups.initialize_controller(CgroupController::NetCls)?;
        Ok(vec![self.traffic.bootstrap_ops()])
    }

    fn pre_start(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        let mut class_ids = self.class_ids.lock();
        if let Some(class_id) = class_ids.get(container) {
            debug!("Container {} already uses tc class {}", container, class_id);
            return Ok(Vec::new());
        }

        let class_id = self.traffic.allocate_class_id()?;
        if let Err(e) = self.tag_cgroup(container, class_id) {
            self.traffic.release_class_id(class_id);
            return Err(e);
        }

        class_ids.insert(container.clone(), class_id);
        debug!("Container {} uses tc class {}", container, class_id);
        Ok(vec![self.traffic.class_ops(class_id)])
    }

    fn reacquire(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        let value = self.cgroups.get_cgroup_param(
            CgroupController::NetCls,
            container.as_str(),
            CLASSID_PARAM,
        )?;
        let class_id = class_id_from_net_cls(&value).ok_or_else(|| {
            HandlerError::TrafficControl(format!(
                "Container {} has foreign net_cls.classid {:?}",
                container, value
            ))
        })?;

        self.traffic.reserve_class_id(class_id)?;
        self.class_ids.lock().insert(container.clone(), class_id);
        Ok(Vec::new())
    }

    fn post_complete(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        // The class goes away even when the cgroup lingers, or its id would leak
        if let Err(e) = self
            .cgroups
            .delete_cgroup(CgroupController::NetCls, container.as_str())
        {
            warn!("Failed to delete net_cls cgroup of {}: {}", container, e);
        }

        match self.class_ids.lock().remove(container) {
            Some(class_id) => {
                self.traffic.release_class_id(class_id);
                Ok(vec![self.traffic.delete_class_ops(class_id)])
            }
            None => {
                warn!("No tc class recorded for container {}", container);
                Ok(Vec::new())
            }
        }
    }

    fn teardown(&self) -> Result<Vec<PrivilegedOperation>> {
        Ok(Vec::new())
    }
}

impl OutboundBandwidthHandler for TrafficControlBandwidthHandler {
    fn bytes_sent(&self) -> Result<BTreeMap<ContainerId, u64>> {
        let stats = self.traffic.read_stats()?;
        Ok(self
            .class_ids
            .lock()
            .iter()
            .filter_map(|(container, class_id)| {
                stats.get(class_id).map(|bytes| (container.clone(), *bytes))
            })
            .collect())
    }

    fn into_resource_handler(self: Arc<Self>) -> Arc<dyn ResourceHandler> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::CgroupsHandlerImpl;
    use crate::privileged::{OperationType, PrivilegedOperationExecutor};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn handler_with(config: &IsolationConfig) -> TrafficControlBandwidthHandler {
        let executor = Arc::new(PrivilegedOperationExecutor::new(config).unwrap());
        let cgroups = Arc::new(CgroupsHandlerImpl::new(config, executor.clone()).unwrap());
        TrafficControlBandwidthHandler::new(cgroups, TrafficController::new(config, executor))
    }

    fn handler_for(root: &Path) -> TrafficControlBandwidthHandler {
        handler_with(&IsolationConfig::default().with_mount_path(root))
    }

    fn setup() -> (tempfile::TempDir, TrafficControlBandwidthHandler) {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("net_cls")).unwrap();
        let handler = handler_for(root.path());
        handler.bootstrap(&IsolationConfig::default()).unwrap();
        (root, handler)
    }

    #[test]
    fn test_bootstrap_initializes_net_cls() {
        let (root, handler) = setup();
        assert!(root.path().join("net_cls/cgisolate").is_dir());

        let ops = handler.bootstrap(&IsolationConfig::default()).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type, OperationType::TrafficControlBootstrap);
    }

    #[test]
    fn test_bootstrap_without_net_cls_fails() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("blkio")).unwrap();
        let handler = handler_for(root.path());

        assert!(handler.bootstrap(&IsolationConfig::default()).is_err());
    }

    #[test]
    fn test_pre_start_tags_cgroup() {
        let (root, handler) = setup();
        let container = ContainerId::new("container_01").unwrap();

        let ops = handler.pre_start(&container).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].args[0].contains("classid 42:3"));
        assert_eq!(handler.class_id(&container), Some(3));

        let classid =
            fs::read_to_string(root.path().join("net_cls/cgisolate/container_01/net_cls.classid"))
                .unwrap();
        assert_eq!(classid, "0x00420003");
    }

    #[test]
    fn test_post_complete_frees_class() {
        let (root, handler) = setup();
        let first = ContainerId::new("container_01").unwrap();
        let second = ContainerId::new("container_02").unwrap();

        handler.pre_start(&first).unwrap();
        let cgroup_dir = root.path().join("net_cls/cgisolate/container_01");
        // A real cgroupfs drops its control files with the directory
        fs::remove_file(cgroup_dir.join("net_cls.classid")).unwrap();

        let ops = handler.post_complete(&first).unwrap();
        assert_eq!(ops[0].args, vec!["class del dev eth0 classid 42:3"]);
        assert!(!cgroup_dir.exists());
        assert_eq!(handler.class_id(&first), None);

        handler.pre_start(&second).unwrap();
        assert_eq!(handler.class_id(&second), Some(3));
    }

    #[test]
    fn test_reacquire_reserves_class() {
        let (root, handler) = setup();
        let container = ContainerId::new("container_07").unwrap();
        let dir = root.path().join("net_cls/cgisolate/container_07");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("net_cls.classid"), "4325379\n").unwrap();

        assert!(handler.reacquire(&container).unwrap().is_empty());
        assert_eq!(handler.class_id(&container), Some(3));

        let other = ContainerId::new("container_08").unwrap();
        handler.pre_start(&other).unwrap();
        assert_eq!(handler.class_id(&other), Some(4));
    }

    #[test]
    fn test_reacquire_foreign_classid() {
        let (root, handler) = setup();
        let container = ContainerId::new("container_07").unwrap();
        let dir = root.path().join("net_cls/cgisolate/container_07");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("net_cls.classid"), "0\n").unwrap();

        assert!(matches!(
            handler.reacquire(&container),
            Err(HandlerError::TrafficControl(_))
        ));
    }

    #[test]
    fn test_post_complete_with_busy_cgroup_frees_class() {
        let (root, handler) = setup();
        let first = ContainerId::new("container_01").unwrap();
        let second = ContainerId::new("container_02").unwrap();

        handler.pre_start(&first).unwrap();
        // Left-over control file keeps rmdir failing, like tasks still attached
        let cgroup_dir = root.path().join("net_cls/cgisolate/container_01");

        let ops = handler.post_complete(&first).unwrap();
        assert_eq!(ops[0].args, vec!["class del dev eth0 classid 42:3"]);
        assert!(cgroup_dir.exists());
        assert_eq!(handler.class_id(&first), None);

        handler.pre_start(&second).unwrap();
        assert_eq!(handler.class_id(&second), Some(3));
    }

    #[test]
    fn test_repeated_pre_start_keeps_class() {
        let (root, handler) = setup();
        let first = ContainerId::new("container_01").unwrap();
        let second = ContainerId::new("container_02").unwrap();

        assert_eq!(handler.pre_start(&first).unwrap().len(), 1);
        assert!(handler.pre_start(&first).unwrap().is_empty());
        assert_eq!(handler.class_id(&first), Some(3));

        fs::remove_file(root.path().join("net_cls/cgisolate/container_01/net_cls.classid"))
            .unwrap();
        handler.post_complete(&first).unwrap();

        handler.pre_start(&second).unwrap();
        assert_eq!(handler.class_id(&second), Some(3));
    }

    #[test]
    fn test_bytes_sent_by_container() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("net_cls")).unwrap();
        let helper = root.path().join("container-executor");
        fs::write(
            &helper,
            "#!/bin/sh\n\
             [ \"$1\" = --tc-read-stats ] || exit 1\n\
             echo 'class htb 42:3 parent 42:1 prio 0 rate 50Mbit ceil 1000Mbit'\n\
             echo ' Sent 2048 bytes 4 pkt (dropped 0, overlimits 0 requeues 0)'\n\
             echo 'class htb 42:4 parent 42:1 prio 0 rate 50Mbit ceil 1000Mbit'\n\
             echo ' Sent 77 bytes 1 pkt (dropped 0, overlimits 0 requeues 0)'\n",
        )
        .unwrap();
        fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = IsolationConfig::default().with_mount_path(root.path());
        config.executor.path = Some(helper);
        let handler = handler_with(&config);
        handler.bootstrap(&config).unwrap();

        let container = ContainerId::new("container_01").unwrap();
        handler.pre_start(&container).unwrap();

        let sent = handler.bytes_sent().unwrap();
        assert_eq!(sent.get(&container), Some(&2048));
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_bytes_sent_reports_helper_failure() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("net_cls")).unwrap();
        let helper = root.path().join("container-executor");
        fs::write(&helper, "#!/bin/sh\necho 'tc: no such device' >&2\nexit 2\n").unwrap();
        fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = IsolationConfig::default().with_mount_path(root.path());
        config.executor.path = Some(helper);
        let handler = handler_with(&config);

        let err = handler.bytes_sent().unwrap_err();
        assert!(matches!(err, HandlerError::PrivilegedOperation(_)));
        assert!(err.to_string().contains("no such device"));
    }
}
