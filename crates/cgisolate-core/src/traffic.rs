//! Outbound traffic shaping with an htb qdisc and the `net_cls` cgroup filter
//!
//! Layout on the shaped device:
//! ```text
//! 42:      htb root qdisc, unclassified traffic goes to 42:2
//! 42:1     root class, capped at root_rate
//! 42:2     default class for host traffic
//! 42:3..   one class per container, matched by net_cls.classid
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::IsolationConfig;
use crate::privileged::{OperationType, PrivilegedOperation, PrivilegedOperationExecutor};
use crate::{HandlerError, Result};

pub const ROOT_QDISC_HANDLE: u32 = 0x42;
pub const ROOT_CLASS_ID: u32 = 1;
pub const DEFAULT_CLASS_ID: u32 = 2;
pub const MIN_CONTAINER_CLASS_ID: u32 = 3;
pub const MAX_CONTAINER_CLASS_ID: u32 = 1023;

/// Programs tc state for container bandwidth classes
#[derive(Debug)]
pub struct TrafficController {
    device: String,
    root_rate_mbit: u32,
    container_rate_mbit: u32,
    executor: Arc<PrivilegedOperationExecutor>,
    used_class_ids: Mutex<BTreeSet<u32>>,
}

impl TrafficController {
    pub fn new(config: &IsolationConfig, executor: Arc<PrivilegedOperationExecutor>) -> Self {
        Self {
            device: config.network.device.clone(),
            root_rate_mbit: config.network.root_rate_mbit,
            container_rate_mbit: config.network.container_rate_mbit,
            executor,
            used_class_ids: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Operations installing the root qdisc, root/default classes and filter
    pub fn bootstrap_ops(&self) -> PrivilegedOperation {
        let dev = &self.device;
        let root = self.root_rate_mbit;
        PrivilegedOperation::with_args(
            OperationType::TrafficControlBootstrap,
            [
                format!(
                    "qdisc replace dev {} root handle {:x}: htb default {:x}",
                    dev, ROOT_QDISC_HANDLE, DEFAULT_CLASS_ID
                ),
                format!(
                    "class replace dev {} parent {:x}: classid {} htb rate {}mbit ceil {}mbit",
                    dev,
                    ROOT_QDISC_HANDLE,
                    tc_class_handle(ROOT_CLASS_ID),
                    root,
                    root
                ),
                format!(
                    "class replace dev {} parent {} classid {} htb rate {}mbit ceil {}mbit",
                    dev,
                    tc_class_handle(ROOT_CLASS_ID),
                    tc_class_handle(DEFAULT_CLASS_ID),
                    self.container_rate_mbit,
                    root
                ),
                format!(
                    "filter replace dev {} parent {:x}: protocol ip prio 10 handle 1: cgroup",
                    dev, ROOT_QDISC_HANDLE
                ),
            ],
        )
    }

    /// Reserve the lowest free container class id
    pub fn allocate_class_id(&self) -> Result<u32> {
        let mut used = self.used_class_ids.lock();
        let id = (MIN_CONTAINER_CLASS_ID..=MAX_CONTAINER_CLASS_ID)
            .find(|id| !used.contains(id))
            .ok_or_else(|| {
                HandlerError::TrafficControl(format!(
                    "All {} container classes in use",
                    MAX_CONTAINER_CLASS_ID - MIN_CONTAINER_CLASS_ID + 1
                ))
            })?;
        used.insert(id);
        debug!("Allocated tc class {}", tc_class_handle(id));
        Ok(id)
    }

    /// Mark an id found on a recovered container as taken
    pub fn reserve_class_id(&self, id: u32) -> Result<()> {
        if !(MIN_CONTAINER_CLASS_ID..=MAX_CONTAINER_CLASS_ID).contains(&id) {
            return Err(HandlerError::TrafficControl(format!(
                "Class id {} outside container range",
                id
            )));
        }
        self.used_class_ids.lock().insert(id);
        Ok(())
    }

    pub fn release_class_id(&self, id: u32) {
        self.used_class_ids.lock().remove(&id);
    }

    pub fn class_ops(&self, id: u32) -> PrivilegedOperation {
        PrivilegedOperation::with_args(
            OperationType::TrafficControlModifyState,
            [format!(
                "class add dev {} parent {} classid {} htb rate {}mbit ceil {}mbit",
                self.device,
                tc_class_handle(ROOT_CLASS_ID),
                tc_class_handle(id),
                self.container_rate_mbit,
                self.root_rate_mbit
            )],
        )
    }

    pub fn delete_class_ops(&self, id: u32) -> PrivilegedOperation {
        PrivilegedOperation::with_args(
            OperationType::TrafficControlModifyState,
            [format!(
                "class del dev {} classid {}",
                self.device,
                tc_class_handle(id)
            )],
        )
    }

    pub fn read_stats_op(&self) -> PrivilegedOperation {
        PrivilegedOperation::with_args(
            OperationType::TrafficControlReadStats,
            [format!("class show dev {}", self.device)],
        )
    }

    /// Run the stats query and parse bytes sent per class id
    pub fn read_stats(&self) -> Result<BTreeMap<u32, u64>> {
        let output = self.executor.execute(&self.read_stats_op())?;
        Ok(parse_class_stats(&output))
    }
}

/// tc handle of a class under the root qdisc, e.g. `42:3`
pub fn tc_class_handle(id: u32) -> String {
    format!("{:x}:{:x}", ROOT_QDISC_HANDLE, id)
}

/// Value written to `net_cls.classid`, e.g. `0x00420003`
pub fn class_id_as_net_cls(id: u32) -> String {
    format!("{:#010x}", (ROOT_QDISC_HANDLE << 16) | id)
}

/// Recover a class id from `net_cls.classid`, which the kernel reports in decimal
pub fn class_id_from_net_cls(value: &str) -> Option<u32> {
    let value = value.trim();
    let raw = match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => value.parse::<u32>().ok()?,
    };
    if raw >> 16 != ROOT_QDISC_HANDLE {
        return None;
    }
    Some(raw & 0xffff)
}

/// Parse `tc -s class show` output into bytes sent per class under the root qdisc
///
/// Format:
/// ```text
/// class htb 42:3 parent 42:1 prio 0 rate 50Mbit ceil 1000Mbit burst 1600b cburst 1375b
///  Sent 5000 bytes 10 pkt (dropped 0, overlimits 0 requeues 0)
/// ```
pub fn parse_class_stats(content: &str) -> BTreeMap<u32, u64> {
    let prefix = format!("{:x}:", ROOT_QDISC_HANDLE);
    let mut stats = BTreeMap::new();
    let mut current: Option<u32> = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("class") => {
                current = parts
                    .nth(1)
                    .and_then(|handle| handle.strip_prefix(prefix.as_str()))
                    .and_then(|minor| u32::from_str_radix(minor, 16).ok());
            }
            Some("Sent") => {
                if let (Some(id), Some(bytes)) =
                    (current, parts.next().and_then(|b| b.parse::<u64>().ok()))
                {
                    stats.insert(id, bytes);
                }
            }
            _ => {}
        }
    }

    stats
}
