//! Cgroup v1 integration module
//!
//! Discovers controller hierarchies under a mount root and provides the
//! shared hierarchy handle every resource handler works through.

pub mod controller;
pub mod error;
pub mod handler;
pub mod resolver;
mod utils;

pub use controller::CgroupController;
pub use error::{CgroupError, Result};
pub use handler::{CGroupsHandler, CgroupsHandlerImpl};
pub use resolver::{parse_mounts, read_mounts, resolve, MountMapping};
