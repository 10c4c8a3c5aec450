//! Cgroup v1 hierarchy mapping and controllers.
//!
//! This module translates container names into per-hierarchy cgroup
//! directories ([`CgroupFactory`]) and wraps each directory in a
//! [`CgroupController`] that the resource handlers own.

mod controller;
mod factory;
pub mod mounts;
mod perf;

use std::fmt;
use std::str::FromStr;

use corral_common::CorralError;
use serde::{Deserialize, Serialize};

pub use controller::{
    CgroupController, CgroupControllerBase, CgroupControllerFactory, CgroupControllerType,
};
pub use factory::CgroupFactory;
pub use mounts::CgroupMount;
pub use perf::{PerfController, PerfControllerFactory};

/// A cgroup v1 controller hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CgroupHierarchy {
    /// CPU scheduling (`cpu`).
    Cpu,
    /// CPU accounting (`cpuacct`).
    Cpuacct,
    /// CPU and memory node placement (`cpuset`).
    Cpuset,
    /// Memory limits and accounting (`memory`).
    Memory,
    /// Block I/O (`blkio`).
    Blkio,
    /// Perf event monitoring (`perf_event`).
    PerfEvent,
    /// Device access (`devices`).
    Devices,
    /// Task freezing (`freezer`).
    Freezer,
    /// Network classification (`net_cls`).
    NetCls,
}

impl CgroupHierarchy {
    /// Every known hierarchy.
    pub const ALL: [Self; 9] = [
        Self::Cpu,
        Self::Cpuacct,
        Self::Cpuset,
        Self::Memory,
        Self::Blkio,
        Self::PerfEvent,
        Self::Devices,
        Self::Freezer,
        Self::NetCls,
    ];

    /// Kernel subsystem name, as used in mount options.
    #[must_use]
    pub const fn subsystem(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cpuacct => "cpuacct",
            Self::Cpuset => "cpuset",
            Self::Memory => "memory",
            Self::Blkio => "blkio",
            Self::PerfEvent => "perf_event",
            Self::Devices => "devices",
            Self::Freezer => "freezer",
            Self::NetCls => "net_cls",
        }
    }
}

impl fmt::Display for CgroupHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subsystem())
    }
}

impl FromStr for CgroupHierarchy {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|h| h.subsystem() == s)
            .ok_or_else(|| CorralError::InvalidArgument {
                message: format!("unknown cgroup hierarchy '{s}'"),
            })
    }
}

impl TryFrom<String> for CgroupHierarchy {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CgroupHierarchy> for String {
    fn from(hierarchy: CgroupHierarchy) -> Self {
        hierarchy.subsystem().to_string()
    }
}
