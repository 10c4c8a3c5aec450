//! Container specification, statistics and event schema.
//!
//! These types are opaque to the handler framework: each resource handler
//! reads and writes only its own section.

use std::fmt;
use std::str::FromStr;

use corral_common::CorralError;
use serde::{Deserialize, Serialize};

use crate::cgroup::CgroupHierarchy;

/// The resource axis a factory or handler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// CPU time.
    Cpu,
    /// Memory.
    Memory,
    /// Block device I/O.
    BlockIo,
    /// Network.
    Network,
    /// Performance monitoring.
    Monitoring,
    /// Filesystem.
    Filesystem,
    /// Device access.
    Device,
}

impl ResourceType {
    /// Every resource type.
    pub const ALL: [Self; 7] = [
        Self::Cpu,
        Self::Memory,
        Self::BlockIo,
        Self::Network,
        Self::Monitoring,
        Self::Filesystem,
        Self::Device,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::BlockIo => "blockio",
            Self::Network => "network",
            Self::Monitoring => "monitoring",
            Self::Filesystem => "filesystem",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CorralError::InvalidArgument {
                message: format!("unknown resource type '{s}'"),
            })
    }
}

/// How an update is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Update of an existing container: only fields present in the spec
    /// change.
    #[default]
    Diff,
    /// The spec is the complete configuration. Used when a container is
    /// created.
    Replace,
}

/// Amount of detail requested from `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsType {
    /// Cheap, commonly used statistics.
    #[default]
    Summary,
    /// Everything available.
    Full,
}

/// Monitoring section of a container spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSpec {
    /// Perf event names the caller would like collected.
    pub events: Vec<String>,
}

/// Desired configuration of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    /// Uid that owns the container's cgroups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<u32>,
    /// Monitoring configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

/// Monitoring section of container statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringStats {
    /// Raw perf counter values by event name.
    pub counters: Vec<(String, u64)>,
}

/// Statistics of a container, filled section by section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerStats {
    /// Monitoring statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringStats>,
}

/// Out-of-memory event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OomEvent {}

/// Memory usage crossing a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryThresholdEvent {
    /// Threshold in bytes.
    pub usage: u64,
}

/// The last task of a container exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEmptyEvent {}

/// Event a caller wants to be notified about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSpec {
    /// Out-of-memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oom: Option<OomEvent>,
    /// Memory usage threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_threshold: Option<MemoryThresholdEvent>,
    /// Container became empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_empty: Option<ContainerEmptyEvent>,
}

/// A cgroup mount expected by machine initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupMountSpec {
    /// Mount point.
    pub mount_path: String,
    /// Hierarchies attached to the mount.
    pub hierarchies: Vec<CgroupHierarchy>,
}

/// Machine-wide initialization input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitSpec {
    /// Cgroup mounts the machine is expected to have.
    pub cgroup_mounts: Vec<CgroupMountSpec>,
}
