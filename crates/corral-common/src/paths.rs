//! Standard filesystem paths for Corral.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root of the cgroup filesystem.
pub static CGROUP_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_CGROUP_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/sys/fs/cgroup"))
});

/// Default configuration file.
pub static CONFIG_FILE: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CORRAL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/corral/config.toml"))
});

/// Mount table of the calling process.
pub const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Standard paths used by the Corral runtime.
#[derive(Debug, Clone)]
pub struct CorralPaths {
    /// Root of the cgroup filesystem (default: /sys/fs/cgroup).
    pub cgroup_root: PathBuf,
    /// Configuration file (default: /etc/corral/config.toml).
    pub config: PathBuf,
}

impl CorralPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for CorralPaths {
    fn default() -> Self {
        Self {
            cgroup_root: CGROUP_ROOT.clone(),
            config: CONFIG_FILE.clone(),
        }
    }
}
