//! Runtime configuration.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use corral_common::paths::CONFIG_FILE;
use corral_common::{CorralError, CorralPaths, CorralResult};
use serde::Deserialize;

use crate::cgroup::CgroupHierarchy;

/// Runtime configuration options.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Filesystem locations.
    pub paths: CorralPaths,
    /// Discover cgroup mounts from the mount table instead of assuming one
    /// directory per hierarchy under `paths.cgroup_root`.
    pub detect_mounts: bool,
    /// Hierarchies in which cgroups may be created and removed.
    pub owned_hierarchies: BTreeSet<CgroupHierarchy>,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    cgroup_root: Option<PathBuf>,
    detect_mounts: Option<bool>,
    owned_hierarchies: Option<BTreeSet<CgroupHierarchy>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            paths: CorralPaths::new(),
            detect_mounts: true,
            owned_hierarchies: BTreeSet::from([CgroupHierarchy::PerfEvent]),
        }
    }
}

impl RuntimeConfig {
    /// Load the configuration file named by `CORRAL_CONFIG`, or
    /// `/etc/corral/config.toml`.
    pub fn load_default() -> CorralResult<Self> {
        Self::load(CONFIG_FILE.as_path())
    }

    /// Load a TOML configuration file.
    ///
    /// ```toml
    /// cgroup_root = "/sys/fs/cgroup"
    /// detect_mounts = false
    /// owned_hierarchies = ["perf_event", "freezer"]
    /// ```
    ///
    /// A missing file yields the defaults; keys absent from the file keep
    /// their default value.
    pub fn load(path: &Path) -> CorralResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                let mut config = Self::default();
                config.paths.config = path.to_path_buf();
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };

        let mut config = Self::from_toml(&content).map_err(|e| match e {
            CorralError::Config { message } => CorralError::Config {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })?;
        config.paths.config = path.to_path_buf();

        tracing::debug!(path = %path.display(), ?config, "Loaded config");
        Ok(config)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> CorralResult<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| CorralError::Config {
            message: e.to_string(),
        })?;

        let mut config = Self::default();
        if let Some(root) = file.cgroup_root {
            config.paths.cgroup_root = root;
        }
        if let Some(detect) = file.detect_mounts {
            config.detect_mounts = detect;
        }
        if let Some(owned) = file.owned_hierarchies {
            config.owned_hierarchies = owned;
        }
        Ok(config)
    }

    /// Set the cgroup root.
    #[must_use]
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths.cgroup_root = root.into();
        self
    }

    /// Choose between mount table discovery and the `cgroup_root` layout.
    #[must_use]
    pub fn with_detect_mounts(mut self, detect: bool) -> Self {
        self.detect_mounts = detect;
        self
    }

    /// Add a hierarchy in which cgroups may be created.
    #[must_use]
    pub fn with_owned(mut self, hierarchy: CgroupHierarchy) -> Self {
        self.owned_hierarchies.insert(hierarchy);
        self
    }
}
