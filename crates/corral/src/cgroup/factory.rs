//! Container name to cgroup directory mapping.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use corral_common::paths::MOUNTINFO;
use corral_common::{ContainerName, CorralError, CorralResult};

use crate::kernel::KernelApi;
use crate::runtime::RuntimeConfig;
use crate::spec::CgroupMountSpec;

use super::mounts::{self, CgroupMount};
use super::CgroupHierarchy;

#[derive(Debug, Clone)]
struct MountPoint {
    path: PathBuf,
    owned: bool,
}

/// Resolves cgroup directories for containers across mounted hierarchies.
///
/// The mapping is 1:1: container `/a/b` lives at `<mount>/a/b` in every
/// hierarchy. Immutable after construction, so it can be shared freely.
#[derive(Debug)]
pub struct CgroupFactory {
    mounts: BTreeMap<CgroupHierarchy, MountPoint>,
    kernel: Arc<dyn KernelApi>,
}

impl CgroupFactory {
    /// Create a factory from an explicit list of mounts.
    ///
    /// When a hierarchy appears in several mounts the first one wins.
    pub fn new(mounts: Vec<CgroupMount>, kernel: Arc<dyn KernelApi>) -> Self {
        let mut by_hierarchy = BTreeMap::new();
        for mount in mounts {
            for hierarchy in mount.hierarchies {
                by_hierarchy.entry(hierarchy).or_insert_with(|| MountPoint {
                    path: mount.path.clone(),
                    owned: mount.owned,
                });
            }
        }

        tracing::debug!(
            hierarchies = ?by_hierarchy.keys().collect::<Vec<_>>(),
            "Initialized cgroup factory"
        );

        Self {
            mounts: by_hierarchy,
            kernel,
        }
    }

    /// Discover mounts from `/proc/self/mountinfo`.
    ///
    /// Hierarchies listed in `owned` may have cgroups created and removed.
    pub fn detect(
        kernel: Arc<dyn KernelApi>,
        owned: &BTreeSet<CgroupHierarchy>,
    ) -> CorralResult<Self> {
        let content = kernel.read_file(Path::new(MOUNTINFO))?;
        let mounts = mark_owned(mounts::parse_mountinfo(&content), owned);
        Ok(Self::new(mounts, kernel))
    }

    /// Treat every `<root>/<subsystem>` directory as a mounted hierarchy.
    pub fn from_layout(
        root: &Path,
        kernel: Arc<dyn KernelApi>,
        owned: &BTreeSet<CgroupHierarchy>,
    ) -> Self {
        let mounts = mark_owned(mounts::scan_layout(root, kernel.as_ref()), owned);
        Self::new(mounts, kernel)
    }

    /// Build a factory the way the runtime configuration asks for.
    pub fn from_config(config: &RuntimeConfig, kernel: Arc<dyn KernelApi>) -> CorralResult<Self> {
        if config.detect_mounts {
            Self::detect(kernel, &config.owned_hierarchies)
        } else {
            Ok(Self::from_layout(
                &config.paths.cgroup_root,
                kernel,
                &config.owned_hierarchies,
            ))
        }
    }

    /// Whether the hierarchy is mounted.
    #[must_use]
    pub fn is_mounted(&self, hierarchy: CgroupHierarchy) -> bool {
        self.mounts.contains_key(&hierarchy)
    }

    /// Whether this process may create and destroy cgroups in the hierarchy.
    #[must_use]
    pub fn owns_cgroup(&self, hierarchy: CgroupHierarchy) -> bool {
        self.mounts.get(&hierarchy).is_some_and(|m| m.owned)
    }

    /// Mounted hierarchies, in order.
    pub fn hierarchies(&self) -> impl Iterator<Item = CgroupHierarchy> + '_ {
        self.mounts.keys().copied()
    }

    /// Mount point of a hierarchy.
    pub fn mount_point(&self, hierarchy: CgroupHierarchy) -> CorralResult<&Path> {
        self.mounts
            .get(&hierarchy)
            .map(|m| m.path.as_path())
            .ok_or_else(|| CorralError::HierarchyNotMounted {
                hierarchy: hierarchy.to_string(),
            })
    }

    /// Translate a container name into its directory in `hierarchy`.
    ///
    /// Pure name translation; the directory may or may not exist.
    pub fn cgroup_path(
        &self,
        hierarchy: CgroupHierarchy,
        name: &ContainerName,
    ) -> CorralResult<PathBuf> {
        let mount = self.mount_point(hierarchy)?;
        if name.is_root() {
            Ok(mount.to_path_buf())
        } else {
            Ok(mount.join(name.relative()))
        }
    }

    /// Path of an existing container cgroup. Never modifies the hierarchy.
    ///
    /// Only directories count; a control file such as `tasks` is not a
    /// container.
    pub fn get(&self, hierarchy: CgroupHierarchy, name: &ContainerName) -> CorralResult<PathBuf> {
        let path = self.cgroup_path(hierarchy, name)?;
        if !self.kernel.is_dir(&path) {
            return Err(CorralError::CgroupNotFound {
                container: name.to_string(),
                hierarchy: hierarchy.to_string(),
            });
        }
        Ok(path)
    }

    /// Create the cgroup of a container and return its path.
    ///
    /// In an owned hierarchy the directory is created and must not already
    /// exist. In a hierarchy managed elsewhere the directory is expected to
    /// exist already and is only looked up.
    ///
    /// Two concurrent creates for the same name are not serialized here; the
    /// kernel `mkdir` decides and the loser gets `AlreadyExists`.
    pub fn create(&self, hierarchy: CgroupHierarchy, name: &ContainerName) -> CorralResult<PathBuf> {
        if !self.owns_cgroup(hierarchy) {
            return self.get(hierarchy, name);
        }

        let path = self.cgroup_path(hierarchy, name)?;
        self.kernel.create_dir(&path).map_err(|e| match e {
            // A missing parent means the parent container does not exist.
            CorralError::NotFound { .. } => CorralError::CgroupNotFound {
                container: name.parent().unwrap_or_else(ContainerName::root).to_string(),
                hierarchy: hierarchy.to_string(),
            },
            other => other,
        })?;

        tracing::debug!(
            container = %name,
            hierarchy = %hierarchy,
            path = %path.display(),
            "Created cgroup"
        );

        Ok(path)
    }

    /// Verify that every expected mount matches the discovered layout.
    ///
    /// # Errors
    ///
    /// `NotFound` when a listed hierarchy is not mounted, or is mounted at a
    /// different path.
    pub fn check_mounts(&self, expected: &[CgroupMountSpec]) -> CorralResult<()> {
        for spec in expected {
            let wanted = Path::new(&spec.mount_path);
            for &hierarchy in &spec.hierarchies {
                let actual = self.mount_point(hierarchy).map_err(|_| CorralError::NotFound {
                    what: format!("{hierarchy} hierarchy mounted at {}", wanted.display()),
                })?;
                if actual != wanted {
                    return Err(CorralError::NotFound {
                        what: format!(
                            "{hierarchy} hierarchy at {} (mounted at {})",
                            wanted.display(),
                            actual.display()
                        ),
                    });
                }
                tracing::debug!(%hierarchy, path = %actual.display(), "Cgroup mount verified");
            }
        }
        Ok(())
    }
}

fn mark_owned(mut mounts: Vec<CgroupMount>, owned: &BTreeSet<CgroupHierarchy>) -> Vec<CgroupMount> {
    for mount in &mut mounts {
        mount.owned = mount.hierarchies.iter().any(|h| owned.contains(h));
    }
    mounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SystemKernel;
    use corral_common::ErrorKind;
    use tempfile::{tempdir, TempDir};

    fn perf_factory(owned: bool) -> (TempDir, CgroupFactory) {
        let temp = tempdir().unwrap();
        let mount = temp.path().join("perf_event");
        std::fs::create_dir(&mount).unwrap();
        let factory = CgroupFactory::new(
            vec![CgroupMount::new(mount, vec![CgroupHierarchy::PerfEvent], owned)],
            Arc::new(SystemKernel),
        );
        (temp, factory)
    }

    fn name(s: &str) -> ContainerName {
        ContainerName::new(s).unwrap()
    }

    #[test]
    fn mount_queries() {
        let (_temp, factory) = perf_factory(true);
        assert!(factory.is_mounted(CgroupHierarchy::PerfEvent));
        assert!(factory.owns_cgroup(CgroupHierarchy::PerfEvent));
        assert!(!factory.is_mounted(CgroupHierarchy::Memory));
        assert!(!factory.owns_cgroup(CgroupHierarchy::Memory));

        let err = factory.mount_point(CgroupHierarchy::Memory).unwrap_err();
        assert!(matches!(err, CorralError::HierarchyNotMounted { .. }));
    }

    #[test]
    fn name_translation() {
        let (temp, factory) = perf_factory(true);
        let mount = temp.path().join("perf_event");
        assert_eq!(
            factory
                .cgroup_path(CgroupHierarchy::PerfEvent, &ContainerName::root())
                .unwrap(),
            mount
        );
        assert_eq!(
            factory
                .cgroup_path(CgroupHierarchy::PerfEvent, &name("/batch/job"))
                .unwrap(),
            mount.join("batch/job")
        );
    }

    #[test]
    fn get_missing_is_not_found_and_does_not_create() {
        let (temp, factory) = perf_factory(true);
        let err = factory
            .get(CgroupHierarchy::PerfEvent, &name("/test"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!temp.path().join("perf_event/test").exists());
    }

    #[test]
    fn get_ignores_control_files() {
        let (temp, factory) = perf_factory(true);
        std::fs::write(temp.path().join("perf_event/tasks"), "").unwrap();
        std::fs::write(temp.path().join("perf_event/cgroup.procs"), "").unwrap();

        for file in ["/tasks", "/cgroup.procs"] {
            let err = factory
                .get(CgroupHierarchy::PerfEvent, &name(file))
                .unwrap_err();
            assert!(matches!(err, CorralError::CgroupNotFound { .. }), "{file}: {err:?}");
        }
    }

    #[test]
    fn check_mounts_against_layout() {
        let (temp, factory) = perf_factory(true);
        let mount = temp.path().join("perf_event");
        let spec = |path: &Path, hierarchies| CgroupMountSpec {
            mount_path: path.display().to_string(),
            hierarchies,
        };

        factory.check_mounts(&[]).unwrap();
        factory
            .check_mounts(&[spec(&mount, vec![CgroupHierarchy::PerfEvent])])
            .unwrap();

        let err = factory
            .check_mounts(&[spec(&temp.path().join("elsewhere"), vec![CgroupHierarchy::PerfEvent])])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = factory
            .check_mounts(&[spec(&mount, vec![CgroupHierarchy::PerfEvent, CgroupHierarchy::Memory])])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn create_then_get() {
        let (_temp, factory) = perf_factory(true);
        let created = factory
            .create(CgroupHierarchy::PerfEvent, &name("/test"))
            .unwrap();
        assert!(created.is_dir());
        assert_eq!(
            factory.get(CgroupHierarchy::PerfEvent, &name("/test")).unwrap(),
            created
        );

        let err = factory
            .create(CgroupHierarchy::PerfEvent, &name("/test"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn create_without_parent_is_not_found() {
        let (_temp, factory) = perf_factory(true);
        let err = factory
            .create(CgroupHierarchy::PerfEvent, &name("/missing/child"))
            .unwrap_err();
        match err {
            CorralError::CgroupNotFound { container, .. } => assert_eq!(container, "/missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn create_in_unowned_hierarchy_requires_existing_cgroup() {
        let (temp, factory) = perf_factory(false);
        let err = factory
            .create(CgroupHierarchy::PerfEvent, &name("/test"))
            .unwrap_err();
        assert!(err.is_not_found());

        std::fs::create_dir(temp.path().join("perf_event/test")).unwrap();
        assert!(factory
            .create(CgroupHierarchy::PerfEvent, &name("/test"))
            .is_ok());
    }

    #[test]
    fn first_mount_wins() {
        let kernel: Arc<dyn KernelApi> = Arc::new(SystemKernel);
        let factory = CgroupFactory::new(
            vec![
                CgroupMount::new("/a", vec![CgroupHierarchy::Cpu], true),
                CgroupMount::new("/b", vec![CgroupHierarchy::Cpu], false),
            ],
            kernel,
        );
        assert_eq!(
            factory.mount_point(CgroupHierarchy::Cpu).unwrap(),
            Path::new("/a")
        );
        assert!(factory.owns_cgroup(CgroupHierarchy::Cpu));
    }

    #[test]
    fn from_layout_marks_ownership() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("perf_event")).unwrap();
        std::fs::create_dir(temp.path().join("freezer")).unwrap();

        let owned = BTreeSet::from([CgroupHierarchy::PerfEvent]);
        let factory = CgroupFactory::from_layout(temp.path(), Arc::new(SystemKernel), &owned);
        assert!(factory.owns_cgroup(CgroupHierarchy::PerfEvent));
        assert!(factory.is_mounted(CgroupHierarchy::Freezer));
        assert!(!factory.owns_cgroup(CgroupHierarchy::Freezer));
        assert_eq!(
            factory.hierarchies().collect::<Vec<_>>(),
            vec![CgroupHierarchy::PerfEvent, CgroupHierarchy::Freezer]
        );
    }
}
