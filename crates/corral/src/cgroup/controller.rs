//! Per-hierarchy cgroup controllers.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use corral_common::{ContainerName, CorralError, CorralResult};
use libc::pid_t;

use crate::kernel::KernelApi;

use super::{CgroupFactory, CgroupHierarchy};

/// Thread ids of the tasks in a cgroup.
const TASKS: &str = "tasks";
/// Process ids of the tasks in a cgroup.
const CGROUP_PROCS: &str = "cgroup.procs";

/// A container's cgroup directory in one hierarchy.
///
/// Exactly one resource handler owns each controller.
pub trait CgroupController: fmt::Debug + Send + Sync {
    /// Hierarchy this controller lives in.
    fn hierarchy(&self) -> CgroupHierarchy;

    /// Cgroup directory this controller is bound to.
    fn cgroup_path(&self) -> &Path;

    /// Move a thread into this cgroup.
    fn enter(&self, tid: pid_t) -> CorralResult<()>;

    /// Thread ids currently in this cgroup.
    fn threads(&self) -> CorralResult<Vec<pid_t>>;

    /// Process ids currently in this cgroup.
    fn processes(&self) -> CorralResult<Vec<pid_t>>;

    /// Tear down the cgroup. After success the controller must be dropped.
    fn destroy(&mut self) -> CorralResult<()>;
}

/// Shared state and cgroup file handling for controllers.
#[derive(Debug)]
pub struct CgroupControllerBase {
    hierarchy: CgroupHierarchy,
    cgroup_path: PathBuf,
    owns_cgroup: bool,
    hierarchy_root: bool,
    kernel: Arc<dyn KernelApi>,
}

impl CgroupControllerBase {
    /// Bind to an existing cgroup directory.
    pub fn new(
        hierarchy: CgroupHierarchy,
        cgroup_path: impl Into<PathBuf>,
        owns_cgroup: bool,
        kernel: Arc<dyn KernelApi>,
    ) -> Self {
        Self {
            hierarchy,
            cgroup_path: cgroup_path.into(),
            owns_cgroup,
            hierarchy_root: false,
            kernel,
        }
    }

    /// Mark the directory as the root cgroup of its hierarchy, which is never
    /// removed.
    #[must_use]
    pub fn with_hierarchy_root(mut self, hierarchy_root: bool) -> Self {
        self.hierarchy_root = hierarchy_root;
        self
    }

    /// Hierarchy this controller lives in.
    #[must_use]
    pub fn hierarchy(&self) -> CgroupHierarchy {
        self.hierarchy
    }

    /// Cgroup directory.
    #[must_use]
    pub fn cgroup_path(&self) -> &Path {
        &self.cgroup_path
    }

    /// Whether destroying removes the directory.
    #[must_use]
    pub fn owns_cgroup(&self) -> bool {
        self.owns_cgroup
    }

    /// Read a cgroup file as a trimmed string.
    ///
    /// A missing file is reported as `NotFound`, which stats readers treat
    /// as an absent value.
    pub fn get_param_string(&self, param: &str) -> CorralResult<String> {
        let content = self.kernel.read_file(&self.cgroup_path.join(param))?;
        Ok(content.trim().to_string())
    }

    /// Read a cgroup file holding one integer.
    pub fn get_param_int(&self, param: &str) -> CorralResult<i64> {
        let value = self.get_param_string(param)?;
        value.parse().map_err(|_| CorralError::Internal {
            message: format!(
                "failed to parse integer from {}: {:?}",
                self.cgroup_path.join(param).display(),
                value
            ),
        })
    }

    /// Write a string to a cgroup file.
    pub fn set_param_string(&self, param: &str, value: &str) -> CorralResult<()> {
        self.kernel.write_file(&self.cgroup_path.join(param), value)?;
        tracing::trace!(
            hierarchy = %self.hierarchy,
            path = %self.cgroup_path.display(),
            param,
            value,
            "Set cgroup parameter"
        );
        Ok(())
    }

    /// Write an integer to a cgroup file.
    pub fn set_param_int(&self, param: &str, value: i64) -> CorralResult<()> {
        self.set_param_string(param, &value.to_string())
    }

    /// Move a thread into the cgroup.
    pub fn enter(&self, tid: pid_t) -> CorralResult<()> {
        self.set_param_int(TASKS, i64::from(tid))?;

        tracing::debug!(
            hierarchy = %self.hierarchy,
            path = %self.cgroup_path.display(),
            tid,
            "Entered thread into cgroup"
        );

        Ok(())
    }

    /// Thread ids listed in `tasks`.
    pub fn threads(&self) -> CorralResult<Vec<pid_t>> {
        self.read_ids(TASKS)
    }

    /// Process ids listed in `cgroup.procs`.
    pub fn processes(&self) -> CorralResult<Vec<pid_t>> {
        self.read_ids(CGROUP_PROCS)
    }

    /// Remove the cgroup directory when the hierarchy is owned.
    ///
    /// Cgroups in hierarchies managed elsewhere are left in place. The root
    /// cgroup is the mount point itself and is refused.
    pub fn destroy(&mut self) -> CorralResult<()> {
        if self.hierarchy_root {
            return Err(CorralError::InvalidArgument {
                message: format!(
                    "refusing to destroy the root cgroup of {} at {}",
                    self.hierarchy,
                    self.cgroup_path.display()
                ),
            });
        }

        if !self.owns_cgroup {
            tracing::debug!(
                hierarchy = %self.hierarchy,
                path = %self.cgroup_path.display(),
                "Cgroup not owned, leaving it in place"
            );
            return Ok(());
        }

        self.kernel.remove_dir(&self.cgroup_path)?;
        tracing::debug!(
            hierarchy = %self.hierarchy,
            path = %self.cgroup_path.display(),
            "Deleted cgroup"
        );
        Ok(())
    }

    fn read_ids(&self, file: &str) -> CorralResult<Vec<pid_t>> {
        let content = self.get_param_string(file)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.trim().parse().map_err(|_| CorralError::Internal {
                    message: format!("invalid id {:?} in {}", line, file),
                })
            })
            .collect()
    }
}

/// A concrete controller type bound to one hierarchy.
pub trait CgroupControllerType: CgroupController + Sized + 'static {
    /// The hierarchy every instance of this type lives in.
    const HIERARCHY: CgroupHierarchy;

    /// Wrap a base bound to a cgroup directory of [`Self::HIERARCHY`].
    fn from_base(base: CgroupControllerBase) -> Self;
}

/// Creates and looks up controllers of one type.
pub struct CgroupControllerFactory<C> {
    cgroup_factory: Arc<CgroupFactory>,
    owns_cgroup: bool,
    kernel: Arc<dyn KernelApi>,
    _controller: PhantomData<fn() -> C>,
}

impl<C: CgroupControllerType> CgroupControllerFactory<C> {
    /// Create a controller factory.
    ///
    /// `owns_cgroup` decides whether created controllers remove their
    /// directory when destroyed.
    pub fn new(
        cgroup_factory: Arc<CgroupFactory>,
        owns_cgroup: bool,
        kernel: Arc<dyn KernelApi>,
    ) -> Self {
        Self {
            cgroup_factory,
            owns_cgroup,
            kernel,
            _controller: PhantomData,
        }
    }

    /// Hierarchy of the controllers this factory produces.
    #[must_use]
    pub const fn hierarchy_type() -> CgroupHierarchy {
        C::HIERARCHY
    }

    /// Controller for an existing container cgroup.
    pub fn get(&self, name: &ContainerName) -> CorralResult<C> {
        let path = self.cgroup_factory.get(C::HIERARCHY, name)?;
        Ok(self.bind(name, path))
    }

    /// Create the container cgroup and return its controller.
    pub fn create(&self, name: &ContainerName) -> CorralResult<C> {
        let path = self.cgroup_factory.create(C::HIERARCHY, name)?;
        Ok(self.bind(name, path))
    }

    fn bind(&self, name: &ContainerName, path: PathBuf) -> C {
        C::from_base(
            CgroupControllerBase::new(
                C::HIERARCHY,
                path,
                self.owns_cgroup,
                Arc::clone(&self.kernel),
            )
            .with_hierarchy_root(name.is_root()),
        )
    }
}

impl<C> fmt::Debug for CgroupControllerFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CgroupControllerFactory")
            .field("hierarchy", &std::any::type_name::<C>())
            .field("owns_cgroup", &self.owns_cgroup)
            .finish_non_exhaustive()
    }
}
