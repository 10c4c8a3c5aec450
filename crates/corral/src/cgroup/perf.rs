//! The `perf_event` controller.
//!
//! A perf_event cgroup has no tunable parameters; grouping tasks in it lets
//! `perf` monitor them per container.

use std::path::Path;

use corral_common::CorralResult;
use libc::pid_t;

use super::{
    CgroupController, CgroupControllerBase, CgroupControllerFactory, CgroupControllerType,
    CgroupHierarchy,
};

/// Controller for a container's `perf_event` cgroup.
#[derive(Debug)]
pub struct PerfController {
    base: CgroupControllerBase,
}

/// Factory for [`PerfController`]s.
pub type PerfControllerFactory = CgroupControllerFactory<PerfController>;

impl CgroupControllerType for PerfController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::PerfEvent;

    fn from_base(base: CgroupControllerBase) -> Self {
        Self { base }
    }
}

impl CgroupController for PerfController {
    fn hierarchy(&self) -> CgroupHierarchy {
        self.base.hierarchy()
    }

    fn cgroup_path(&self) -> &Path {
        self.base.cgroup_path()
    }

    fn enter(&self, tid: pid_t) -> CorralResult<()> {
        self.base.enter(tid)
    }

    fn threads(&self) -> CorralResult<Vec<pid_t>> {
        self.base.threads()
    }

    fn processes(&self) -> CorralResult<Vec<pid_t>> {
        self.base.processes()
    }

    fn destroy(&mut self) -> CorralResult<()> {
        self.base.destroy()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cgroup::{CgroupFactory, CgroupMount};
    use crate::kernel::{KernelApi, SystemKernel};
    use corral_common::{ContainerName, ErrorKind};
    use tempfile::tempdir;

    #[test]
    fn factory_binds_perf_hierarchy() {
        let temp = tempdir().unwrap();
        let mount = temp.path().join("perf_event");
        std::fs::create_dir(&mount).unwrap();

        let kernel: Arc<dyn KernelApi> = Arc::new(SystemKernel);
        let cgroups = Arc::new(CgroupFactory::new(
            vec![CgroupMount::new(&mount, vec![CgroupHierarchy::PerfEvent], true)],
            Arc::clone(&kernel),
        ));
        let factory = PerfControllerFactory::new(cgroups, true, kernel);
        assert_eq!(
            PerfControllerFactory::hierarchy_type(),
            CgroupHierarchy::PerfEvent
        );

        let name = ContainerName::new("/test").unwrap();
        assert_eq!(factory.get(&name).unwrap_err().kind(), ErrorKind::NotFound);

        let mut controller = factory.create(&name).unwrap();
        assert_eq!(controller.hierarchy(), CgroupHierarchy::PerfEvent);
        assert_eq!(controller.cgroup_path(), mount.join("test"));
        assert!(factory.get(&name).is_ok());

        controller.destroy().unwrap();
        assert!(!mount.join("test").exists());

        let mut root = factory.get(&ContainerName::root()).unwrap();
        assert_eq!(root.cgroup_path(), mount);
        assert_eq!(root.destroy().unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(mount.is_dir());
    }
}
