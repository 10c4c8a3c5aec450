//! Monitoring resource.
//!
//! Places a container's tasks in a `perf_event` cgroup so they can be
//! monitored as a group. There is nothing to configure and no events to
//! deliver; the handler exists so the container has the cgroup.

use std::sync::Arc;

use corral_common::{ContainerName, CorralError, CorralResult};
use libc::pid_t;

use crate::cgroup::{CgroupFactory, CgroupHierarchy, PerfController, PerfControllerFactory};
use crate::kernel::KernelApi;
use crate::spec::{ContainerSpec, ContainerStats, EventSpec, ResourceType, StatsType, UpdatePolicy};

use super::{
    CgroupResourceHandler, CgroupResourceHandlerFactory, DestroyError, NotificationCallback,
    NotificationId, ResourceHandler,
};

/// Factory for [`MonitoringResourceHandler`]s.
#[derive(Debug)]
pub struct MonitoringResourceHandlerFactory {
    perf_controllers: PerfControllerFactory,
    kernel: Arc<dyn KernelApi>,
}

impl MonitoringResourceHandlerFactory {
    /// Create the factory.
    ///
    /// # Errors
    ///
    /// `NotFound` when the `perf_event` hierarchy is not mounted, so callers
    /// can skip the monitoring resource on this machine.
    pub fn new(cgroup_factory: Arc<CgroupFactory>, kernel: Arc<dyn KernelApi>) -> CorralResult<Self> {
        if !cgroup_factory.is_mounted(CgroupHierarchy::PerfEvent) {
            return Err(CorralError::HierarchyNotMounted {
                hierarchy: CgroupHierarchy::PerfEvent.to_string(),
            });
        }

        let owns_cgroup = cgroup_factory.owns_cgroup(CgroupHierarchy::PerfEvent);
        tracing::debug!(owns_cgroup, "Monitoring resource available");

        Ok(Self {
            perf_controllers: PerfControllerFactory::new(
                cgroup_factory,
                owns_cgroup,
                Arc::clone(&kernel),
            ),
            kernel,
        })
    }

    fn handler(
        &self,
        name: &ContainerName,
        controller: PerfController,
    ) -> CorralResult<Box<dyn ResourceHandler>> {
        let cgroup = CgroupResourceHandler::new(
            name.clone(),
            ResourceType::Monitoring,
            Arc::clone(&self.kernel),
            vec![Box::new(controller)],
        )?;
        Ok(Box::new(MonitoringResourceHandler { cgroup }))
    }
}

impl CgroupResourceHandlerFactory for MonitoringResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Monitoring
    }

    fn get_resource_handler(&self, name: &ContainerName) -> CorralResult<Box<dyn ResourceHandler>> {
        let controller = self.perf_controllers.get(name)?;
        self.handler(name, controller)
    }

    fn create_resource_handler(
        &self,
        name: &ContainerName,
        _spec: &ContainerSpec,
    ) -> CorralResult<Box<dyn ResourceHandler>> {
        let controller = self.perf_controllers.create(name)?;
        self.handler(name, controller)
    }
}

/// A container's `perf_event` cgroup.
#[derive(Debug)]
pub struct MonitoringResourceHandler {
    cgroup: CgroupResourceHandler,
}

impl ResourceHandler for MonitoringResourceHandler {
    fn container_name(&self) -> &ContainerName {
        self.cgroup.container_name()
    }

    fn resource_type(&self) -> ResourceType {
        self.cgroup.resource_type()
    }

    fn update(&mut self, _spec: &ContainerSpec, _policy: UpdatePolicy) -> CorralResult<()> {
        Ok(())
    }

    fn stats(&self, _stats_type: StatsType, _output: &mut ContainerStats) -> CorralResult<()> {
        Ok(())
    }

    fn spec(&self, _output: &mut ContainerSpec) -> CorralResult<()> {
        Ok(())
    }

    fn register_notification(
        &mut self,
        _spec: &EventSpec,
        callback: NotificationCallback,
    ) -> CorralResult<NotificationId> {
        drop(callback);
        Err(CorralError::NotFound {
            what: "No handled event found".to_string(),
        })
    }

    fn enter(&mut self, tids: &[pid_t]) -> CorralResult<()> {
        self.cgroup.enter(tids)
    }

    fn destroy(mut self: Box<Self>) -> Result<(), DestroyError> {
        match self.cgroup.destroy() {
            Ok(()) => Ok(()),
            Err(error) => Err(DestroyError::new(error, self)),
        }
    }
}
