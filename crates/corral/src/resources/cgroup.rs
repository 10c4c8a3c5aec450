//! Generic behavior shared by cgroup-backed resource types.

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_common::{ContainerName, CorralError, CorralResult};
use libc::pid_t;

use crate::cgroup::{CgroupController, CgroupHierarchy};
use crate::kernel::KernelApi;
use crate::spec::{ContainerSpec, InitSpec, ResourceType};

use super::{ResourceHandler, ResourceHandlerFactory};

/// A cgroup-backed resource handler factory.
///
/// Implementors only provide the two hooks below; [`ResourceHandlerFactory`]
/// comes for free:
///
/// - `get` calls [`get_resource_handler`](Self::get_resource_handler).
/// - `create` calls [`create_resource_handler`](Self::create_resource_handler)
///   and then [`ResourceHandler::create`] with the same spec.
///
/// Each hook translates the container name into the hierarchy paths this
/// resource uses (the mapping need not be 1:1, e.g. all batch containers may
/// share one cgroup), obtains the controllers and wraps them in a handler.
pub trait CgroupResourceHandlerFactory: Send + Sync {
    /// Resource type of the produced handlers.
    fn resource_type(&self) -> ResourceType;

    /// Handler for a container whose cgroups already exist.
    fn get_resource_handler(&self, name: &ContainerName) -> CorralResult<Box<dyn ResourceHandler>>;

    /// Handler bound to freshly created cgroups. `spec` is available to
    /// decide the name mapping; it is applied afterwards.
    fn create_resource_handler(
        &self,
        name: &ContainerName,
        spec: &ContainerSpec,
    ) -> CorralResult<Box<dyn ResourceHandler>>;

    /// Machine-wide setup. No-op by default.
    fn init_machine(&self, _spec: &InitSpec) -> CorralResult<()> {
        Ok(())
    }
}

impl<F: CgroupResourceHandlerFactory> ResourceHandlerFactory for F {
    fn resource_type(&self) -> ResourceType {
        CgroupResourceHandlerFactory::resource_type(self)
    }

    fn get(&self, name: &ContainerName) -> CorralResult<Box<dyn ResourceHandler>> {
        self.get_resource_handler(name)
    }

    fn create(
        &self,
        name: &ContainerName,
        spec: &ContainerSpec,
    ) -> CorralResult<Box<dyn ResourceHandler>> {
        let mut handler = self.create_resource_handler(name, spec)?;

        if let Err(error) = handler.create(spec) {
            tracing::warn!(
                container = %name,
                resource = %handler.resource_type(),
                error = %error,
                "Failed to apply initial spec, leaving cgroups behind"
            );
            return Err(error);
        }

        tracing::debug!(
            container = %name,
            resource = %handler.resource_type(),
            "Created resource handler"
        );

        Ok(handler)
    }

    fn init_machine(&self, spec: &InitSpec) -> CorralResult<()> {
        CgroupResourceHandlerFactory::init_machine(self, spec)
    }
}

/// Controllers and generic lifecycle of a cgroup-backed handler.
///
/// Concrete handlers embed this and forward `enter` and `destroy` to it.
#[derive(Debug)]
pub struct CgroupResourceHandler {
    container_name: ContainerName,
    resource_type: ResourceType,
    kernel: Arc<dyn KernelApi>,
    controllers: BTreeMap<CgroupHierarchy, Box<dyn CgroupController>>,
}

impl CgroupResourceHandler {
    /// Take ownership of `controllers` for `container_name`.
    ///
    /// # Errors
    ///
    /// `Internal` when two controllers share a hierarchy.
    pub fn new(
        container_name: ContainerName,
        resource_type: ResourceType,
        kernel: Arc<dyn KernelApi>,
        controllers: Vec<Box<dyn CgroupController>>,
    ) -> CorralResult<Self> {
        let mut by_hierarchy = BTreeMap::new();
        for controller in controllers {
            let hierarchy = controller.hierarchy();
            if by_hierarchy.insert(hierarchy, controller).is_some() {
                return Err(CorralError::Internal {
                    message: format!(
                        "{resource_type} handler of {container_name} got two {hierarchy} controllers"
                    ),
                });
            }
        }

        Ok(Self {
            container_name,
            resource_type,
            kernel,
            controllers: by_hierarchy,
        })
    }

    /// The container this handler is bound to.
    #[must_use]
    pub fn container_name(&self) -> &ContainerName {
        &self.container_name
    }

    /// Resource type of this handler.
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Kernel wrapper for resource-specific calls.
    #[must_use]
    pub fn kernel(&self) -> &Arc<dyn KernelApi> {
        &self.kernel
    }

    /// The controller of a hierarchy, if this handler has one.
    #[must_use]
    pub fn controller(&self, hierarchy: CgroupHierarchy) -> Option<&dyn CgroupController> {
        self.controllers.get(&hierarchy).map(|controller| &**controller)
    }

    /// Hierarchies this handler still holds controllers for.
    pub fn hierarchies(&self) -> impl Iterator<Item = CgroupHierarchy> + '_ {
        self.controllers.keys().copied()
    }

    /// Move every tid into every controller's cgroup.
    ///
    /// Stops at the first failure; moves already done are not undone.
    pub fn enter(&self, tids: &[pid_t]) -> CorralResult<()> {
        for controller in self.controllers.values() {
            for &tid in tids {
                controller.enter(tid)?;
            }
        }

        tracing::debug!(
            container = %self.container_name,
            resource = %self.resource_type,
            ?tids,
            "Entered threads"
        );

        Ok(())
    }

    /// Destroy all controllers in hierarchy order.
    ///
    /// A destroyed controller is dropped immediately. On failure the failing
    /// controller and the ones after it stay owned by this handler, so a
    /// retry only touches what is left.
    pub fn destroy(&mut self) -> CorralResult<()> {
        while let Some(mut entry) = self.controllers.first_entry() {
            let hierarchy = *entry.key();
            if let Err(error) = entry.get_mut().destroy() {
                tracing::warn!(
                    container = %self.container_name,
                    resource = %self.resource_type,
                    hierarchy = %hierarchy,
                    error = %error,
                    "Failed to destroy controller"
                );
                return Err(error);
            }
            entry.remove();
        }

        tracing::debug!(
            container = %self.container_name,
            resource = %self.resource_type,
            "Destroyed all controllers"
        );

        Ok(())
    }
}

/// Store an optional statistic.
///
/// `Ok` values go to `set`; a `NotFound` error means the statistic is not
/// available on this machine and is skipped; any other error is returned.
///
/// ```
/// # use corral::resources::set_if_present;
/// # use corral_common::{CorralError, CorralResult};
/// # fn main() -> CorralResult<()> {
/// let mut usage = None;
/// set_if_present(Ok(42), |v| usage = Some(v))?;
/// set_if_present(
///     Err::<u64, _>(CorralError::NotFound { what: "memory.usage".into() }),
///     |v| usage = Some(v),
/// )?;
/// assert_eq!(usage, Some(42));
/// # Ok(())
/// # }
/// ```
pub fn set_if_present<T>(result: CorralResult<T>, set: impl FnOnce(T)) -> CorralResult<()> {
    match result {
        Ok(value) => {
            set(value);
            Ok(())
        }
        Err(error) if error.is_not_found() => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;

    use super::*;
    use crate::kernel::SystemKernel;
    use crate::resources::{DestroyError, NotificationCallback, NotificationId};
    use crate::spec::{
        ContainerStats, EventSpec, MonitoringStats, StatsType, UpdatePolicy,
    };
    use corral_common::ErrorKind;

    #[derive(Debug, Default)]
    struct Calls {
        entered: Vec<pid_t>,
        destroyed: usize,
        destroy_attempts: usize,
        fail_destroy: bool,
        fail_enter: bool,
    }

    #[derive(Debug)]
    struct FakeController {
        hierarchy: CgroupHierarchy,
        path: PathBuf,
        calls: Arc<Mutex<Calls>>,
    }

    impl FakeController {
        fn boxed(hierarchy: CgroupHierarchy) -> (Box<dyn CgroupController>, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let controller = Self {
                hierarchy,
                path: PathBuf::from("/fake").join(hierarchy.subsystem()),
                calls: Arc::clone(&calls),
            };
            (Box::new(controller), calls)
        }
    }

    impl CgroupController for FakeController {
        fn hierarchy(&self) -> CgroupHierarchy {
            self.hierarchy
        }

        fn cgroup_path(&self) -> &Path {
            &self.path
        }

        fn enter(&self, tid: pid_t) -> CorralResult<()> {
            let mut calls = self.calls.lock();
            if calls.fail_enter {
                return Err(CorralError::PermissionDenied {
                    operation: format!("enter {tid}"),
                });
            }
            calls.entered.push(tid);
            Ok(())
        }

        fn threads(&self) -> CorralResult<Vec<pid_t>> {
            Ok(self.calls.lock().entered.clone())
        }

        fn processes(&self) -> CorralResult<Vec<pid_t>> {
            self.threads()
        }

        fn destroy(&mut self) -> CorralResult<()> {
            let mut calls = self.calls.lock();
            calls.destroy_attempts += 1;
            if calls.fail_destroy {
                return Err(CorralError::Internal {
                    message: "device busy".to_string(),
                });
            }
            calls.destroyed += 1;
            Ok(())
        }
    }

    type Counter = fn() -> CorralResult<u64>;

    /// Handler exercising the generic pieces: records update policies and
    /// reads counters through `set_if_present`.
    #[derive(Debug)]
    struct FakeHandler {
        cgroup: CgroupResourceHandler,
        policies: Arc<Mutex<Vec<UpdatePolicy>>>,
        counters: Vec<(&'static str, Counter)>,
        fail_update: bool,
    }

    impl ResourceHandler for FakeHandler {
        fn container_name(&self) -> &ContainerName {
            self.cgroup.container_name()
        }

        fn resource_type(&self) -> ResourceType {
            self.cgroup.resource_type()
        }

        fn update(&mut self, _spec: &ContainerSpec, policy: UpdatePolicy) -> CorralResult<()> {
            self.policies.lock().push(policy);
            if self.fail_update {
                return Err(CorralError::InvalidArgument {
                    message: "rejected".to_string(),
                });
            }
            Ok(())
        }

        fn stats(&self, _stats_type: StatsType, output: &mut ContainerStats) -> CorralResult<()> {
            for &(name, read) in &self.counters {
                set_if_present(read(), |value| {
                    output
                        .monitoring
                        .get_or_insert_with(MonitoringStats::default)
                        .counters
                        .push((name.to_string(), value));
                })?;
            }
            Ok(())
        }

        fn spec(&self, _output: &mut ContainerSpec) -> CorralResult<()> {
            Ok(())
        }

        fn register_notification(
            &mut self,
            _spec: &EventSpec,
            _callback: NotificationCallback,
        ) -> CorralResult<NotificationId> {
            Ok(NotificationId::new(1))
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

    fn counter(name: &'static str, read: Counter) -> (&'static str, Counter) {
        (name, read)
    }

    fn name() -> ContainerName {
        ContainerName::new("/test").unwrap()
    }

    fn base(controllers: Vec<Box<dyn CgroupController>>) -> CgroupResourceHandler {
        CgroupResourceHandler::new(
            name(),
            ResourceType::Monitoring,
            Arc::new(SystemKernel),
            controllers,
        )
        .unwrap()
    }

    fn fake_handler(controllers: Vec<Box<dyn CgroupController>>) -> FakeHandler {
        FakeHandler {
            cgroup: base(controllers),
            policies: Arc::new(Mutex::new(Vec::new())),
            counters: Vec::new(),
            fail_update: false,
        }
    }

    #[test]
    fn rejects_duplicate_hierarchies() {
        let (a, _) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let (b, _) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let err = CgroupResourceHandler::new(
            name(),
            ResourceType::Monitoring,
            Arc::new(SystemKernel),
            vec![a, b],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn controller_lookup() {
        let (perf, _) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let handler = base(vec![perf]);
        assert!(handler.controller(CgroupHierarchy::PerfEvent).is_some());
        assert!(handler.controller(CgroupHierarchy::Memory).is_none());
        assert_eq!(
            handler.hierarchies().collect::<Vec<_>>(),
            vec![CgroupHierarchy::PerfEvent]
        );
    }

    #[test]
    fn enter_moves_every_tid_into_every_controller() {
        let (perf, perf_calls) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let (freezer, freezer_calls) = FakeController::boxed(CgroupHierarchy::Freezer);
        let handler = base(vec![perf, freezer]);

        handler.enter(&[10, 11]).unwrap();
        assert_eq!(perf_calls.lock().entered, vec![10, 11]);
        assert_eq!(freezer_calls.lock().entered, vec![10, 11]);
    }

    #[test]
    fn enter_with_no_tids_touches_nothing() {
        let (perf, perf_calls) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let handler = base(vec![perf]);
        handler.enter(&[]).unwrap();
        assert!(perf_calls.lock().entered.is_empty());
    }

    #[test]
    fn enter_failure_is_not_rolled_back() {
        let (perf, perf_calls) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let (freezer, freezer_calls) = FakeController::boxed(CgroupHierarchy::Freezer);
        freezer_calls.lock().fail_enter = true;
        let handler = base(vec![perf, freezer]);

        let err = handler.enter(&[7]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        // perf_event sorts before freezer and keeps the thread.
        assert_eq!(perf_calls.lock().entered, vec![7]);
    }

    #[test]
    fn destroy_tears_down_all_controllers() {
        let (perf, perf_calls) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let (freezer, freezer_calls) = FakeController::boxed(CgroupHierarchy::Freezer);
        let handler: Box<dyn ResourceHandler> = Box::new(fake_handler(vec![perf, freezer]));

        handler.destroy().unwrap();
        assert_eq!(perf_calls.lock().destroyed, 1);
        assert_eq!(freezer_calls.lock().destroyed, 1);
    }

    #[test]
    fn failed_destroy_keeps_handler_for_retry() {
        let (perf, perf_calls) = FakeController::boxed(CgroupHierarchy::PerfEvent);
        let (freezer, freezer_calls) = FakeController::boxed(CgroupHierarchy::Freezer);
        freezer_calls.lock().fail_destroy = true;
        let handler: Box<dyn ResourceHandler> = Box::new(fake_handler(vec![perf, freezer]));

        let failure = handler.destroy().unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::Internal);
        assert_eq!(failure.handler.container_name().as_str(), "/test");
        assert_eq!(perf_calls.lock().destroyed, 1);
        assert_eq!(freezer_calls.lock().destroyed, 0);

        freezer_calls.lock().fail_destroy = false;
        failure.handler.destroy().unwrap();

        // Only the remaining controller is retried.
        assert_eq!(perf_calls.lock().destroy_attempts, 1);
        assert_eq!(freezer_calls.lock().destroy_attempts, 2);
        assert_eq!(freezer_calls.lock().destroyed, 1);
    }

    #[test]
    fn create_is_update_with_replace() {
        let mut handler = fake_handler(Vec::new());
        let policies = Arc::clone(&handler.policies);

        handler.create(&ContainerSpec::default()).unwrap();
        handler
            .update(&ContainerSpec::default(), UpdatePolicy::Replace)
            .unwrap();
        assert_eq!(
            *policies.lock(),
            vec![UpdatePolicy::Replace, UpdatePolicy::Replace]
        );
    }

    #[test]
    fn stats_skip_missing_counters() {
        let mut handler = fake_handler(Vec::new());
        handler.counters = vec![
            counter("cycles", || Ok(100)),
            counter("instructions", || {
                Err(CorralError::NotFound {
                    what: "instructions".to_string(),
                })
            }),
            counter("cache-misses", || Ok(3)),
        ];

        let mut stats = ContainerStats::default();
        handler.stats(StatsType::Full, &mut stats).unwrap();
        assert_eq!(
            stats.monitoring.unwrap().counters,
            vec![("cycles".to_string(), 100), ("cache-misses".to_string(), 3)]
        );
    }

    #[test]
    fn stats_stop_at_hard_errors() {
        let mut handler = fake_handler(Vec::new());
        handler.counters = vec![
            counter("cycles", || Ok(100)),
            counter("instructions", || {
                Err(CorralError::Internal {
                    message: "read failed".to_string(),
                })
            }),
            counter("cache-misses", || Ok(3)),
        ];

        let mut stats = ContainerStats::default();
        let err = handler.stats(StatsType::Full, &mut stats).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            stats.monitoring.unwrap().counters,
            vec![("cycles".to_string(), 100)]
        );
    }

    #[test]
    fn set_if_present_classification() {
        let mut value = None;
        set_if_present(Ok(5), |v| value = Some(v)).unwrap();
        assert_eq!(value, Some(5));

        set_if_present(
            Err(CorralError::HierarchyNotMounted {
                hierarchy: "memory".to_string(),
            }),
            |v| value = Some(v),
        )
        .unwrap();
        assert_eq!(value, Some(5));

        let err = set_if_present(
            Err(CorralError::AlreadyExists {
                what: "x".to_string(),
            }),
            |v| value = Some(v),
        )
        .unwrap_err();
        assert!(err.is_already_exists());
    }

    struct FakeFactory {
        fail_update: bool,
        policies: Arc<Mutex<Vec<UpdatePolicy>>>,
    }

    impl CgroupResourceHandlerFactory for FakeFactory {
        fn resource_type(&self) -> ResourceType {
            ResourceType::Monitoring
        }

        fn get_resource_handler(
            &self,
            _name: &ContainerName,
        ) -> CorralResult<Box<dyn ResourceHandler>> {
            Err(CorralError::NotFound {
                what: "fake cgroup".to_string(),
            })
        }

        fn create_resource_handler(
            &self,
            _name: &ContainerName,
            _spec: &ContainerSpec,
        ) -> CorralResult<Box<dyn ResourceHandler>> {
            let mut handler = fake_handler(Vec::new());
            handler.fail_update = self.fail_update;
            handler.policies = Arc::clone(&self.policies);
            Ok(Box::new(handler))
        }
    }

    #[test]
    fn factory_create_applies_spec_with_replace() {
        let factory = FakeFactory {
            fail_update: false,
            policies: Arc::new(Mutex::new(Vec::new())),
        };
        let factory: &dyn ResourceHandlerFactory = &factory;

        let handler = factory.create(&name(), &ContainerSpec::default()).unwrap();
        assert_eq!(handler.resource_type(), factory.resource_type());
        assert!(factory.init_machine(&InitSpec::default()).is_ok());
        assert!(factory.get(&name()).unwrap_err().is_not_found());
    }

    #[test]
    fn factory_create_propagates_spec_failure() {
        let policies = Arc::new(Mutex::new(Vec::new()));
        let factory = FakeFactory {
            fail_update: true,
            policies: Arc::clone(&policies),
        };
        let factory: &dyn ResourceHandlerFactory = &factory;

        let err = factory
            .create(&name(), &ContainerSpec::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(*policies.lock(), vec![UpdatePolicy::Replace]);
    }
}
