//! The set of resource handler factories available on this machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use corral_common::{CorralError, CorralResult};

use crate::cgroup::CgroupFactory;
use crate::kernel::KernelApi;
use crate::resources::{MonitoringResourceHandlerFactory, ResourceHandlerFactory};
use crate::spec::{InitSpec, ResourceType};

use super::RuntimeConfig;

/// Resource handler factories keyed by resource type.
///
/// Resource types whose hierarchies are not mounted are left out rather
/// than failing the whole registry.
pub struct ResourceRegistry {
    cgroup_factory: Arc<CgroupFactory>,
    factories: BTreeMap<ResourceType, Box<dyn ResourceHandlerFactory>>,
}

impl ResourceRegistry {
    /// Discover cgroup mounts per `config` and build every factory.
    pub fn new(config: &RuntimeConfig, kernel: Arc<dyn KernelApi>) -> CorralResult<Self> {
        let cgroup_factory = Arc::new(CgroupFactory::from_config(config, Arc::clone(&kernel))?);
        Self::with_cgroup_factory(cgroup_factory, kernel)
    }

    /// Build every factory on top of an existing cgroup factory.
    pub fn with_cgroup_factory(
        cgroup_factory: Arc<CgroupFactory>,
        kernel: Arc<dyn KernelApi>,
    ) -> CorralResult<Self> {
        let mut registry = Self {
            cgroup_factory: Arc::clone(&cgroup_factory),
            factories: BTreeMap::new(),
        };

        registry.register(
            ResourceType::Monitoring,
            MonitoringResourceHandlerFactory::new(cgroup_factory, kernel)
                .map(|f| Box::new(f) as Box<dyn ResourceHandlerFactory>),
        )?;

        tracing::info!(
            resources = ?registry.resource_types().collect::<Vec<_>>(),
            "Resource registry ready"
        );

        Ok(registry)
    }

    fn register(
        &mut self,
        resource: ResourceType,
        factory: CorralResult<Box<dyn ResourceHandlerFactory>>,
    ) -> CorralResult<()> {
        match factory {
            Ok(factory) => {
                self.factories.insert(resource, factory);
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                tracing::info!(%resource, reason = %error, "Resource not available");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Available resource types, in order.
    pub fn resource_types(&self) -> impl Iterator<Item = ResourceType> + '_ {
        self.factories.keys().copied()
    }

    /// Available factories, in resource type order.
    pub fn factories(&self) -> impl Iterator<Item = &dyn ResourceHandlerFactory> + '_ {
        self.factories.values().map(|factory| &**factory)
    }

    /// The factory of a resource type.
    ///
    /// # Errors
    ///
    /// `NotFound` when the resource is not available on this machine.
    pub fn factory(&self, resource: ResourceType) -> CorralResult<&dyn ResourceHandlerFactory> {
        self.factories
            .get(&resource)
            .map(|factory| &**factory)
            .ok_or_else(|| CorralError::NotFound {
                what: format!("{resource} resource"),
            })
    }

    /// The cgroup factory shared by all resources.
    #[must_use]
    pub fn cgroup_factory(&self) -> &Arc<CgroupFactory> {
        &self.cgroup_factory
    }

    /// Run machine initialization on every factory, stopping at the first
    /// failure.
    ///
    /// The cgroup mounts listed in `spec` must match what was discovered;
    /// a missing or misplaced hierarchy fails with `NotFound` before any
    /// factory runs.
    pub fn init_machine(&self, spec: &InitSpec) -> CorralResult<()> {
        self.cgroup_factory.check_mounts(&spec.cgroup_mounts)?;
        for (resource, factory) in &self.factories {
            factory.init_machine(spec)?;
            tracing::debug!(%resource, "Initialized machine");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("cgroup_factory", &self.cgroup_factory)
            .field("resources", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
