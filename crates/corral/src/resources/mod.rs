//! Resource handlers.
//!
//! A [`ResourceHandlerFactory`] turns a container name into a
//! [`ResourceHandler`] for one [`ResourceType`]. Handlers own the cgroup
//! controllers of their container and expose a uniform lifecycle:
//!
//! ```text
//! factory.create(name, spec) ──► handler ──► update / stats / spec / enter ...
//!                                   │
//!                                   └──► destroy (controllers first, then the handler)
//! ```
//!
//! Cgroup-backed resource types implement [`CgroupResourceHandlerFactory`]
//! and embed a [`CgroupResourceHandler`], which provide the generic
//! create, enter and destroy behavior.

mod cgroup;
pub mod monitoring;

use std::fmt;

use corral_common::{ContainerName, CorralError, CorralResult};
use libc::pid_t;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::{
    ContainerSpec, ContainerStats, EventSpec, InitSpec, ResourceType, StatsType, UpdatePolicy,
};

pub use cgroup::{set_if_present, CgroupResourceHandler, CgroupResourceHandlerFactory};
pub use monitoring::{MonitoringResourceHandler, MonitoringResourceHandlerFactory};

/// Single-use callback for an event notification.
///
/// Ownership moves to the handler on registration; the handler either keeps
/// it for a later invocation or drops it before returning.
pub type NotificationCallback = Box<dyn FnOnce(CorralResult<()>) + Send>;

/// Identifies a registered notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(u64);

impl NotificationId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces resource handlers of one resource type.
///
/// Implementations are shared across threads; calls for different container
/// names must not interfere.
pub trait ResourceHandlerFactory: Send + Sync {
    /// Resource type of this factory and of every handler it returns.
    fn resource_type(&self) -> ResourceType;

    /// Handler for an existing container. Does not modify any cgroup.
    ///
    /// # Errors
    ///
    /// `NotFound` when the container has no cgroup for this resource.
    fn get(&self, name: &ContainerName) -> CorralResult<Box<dyn ResourceHandler>>;

    /// Create the container's cgroups and apply `spec`.
    ///
    /// Only hierarchies this process owns get a new directory. In a
    /// hierarchy managed elsewhere the cgroup must already exist; it is
    /// looked up, never created, and `spec` is applied to it.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when an owned cgroup exists already, `NotFound` when
    /// an unowned one does not, or whatever applying
    /// the spec reports. In the latter case the cgroups stay behind; use
    /// [`get`](Self::get) and [`ResourceHandler::destroy`] to clean up.
    fn create(
        &self,
        name: &ContainerName,
        spec: &ContainerSpec,
    ) -> CorralResult<Box<dyn ResourceHandler>>;

    /// One-time, machine-wide setup. No-op by default.
    fn init_machine(&self, _spec: &InitSpec) -> CorralResult<()> {
        Ok(())
    }
}

/// One container's view of one resource type.
///
/// Not synchronized: callers serialize mutating calls on a handler.
pub trait ResourceHandler: fmt::Debug + Send {
    /// The container this handler is bound to.
    fn container_name(&self) -> &ContainerName;

    /// Resource type managed by this handler.
    fn resource_type(&self) -> ResourceType;

    /// Apply `spec` under `policy`.
    fn update(&mut self, spec: &ContainerSpec, policy: UpdatePolicy) -> CorralResult<()>;

    /// Fill this resource's section of `output`, leaving other sections
    /// untouched.
    fn stats(&self, stats_type: StatsType, output: &mut ContainerStats) -> CorralResult<()>;

    /// Read the current configuration back into `output`.
    fn spec(&self, output: &mut ContainerSpec) -> CorralResult<()>;

    /// Register `callback` for the events in `spec`.
    ///
    /// # Errors
    ///
    /// `NotFound` when no event in `spec` is handled; the callback has been
    /// dropped without being invoked.
    fn register_notification(
        &mut self,
        spec: &EventSpec,
        callback: NotificationCallback,
    ) -> CorralResult<NotificationId>;

    /// Configure a newly created container.
    ///
    /// Creation is an update with [`UpdatePolicy::Replace`].
    fn create(&mut self, spec: &ContainerSpec) -> CorralResult<()> {
        self.update(spec, UpdatePolicy::Replace)
    }

    /// Move the given threads into every cgroup of this handler.
    fn enter(&mut self, tids: &[pid_t]) -> CorralResult<()>;

    /// Destroy every controller and then the handler itself.
    ///
    /// # Errors
    ///
    /// On failure the handler is handed back inside [`DestroyError`] with
    /// the controllers that were not destroyed yet, so the call can be
    /// retried.
    fn destroy(self: Box<Self>) -> Result<(), DestroyError>;
}

/// A failed [`ResourceHandler::destroy`].
#[derive(Debug, Error)]
#[error(
    "failed to destroy {} handler of {}: {error}",
    .handler.resource_type(),
    .handler.container_name()
)]
pub struct DestroyError {
    /// Why the teardown stopped.
    #[source]
    pub error: CorralError,
    /// The handler, still owning the controllers that were not destroyed.
    pub handler: Box<dyn ResourceHandler>,
}

impl DestroyError {
    /// Pair an error with the handler that failed to destroy.
    pub fn new(error: CorralError, handler: Box<dyn ResourceHandler>) -> Self {
        Self { error, handler }
    }

    /// Drop the handler and keep the error.
    #[must_use]
    pub fn into_error(self) -> CorralError {
        self.error
    }
}
