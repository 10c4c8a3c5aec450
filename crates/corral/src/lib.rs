//! # Corral
//!
//! Cgroup-backed resource handlers for container management.
//!
//! ## Layers
//!
//! - **[`kernel`]**: file I/O on cgroup filesystems, classified into error kinds
//! - **[`cgroup`]**: cgroup v1 mount discovery, name to directory mapping, controllers
//! - **[`resources`]**: resource handler traits and the monitoring resource
//! - **[`runtime`]**: configuration and the registry of available resources
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use corral::kernel::SystemKernel;
//! use corral::runtime::{ResourceRegistry, RuntimeConfig};
//! use corral::spec::{ContainerSpec, ResourceType};
//! use corral_common::ContainerName;
//!
//! # fn example() -> corral_common::CorralResult<()> {
//! let config = RuntimeConfig::load_default()?;
//! let registry = ResourceRegistry::new(&config, Arc::new(SystemKernel::new()))?;
//!
//! let name = ContainerName::new("/test")?;
//! let factory = registry.factory(ResourceType::Monitoring)?;
//! let mut handler = factory.create(&name, &ContainerSpec::default())?;
//! handler.enter(&[std::process::id() as libc::pid_t])?;
//!
//! handler.destroy().map_err(|e| e.into_error())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod kernel;
pub mod resources;
pub mod runtime;
pub mod spec;

pub use resources::{ResourceHandler, ResourceHandlerFactory};
pub use runtime::{ResourceRegistry, RuntimeConfig};
