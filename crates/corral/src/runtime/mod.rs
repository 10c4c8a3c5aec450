//! Runtime wiring: configuration and the resource registry.

mod config;
mod registry;

pub use config::RuntimeConfig;
pub use registry::ResourceRegistry;
