//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use corral_common::ContainerName;
use libc::pid_t;
use serde::de::DeserializeOwned;

use crate::kernel::SystemKernel;
use crate::resources::{ResourceHandler, ResourceHandlerFactory};
use crate::runtime::{ResourceRegistry, RuntimeConfig};
use crate::spec::{ContainerSpec, ContainerStats, InitSpec, ResourceType, StatsType};

/// Corral - cgroup resource handlers for containers
#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "CORRAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use `<ROOT>/<subsystem>` as the cgroup layout instead of the mount table
    #[arg(long, global = true)]
    pub cgroup_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// A container and, optionally, the one resource to act on.
#[derive(Args, Debug)]
pub struct Target {
    /// Container name, e.g. /test
    pub name: ContainerName,

    /// Restrict to one resource type (default: every available one)
    #[arg(short, long)]
    pub resource: Option<ResourceType>,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// List available resources and mounted hierarchies
    Resources,

    /// Run machine initialization
    Init {
        /// Path to an init spec JSON file
        #[arg(long)]
        spec: Option<PathBuf>,
    },

    /// Create a container's resources
    Create {
        #[command(flatten)]
        target: Target,

        /// Path to a container spec JSON file
        #[arg(long)]
        spec: Option<PathBuf>,
    },

    /// Check that a container's resources exist
    Get {
        #[command(flatten)]
        target: Target,
    },

    /// Move threads into a container
    Enter {
        #[command(flatten)]
        target: Target,

        /// Thread ids
        #[arg(required = true)]
        tids: Vec<pid_t>,
    },

    /// Display container statistics
    Stats {
        #[command(flatten)]
        target: Target,

        /// Collect every available statistic
        #[arg(long)]
        full: bool,

        /// Keep printing statistics until interrupted
        #[arg(short, long)]
        watch: bool,

        /// Time interval for --watch (seconds)
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Print a container's current spec
    Spec {
        #[command(flatten)]
        target: Target,
    },

    /// Destroy a container's resources
    Destroy {
        #[command(flatten)]
        target: Target,
    },
}

impl Cli {
    /// Load the runtime configuration with command line overrides applied.
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let config = match &self.config {
            Some(path) => RuntimeConfig::load(path),
            None => RuntimeConfig::load_default(),
        }?;

        Ok(match &self.cgroup_root {
            Some(root) => config.with_cgroup_root(root).with_detect_mounts(false),
            None => config,
        })
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let config = self.runtime_config()?;
        let registry = ResourceRegistry::new(&config, Arc::new(SystemKernel::new()))
            .wrap_err("Failed to set up resource handlers")?;

        match self.command {
            Commands::Resources => {
                let cgroups = registry.cgroup_factory();
                for hierarchy in cgroups.hierarchies() {
                    let mount = cgroups.mount_point(hierarchy)?;
                    let owned = if cgroups.owns_cgroup(hierarchy) {
                        "owned"
                    } else {
                        "shared"
                    };
                    println!("{hierarchy}\t{}\t{owned}", mount.display());
                }
                for resource in registry.resource_types() {
                    println!("resource\t{resource}");
                }
                Ok(())
            }

            Commands::Init { spec } => {
                let spec: InitSpec = read_json_or_default(spec.as_deref())?;
                registry.init_machine(&spec)?;
                println!("Machine initialized");
                Ok(())
            }

            Commands::Create { target, spec } => {
                let spec: ContainerSpec = read_json_or_default(spec.as_deref())?;
                for factory in factories(&registry, target.resource)? {
                    factory.create(&target.name, &spec).wrap_err_with(|| {
                        format!(
                            "Failed to create {} resource of {}",
                            factory.resource_type(),
                            target.name
                        )
                    })?;
                }
                println!("Container {} created", target.name);
                Ok(())
            }

            Commands::Get { target } => {
                for handler in handlers(&registry, &target)? {
                    println!("{}\t{}", handler.container_name(), handler.resource_type());
                }
                Ok(())
            }

            Commands::Enter { target, tids } => {
                for mut handler in handlers(&registry, &target)? {
                    handler.enter(&tids)?;
                }
                println!("Entered {} thread(s) into {}", tids.len(), target.name);
                Ok(())
            }

            Commands::Stats {
                target,
                full,
                watch,
                interval,
            } => {
                let stats_type = if full {
                    StatsType::Full
                } else {
                    StatsType::Summary
                };
                let handlers = handlers(&registry, &target)?;

                if !watch {
                    return print_stats(&handlers, stats_type);
                }

                let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
                let ctrl_c = tokio::signal::ctrl_c();
                tokio::pin!(ctrl_c);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => print_stats(&handlers, stats_type)?,
                        _ = &mut ctrl_c => {
                            tracing::debug!("Interrupted, stopping stats watch");
                            return Ok(());
                        }
                    }
                }
            }

            Commands::Spec { target } => {
                let mut spec = ContainerSpec::default();
                for handler in handlers(&registry, &target)? {
                    handler.spec(&mut spec)?;
                }
                println!("{}", serde_json::to_string_pretty(&spec)?);
                Ok(())
            }

            Commands::Destroy { target } => {
                for handler in handlers(&registry, &target)? {
                    handler.destroy().map_err(|e| {
                        eyre!(
                            "Failed to destroy {} resource of {}: {}",
                            e.handler.resource_type(),
                            target.name,
                            e.error
                        )
                    })?;
                }
                println!("Container {} destroyed", target.name);
                Ok(())
            }
        }
    }
}

/// The factories a command acts on.
fn factories(
    registry: &ResourceRegistry,
    resource: Option<ResourceType>,
) -> Result<Vec<&dyn ResourceHandlerFactory>> {
    match resource {
        Some(resource) => Ok(vec![registry.factory(resource)?]),
        None => {
            let all: Vec<_> = registry.factories().collect();
            if all.is_empty() {
                return Err(eyre!("No resources available on this machine"));
            }
            Ok(all)
        }
    }
}

/// Handlers of an existing container.
///
/// Without an explicit resource, resources the container was not created
/// with are skipped.
fn handlers(registry: &ResourceRegistry, target: &Target) -> Result<Vec<Box<dyn ResourceHandler>>> {
    let mut handlers = Vec::new();
    for factory in factories(registry, target.resource)? {
        match factory.get(&target.name) {
            Ok(handler) => handlers.push(handler),
            Err(e) if target.resource.is_none() && e.is_not_found() => {
                tracing::debug!(
                    container = %target.name,
                    resource = %factory.resource_type(),
                    "Container has no such resource"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    if handlers.is_empty() {
        return Err(eyre!("Container {} not found", target.name));
    }
    Ok(handlers)
}

fn print_stats(handlers: &[Box<dyn ResourceHandler>], stats_type: StatsType) -> Result<()> {
    let mut stats = ContainerStats::default();
    for handler in handlers {
        handler.stats(stats_type, &mut stats)?;
    }
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let json = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).wrap_err_with(|| format!("Invalid JSON in {}", path.display()))
}
