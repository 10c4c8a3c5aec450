//! # corral-common
//!
//! Shared types for the Corral resource handler framework.
//!
//! This crate provides functionality used across all Corral crates:
//! - The error taxonomy and its coarse [`ErrorKind`] classification
//! - Validated hierarchical container names
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;

pub use error::{CorralError, CorralResult, ErrorKind};
pub use name::ContainerName;
pub use paths::CorralPaths;
