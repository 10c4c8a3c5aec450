//! Common error types for the Corral framework.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CorralError`].
pub type CorralResult<T> = Result<T, CorralError>;

/// Coarse classification of a [`CorralError`].
///
/// Callers branch on the kind rather than on individual variants, e.g. a
/// missing optional statistic is any error of kind [`ErrorKind::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested object (cgroup, hierarchy, event, file) does not exist.
    NotFound,
    /// The object being created already exists.
    AlreadyExists,
    /// The caller supplied a malformed argument.
    InvalidArgument,
    /// The operation was refused by the kernel.
    PermissionDenied,
    /// Anything else, usually an underlying I/O failure.
    Internal,
}

/// Errors produced by the Corral framework.
#[derive(Error, Diagnostic, Debug)]
pub enum CorralError {
    /// A required cgroup hierarchy is not mounted.
    #[error("Cgroup hierarchy not mounted: {hierarchy}")]
    #[diagnostic(
        code(corral::cgroup::not_mounted),
        help("Mount the cgroup v1 hierarchy before starting the resource handlers")
    )]
    HierarchyNotMounted {
        /// Kernel subsystem name of the hierarchy.
        hierarchy: String,
    },

    /// The cgroup directory of a container does not exist.
    #[error("Cgroup not found for container {container} in {hierarchy}")]
    #[diagnostic(code(corral::cgroup::not_found))]
    CgroupNotFound {
        /// The container name.
        container: String,
        /// Kernel subsystem name of the hierarchy.
        hierarchy: String,
    },

    /// Generic lookup failure.
    #[error("Not found: {what}")]
    #[diagnostic(code(corral::not_found))]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// The object being created already exists.
    #[error("Already exists: {what}")]
    #[diagnostic(code(corral::already_exists))]
    AlreadyExists {
        /// Description of what already exists.
        what: String,
    },

    /// Invalid container name format.
    #[error("Invalid container name: {name}")]
    #[diagnostic(
        code(corral::container::invalid_name),
        help("Container names are absolute paths like '/test' or '/batch/job-1'")
    )]
    InvalidContainerName {
        /// The invalid container name.
        name: String,
    },

    /// Invalid argument other than a container name.
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(corral::invalid_argument))]
    InvalidArgument {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(corral::io))]
    Io(#[from] std::io::Error),

    /// Permission denied.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(corral::permission_denied),
        help("Try running with elevated privileges (sudo)")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(corral::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(corral::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl CorralError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::HierarchyNotMounted { .. } | Self::CgroupNotFound { .. } | Self::NotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidContainerName { .. } | Self::InvalidArgument { .. } | Self::Config { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Io(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error is of kind [`ErrorKind::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// Whether this error is of kind [`ErrorKind::AlreadyExists`].
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyExists)
    }
}
