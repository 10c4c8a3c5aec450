//! Thin wrapper around the kernel interfaces used by cgroup controllers.
//!
//! Every cgroup operation is plain file I/O on a cgroup filesystem. Routing
//! it through [`KernelApi`] keeps controllers testable against a scratch
//! directory and classifies I/O failures into [`CorralError`] kinds.

use std::fmt;
use std::io;
use std::path::Path;

use corral_common::{CorralError, CorralResult};

/// Kernel operations needed by the framework.
pub trait KernelApi: fmt::Debug + Send + Sync {
    /// Read a whole file.
    fn read_file(&self, path: &Path) -> CorralResult<String>;

    /// Write `contents` to an existing or new file.
    fn write_file(&self, path: &Path, contents: &str) -> CorralResult<()>;

    /// Create a single directory. The parent must exist.
    fn create_dir(&self, path: &Path) -> CorralResult<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> CorralResult<()>;

    /// Whether a path is an existing directory. Cgroups are directories;
    /// control files next to them are not.
    fn is_dir(&self, path: &Path) -> bool;
}

/// [`KernelApi`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKernel;

impl SystemKernel {
    /// Create a new system kernel wrapper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl KernelApi for SystemKernel {
    fn read_file(&self, path: &Path) -> CorralResult<String> {
        std::fs::read_to_string(path).map_err(|e| classify(e, "read", path))
    }

    fn write_file(&self, path: &Path, contents: &str) -> CorralResult<()> {
        std::fs::write(path, contents).map_err(|e| classify(e, "write", path))
    }

    fn create_dir(&self, path: &Path) -> CorralResult<()> {
        std::fs::create_dir(path).map_err(|e| classify(e, "create", path))
    }

    fn remove_dir(&self, path: &Path) -> CorralResult<()> {
        std::fs::remove_dir(path).map_err(|e| classify(e, "remove", path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Map an I/O error onto the framework taxonomy.
fn classify(err: io::Error, operation: &str, path: &Path) -> CorralError {
    match err.kind() {
        io::ErrorKind::NotFound => CorralError::NotFound {
            what: path.display().to_string(),
        },
        io::ErrorKind::AlreadyExists => CorralError::AlreadyExists {
            what: path.display().to_string(),
        },
        io::ErrorKind::PermissionDenied => CorralError::PermissionDenied {
            operation: format!("{} {}", operation, path.display()),
        },
        _ => CorralError::Io(err),
    }
}
