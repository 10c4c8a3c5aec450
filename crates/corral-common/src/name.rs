//! Hierarchical container name validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CorralError, CorralResult};

/// A validated, absolute container name.
///
/// Container names mirror the cgroup tree they are mapped onto:
/// - `/` is the root container
/// - Every other name is a `/`-separated absolute path, e.g. `/batch/job-1`
/// - Components contain only alphanumeric characters, `-`, `_` and `.`
/// - Components are never empty, `.` or `..`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    /// Maximum length of a container name in bytes.
    pub const MAX_LENGTH: usize = 256;

    /// Create a new container name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the name format is invalid.
    pub fn new(name: impl Into<String>) -> CorralResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// The root container.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the container name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root container.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The name without its leading slash, suitable for joining onto a
    /// hierarchy mount point. Empty for the root container.
    #[must_use]
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }

    /// The parent container, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    fn validate(name: &str) -> CorralResult<()> {
        let invalid = || CorralError::InvalidContainerName {
            name: name.to_string(),
        };

        if name.len() > Self::MAX_LENGTH || !name.starts_with('/') {
            return Err(invalid());
        }
        if name == "/" {
            return Ok(());
        }

        for component in name[1..].split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(invalid());
            }
            let valid_chars = component
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid_chars {
                return Err(invalid());
            }
        }

        Ok(())
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerName {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContainerName> for String {
    fn from(name: ContainerName) -> Self {
        name.0
    }
}

impl AsRef<str> for ContainerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
