//! Cgroup v1 mount discovery.
//!
//! Hierarchies are found either from the process mount table
//! (`/proc/self/mountinfo`) or, when the caller already knows the layout,
//! from the conventional `<root>/<subsystem>` directories.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use crate::kernel::KernelApi;

use super::CgroupHierarchy;

/// One mounted cgroup v1 filesystem.
///
/// Co-mounted subsystems (e.g. `cpu,cpuacct`) share a single mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMount {
    /// Mount point.
    pub path: PathBuf,
    /// Hierarchies attached to this mount.
    pub hierarchies: Vec<CgroupHierarchy>,
    /// Whether this process may create and remove cgroups under the mount.
    pub owned: bool,
}

impl CgroupMount {
    /// Create a mount description.
    pub fn new(path: impl Into<PathBuf>, hierarchies: Vec<CgroupHierarchy>, owned: bool) -> Self {
        Self {
            path: path.into(),
            hierarchies,
            owned,
        }
    }
}

/// Parse the contents of a `mountinfo` file.
///
/// Only `cgroup` (v1) filesystems carrying at least one known subsystem are
/// returned. Ownership is left unset; the caller decides it.
pub fn parse_mountinfo(content: &str) -> Vec<CgroupMount> {
    let mut mounts = Vec::new();

    for line in content.lines() {
        // Optional fields end at the "-" separator; fstype, source and super
        // options follow it.
        let Some((head, tail)) = line.split_once(" - ") else {
            tracing::trace!(line, "Skipping malformed mountinfo line");
            continue;
        };

        let mut tail_fields = tail.split_whitespace();
        let (Some(fstype), Some(_source), Some(super_options)) =
            (tail_fields.next(), tail_fields.next(), tail_fields.next())
        else {
            tracing::trace!(line, "Skipping mountinfo line without super options");
            continue;
        };

        if fstype != "cgroup" {
            continue;
        }

        let Some(mount_point) = head.split_whitespace().nth(4) else {
            tracing::trace!(line, "Skipping mountinfo line without mount point");
            continue;
        };

        let hierarchies: Vec<CgroupHierarchy> = super_options
            .split(',')
            .filter_map(|opt| opt.parse().ok())
            .collect();

        if !hierarchies.is_empty() {
            mounts.push(CgroupMount::new(unescape(mount_point), hierarchies, false));
        }
    }

    mounts
}

/// Decode the `\ooo` octal escapes the kernel uses for space, tab, newline
/// and backslash in mountinfo paths.
fn unescape(field: &str) -> PathBuf {
    let raw = field.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let digits = raw
                .get(i + 1..i + 4)
                .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
                .and_then(|d| std::str::from_utf8(d).ok());
            if let Some(byte) = digits.and_then(|d| u8::from_str_radix(d, 8).ok()) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    PathBuf::from(OsString::from_vec(out))
}

/// Discover hierarchies mounted at `<root>/<subsystem>`.
pub fn scan_layout(root: &Path, kernel: &dyn KernelApi) -> Vec<CgroupMount> {
    CgroupHierarchy::ALL
        .into_iter()
        .filter_map(|hierarchy| {
            let path = root.join(hierarchy.subsystem());
            kernel
                .is_dir(&path)
                .then(|| CgroupMount::new(path, vec![hierarchy], false))
        })
        .collect()
}
