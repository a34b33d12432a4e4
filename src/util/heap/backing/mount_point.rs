//! Find the directory that backs the heap with a file.
//!
//! Mounts come from `/proc/self/mountinfo` (see proc(5)).  A line looks like
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! ```
//!
//! where the fifth field is the mount point and the field after the `-` separator is the
//! filesystem type.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use regex::Regex;

use crate::util::error::GcError;
use crate::util::options::Options;

const PROC_SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

lazy_static! {
    static ref MOUNTINFO_LINE: Regex =
        Regex::new(r"^\d+ \d+ \d+:\d+ \S+ (?P<mountpoint>\S+) [^-]*- (?P<filesystem>\S+)")
            .unwrap();
}

/// A resolved heap backing directory.  Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    path: PathBuf,
}

impl MountPoint {
    /// Resolve the backing directory for the heap described by `options`.
    ///
    /// An explicit `allocate_heap_at` is used as is.  Otherwise the mount table is searched for
    /// the filesystem of `options.heap_backing`.  Anonymous heaps have no mount point.
    pub fn resolve(options: &Options) -> Result<Option<MountPoint>, GcError> {
        if let Some(path) = options.heap_location_override() {
            info!("Heap backing: {} (specified)", path);
            return Ok(Some(MountPoint {
                path: PathBuf::from(path),
            }));
        }
        match options.heap_backing.filesystem() {
            None => Ok(None),
            Some((filesystem, preferred)) => {
                let path = Self::find(filesystem, preferred)?;
                info!("Heap backing: {} ({})", path, filesystem);
                Ok(Some(MountPoint {
                    path: PathBuf::from(path),
                }))
            }
        }
    }

    /// Look up an accessible mount point of `filesystem` in the mount table of this process.
    pub fn find(filesystem: &str, preferred: &[&str]) -> Result<String, GcError> {
        let table = std::fs::read_to_string(PROC_SELF_MOUNTINFO).unwrap_or_else(|e| {
            error!("Failed to open {}: {}", PROC_SELF_MOUNTINFO, e);
            String::new()
        });
        find_mount_point(filesystem, preferred, &table, is_accessible)
    }

    /// A mount point at a known directory.
    pub fn from_path(path: impl Into<PathBuf>) -> MountPoint {
        MountPoint { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Is `path` readable, writable and searchable by the current user?
fn is_accessible(path: &str) -> bool {
    let Ok(cpath) = std::ffi::CString::new(path) else {
        return false;
    };
    unsafe { libc::access(cpath.as_ptr(), libc::R_OK | libc::W_OK | libc::X_OK) == 0 }
}

/// Return the mount point of a mount table line if the line is for `filesystem` and the mount
/// point is accessible.
fn get_mount_point<'a>(
    line: &'a str,
    filesystem: &str,
    accessible: &impl Fn(&str) -> bool,
) -> Option<&'a str> {
    let caps = MOUNTINFO_LINE.captures(line)?;
    let mountpoint = caps.name("mountpoint")?.as_str();
    if caps.name("filesystem")?.as_str() == filesystem && accessible(mountpoint) {
        Some(mountpoint)
    } else {
        None
    }
}

/// Pick the heap backing directory from a mount table.
///
/// * exactly one accessible mount point of `filesystem`: use it;
/// * several: use the first of them that is in `preferred`, otherwise fail and name them all;
/// * none: fail.
pub fn find_mount_point(
    filesystem: &str,
    preferred: &[&str],
    mount_table: &str,
    accessible: impl Fn(&str) -> bool,
) -> Result<String, GcError> {
    let mountpoints: Vec<&str> = mount_table
        .lines()
        .filter_map(|line| get_mount_point(line, filesystem, &accessible))
        .unique()
        .collect();

    match mountpoints.as_slice() {
        [] => {
            error!("Failed to find an accessible {} filesystem", filesystem);
            Err(GcError::NoMountPoint {
                filesystem: filesystem.to_string(),
            })
        }
        [only] => Ok(only.to_string()),
        candidates => {
            if let Some(found) = candidates.iter().find(|m| preferred.contains(*m)) {
                return Ok(found.to_string());
            }
            error!("More than one {} filesystem found:", filesystem);
            for mountpoint in candidates {
                error!("  {}", mountpoint);
            }
            Err(GcError::AmbiguousMountPoint {
                filesystem: filesystem.to_string(),
                candidates: candidates.iter().map(|s| s.to_string()).collect(),
            })
        }
    }
}
