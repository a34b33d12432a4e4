//! Errors reported by the collector.
//!
//! Configuration errors are fatal and surface from [`crate::Collector::new`].  Running out of mark
//! stack space is reported as [`MarkStackExhausted`] and is handled inside the cycle driver; it
//! never reaches the VM.

use std::fmt;

use itertools::Itertools;

/// Errors that prevent a collector from being created.
#[derive(Debug)]
pub enum GcError {
    /// No mounted filesystem of the requested type is accessible by the current user.
    NoMountPoint { filesystem: String },
    /// More than one accessible mount point was found and none of them is preferred.
    AmbiguousMountPoint {
        filesystem: String,
        candidates: Vec<String>,
    },
    /// An option has a value the collector cannot run with.
    InvalidOption { name: &'static str, reason: String },
    /// Not all worker threads of a pool could be started.
    WorkerStartup {
        pool: String,
        requested: usize,
        started: usize,
        source: std::io::Error,
    },
    /// Reserving or committing heap memory failed.
    Memory {
        what: &'static str,
        bytes: usize,
        source: std::io::Error,
    },
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::NoMountPoint { filesystem } => {
                write!(f, "Failed to find an accessible {} filesystem", filesystem)
            }
            GcError::AmbiguousMountPoint {
                filesystem,
                candidates,
            } => write!(
                f,
                "More than one {} filesystem found: {}",
                filesystem,
                candidates.iter().join(", ")
            ),
            GcError::InvalidOption { name, reason } => {
                write!(f, "Invalid option {}: {}", name, reason)
            }
            GcError::WorkerStartup {
                pool,
                requested,
                started,
                source,
            } => write!(
                f,
                "Failed to start {} workers: started {} of {} ({})",
                pool, started, requested, source
            ),
            GcError::Memory {
                what,
                bytes,
                source,
            } => write!(f, "Failed to map {} ({} bytes): {}", what, bytes, source),
        }
    }
}

impl std::error::Error for GcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GcError::WorkerStartup { source, .. } | GcError::Memory { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The mark stack space cannot grow any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkStackExhausted {
    /// The number of bytes that were requested.
    pub requested: usize,
    /// The configured mark stack space limit.
    pub limit: usize,
}

impl fmt::Display for MarkStackExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Out of mark stack space: requested {} bytes, limit {} bytes",
            self.requested, self.limit
        )
    }
}

impl std::error::Error for MarkStackExhausted {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_mount_point_lists_all_candidates() {
        let err = GcError::AmbiguousMountPoint {
            filesystem: "tmpfs".to_string(),
            candidates: vec!["/a".to_string(), "/b".to_string()],
        };
        assert_eq!(err.to_string(), "More than one tmpfs filesystem found: /a, /b");
    }
}
