//! Where heap memory comes from: anonymous memory or a file on a resolved mount point, and which
//! NUMA node a piece of it lives on.

pub mod mount_point;
pub mod numa;

#[cfg(target_os = "linux")]
pub mod file_backed;

use std::sync::Arc;

use crate::util::error::GcError;
use crate::util::options::Options;
use crate::util::os::{AnonymousMemory, MmapAnnotation, VirtualMemory};

pub use mount_point::MountPoint;
pub use numa::Numa;

/// Create the virtual memory provider for the heap described by `options`.
pub fn heap_memory(options: &Options) -> Result<Arc<dyn VirtualMemory>, GcError> {
    match MountPoint::resolve(options)? {
        None => Ok(Arc::new(AnonymousMemory::new(MmapAnnotation::Heap))),
        #[cfg(target_os = "linux")]
        Some(mount) => Ok(Arc::new(file_backed::FileBackedMemory::create(&mount)?)),
        #[cfg(not(target_os = "linux"))]
        Some(mount) => {
            warn!(
                "File backed heaps are only supported on Linux. Ignoring {}",
                mount.path().display()
            );
            Ok(Arc::new(AnonymousMemory::new(MmapAnnotation::Heap)))
        }
    }
}
