use std::io::Result;

use super::memory::*;
use crate::util::address::Address;
use crate::util::constants::BYTES_IN_PAGE;

impl MmapProtection {
    pub(crate) fn get_native_flags(&self) -> i32 {
        use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
        match self {
            Self::ReadWrite => PROT_READ | PROT_WRITE,
            Self::ReadOnly => PROT_READ,
            Self::NoAccess => PROT_NONE,
        }
    }
}

pub(crate) fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Map `bytes` of inaccessible, unbacked address space aligned to `align`.
pub(crate) fn reserve_aligned(bytes: usize, align: usize) -> Result<Address> {
    let align = std::cmp::max(align, BYTES_IN_PAGE);
    let padded = bytes + align;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            padded,
            libc::PROT_NONE,
            flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    let raw = Address::from_mut_ptr(ptr);
    let start = raw.align_up(align);
    // Trim the unaligned head and the unused tail.
    if start > raw {
        munmap(raw, start - raw)?;
    }
    let tail = start + bytes;
    let raw_end = raw + padded;
    if raw_end > tail {
        munmap(tail, raw_end - tail)?;
    }
    Ok(start)
}

pub(crate) fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

pub(crate) fn mprotect(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot.get_native_flags()) },
        0,
    )
}

/// Replace `[start, start + size)` with an inaccessible, unbacked mapping.
pub(crate) fn mmap_noaccess(start: Address, size: usize) -> Result<()> {
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_FIXED;
    let ptr = start.to_mut_ptr();
    wrap_libc_call(
        &|| unsafe { libc::mmap(ptr, size, libc::PROT_NONE, flags, -1, 0) },
        ptr,
    )
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn set_vma_name(start: Address, size: usize, annotation: MmapAnnotation) {
    // `PR_SET_VMA` is new in Linux 5.17.  Older kernels return `EINVAL`, so do other invalid
    // arguments.  This is for debugging only, so log instead of failing.
    let anno_cstr = match std::ffi::CString::new(annotation.to_string()) {
        Ok(s) => s,
        Err(_) => return,
    };
    let result = wrap_libc_call(
        &|| unsafe {
            libc::prctl(
                libc::PR_SET_VMA,
                libc::PR_SET_VMA_ANON_NAME,
                start.to_ptr::<libc::c_void>(),
                size,
                anno_cstr.as_ptr(),
            )
        },
        0,
    );
    if let Err(e) = result {
        debug!("Error while calling prctl: {e}");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_vma_name(_start: Address, _size: usize, _annotation: MmapAnnotation) {}

/// Private anonymous memory from the OS.
#[derive(Debug)]
pub struct AnonymousMemory {
    annotation: MmapAnnotation,
}

impl AnonymousMemory {
    pub fn new(annotation: MmapAnnotation) -> Self {
        Self { annotation }
    }
}

impl VirtualMemory for AnonymousMemory {
    fn reserve(&self, bytes: usize, align: usize) -> Result<Address> {
        reserve_aligned(bytes, align)
    }

    fn commit(&self, start: Address, bytes: usize) -> Result<()> {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED;
        let prot = MmapProtection::ReadWrite.get_native_flags();
        let ptr = start.to_mut_ptr();
        wrap_libc_call(
            &|| unsafe { libc::mmap(ptr, bytes, prot, flags, -1, 0) },
            ptr,
        )?;
        set_vma_name(start, bytes, self.annotation);
        Ok(())
    }

    fn uncommit(&self, start: Address, bytes: usize) -> Result<()> {
        mmap_noaccess(start, bytes)
    }

    fn protect(&self, start: Address, bytes: usize, prot: MmapProtection) -> Result<()> {
        mprotect(start, bytes, prot)
    }

    fn release(&self, start: Address, bytes: usize) -> Result<()> {
        munmap(start, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_release() {
        let memory = AnonymousMemory::new(MmapAnnotation::Test);
        let align = 1 << 20;
        let start = memory.reserve(4 * BYTES_IN_PAGE, align).unwrap();
        assert!(start.is_aligned_to(align));

        memory.commit(start, 2 * BYTES_IN_PAGE).unwrap();
        unsafe {
            assert_eq!(start.load::<usize>(), 0);
            start.store::<usize>(42);
            assert_eq!(start.load::<usize>(), 42);
        }

        // Uncommitting and committing again gives zeroed memory.
        memory.uncommit(start, 2 * BYTES_IN_PAGE).unwrap();
        memory.commit(start, BYTES_IN_PAGE).unwrap();
        unsafe {
            assert_eq!(start.load::<usize>(), 0);
        }

        memory
            .protect(start, BYTES_IN_PAGE, MmapProtection::ReadOnly)
            .unwrap();
        memory.release(start, 4 * BYTES_IN_PAGE).unwrap();
    }
}
