use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::mount_point::MountPoint;
use crate::util::address::Address;
use crate::util::error::GcError;
use crate::util::os::*;

/// Heap memory backed by a shared file on a `tmpfs` or `hugetlbfs` mount.
///
/// The file is unlinked as soon as it is created, so it disappears with the process.  Offsets in
/// the file are offsets from the start of the (only) reservation, and committing a range maps the
/// matching part of the file over it.
pub struct FileBackedMemory {
    file: File,
    path: PathBuf,
    /// start and size of the reservation, if any.
    reservation: Mutex<Option<(Address, usize)>>,
}

impl FileBackedMemory {
    pub fn create(mount: &MountPoint) -> std::result::Result<Self, GcError> {
        static FILE_ID: AtomicUsize = AtomicUsize::new(0);
        let path = mount.path().join(format!(
            "rgc.heap.{}.{}",
            std::process::id(),
            FILE_ID.fetch_add(1, Ordering::Relaxed)
        ));
        let to_gc_error = |source| GcError::Memory {
            what: "heap backing file",
            bytes: 0,
            source,
        };
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(to_gc_error)?;
        std::fs::remove_file(&path).map_err(to_gc_error)?;
        info!("Heap backing file: {} (unlinked)", path.display());
        Ok(Self {
            file,
            path,
            reservation: Mutex::new(None),
        })
    }

    fn offset_of(&self, start: Address, bytes: usize) -> Result<libc::off_t> {
        match *self.reservation.lock().unwrap() {
            Some((base, size)) if start >= base && start + bytes <= base + size => {
                Ok((start - base) as libc::off_t)
            }
            _ => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} + {} is not inside the heap reservation", start, bytes),
            )),
        }
    }

    fn fallocate(&self, mode: libc::c_int, offset: libc::off_t, bytes: usize) -> Result<()> {
        let fd = self.file.as_raw_fd();
        wrap_libc_call(
            &|| unsafe { libc::fallocate(fd, mode, offset, bytes as libc::off_t) },
            0,
        )
    }
}

impl VirtualMemory for FileBackedMemory {
    fn reserve(&self, bytes: usize, align: usize) -> Result<Address> {
        let mut reservation = self.reservation.lock().unwrap();
        if reservation.is_some() {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already backs a reservation", self.path.display()),
            ));
        }
        let start = reserve_aligned(bytes, align)?;
        if let Err(e) = self.file.set_len(bytes as u64) {
            munmap(start, bytes)?;
            return Err(e);
        }
        *reservation = Some((start, bytes));
        Ok(start)
    }

    fn commit(&self, start: Address, bytes: usize) -> Result<()> {
        let offset = self.offset_of(start, bytes)?;
        // Allocate the file pages up front.  A full tmpfs then fails here instead of raising
        // SIGBUS on first touch.
        self.fallocate(0, offset, bytes)?;
        let fd = self.file.as_raw_fd();
        let prot = MmapProtection::ReadWrite.get_native_flags();
        let flags = libc::MAP_SHARED | libc::MAP_FIXED;
        let ptr = start.to_mut_ptr();
        wrap_libc_call(
            &|| unsafe { libc::mmap(ptr, bytes, prot, flags, fd, offset) },
            ptr,
        )
    }

    fn uncommit(&self, start: Address, bytes: usize) -> Result<()> {
        let offset = self.offset_of(start, bytes)?;
        mmap_noaccess(start, bytes)?;
        self.fallocate(
            libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
            offset,
            bytes,
        )
    }

    fn protect(&self, start: Address, bytes: usize, prot: MmapProtection) -> Result<()> {
        mprotect(start, bytes, prot)
    }

    fn release(&self, start: Address, bytes: usize) -> Result<()> {
        let mut reservation = self.reservation.lock().unwrap();
        if *reservation != Some((start, bytes)) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} + {} is not the heap reservation", start, bytes),
            ));
        }
        munmap(start, bytes)?;
        *reservation = None;
        self.file.set_len(0)
    }
}
