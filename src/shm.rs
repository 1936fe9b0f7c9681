//! POSIX named shared memory.
//!
//! One fixed-size region backs the whole channel. Either peer may create it:
//! the object is opened with `O_CREAT | O_RDWR` so start order does not
//! matter, and a freshly created object is zero-filled by the kernel once
//! `ftruncate` sizes it. The descriptor is closed right after `mmap`; the
//! mapping survives until drop. The consumer owns removal of the name.

use std::ffi::CString;
use std::io;
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};

fn resource_err(op: &'static str, name: &str) -> Error {
    Error::Resource {
        op,
        name: name.to_string(),
        source: io::Error::last_os_error(),
    }
}

/// A mapped, named shared memory region. Unmapped on drop; the name persists
/// until [`ShmRegion::unlink`].
pub struct ShmRegion {
    base: NonNull<u8>,
    len: usize,
    name: String,
}

// The mapping is process-shared by design; synchronization is the caller's
// problem (the channel's spin flag).
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Open (creating and sizing if necessary) the named region and map it
    /// read/write.
    pub fn open(name: &str, len: usize) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| Error::Resource {
            op: "shm_open",
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"),
        })?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(resource_err("shm_open", name));
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let err = resource_err("ftruncate", name);
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(resource_err("mmap", name));
        }

        Ok(ShmRegion {
            // mmap never returns NULL on success.
            base: NonNull::new(mem as *mut u8).ok_or_else(|| resource_err("mmap", name))?,
            len,
            name: name.to_string(),
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name from the system. Existing mappings stay valid.
    pub fn unlink(name: &str) {
        if let Ok(c_name) = CString::new(name) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}
