//! POSIX shared memory plumbing.
//!
//! The server creates the object with `shm_open(O_CREAT | O_EXCL)` and maps
//! it read/write. Clients open it `O_RDONLY` and map it `PROT_READ`, so only
//! the server can ever mutate the arena. Degraded mode uses an anonymous
//! private mapping with the same layout.

use std::ffi::CString;
use std::ptr;

use libc::{
    c_int, c_uint, c_void, close, fstat, ftruncate, mmap, munmap, off_t, shm_open, shm_unlink,
    MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, MAP_SHARED, O_CREAT, O_EXCL, O_RDONLY, O_RDWR,
    PROT_READ, PROT_WRITE, S_IRUSR, S_IWUSR,
};

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{ArenaHeader, HEADER_SIZE};

/// POSIX name of an arena: the leading `/` is required.
pub fn shm_name(arena_name: &str) -> String {
    format!("/{}", arena_name.trim_start_matches('/'))
}

fn c_name(name: &str) -> ArenaResult<CString> {
    CString::new(name).map_err(|e| ArenaError::SharedMemory(e.to_string()))
}

/// Create and map a new shared memory region.
///
/// Fails with [`ArenaError::AlreadyExists`] if the object already exists.
pub(crate) fn create_shm(name: &str, size: usize) -> ArenaResult<(*mut u8, c_int)> {
    let c_name = c_name(name)?;

    unsafe {
        // Create shared memory object (fail if exists)
        let fd = shm_open(
            c_name.as_ptr(),
            O_CREAT | O_EXCL | O_RDWR,
            (S_IRUSR | S_IWUSR) as c_uint,
        );

        if fd == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                return Err(ArenaError::AlreadyExists(name.to_string()));
            }
            return Err(ArenaError::SharedMemory(format!(
                "shm_open failed for '{}': {}",
                name, err
            )));
        }

        if ftruncate(fd, size as off_t) == -1 {
            let err = std::io::Error::last_os_error();
            close(fd);
            shm_unlink(c_name.as_ptr());
            return Err(ArenaError::SharedMemory(format!("ftruncate failed: {}", err)));
        }

        let ptr = mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_SHARED,
            fd,
            0,
        );

        if ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            close(fd);
            shm_unlink(c_name.as_ptr());
            return Err(ArenaError::Mmap(format!("mmap failed: {}", err)));
        }

        Ok((ptr as *mut u8, fd))
    }
}

/// Open and map an existing region read-only.
///
/// Returns the pointer, descriptor and the total size read from the header.
pub(crate) fn open_shm_readonly(name: &str) -> ArenaResult<(*mut u8, c_int, usize)> {
    let c_name = c_name(name)?;

    unsafe {
        let fd = shm_open(c_name.as_ptr(), O_RDONLY, 0);

        if fd == -1 {
            let err = std::io::Error::last_os_error();
            return Err(ArenaError::SharedMemory(format!(
                "shm_open failed for '{}': {}",
                name, err
            )));
        }

        // First, map just the header to read the size
        let header_ptr = mmap(ptr::null_mut(), HEADER_SIZE, PROT_READ, MAP_SHARED, fd, 0);

        if header_ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            close(fd);
            return Err(ArenaError::Mmap(format!("mmap header failed: {}", err)));
        }

        let header = &*(header_ptr as *const ArenaHeader);
        if !header.validate() {
            let (magic, version) = (header.magic, header.version);
            munmap(header_ptr, HEADER_SIZE);
            close(fd);
            return Err(ArenaError::InvalidHeader(format!(
                "invalid magic {:x} or version {}",
                magic, version
            )));
        }

        let total_size = header.total_size as usize;
        munmap(header_ptr, HEADER_SIZE);

        let ptr = mmap(ptr::null_mut(), total_size, PROT_READ, MAP_SHARED, fd, 0);

        if ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            close(fd);
            return Err(ArenaError::Mmap(format!("mmap full failed: {}", err)));
        }

        Ok((ptr as *mut u8, fd, total_size))
    }
}

/// Map zeroed process-private memory.
pub(crate) fn map_anonymous(size: usize) -> ArenaResult<*mut u8> {
    unsafe {
        let ptr = mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        );

        if ptr == MAP_FAILED {
            let err = std::io::Error::last_os_error();
            return Err(ArenaError::Mmap(format!("anonymous mmap failed: {}", err)));
        }

        Ok(ptr as *mut u8)
    }
}

/// Unmap and close a mapping.
///
/// # Safety
///
/// Must only be called once per mapping, and no reference into the mapping
/// may outlive the call.
pub(crate) unsafe fn close_shm(ptr: *mut u8, size: usize, fd: c_int) {
    if !ptr.is_null() {
        munmap(ptr as *mut c_void, size);
    }
    if fd >= 0 {
        close(fd);
    }
}

fn identity(fd: c_int) -> Option<(u64, u64)> {
    // SAFETY: `stat` is plain data and fully written by a successful fstat.
    unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        if fstat(fd, &mut st) == -1 {
            return None;
        }
        Some((st.st_dev as u64, st.st_ino as u64))
    }
}

/// Whether `name` still refers to the object behind `fd`. False once the
/// name has been unlinked or taken over by a newer object.
pub(crate) fn still_named(name: &str, fd: c_int) -> bool {
    let Ok(c_name) = c_name(name) else {
        return false;
    };
    // SAFETY: the descriptor opened here is closed before returning.
    unsafe {
        let current = shm_open(c_name.as_ptr(), O_RDONLY, 0);
        if current == -1 {
            return false;
        }
        let same = match (identity(fd), identity(current)) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        };
        close(current);
        same
    }
}

/// Remove the shared memory object.
pub(crate) fn unlink_shm(name: &str) -> ArenaResult<()> {
    let c_name = c_name(name)?;

    unsafe {
        if shm_unlink(c_name.as_ptr()) == -1 {
            let err = std::io::Error::last_os_error();
            // ENOENT is ok - already unlinked
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ArenaError::SharedMemory(format!("shm_unlink failed: {}", err)));
            }
        }
    }
    Ok(())
}
