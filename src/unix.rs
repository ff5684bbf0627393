//! POSIX platform primitives: a file handle, a reserved address range, and
//! the two kinds of view mapped into it.

use std::ffi::CString;
use std::io;
use std::path::Path;
use std::ptr::{self, NonNull};

use crate::ext::ResultExt;
use crate::mode::OpenMode;

/// An owned OS file descriptor.
pub struct RawFile {
    fd: libc::c_int,
    len: u64,
}

impl RawFile {
    /// Opens `path` with the given access mode. With
    /// [`OpenMode::CreateOrOpenReadWrite`], the file is created empty if it
    /// does not already exist.
    pub fn open(path: &Path, mode: OpenMode) -> io::Result<Self> {
        let cpath = cstr(path)?;

        let flags = match mode {
            OpenMode::ReadOnly => libc::O_RDONLY,
            OpenMode::ReadWrite => libc::O_RDWR,
            OpenMode::CreateOrOpenReadWrite => libc::O_RDWR | libc::O_CREAT,
        };

        let writable = !matches!(mode, OpenMode::ReadOnly);

        // SAFETY: cpath is a valid null-terminated string built from a Path.
        // Every later call uses the fd returned by a successful open, and
        // errors clean up the fd before propagating.
        let fd = unsafe {
            let fd = ffi::open(&cpath, flags)?;

            // Advisory lock over the whole file: best-effort protection
            // against other processes writing the same bytes concurrently.
            ffi::lock(fd, writable).cleanup(|| ffi::close(fd))?;

            fd
        };

        let len = unsafe { ffi::fstat_len(fd) }.map_err(|err| {
            unsafe {
                let _ = ffi::close(fd);
            }
            err
        })?;

        Ok(Self { fd, len })
    }

    /// Current on-disk length.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Sets the on-disk length exactly to `new_len`, growing or shrinking.
    pub fn truncate(&mut self, new_len: u64) -> io::Result<()> {
        unsafe { ffi::truncate(self.fd, new_len as libc::off_t)? };
        self.len = new_len;
        Ok(())
    }

    /// Maps this file's whole current length at an OS-chosen address.
    pub fn map_plain(&self, len: usize, writable: bool) -> io::Result<PlainView> {
        PlainView::map(self.fd, len, writable)
    }

    /// Maps `len` bytes of this file at the fixed address `base`, which must
    /// lie inside an address range owned by the caller with no other live
    /// mapping over it.
    ///
    /// # Safety
    ///
    /// Same requirements as [`FixedView::map`].
    pub unsafe fn map_fixed(&self, base: *mut u8, len: usize, writable: bool) -> io::Result<FixedView> {
        FixedView::map(self.fd, base, len, writable)
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe {
            let _ = ffi::unlock(self.fd);
            let _ = ffi::close(self.fd);
        }
    }
}

// SAFETY: RawFile owns exactly one fd with no interior aliasing; all
// mutation goes through &mut self.
unsafe impl Send for RawFile {}
unsafe impl Sync for RawFile {}

/// A contiguous range of `capacity` bytes of virtual address space with no
/// accessible pages, reserved via an anonymous `PROT_NONE` mapping.
pub struct Reservation {
    base: NonNull<libc::c_void>,
    capacity: usize,
}

impl Reservation {
    /// Reserves `capacity` bytes of address space. No page within the range
    /// is accessible until committed by the caller.
    pub fn new(capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "capacity must be greater than zero",
            ));
        }

        // SAFETY: a fresh anonymous mapping with no backing file; the
        // returned pointer is checked against MAP_FAILED below.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            // mmap never returns a null pointer on success.
            base: NonNull::new(ptr).expect("mmap succeeded with a null pointer"),
            capacity,
        })
    }

    /// The base address of the reservation.
    pub fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr() as *mut u8
    }

    /// The fixed capacity of the reservation, in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commits `[ptr, ptr + len)`, which must lie within this reservation,
    /// granting read/write access.
    pub fn commit(&self, ptr: *mut u8, len: usize) -> io::Result<()> {
        protect_read_write(ptr, len)
    }

    /// Decommits `[ptr, ptr + len)`: revokes access and releases the
    /// physical pages backing it, leaving the address range reserved.
    pub fn decommit(&self, ptr: *mut u8, len: usize) -> io::Result<()> {
        protect_none(ptr, len)?;
        advise_dontneed(ptr, len)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        unsafe {
            // Revert the whole range to PROT_NONE before releasing it, in
            // case a committed view within it was not already unmapped -
            // this avoids handing back dangling committed pages to the
            // allocator.
            let _ = libc::mmap(
                self.base.as_ptr(),
                self.capacity,
                libc::PROT_NONE,
                libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
                -1,
                0,
            );
            let _ = libc::munmap(self.base.as_ptr(), self.capacity);
        }
    }
}

// SAFETY: the reservation is exclusively owned; no aliasing reservation can
// exist over the same range.
unsafe impl Send for Reservation {}
unsafe impl Sync for Reservation {}

/// A file-backed view mapped at a fixed address inside a [`Reservation`],
/// used by the resizable file-backed mapping so its base address never
/// moves across a resize.
pub struct FixedView {
    base: NonNull<libc::c_void>,
    len: usize,
}

impl FixedView {
    /// Maps `len` bytes of `fd` at the fixed address `base`, replacing
    /// whatever reservation or view currently occupies that range.
    ///
    /// # Safety
    ///
    /// `base` must lie within a reservation of at least `len` bytes owned
    /// by the caller, with no other live view over the same range.
    pub unsafe fn map(
        fd: libc::c_int,
        base: *mut u8,
        len: usize,
        writable: bool,
    ) -> io::Result<Self> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };

        let ptr = libc::mmap(
            base as *mut libc::c_void,
            len,
            prot,
            libc::MAP_FIXED | libc::MAP_SHARED,
            fd,
            0,
        );

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            base: NonNull::new(ptr).expect("mmap succeeded with a null pointer"),
            len,
        })
    }

    /// The address of the view (equal to `base` passed to [`FixedView::map`]).
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr() as *mut u8
    }

    /// The mapped length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Flushes the whole view synchronously to disk.
    pub fn flush_all(&self) -> io::Result<()> {
        self.flush(0, self.len)
    }

    /// Flushes `[offset, offset + len)` of this view synchronously to disk.
    pub fn flush(&self, offset: usize, len: usize) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        unsafe {
            let ptr = self
                .base
                .as_ptr()
                .cast::<u8>()
                .add(offset)
                .cast::<libc::c_void>();
            if libc::msync(ptr, len, libc::MS_SYNC) == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }
}

impl Drop for FixedView {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::munmap(self.base.as_ptr(), self.len);
        }
    }
}

// SAFETY: a FixedView is exclusively owned; reads/writes through it follow
// the access mode of the owning type.
unsafe impl Send for FixedView {}
unsafe impl Sync for FixedView {}

/// A single, non-fixed-address mapping of an entire file, used by the
/// whole-file (non-resizable) mappings.
pub struct PlainView {
    base: NonNull<libc::c_void>,
    len: usize,
}

impl PlainView {
    /// Maps `len` bytes of `fd` at an OS-chosen address.
    pub fn map(fd: libc::c_int, len: usize, writable: bool) -> io::Result<Self> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };

        // SAFETY: fd is a valid, open file descriptor for the duration of
        // this call; len is non-zero (checked by the caller).
        let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            base: NonNull::new(ptr).expect("mmap succeeded with a null pointer"),
            len,
        })
    }

    /// Read-only pointer to the mapped bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr() as *const u8
    }

    /// Mutable pointer to the mapped bytes. Callers are responsible for
    /// only using this on a writable mapping.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr() as *mut u8
    }

    /// The mapped length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Flushes the whole mapping synchronously to disk.
    pub fn flush(&self) -> io::Result<()> {
        unsafe {
            if libc::msync(self.base.as_ptr(), self.len, libc::MS_SYNC) == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }
}

impl Drop for PlainView {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::munmap(self.base.as_ptr(), self.len);
        }
    }
}

// SAFETY: see FixedView.
unsafe impl Send for PlainView {}
unsafe impl Sync for PlainView {}

/// Grants read/write access to `[ptr, ptr + len)`, which must lie within a
/// live reservation. Used to commit pages of a resizable anonymous region.
pub fn protect_read_write(ptr: *mut u8, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    unsafe {
        if libc::mprotect(ptr.cast(), len, libc::PROT_READ | libc::PROT_WRITE) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Revokes access to `[ptr, ptr + len)` without releasing the address range.
pub fn protect_none(ptr: *mut u8, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    unsafe {
        if libc::mprotect(ptr.cast(), len, libc::PROT_NONE) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Hints to the OS that the physical pages backing `[ptr, ptr + len)` can be
/// released; the virtual range remains reserved.
pub fn advise_dontneed(ptr: *mut u8, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    unsafe {
        if libc::madvise(ptr.cast(), len, libc::MADV_DONTNEED) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Re-establishes an inaccessible anonymous mapping over `[ptr, ptr + len)`,
/// reclaiming a range previously vacated by dropping a [`FixedView`] so the
/// address is not left as a bare hole other allocations in the process could
/// land in.
pub fn reclaim(ptr: *mut u8, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    unsafe {
        let result = libc::mmap(
            ptr.cast(),
            len,
            libc::PROT_NONE,
            libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
            -1,
            0,
        );

        if result == libc::MAP_FAILED {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// The OS page size.
pub fn get_alignment() -> usize {
    // SAFETY: A simple call to the function with a valid option name.
    let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    // This should not happen, because sysconf returns -1 only if (1) the
    // option name is invalid, (2) the option is a limit and that limit is
    // indeterminate, (3) the option is not supported. PAGESIZE is a valid,
    // non-limit, POSIX.1 variable, so its support should be ubiquitous.
    if result == -1 {
        4096
    } else {
        result as usize
    }
}

fn cstr(path: &Path) -> io::Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    Ok(CString::new(path.as_os_str().as_bytes())?)
}

mod ffi {
    use std::ffi::CStr;
    use std::io;

    pub unsafe fn open(path: &CStr, flags: libc::c_int) -> io::Result<libc::c_int> {
        // Sets read/write permission for the user only on newly-created
        // files; has no effect on files that already existed.
        let fd = libc::open(path.as_ptr(), flags, libc::S_IRUSR | libc::S_IWUSR);

        if fd == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    pub unsafe fn truncate(fd: libc::c_int, len: libc::off_t) -> io::Result<()> {
        if libc::ftruncate(fd, len) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn close(fd: libc::c_int) -> io::Result<()> {
        if libc::close(fd) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn fstat_len(fd: libc::c_int) -> io::Result<u64> {
        let mut stat: libc::stat = std::mem::zeroed();
        if libc::fstat(fd, &mut stat) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(stat.st_size as u64)
        }
    }

    pub unsafe fn lock(fd: libc::c_int, exclusive: bool) -> io::Result<()> {
        let lock_type = if exclusive {
            libc::F_WRLCK
        } else {
            libc::F_RDLCK
        };

        let flock = libc::flock {
            l_type: lock_type as libc::c_short,
            l_whence: libc::SEEK_SET as libc::c_short,
            l_start: 0,
            l_len: 0,
            l_pid: libc::getpid(),
            #[cfg(target_os = "freebsd")]
            l_sysid: 0,
        };

        // Advisory lock over the whole file; best-effort protection against
        // other processes racing the same bytes, not a hard guarantee.
        if libc::fcntl(fd, libc::F_SETLK, &flock) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn unlock(fd: libc::c_int) -> io::Result<()> {
        let flock = libc::flock {
            l_type: libc::F_UNLCK as libc::c_short,
            l_whence: libc::SEEK_SET as libc::c_short,
            l_start: 0,
            l_len: 0,
            l_pid: libc::getpid(),
            #[cfg(target_os = "freebsd")]
            l_sysid: 0,
        };

        if libc::fcntl(fd, libc::F_SETLK, &flock) == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
