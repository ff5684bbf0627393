//! Windows platform primitives: a file handle, a reserved address range, a
//! section, and the two kinds of view mapped from it.
//!
//! Unlike POSIX, Windows has no API to extend a committed view of a section
//! in place, nor (in the subset of the Win32 API surface exposed by the
//! `winapi` crate used here) a placeholder-VM API to atomically swap a
//! reservation for a view at the same address. [`ResizableFile::resize`]
//! therefore uses the classic workaround: free the reservation's address
//! range, then immediately reopen the section's view at that now-free
//! address via `MapViewOfFileEx`'s explicit `lpBaseAddress`. There is a
//! narrow window, internal to `resize` and never observable by a caller
//! (resize takes `&mut self`), during which the address is unreserved.

use std::io;
use std::path::Path;
use std::ptr::NonNull;

use winapi::shared::minwindef::DWORD;
use winapi::um::fileapi::{CREATE_NEW, OPEN_EXISTING};
use winapi::um::memoryapi::{FILE_MAP_ALL_ACCESS, FILE_MAP_READ};
use winapi::um::winbase::FILE_FLAG_RANDOM_ACCESS;
use winapi::um::winnt::{
    FILE_ATTRIBUTE_NORMAL, FILE_ATTRIBUTE_READONLY, FILE_SHARE_READ, GENERIC_READ, GENERIC_WRITE,
    PAGE_READONLY, PAGE_READWRITE,
};

use crate::ext::ResultExt;
use crate::mode::OpenMode;

/// An owned OS file handle.
pub struct RawFile {
    handle: ffi::RawHandle,
    len: u64,
}

impl RawFile {
    /// Opens `path` with the given access mode. With
    /// [`OpenMode::CreateOrOpenReadWrite`], the file is created empty if it
    /// does not already exist.
    pub fn open(path: &Path, mode: OpenMode) -> io::Result<Self> {
        let exists = path.exists();
        let wpath = lpcwstr(path);

        let (desired_access, share_mode, attributes) = match mode {
            OpenMode::ReadOnly => (
                GENERIC_READ,
                FILE_SHARE_READ,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_RANDOM_ACCESS | FILE_ATTRIBUTE_READONLY,
            ),
            OpenMode::ReadWrite | OpenMode::CreateOrOpenReadWrite => (
                GENERIC_READ | GENERIC_WRITE,
                0,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_RANDOM_ACCESS,
            ),
        };

        let creation = if exists {
            OPEN_EXISTING
        } else if mode == OpenMode::CreateOrOpenReadWrite {
            CREATE_NEW
        } else {
            OPEN_EXISTING
        };

        let handle = unsafe {
            let handle =
                ffi::create_file(&wpath, desired_access, share_mode, creation, attributes)?;
            // TODO: lock the file using LockFileEx, matching the advisory
            // lock taken on open by the unix counterpart.
            handle
        };

        let len = unsafe { ffi::file_size(handle) }.map_err(|err| {
            unsafe {
                let _ = ffi::close(handle);
            }
            err
        })?;

        Ok(Self { handle, len })
    }

    /// Current on-disk length.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Sets the on-disk length exactly to `new_len`, growing or shrinking.
    pub fn truncate(&mut self, new_len: u64) -> io::Result<()> {
        unsafe { ffi::resize_file(self.handle, new_len)? };
        self.len = new_len;
        Ok(())
    }

    pub(crate) fn as_raw_handle(&self) -> ffi::RawHandle {
        self.handle
    }

    /// Maps this file's whole current length at an OS-chosen address.
    ///
    /// Creates a transient section to back the view; per Win32 semantics
    /// the section handle can be closed immediately after the view is
    /// created without invalidating the view.
    pub fn map_plain(&self, len: usize, writable: bool) -> io::Result<PlainView> {
        let section = Section::new(self, writable)?;
        section.view(len, writable)
    }

    /// Maps `len` bytes of this file at the fixed address `base`, which must
    /// lie inside an address range just released via
    /// [`Reservation::release_for_remap`].
    ///
    /// # Safety
    ///
    /// Same requirements as [`Section::view_at`].
    pub unsafe fn map_fixed(&self, base: *mut u8, len: usize, writable: bool) -> io::Result<FixedView> {
        let section = Section::new(self, writable)?;
        section.view_at(base, len, writable)
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe {
            let _ = ffi::close(self.handle);
        }
    }
}

// SAFETY: RawFile owns exactly one handle with no interior aliasing; all
// mutation goes through &mut self.
unsafe impl Send for RawFile {}
unsafe impl Sync for RawFile {}

/// A contiguous range of `capacity` bytes of virtual address space, reserved
/// via `VirtualAlloc(MEM_RESERVE)`.
///
/// Reserving and freeing this range is cheap and, crucially, freeing it does
/// not give the address away to other allocations immediately under normal
/// process behavior, which is what lets [`ResizableFile::resize`] free it
/// and immediately re-map a view at the same address. This is the documented
/// simplification described in the module's top-level docs.
pub struct Reservation {
    base: NonNull<winapi::ctypes::c_void>,
    capacity: usize,
    /// `false` once the address range has been handed off to a view and the
    /// reservation itself has been released; `Drop` then has nothing to
    /// free.
    materialized: bool,
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

        let base = unsafe { ffi::reserve(capacity)? };

        Ok(Self {
            base,
            capacity,
            materialized: true,
        })
    }

    /// Re-reserves `capacity` bytes of address space at the exact address
    /// `base`, previously freed by [`Reservation::release_for_remap`].
    ///
    /// # Safety
    ///
    /// `base` must name an address range of at least `capacity` bytes not
    /// currently occupied by any other mapping.
    pub unsafe fn at(base: *mut u8, capacity: usize) -> io::Result<Self> {
        let base = ffi::reserve_at(base, capacity)?;
        Ok(Self {
            base,
            capacity,
            materialized: true,
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

    /// Releases the reservation's address range back to the system without
    /// consuming `self`, so the exact same range can immediately be reused
    /// by a fixed-address `MapViewOfFileEx`. After this call the reservation
    /// no longer owns any address range; `self` must be discarded by the
    /// caller (it is replaced with a fresh [`Section`] view covering the
    /// same range).
    ///
    /// # Safety
    ///
    /// The caller must not use `self` again except to drop it, and must
    /// re-map the freed range before any other thread could otherwise
    /// reserve or allocate over it. This crate only calls this with `&mut
    /// self` held behind a `ResizableFile`, which is itself `&mut` for the
    /// whole of `resize`, so no such race exists for callers of this crate.
    pub unsafe fn release_for_remap(&mut self) -> io::Result<()> {
        if self.materialized {
            ffi::release(self.base, self.capacity)?;
            self.materialized = false;
        }
        Ok(())
    }

    /// Commits `[ptr, ptr + len)`, which must lie within this reservation,
    /// granting read/write access.
    pub fn commit(&self, ptr: *mut u8, len: usize) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        unsafe { ffi::commit(ptr, len) }
    }

    /// Decommits `[ptr, ptr + len)`, releasing its physical pages while
    /// leaving the address range reserved.
    pub fn decommit(&self, ptr: *mut u8, len: usize) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        unsafe { ffi::decommit(ptr, len) }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.materialized {
            unsafe {
                let _ = ffi::release(self.base, self.capacity);
            }
        }
    }
}

// SAFETY: the reservation is exclusively owned; no aliasing reservation can
// exist over the same range.
unsafe impl Send for Reservation {}
unsafe impl Sync for Reservation {}

/// A memory-mapped-file section, created from a [`RawFile`], sized to the
/// file's current length.
pub struct Section {
    handle: ffi::RawHandle,
    protect: DWORD,
}

impl Section {
    /// Creates a section covering the whole of `file` at its current length.
    pub fn new(file: &RawFile, writable: bool) -> io::Result<Self> {
        let protect = if writable {
            PAGE_READWRITE
        } else {
            PAGE_READONLY
        };
        let handle = unsafe { ffi::create_mapping(file.as_raw_handle(), protect)? };
        Ok(Self { handle, protect })
    }

    /// Maps `len` bytes of this section at an OS-chosen address.
    pub fn view(&self, len: usize, writable: bool) -> io::Result<PlainView> {
        let desired_access = if writable {
            FILE_MAP_ALL_ACCESS
        } else {
            FILE_MAP_READ
        };
        let ptr = unsafe { ffi::map_view(self.handle, desired_access, len, 0, None)? };
        Ok(PlainView { ptr, len })
    }

    /// Maps `len` bytes of this section at the fixed address `base`, which
    /// must lie inside an address range just released via
    /// [`Reservation::release_for_remap`].
    ///
    /// # Safety
    ///
    /// `base` must name an address range of at least `len` bytes not
    /// currently occupied by any other mapping.
    pub unsafe fn view_at(&self, base: *mut u8, len: usize, writable: bool) -> io::Result<FixedView> {
        let desired_access = if writable {
            FILE_MAP_ALL_ACCESS
        } else {
            FILE_MAP_READ
        };
        let ptr = ffi::map_view(self.handle, desired_access, len, 0, Some(base))?;
        Ok(FixedView { ptr, len })
    }
}

impl Drop for Section {
    fn drop(&mut self) {
        unsafe {
            let _ = ffi::close(self.handle);
        }
    }
}

// SAFETY: exclusively owned, like RawFile.
unsafe impl Send for Section {}
unsafe impl Sync for Section {}

/// A view mapped at a fixed address, used by the resizable file-backed
/// mapping so its base address never moves across a resize.
pub struct FixedView {
    ptr: ffi::RawPtr,
    len: usize,
}

impl FixedView {
    /// The address of the view.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }

    /// The mapped length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Flushes the whole view synchronously to disk.
    pub fn flush_all(&self) -> io::Result<()> {
        unsafe { ffi::flush_view(self.ptr, self.len) }
    }

    /// Flushes `[offset, offset + len)` of this view synchronously to disk.
    pub fn flush(&self, offset: usize, len: usize) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        unsafe {
            let ptr = self.ptr.as_ptr().cast::<u8>().add(offset).cast();
            ffi::flush_view(NonNull::new_unchecked(ptr), len)
        }
    }
}

impl Drop for FixedView {
    fn drop(&mut self) {
        unsafe {
            let _ = ffi::unmap_view(self.ptr);
        }
    }
}

// SAFETY: exclusively owned.
unsafe impl Send for FixedView {}
unsafe impl Sync for FixedView {}

/// A single, OS-chosen-address mapping of an entire file, used by the
/// whole-file (non-resizable) mappings.
pub struct PlainView {
    ptr: ffi::RawPtr,
    len: usize,
}

impl PlainView {
    /// Read-only pointer to the mapped bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr() as *const u8
    }

    /// Mutable pointer to the mapped bytes. Callers are responsible for
    /// only using this on a writable mapping.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }

    /// The mapped length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Flushes the whole mapping synchronously to disk.
    pub fn flush(&self) -> io::Result<()> {
        unsafe { ffi::flush_view(self.ptr, self.len) }
    }
}

impl Drop for PlainView {
    fn drop(&mut self) {
        unsafe {
            let _ = ffi::unmap_view(self.ptr);
        }
    }
}

// SAFETY: exclusively owned.
unsafe impl Send for PlainView {}
unsafe impl Sync for PlainView {}

/// The OS allocation granularity.
pub fn get_alignment() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    let mut system_info = SYSTEM_INFO::default();
    unsafe {
        GetSystemInfo(&mut system_info as *mut _);
    }
    system_info.dwAllocationGranularity as usize
}

fn lpcwstr(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    let mut wstr = path.as_os_str().encode_wide().collect::<Vec<_>>();
    wstr.push(0);
    wstr
}

mod ffi {
    use std::io;
    use std::ptr::NonNull;

    use winapi::shared::basetsd::SIZE_T;
    use winapi::shared::minwindef::{DWORD, LPVOID};
    use winapi::shared::ntdef::LONGLONG;
    use winapi::um::fileapi::{CreateFileW, SetFileInformationByHandle, FILE_END_OF_FILE_INFO};
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::memoryapi::{
        CreateFileMappingW, FlushViewOfFile, MapViewOfFileEx, VirtualAlloc, VirtualFree,
        VirtualProtect,
    };
    use winapi::um::minwinbase::FileEndOfFileInfo;
    use winapi::um::winnt::{
        MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE, WCHAR,
    };

    pub type RawHandle = NonNull<winapi::ctypes::c_void>;
    pub type RawPtr = NonNull<winapi::ctypes::c_void>;

    pub unsafe fn create_file(
        path: &[WCHAR],
        desired_access: DWORD,
        share_mode: DWORD,
        creation: DWORD,
        attributes: DWORD,
    ) -> io::Result<RawHandle> {
        let hndl = CreateFileW(
            path.as_ptr(),
            desired_access,
            share_mode,
            std::ptr::null_mut(),
            creation,
            attributes,
            std::ptr::null_mut(),
        );

        if hndl == INVALID_HANDLE_VALUE {
            Err(io::Error::last_os_error())
        } else {
            NonNull::new(hndl).ok_or_else(io::Error::last_os_error)
        }
    }

    pub unsafe fn resize_file(hndl: RawHandle, len: u64) -> io::Result<()> {
        let mut info = FILE_END_OF_FILE_INFO::default();
        *info.EndOfFile.QuadPart_mut() = len as LONGLONG;

        let result = SetFileInformationByHandle(
            hndl.as_ptr(),
            FileEndOfFileInfo,
            &mut info as *mut _ as *mut _,
            std::mem::size_of::<FILE_END_OF_FILE_INFO>() as DWORD,
        );

        if result == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn file_size(hndl: RawHandle) -> io::Result<u64> {
        use winapi::um::fileapi::GetFileSizeEx;
        let mut size: winapi::um::winnt::LARGE_INTEGER = std::mem::zeroed();
        if GetFileSizeEx(hndl.as_ptr(), &mut size) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(*size.QuadPart() as u64)
        }
    }

    pub unsafe fn create_mapping(hndl: RawHandle, protect: DWORD) -> io::Result<RawHandle> {
        // Passing 0, 0 as the maximum size arguments makes the mapping the
        // same size as the file.
        let hndl = CreateFileMappingW(
            hndl.as_ptr(),
            std::ptr::null_mut(),
            protect,
            0,
            0,
            std::ptr::null(),
        );

        if hndl.is_null() {
            Err(io::Error::last_os_error())
        } else {
            NonNull::new(hndl).ok_or_else(io::Error::last_os_error)
        }
    }

    pub unsafe fn close(hndl: RawHandle) -> io::Result<()> {
        if CloseHandle(hndl.as_ptr()) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn map_view(
        hndl: RawHandle,
        desired_access: DWORD,
        len: SIZE_T,
        offset: SIZE_T,
        at: Option<*mut u8>,
    ) -> io::Result<RawPtr> {
        let offset_high = (offset >> 32) as DWORD;
        let offset_low = offset as DWORD;

        let base = at.map(|p| p as LPVOID).unwrap_or(std::ptr::null_mut());

        let ptr = MapViewOfFileEx(
            hndl.as_ptr(),
            desired_access,
            offset_high,
            offset_low,
            len,
            base,
        );

        NonNull::new(ptr).ok_or_else(io::Error::last_os_error)
    }

    pub unsafe fn unmap_view(base_address: RawPtr) -> io::Result<()> {
        use winapi::um::memoryapi::UnmapViewOfFile;
        if UnmapViewOfFile(base_address.as_ptr()) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn flush_view(base_address: RawPtr, len: SIZE_T) -> io::Result<()> {
        if FlushViewOfFile(base_address.as_ptr(), len) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn reserve(capacity: usize) -> io::Result<NonNull<winapi::ctypes::c_void>> {
        let ptr = VirtualAlloc(
            std::ptr::null_mut(),
            capacity as SIZE_T,
            MEM_RESERVE,
            PAGE_NOACCESS,
        );
        NonNull::new(ptr).ok_or_else(io::Error::last_os_error)
    }

    pub unsafe fn reserve_at(
        base: *mut u8,
        capacity: usize,
    ) -> io::Result<NonNull<winapi::ctypes::c_void>> {
        let ptr = VirtualAlloc(
            base as LPVOID,
            capacity as SIZE_T,
            MEM_RESERVE,
            PAGE_NOACCESS,
        );
        NonNull::new(ptr).ok_or_else(io::Error::last_os_error)
    }

    pub unsafe fn release(base: NonNull<winapi::ctypes::c_void>, _capacity: usize) -> io::Result<()> {
        if VirtualFree(base.as_ptr(), 0, MEM_RELEASE) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn commit(ptr: *mut u8, len: usize) -> io::Result<()> {
        let result = VirtualAlloc(
            ptr as LPVOID,
            len as SIZE_T,
            MEM_COMMIT,
            PAGE_READWRITE,
        );
        if result.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub unsafe fn decommit(ptr: *mut u8, len: usize) -> io::Result<()> {
        if VirtualFree(ptr as LPVOID, len as SIZE_T, MEM_DECOMMIT) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    #[allow(dead_code)]
    pub unsafe fn protect_none(ptr: *mut u8, len: usize) -> io::Result<()> {
        let mut old = 0 as DWORD;
        if VirtualProtect(ptr as LPVOID, len as SIZE_T, PAGE_NOACCESS, &mut old) == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
