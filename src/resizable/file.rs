//! A growable file-backed mapping with an address-stable pointer.
//!
//! [`ResizableFile`] reserves `capacity` bytes of address space once, at
//! construction, and only ever maps a prefix of it backed by the file's
//! current contents. [`ResizableFile::resize`] changes how much of that
//! reservation is mapped; it never changes where the reservation starts.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::mode::OpenMode;
use crate::os;

/// A growable file-backed mapping.
///
/// `capacity` is fixed at construction and is the maximum size the mapping
/// can ever grow to; [`ResizableFile::resize`] beyond it fails with
/// [`Error::OutOfMemory`] without touching the file or the mapping.
///
/// # Examples
///
/// ```no_run
/// use reservecrate::ResizableFile;
///
/// let mut mapping = ResizableFile::new("growable.bin", 1 << 30).unwrap();
/// let base = mapping.as_ptr();
///
/// mapping.resize(4096).unwrap();
/// mapping.data_mut()[0] = 1;
/// mapping.resize(8192).unwrap();
///
/// // The pointer observed before growth is still valid and still points at
/// // the same bytes.
/// assert_eq!(mapping.as_ptr(), base);
/// assert_eq!(mapping.data()[0], 1);
/// ```
pub struct ResizableFile {
    path: PathBuf,
    file: os::RawFile,
    capacity: u64,
    base: *mut u8,
    /// The length currently backed by a live mapping at `base`, as opposed
    /// to `file.len()`, which is the on-disk length. The two agree after
    /// every successful [`ResizableFile::resize`]; they can disagree only
    /// inside the documented failure window described there, in which case
    /// `mapped_len` is the source of truth for [`ResizableFile::len`] and
    /// [`ResizableFile::data`].
    mapped_len: u64,
    #[cfg(unix)]
    _reservation: os::Reservation,
    /// `Some` only while the mapping is empty (`mapped_len == 0`): the
    /// whole-capacity placeholder reservation. `None` while a view is
    /// mapped, since Windows cannot keep a `MEM_RESERVE` placeholder and a
    /// `MapViewOfFileEx` view alive over the same address range.
    #[cfg(windows)]
    reservation: Option<os::Reservation>,
    /// `Some` whenever `0 < mapped_len < capacity`: a placeholder
    /// reservation covering `[base + mapped_len, base + capacity)`, so that
    /// range stays claimed by this object instead of being a bare hole
    /// another allocation in the process could land in.
    #[cfg(windows)]
    tail: Option<os::Reservation>,
    view: Option<os::FixedView>,
}

// SAFETY: all mutating operations take &mut self; the mapped region is
// exclusively owned by this value, and `base` is never read concurrently
// with a resize since resize requires &mut self.
unsafe impl Send for ResizableFile {}
unsafe impl Sync for ResizableFile {}

impl fmt::Debug for ResizableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizableFile")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(unix)]
impl ResizableFile {
    /// Opens (creating if necessary) the file at `path`, reserves `capacity`
    /// bytes of address space, and maps the file's existing contents (empty,
    /// if the file was just created) at the start of the reservation.
    ///
    /// Fails with [`Error::OutOfMemory`] without creating or mapping
    /// anything if an existing file at `path` is already larger than
    /// `capacity`.
    pub fn new<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = os::RawFile::open(&path, OpenMode::CreateOrOpenReadWrite)
            .map_err(|e| Error::mapped_file(path.clone(), e))?;

        if file.len() > capacity {
            return Err(Error::out_of_memory(file.len(), capacity));
        }

        let initial_len = file.len();

        let reservation = os::Reservation::new(capacity as usize).map_err(Error::mapping)?;
        let base = reservation.base_ptr();

        let view = if initial_len == 0 {
            None
        } else {
            Some(
                unsafe { file.map_fixed(base, initial_len as usize, true) }
                    .map_err(|e| Error::mapped_file(path.clone(), e))?,
            )
        };

        Ok(Self {
            path,
            file,
            capacity,
            base,
            mapped_len: initial_len,
            _reservation: reservation,
            view,
        })
    }

    /// Grows or shrinks the mapping to `new_len` bytes. `new_len` must not
    /// exceed the reservation's `capacity`.
    ///
    /// Internally the current view is dropped (unmapped) and a fresh one is
    /// mapped at the same fixed address over the new file length — two
    /// separate `mmap` calls rather than one atomic operation, because
    /// Rust's ownership model requires the old [`os::FixedView`] to be
    /// consumed before a new one can be constructed over the same range.
    /// The address itself, and the bytes below `new_len.min(old_len)`, are
    /// unaffected.
    ///
    /// On a shrink, the vacated `[new_len, old_len)` tail is reclaimed as an
    /// inaccessible placeholder, so the reservation never has a gap that
    /// some other allocation in the process could land in.
    ///
    /// If a failure happens after the old view has been unmapped but before
    /// the new one is installed — a truncate or remap failing — the object
    /// is left in the documented unusable state: [`ResizableFile::len`]
    /// returns `0` and [`ResizableFile::data`] returns an empty slice, even
    /// if the on-disk file itself was already truncated. A later `resize`
    /// may still be attempted and, if it succeeds, clears this state.
    pub fn resize(&mut self, new_len: u64) -> Result<()> {
        if new_len > self.capacity {
            return Err(Error::out_of_memory(new_len, self.capacity));
        }

        let old_len = self.mapped_len;
        if new_len == old_len {
            return Ok(());
        }

        // Tear down the current view unconditionally. `[0, old_len)` is now
        // an unmapped hole until either the remap below succeeds or the
        // error paths below reclaim it as a placeholder.
        self.view = None;
        self.mapped_len = 0;

        if let Err(err) = self.file.truncate(new_len) {
            let _ = crate::unix::reclaim(self.base, old_len as usize);
            return Err(Error::mapped_file(self.path.clone(), err));
        }

        if new_len == 0 {
            crate::unix::reclaim(self.base, old_len as usize).map_err(Error::mapping)?;
            return Ok(());
        }

        match unsafe { self.file.map_fixed(self.base, new_len as usize, true) } {
            Ok(view) => {
                if old_len > new_len {
                    crate::unix::reclaim(
                        unsafe { self.base.add(new_len as usize) },
                        (old_len - new_len) as usize,
                    )
                    .map_err(Error::mapping)?;
                }
                self.view = Some(view);
                self.mapped_len = new_len;
                Ok(())
            }
            Err(err) => {
                let _ = crate::unix::reclaim(self.base, old_len as usize);
                Err(Error::mapped_file(self.path.clone(), err))
            }
        }
    }
}

#[cfg(windows)]
impl ResizableFile {
    /// Opens (creating if necessary) the file at `path`, reserves `capacity`
    /// bytes of address space, and maps the file's existing contents (empty,
    /// if the file was just created) at the start of the reservation.
    ///
    /// Fails with [`Error::OutOfMemory`] without creating or mapping
    /// anything if an existing file at `path` is already larger than
    /// `capacity`.
    pub fn new<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = os::RawFile::open(&path, OpenMode::CreateOrOpenReadWrite)
            .map_err(|e| Error::mapped_file(path.clone(), e))?;

        if file.len() > capacity {
            return Err(Error::out_of_memory(file.len(), capacity));
        }

        let initial_len = file.len();

        let mut reservation = os::Reservation::new(capacity as usize).map_err(Error::mapping)?;
        let base = reservation.base_ptr();

        let (reservation, tail, view) = if initial_len == 0 {
            (Some(reservation), None, None)
        } else {
            unsafe { reservation.release_for_remap() }.map_err(Error::mapping)?;
            let view = unsafe { file.map_fixed(base, initial_len as usize, true) }
                .map_err(|e| Error::mapped_file(path.clone(), e))?;

            let tail = if initial_len < capacity {
                let tail_base = unsafe { base.add(initial_len as usize) };
                Some(
                    unsafe { os::Reservation::at(tail_base, (capacity - initial_len) as usize) }
                        .map_err(Error::mapping)?,
                )
            } else {
                None
            };

            (None, tail, Some(view))
        };

        Ok(Self {
            path,
            file,
            capacity,
            base,
            mapped_len: initial_len,
            reservation,
            tail,
            view,
        })
    }

    /// Grows or shrinks the mapping to `new_len` bytes. `new_len` must not
    /// exceed the reservation's `capacity`.
    ///
    /// Internally everything currently occupying the reservation's address
    /// range — the view over `[0, old_len)`, the placeholder tail
    /// reservation over `[old_len, capacity)` if any, or the whole-capacity
    /// reservation if the mapping is currently empty — is released, and a
    /// fresh view (plus, on a shrink or on growing to less than `capacity`,
    /// a fresh placeholder tail) is created at the same fixed address. This
    /// is the same non-atomic two-step sequence documented on the POSIX
    /// side, extended to cover the reservation/tail bookkeeping Windows
    /// needs that POSIX gets from a single whole-capacity `mmap`.
    ///
    /// If a failure happens after the old state has been torn down but
    /// before the new one is installed, the object is left in the
    /// documented unusable state: [`ResizableFile::len`] returns `0` and
    /// [`ResizableFile::data`] returns an empty slice, even if the on-disk
    /// file itself was already truncated. A later `resize` may still be
    /// attempted and, if it succeeds, clears this state.
    pub fn resize(&mut self, new_len: u64) -> Result<()> {
        if new_len > self.capacity {
            return Err(Error::out_of_memory(new_len, self.capacity));
        }

        let old_len = self.mapped_len;
        if new_len == old_len {
            return Ok(());
        }

        self.view = None;
        self.tail = None;
        self.reservation = None;
        self.mapped_len = 0;

        if let Err(err) = self.file.truncate(new_len) {
            // Best-effort: reclaim the whole range as a placeholder so the
            // object isn't left owning nothing at all, matching the
            // documented unusable state (mapped_len == 0 already).
            if let Ok(reservation) = unsafe { os::Reservation::at(self.base, self.capacity as usize) } {
                self.reservation = Some(reservation);
            }
            return Err(Error::mapped_file(self.path.clone(), err));
        }

        if new_len == 0 {
            let reservation = unsafe { os::Reservation::at(self.base, self.capacity as usize) }
                .map_err(Error::mapping)?;
            self.reservation = Some(reservation);
            return Ok(());
        }

        let view = match unsafe { self.file.map_fixed(self.base, new_len as usize, true) } {
            Ok(view) => view,
            Err(err) => {
                if let Ok(reservation) =
                    unsafe { os::Reservation::at(self.base, self.capacity as usize) }
                {
                    self.reservation = Some(reservation);
                }
                return Err(Error::mapped_file(self.path.clone(), err));
            }
        };

        if new_len < self.capacity {
            let tail_base = unsafe { self.base.add(new_len as usize) };
            match unsafe { os::Reservation::at(tail_base, (self.capacity - new_len) as usize) } {
                Ok(tail) => self.tail = Some(tail),
                Err(err) => {
                    // The view itself mapped fine; only the placeholder tail
                    // reservation failed. The mapping is still valid and
                    // usable, so keep it - only the tail range is left an
                    // unclaimed hole, which we still report as a mapping
                    // error since it breaks reservation containment.
                    self.view = Some(view);
                    self.mapped_len = new_len;
                    return Err(Error::mapping(err));
                }
            }
        }

        self.view = Some(view);
        self.mapped_len = new_len;
        Ok(())
    }
}

impl ResizableFile {
    /// The current size of the mapping, in bytes.
    ///
    /// This is the size backed by a live mapping, which can momentarily
    /// differ from the on-disk file length — see the failure window
    /// documented on [`ResizableFile::resize`].
    pub fn len(&self) -> u64 {
        self.mapped_len
    }

    /// Whether the mapping is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed maximum size this mapping can grow to.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The address of the mapping. Stable across every call to
    /// [`ResizableFile::resize`] for the lifetime of this value.
    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    /// The currently-mapped bytes.
    pub fn data(&self) -> &[u8] {
        let len = self.len() as usize;
        if len == 0 {
            &[]
        } else {
            // SAFETY: `len` bytes at `self.base` are mapped whenever
            // `self.len()` is non-zero; see resize/new.
            unsafe { std::slice::from_raw_parts(self.base, len) }
        }
    }

    /// The currently-mapped bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len() as usize;
        if len == 0 {
            &mut []
        } else {
            // SAFETY: see `data`.
            unsafe { std::slice::from_raw_parts_mut(self.base, len) }
        }
    }

    /// Flushes the currently-mapped bytes synchronously to disk.
    pub fn sync(&self) -> Result<()> {
        self.sync_range(0, self.len())
    }

    /// Flushes `[offset, offset + length)` synchronously to disk. Fails with
    /// [`Error::Mapping`] if the range is not contained in `[0, len())`.
    pub fn sync_range(&self, offset: u64, length: u64) -> Result<()> {
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                Error::mapped_file(
                    self.path.clone(),
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!(
                            "sync range [{offset}, {offset}+{length}) is out of bounds for a mapping of length {}",
                            self.len()
                        ),
                    ),
                )
            })?;
        let _ = end;

        match &self.view {
            Some(view) => view
                .flush(offset as usize, length as usize)
                .map_err(|e| Error::mapped_file(self.path.clone(), e)),
            None => Ok(()),
        }
    }
}

impl Drop for ResizableFile {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            log::warn!(
                "failed to flush resizable file {} on drop: {}",
                self.path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resizable.bin");
        (dir, path)
    }

    #[test]
    fn address_is_stable_across_growth() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        let base = mapping.as_ptr();

        mapping.resize(4096).unwrap();
        assert_eq!(mapping.as_ptr(), base);

        mapping.resize(8192).unwrap();
        assert_eq!(mapping.as_ptr(), base);

        mapping.resize(1024).unwrap();
        assert_eq!(mapping.as_ptr(), base);
    }

    #[test]
    fn bytes_survive_a_resize() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        mapping.resize(4096).unwrap();
        mapping.data_mut()[0..5].copy_from_slice(b"hello");

        mapping.resize(8192).unwrap();

        assert_eq!(&mapping.data()[0..5], b"hello");
        assert_eq!(mapping.len(), 8192);
    }

    #[test]
    fn shrink_then_grow_preserves_prefix() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        mapping.resize(4096).unwrap();
        mapping.data_mut()[0..4].copy_from_slice(&[1, 2, 3, 4]);

        mapping.resize(2).unwrap();
        assert_eq!(mapping.data(), &[1, 2]);

        mapping.resize(4096).unwrap();
        assert_eq!(&mapping.data()[0..2], &[1, 2]);
    }

    #[test]
    fn resize_to_zero_and_back() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        mapping.resize(4096).unwrap();
        mapping.data_mut()[0] = 9;

        mapping.resize(0).unwrap();
        assert!(mapping.data().is_empty());

        mapping.resize(1).unwrap();
        assert_eq!(mapping.data()[0], 0);
    }

    #[test]
    fn resize_beyond_capacity_is_out_of_memory() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 4096).unwrap();

        let err = mapping.resize(8192).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory {
                requested: 8192,
                capacity: 4096
            }
        ));
        assert_eq!(mapping.len(), 0);
    }

    #[test]
    fn opening_oversized_existing_file_is_out_of_memory() {
        let (_dir, path) = tmp();
        {
            let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
            mapping.resize(8192).unwrap();
        }

        let err = ResizableFile::new(&path, 4096).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
    }

    #[test]
    fn reopening_an_existing_file_does_not_truncate_it() {
        let (_dir, path) = tmp();
        {
            let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
            mapping.resize(4096).unwrap();
            mapping.data_mut()[0..5].copy_from_slice(b"kept!");
        }

        // Reopening must auto-detect the existing 4096-byte length, not
        // silently truncate it away - there is no `initial_len` parameter
        // to get wrong.
        let reopened = ResizableFile::new(&path, 1 << 20).unwrap();
        assert_eq!(reopened.len(), 4096);
        assert_eq!(&reopened.data()[0..5], b"kept!");
    }

    #[test]
    fn shrink_reclaims_the_vacated_tail_so_regrowth_sees_zeros() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        mapping.resize(8192).unwrap();
        mapping.data_mut()[4096..4100].copy_from_slice(&[1, 2, 3, 4]);

        // Shrink below 4096, then grow back past it without ever touching
        // 4096..8192 in between. If the shrink had left that range mapped
        // (instead of reclaiming it as a placeholder), the remap below
        // would silently reuse the stale pages; on disk, a truncate+regrow
        // always reads back zeros for bytes beyond the shrunk length.
        mapping.resize(2048).unwrap();
        mapping.resize(8192).unwrap();

        assert_eq!(&mapping.data()[4096..4100], &[0, 0, 0, 0]);
    }

    #[test]
    fn sync_range_out_of_bounds_is_rejected() {
        let (_dir, path) = tmp();
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        mapping.resize(4096).unwrap();

        assert!(mapping.sync_range(0, 4096).is_ok());
        assert!(mapping.sync_range(4000, 200).is_err());
        assert!(mapping.sync_range(0, 4097).is_err());

        mapping.resize(0).unwrap();
        assert!(mapping.sync_range(0, 0).is_ok());
    }

    #[test]
    fn reopen_after_growth_sees_persisted_bytes() {
        let (_dir, path) = tmp();
        {
            let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
            mapping.resize(4096).unwrap();
            mapping.data_mut()[0..5].copy_from_slice(b"world");
            mapping.sync().unwrap();
        }

        let reopened = crate::FileRef::open(&path).unwrap();
        assert_eq!(reopened.len(), 4096);
        assert_eq!(&reopened.data()[0..5], b"world");
    }
}
