//! A growable anonymous memory region with an address-stable pointer.
//!
//! Unlike [`crate::resizable::file::ResizableFile`], [`ResizableMemory`] has
//! no backing file: the reservation itself is both the address space and
//! the storage. Growing commits additional pages of the same reservation;
//! shrinking decommits the pages no longer in use. The base address never
//! changes, because the reservation is never dropped or replaced — only
//! sub-ranges of it are committed or decommitted.

use std::fmt;

use crate::align;
use crate::error::{Error, Result};
use crate::os;

/// A growable anonymous region.
///
/// `capacity` is fixed at construction and is the maximum size the region
/// can ever grow to; [`ResizableMemory::resize`] beyond it fails with
/// [`Error::OutOfMemory`] without touching the reservation.
///
/// # Examples
///
/// ```
/// use reservecrate::ResizableMemory;
///
/// let mut region = ResizableMemory::new(1 << 20, 0).unwrap();
/// let base = region.as_ptr();
///
/// region.resize(4096).unwrap();
/// region.data_mut()[0] = 7;
/// region.resize(8192).unwrap();
///
/// assert_eq!(region.as_ptr(), base);
/// assert_eq!(region.data()[0], 7);
/// ```
pub struct ResizableMemory {
    reservation: os::Reservation,
    len: u64,
    /// `align_up(len)`: the page-aligned prefix of the reservation that is
    /// actually committed. `commit`/`decommit` only ever act on page
    /// boundaries, since `mprotect`/`VirtualProtect` reject any other
    /// address.
    mapped_len: usize,
}

impl ResizableMemory {
    /// Reserves `capacity` bytes of address space and commits the first
    /// `initial_len` bytes of it, zero-initialized.
    ///
    /// `initial_len` must not exceed `capacity`.
    pub fn new(capacity: u64, initial_len: u64) -> Result<Self> {
        if initial_len > capacity {
            return Err(Error::out_of_memory(initial_len, capacity));
        }

        let reservation = os::Reservation::new(capacity as usize).map_err(Error::mapping)?;

        let mapped_len = align::align_up(initial_len as usize);
        if mapped_len > 0 {
            reservation
                .commit(reservation.base_ptr(), mapped_len)
                .map_err(Error::mapping)?;
        }

        Ok(Self {
            reservation,
            len: initial_len,
            mapped_len,
        })
    }

    /// The current committed size, in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the region is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The fixed maximum size this region can grow to.
    pub fn capacity(&self) -> u64 {
        self.reservation.capacity() as u64
    }

    /// The address of the region. Stable across every call to
    /// [`ResizableMemory::resize`] for the lifetime of this value.
    pub fn as_ptr(&self) -> *const u8 {
        self.reservation.base_ptr()
    }

    /// Grows or shrinks the committed region to `new_len` bytes. `new_len`
    /// must not exceed the reservation's `capacity`.
    ///
    /// Growing commits the newly-in-range pages, zero-initialized; bytes
    /// already committed are untouched. Shrinking decommits the pages that
    /// fall out of range, releasing their physical backing; re-growing past
    /// a point that was previously decommitted observes zeros again, not
    /// whatever was written before the shrink.
    ///
    /// Commit and decommit only ever happen on page boundaries — `mprotect`/
    /// `VirtualProtect` reject any other address — so the actual committed
    /// range is `[0, align_up(new_len))`, not `[0, new_len)`; bytes between
    /// `new_len` and `align_up(new_len)` are committed but not
    /// caller-visible through [`ResizableMemory::data`].
    pub fn resize(&mut self, new_len: u64) -> Result<()> {
        if new_len > self.capacity() {
            return Err(Error::out_of_memory(new_len, self.capacity()));
        }

        if new_len == self.len {
            return Ok(());
        }

        let base = self.reservation.base_ptr();
        let mapped_new = align::align_up(new_len as usize);

        if mapped_new > self.mapped_len {
            let grow_start = unsafe { base.add(self.mapped_len) };
            self.reservation
                .commit(grow_start, mapped_new - self.mapped_len)
                .map_err(Error::mapping)?;
        } else if mapped_new < self.mapped_len {
            let shrink_start = unsafe { base.add(mapped_new) };
            self.reservation
                .decommit(shrink_start, self.mapped_len - mapped_new)
                .map_err(Error::mapping)?;
        }

        self.len = new_len;
        self.mapped_len = mapped_new;
        Ok(())
    }

    /// The page-aligned length of the committed region — always
    /// `>= len()` and a multiple of the OS page size.
    pub fn mapped_len(&self) -> u64 {
        self.mapped_len as u64
    }

    /// The currently-committed bytes.
    pub fn data(&self) -> &[u8] {
        let len = self.len as usize;
        if len == 0 {
            &[]
        } else {
            // SAFETY: `len` bytes starting at the reservation's base are
            // committed read/write whenever `self.len` is non-zero.
            unsafe { std::slice::from_raw_parts(self.reservation.base_ptr(), len) }
        }
    }

    /// The currently-committed bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len as usize;
        if len == 0 {
            &mut []
        } else {
            // SAFETY: see `data`.
            unsafe { std::slice::from_raw_parts_mut(self.reservation.base_ptr(), len) }
        }
    }
}

impl fmt::Debug for ResizableMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizableMemory")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

// SAFETY: all mutating operations take &mut self; the reservation is
// exclusively owned.
unsafe impl Send for ResizableMemory {}
unsafe impl Sync for ResizableMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_stable_across_growth() {
        let mut region = ResizableMemory::new(1 << 20, 0).unwrap();
        let base = region.as_ptr();

        region.resize(4096).unwrap();
        assert_eq!(region.as_ptr(), base);

        region.resize(1 << 16).unwrap();
        assert_eq!(region.as_ptr(), base);
    }

    #[test]
    fn growth_is_zero_initialized() {
        let mut region = ResizableMemory::new(1 << 20, 0).unwrap();
        region.resize(4096).unwrap();
        assert!(region.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn bytes_survive_a_resize() {
        let mut region = ResizableMemory::new(1 << 20, 4096).unwrap();
        region.data_mut()[0..5].copy_from_slice(b"hello");

        region.resize(8192).unwrap();

        assert_eq!(&region.data()[0..5], b"hello");
        assert_eq!(region.len(), 8192);
    }

    #[test]
    fn shrink_then_regrow_reads_zero_not_stale_bytes() {
        let mut region = ResizableMemory::new(1 << 20, 8192).unwrap();
        region.data_mut()[4096] = 42;

        region.resize(4096).unwrap();
        region.resize(8192).unwrap();

        assert_eq!(region.data()[4096], 0);
    }

    #[test]
    fn resize_beyond_capacity_is_out_of_memory() {
        let mut region = ResizableMemory::new(4096, 0).unwrap();

        let err = region.resize(8192).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory {
                requested: 8192,
                capacity: 4096
            }
        ));
        assert_eq!(region.len(), 0);
    }

    #[test]
    fn construction_beyond_capacity_is_out_of_memory() {
        let err = ResizableMemory::new(4096, 8192).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
    }
}
