//! The error taxonomy shared by every public operation in the crate.
//!
//! There are exactly three kinds of failure: an OS call failed
//! ([`Error::Mapping`]), an OS call failed while acting on a named file
//! ([`Error::MappedFile`]), or a caller asked for more bytes than a
//! reservation's capacity allows ([`Error::OutOfMemory`]). The third is a
//! purely logical failure - no syscall is attempted - and callers that want
//! to distinguish "the OS refused" from "you asked for too much" can match
//! on it directly.

use std::io;
use std::path::PathBuf;

/// The result type returned by all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure this crate can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An OS call (mmap, munmap, mprotect, CreateFileMapping, ...) failed
    /// outside the context of a specific file path.
    #[error("mapping operation failed: {source}")]
    Mapping {
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// An OS call failed while opening, truncating, or otherwise acting on
    /// a specific file.
    #[error("mapped file operation failed for {}: {source}", path.display())]
    MappedFile {
        /// The path that was being operated on.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The caller requested a size larger than the reservation's capacity,
    /// or opened a `ResizableFile` over a file already bigger than the
    /// requested capacity. No syscall is attempted for this failure.
    #[error("requested size {requested} exceeds capacity {capacity}")]
    OutOfMemory {
        /// The size that was requested.
        requested: u64,
        /// The fixed capacity of the reservation.
        capacity: u64,
    },
}

impl Error {
    pub(crate) fn mapping(source: io::Error) -> Self {
        Error::Mapping { source }
    }

    pub(crate) fn mapped_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::MappedFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn out_of_memory(requested: u64, capacity: u64) -> Self {
        Error::OutOfMemory {
            requested,
            capacity,
        }
    }
}
