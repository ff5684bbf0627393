//! A low-level library for memory-mapped files and resizable memory regions
//! whose user-visible pointer stays put across growth.
//!
//! In short, *reservecrate* reserves a range of virtual address space up
//! front and grows a committed mapping into it, so a pointer obtained before
//! a resize is still valid — pointing at the same bytes — after it. The use
//! case is data structures that need to grow arbitrarily large without
//! invalidating pointers or indices derived from an earlier size.
//!
//! *CAUTION:* The library uses a lot of *unsafe* and OS-specific APIs. Do
//! not use it where animals may be harmed. Any help with testing and
//! reviewing is much appreciated.
//!
//! Supported platforms (as far as a small bunch of tests indicate):
//!
//! * Linux
//! * MacOS (I suppose for its unixness)
//! * Windows
//!
//! Dual-licensed under MIT and [UNLICENSE](https://unlicense.org/). Feel free
//! to use it, contribute or spread the word.
//!
//! # Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! reservecrate = "0.1"
//! ```
//!
//! There are four public mapping types:
//!
//! * [`FileRef`] — read-only whole-file mapping, cheaply [`Clone`]able.
//! * [`FileMut`] — writable whole-file mapping, fixed at its opening size.
//! * [`ResizableFile`] — growable file-backed mapping with a stable pointer.
//! * [`ResizableMemory`] — growable anonymous region with a stable pointer.
//!
//! The first two are the simple case — map a file once, at its current
//! size. The latter two are for data that needs to outgrow the size it
//! started at without invalidating pointers a caller already holds into it.
//!
//! # Errors
//!
//! Every fallible operation returns [`error::Result`], whose [`error::Error`]
//! distinguishes an OS failure ([`error::Error::Mapping`] /
//! [`error::Error::MappedFile`]) from a request that exceeds a reservation's
//! fixed capacity ([`error::Error::OutOfMemory`]), which is a purely logical
//! failure — no syscall is attempted for it.
//!
//! # Panics
//!
//! The public API does not panic on caller-supplied lengths or offsets;
//! out-of-range requests are reported as errors. Indexing the slices
//! returned by `data()`/`data_mut()` out of range panics as any slice would.
//!
//! # Temporaries
//!
//! Opening a [`FileMut`] or [`ResizableFile`] over a path that does not
//! exist creates the file. It is not deleted automatically; callers that
//! want a scratch file should use [`tempfile`](https://docs.rs/tempfile) at
//! the call site, the way this crate's own tests do.
//!
//! # Locking
//!
//! *reservecrate* tries its best to prevent external modifications to the
//! underlying files while they are open: an advisory
//! [`flock`](https://www.baeldung.com/linux/file-locking)/`fcntl` lock on
//! POSIX, limited share modes on Windows. Neither is a hard guarantee
//! against a determined concurrent writer — see the module docs on
//! [`resizable`] for the concurrency model this crate assumes.
//!
//! # Name
//!
//! Reserve first, commit as you grow.

#![deny(missing_docs)]

mod align;
mod error;
mod ext;
mod mode;
mod os;
mod resizable;
mod wholefile;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use error::{Error, Result};
pub use os::granularity;
pub use resizable::{ResizableFile, ResizableMemory};
pub use wholefile::{FileMut, FileRef};
