//! Whole-file mappings: a read-only [`FileRef`] and a writable [`FileMut`],
//! each mapping an entire existing file at its current size.
//!
//! Neither type grows past the size it was opened with — that is the job of
//! [`crate::resizable::file::ResizableFile`]. These are the simple case: map
//! once, hand back a slice, flush on drop.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mode::OpenMode;
use crate::os;

/// A writable mapping of an entire file.
///
/// If the file does not exist it is created empty and then truncated to
/// `len` bytes. If it exists, it is truncated (up or down) to `len` bytes,
/// so existing contents beyond `len` are lost — callers that want to
/// preserve a larger existing file should pass its current length.
///
/// `len` may be zero; in that case no mapping is created and [`FileMut::data`]
/// returns an empty slice.
///
/// # Examples
///
/// ```no_run
/// use reservecrate::FileMut;
///
/// let mut file = FileMut::new("numbers.bin", 4096).unwrap();
/// file.data_mut()[0] = 42;
/// file.sync().unwrap();
/// ```
pub struct FileMut {
    path: PathBuf,
    file: os::RawFile,
    view: Option<os::PlainView>,
}

impl FileMut {
    /// Opens (creating if necessary) the file at `path` and maps its first
    /// `len` bytes for reading and writing.
    pub fn new<P: AsRef<Path>>(path: P, len: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = os::RawFile::open(&path, OpenMode::CreateOrOpenReadWrite)
            .map_err(|e| Error::mapped_file(path.clone(), e))?;

        if file.len() != len {
            file.truncate(len)
                .map_err(|e| Error::mapped_file(path.clone(), e))?;
        }

        let view = if len == 0 {
            None
        } else {
            Some(
                file.map_plain(len as usize, true)
                    .map_err(|e| Error::mapped_file(path.clone(), e))?,
            )
        };

        Ok(Self { path, file, view })
    }

    /// The size of the underlying file.
    pub fn len(&self) -> u64 {
        self.file.len()
    }

    /// Whether the underlying file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mapped bytes.
    pub fn data(&self) -> &[u8] {
        match &self.view {
            Some(view) => unsafe { std::slice::from_raw_parts(view.as_ptr(), view.len()) },
            None => &[],
        }
    }

    /// The mapped bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &self.view {
            Some(view) => unsafe { std::slice::from_raw_parts_mut(view.as_mut_ptr(), view.len()) },
            None => &mut [],
        }
    }

    /// Flushes the whole mapping synchronously to disk.
    pub fn sync(&self) -> Result<()> {
        match &self.view {
            Some(view) => view
                .flush()
                .map_err(|e| Error::mapped_file(self.path.clone(), e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FileMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMut")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for FileMut {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            log::warn!(
                "failed to flush mapped file {} on drop: {}",
                self.path.display(),
                err
            );
        }
    }
}

// SAFETY: all mutating operations take &mut self; the underlying view and
// file handle are exclusively owned.
unsafe impl Send for FileMut {}
unsafe impl Sync for FileMut {}

struct Shared {
    path: PathBuf,
    #[allow(dead_code)]
    file: os::RawFile,
    view: Option<os::PlainView>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRef").field("path", &self.path).finish()
    }
}

/// A read-only mapping of an entire file, shareable via [`Clone`].
///
/// # Examples
///
/// ```no_run
/// use reservecrate::FileRef;
///
/// let text = FileRef::open("text.txt").unwrap();
/// let first_byte = text.data()[0];
/// let clone = text.clone();
/// assert_eq!(clone.data()[0], first_byte);
/// ```
#[derive(Clone)]
pub struct FileRef(Arc<Shared>);

impl FileRef {
    /// Opens the existing file at `path` read-only and maps its whole
    /// contents. Fails if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = os::RawFile::open(&path, OpenMode::ReadOnly)
            .map_err(|e| Error::mapped_file(path.clone(), e))?;

        let len = file.len();
        let view = if len == 0 {
            None
        } else {
            Some(
                file.map_plain(len as usize, false)
                    .map_err(|e| Error::mapped_file(path.clone(), e))?,
            )
        };

        Ok(Self(Arc::new(Shared { path, file, view })))
    }

    /// The size of the underlying file.
    pub fn len(&self) -> u64 {
        self.0.file.len()
    }

    /// Whether the underlying file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mapped bytes.
    pub fn data(&self) -> &[u8] {
        match &self.0.view {
            Some(view) => unsafe { std::slice::from_raw_parts(view.as_ptr(), view.len()) },
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn round_trip_write_then_reopen_readonly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        {
            let mut file = FileMut::new(&path, 16).unwrap();
            file.data_mut()[0..5].copy_from_slice(b"hello");
            file.sync().unwrap();
        }

        let reopened = FileRef::open(&path).unwrap();
        assert_eq!(reopened.len(), 16);
        assert_eq!(&reopened.data()[0..5], b"hello");
    }

    #[test]
    fn zero_length_file_has_empty_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");

        let file = FileMut::new(&path, 0).unwrap();
        assert_eq!(file.len(), 0);
        assert!(file.data().is_empty());
    }

    #[test]
    fn clone_shares_the_same_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.bin");

        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[1, 2, 3, 4])
            .unwrap();

        let a = FileRef::open(&path).unwrap();
        let b = a.clone();

        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        assert!(FileRef::open(&path).is_err());
    }
}
