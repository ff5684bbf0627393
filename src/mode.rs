//! Access mode shared by the platform-specific `FileHandle` implementations.

/// How a file is opened before it is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file for reading only. Fails if the file is missing.
    ReadOnly,
    /// Open an existing file for reading and writing. Fails if the file is
    /// missing.
    ReadWrite,
    /// Open the file for reading and writing, creating it (empty) if it
    /// does not already exist.
    CreateOrOpenReadWrite,
}
