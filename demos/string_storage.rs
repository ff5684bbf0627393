use std::path::Path;

use reservecrate::{Result, ResizableFile};

struct StrPtr {
    start: usize,
    len: usize,
}

/// An append-only string arena backed by a growable file mapping.
///
/// Unlike a plain `Vec<u8>`, growing this storage never invalidates a
/// `StrPtr` handed out earlier, because `ResizableFile`'s base address
/// never moves.
struct StringStorage {
    data: ResizableFile,
    len: usize,
}

impl StringStorage {
    pub fn new<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self> {
        const INITIAL_FILE_SIZE: u64 = 1024;

        let mut data = ResizableFile::new(path, capacity)?;

        // Only grow to the baseline size; a previous run may have already
        // left a larger file in place, and resizing down here would
        // destroy its contents on every restart.
        let baseline = INITIAL_FILE_SIZE.min(capacity);
        if data.len() < baseline {
            data.resize(baseline)?;
        }

        Ok(Self { data, len: 0 })
    }

    pub fn add(&mut self, value: &str) -> Result<StrPtr> {
        let ptr = StrPtr {
            start: self.len,
            len: value.len(),
        };

        if (self.len + value.len()) as u64 > self.data.len() {
            let new_len = std::cmp::max(2 * self.data.len(), (ptr.start + ptr.len) as u64);
            let new_len = std::cmp::min(new_len, self.data.capacity());
            self.data.resize(new_len)?;
        }

        self.data.data_mut()[self.len..self.len + value.len()].copy_from_slice(value.as_bytes());
        self.len += value.len();

        Ok(ptr)
    }

    pub fn get(&self, ptr: &StrPtr) -> &str {
        std::str::from_utf8(&self.data.data()[ptr.start..ptr.start + ptr.len]).unwrap()
    }
}

fn main() {
    let mut strings = StringStorage::new("demos/strings.bin", 1 << 20).unwrap();
    let hello_world = strings.add("Hello world!").unwrap();
    strings.add("Foobar").unwrap();

    assert_eq!(strings.get(&hello_world), "Hello world!");
}
