//! End-to-end scenarios exercising the public API surface together, as a
//! caller would use it, rather than one type in isolation.

use std::fs;
use std::io::Write;

use reservecrate::{Error, FileMut, FileRef, ResizableFile, ResizableMemory};

/// S1: write a file externally, open it read-only, read it back unchanged.
#[test]
fn readonly_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readonly.bin");

    let contents = b"the quick brown fox jumps over the lazy dog";
    fs::File::create(&path).unwrap().write_all(contents).unwrap();

    let mapped = FileRef::open(&path).unwrap();
    assert_eq!(mapped.len(), contents.len() as u64);
    assert_eq!(mapped.data(), contents);
}

/// S2: open a file writable, mutate it through the mapping, and see the
/// change on disk after a sync.
#[test]
fn writable_mutation_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("writable.bin");

    {
        let mut mapped = FileMut::new(&path, 16).unwrap();
        mapped.data_mut().copy_from_slice(b"0123456789abcdef");
        mapped.sync().unwrap();
    }

    let contents = fs::read(&path).unwrap();
    assert_eq!(contents, b"0123456789abcdef");
}

/// S3: grow a `ResizableFile` across several steps, checking that the
/// pointer observed at each step stays valid, and that reopening the file
/// afterwards as a plain `FileRef` sees everything that was written.
#[test]
fn address_stability_across_growth_with_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("growable.bin");

    let base = {
        let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
        let base = mapping.as_ptr();

        for size in [4096u64, 8192, 1 << 16, 1 << 18] {
            mapping.resize(size).unwrap();
            assert_eq!(mapping.as_ptr(), base, "address moved after growing to {size}");
        }

        mapping.data_mut()[0..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        mapping.sync().unwrap();
        base
    };

    assert!(!base.is_null());

    let reopened = FileRef::open(&path).unwrap();
    assert_eq!(reopened.len(), 1 << 18);
    assert_eq!(&reopened.data()[0..4], &[0xde, 0xad, 0xbe, 0xef]);
}

/// S4: a `ResizableFile` and a `ResizableMemory` both refuse to grow past
/// the capacity fixed at construction, and report it as `OutOfMemory`
/// rather than an OS-level mapping failure.
#[test]
fn capacity_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capped.bin");

    let mut file = ResizableFile::new(&path, 8192).unwrap();
    let err = file.resize(8193).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { requested: 8193, capacity: 8192 }));
    // The mapping itself is unaffected by the failed request.
    assert_eq!(file.len(), 0);

    let mut memory = ResizableMemory::new(8192, 0).unwrap();
    let err = memory.resize(8193).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { requested: 8193, capacity: 8192 }));
    assert_eq!(memory.len(), 0);
}

/// S5: shrinking and regrowing a `ResizableFile` repeatedly preserves the
/// bytes within whatever the smallest intervening size was.
#[test]
fn shrink_preserves_prefix_across_many_resizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shrinking.bin");

    let mut mapping = ResizableFile::new(&path, 1 << 20).unwrap();
    mapping.resize(4096).unwrap();
    let pattern: Vec<u8> = (0..16u8).collect();
    mapping.data_mut()[0..16].copy_from_slice(&pattern);

    let sizes = [4096u64, 16, 2048, 8, 1024, 16];
    for size in sizes {
        mapping.resize(size).unwrap();
        let visible = std::cmp::min(size as usize, 8);
        assert_eq!(&mapping.data()[0..visible], &pattern[0..visible]);
    }
}

/// S6: decommitting a `ResizableMemory` by shrinking it and growing back
/// does not resurrect the bytes that were written before the shrink — the
/// physical pages were actually released, not just hidden.
#[test]
fn decommit_releases_residency() {
    let mut region = ResizableMemory::new(1 << 20, 1 << 16).unwrap();
    region.data_mut().fill(0xaa);

    region.resize(0).unwrap();
    region.resize(1 << 16).unwrap();

    assert!(region.data().iter().all(|&b| b == 0));
}
