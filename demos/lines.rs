use std::io;
use std::path::Path;

use reservecrate::FileRef;

struct Lines {
    data: FileRef,
    offsets: Vec<usize>,
}

impl Lines {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        // The whole file is mapped once; slicing `data()` by offset is free
        // after that.
        let data = FileRef::open(path).map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        let mut offsets = Vec::new();
        let mut last_offset = 0;
        offsets.push(last_offset);

        for (offset, &byte) in data.data().iter().enumerate() {
            if byte == b'\n' {
                std::str::from_utf8(&data.data()[last_offset..offset])
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

                last_offset = offset + 1;
                offsets.push(last_offset);
            }
        }

        offsets.push(data.data().len());

        Ok(Self { data, offsets })
    }

    pub fn get(&self, line: usize) -> &str {
        let start = self.offsets[line];
        let end = self.offsets[line + 1];
        // Validity was already checked while building `offsets`.
        std::str::from_utf8(&self.data.data()[start..end]).unwrap()
    }
}

fn main() {
    let lines = Lines::new("demos/lorem.txt").unwrap();
    println!("Text on 3rd line: {}", lines.get(2));
}
