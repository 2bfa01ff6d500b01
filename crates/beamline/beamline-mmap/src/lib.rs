use memmap2::Mmap;
use std::{fs::File, io, path::Path};

/// A read-only memory-mapped file.
///
/// Used by `beamline-source`'s file-list adapter to map raw detector frame
/// files without copying them into a heap buffer first.
pub struct MmapFile {
    /// File handle kept alive to maintain the memory map validity.
    _file: File,
    /// Memory-mapped region providing read-only access to file contents.
    mmap: Mmap,
}

impl MmapFile {
    /// Opens an existing file and maps it read-only.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the file is not expected to be concurrently truncated by
        // another process for the lifetime of this mapping; this is the same
        // trust assumption any mmap-based reader makes.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}
