//! Source collaborators: addressable, seekable byte streams
//!
//! Allocator offsets are seek positions into the source. Every producer
//! holds its own handle.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Seekable byte source.
pub trait ByteSource: Send {
    /// Byte at `offset`, or `None` past the end.
    fn read_at(&mut self, offset: u64) -> io::Result<Option<u8>>;

    /// Length when known up front.
    fn len(&self) -> Option<u64> {
        None
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_at(&mut self, offset: u64) -> io::Result<Option<u8>> {
        (**self).read_at(offset)
    }

    fn len(&self) -> Option<u64> {
        (**self).len()
    }
}

/// File read one byte per seek.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ByteSource for FileSource {
    fn read_at(&mut self, offset: u64) -> io::Result<Option<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut byte = [0u8; 1];
        match self.file.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn len(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// Shared in-memory bytes; clones are independent handles.
#[derive(Debug, Clone)]
pub struct MemorySource {
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl ByteSource for MemorySource {
    fn read_at(&mut self, offset: u64) -> io::Result<Option<u8>> {
        Ok(usize::try_from(offset)
            .ok()
            .and_then(|i| self.bytes.get(i).copied()))
    }

    fn len(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }
}
