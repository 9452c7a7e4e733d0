//! Output collaborators
//!
//! The flush coordinator calls `append` while holding the arbitration lock,
//! so appends from different consumers land in `seq` order even when every
//! consumer owns its own handle.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

/// Appendable byte sink.
pub trait OutputSink: Send {
    fn append(&mut self, byte: u8) -> io::Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn append(&mut self, byte: u8) -> io::Result<()> {
        (**self).append(byte)
    }
}

/// File opened in append mode, flushed after every byte.
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl OutputSink for FileSink {
    fn append(&mut self, byte: u8) -> io::Result<()> {
        self.file.write_all(&[byte])?;
        self.file.flush()
    }
}

/// In-memory sink; clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl OutputSink for MemorySink {
    fn append(&mut self, byte: u8) -> io::Result<()> {
        self.bytes.lock().push(byte);
        Ok(())
    }
}
