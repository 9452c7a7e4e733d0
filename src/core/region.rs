//! Memory-Mapped Shared Region
//!
//! The control block and the ring slots are mapped directly:
//! - Anonymous mapping: units are threads of one process
//! - File-backed mapping: another process can attach and observe the block
//! - Zeroed on creation: a fresh mapping is already an empty ring

use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use super::layout::{region_size, ControlHeader, SlotRecord, HEADER_SIZE};
use crate::error::{RelayError, Result};

/// Where the mapping lives, and who owns its cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Backing {
    Anonymous,
    /// Created by us; the file is removed on release.
    Owned(PathBuf),
    /// Joined by path; the file belongs to its creator.
    Attached(PathBuf),
}

/// Mmap-backed control block plus `capacity` slots.
pub struct Region {
    mmap: MmapMut,
    capacity: usize,
    backing: Backing,
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("capacity", &self.capacity)
            .field("bytes", &self.byte_len())
            .field("backing", &self.backing)
            .finish()
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 || capacity > i32::MAX as usize {
        return Err(RelayError::CreationFailure(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("capacity must be in 1..={}, got {}", i32::MAX, capacity),
        )));
    }
    Ok(())
}

impl Region {
    /// Anonymous region for units within one process
    pub fn create_anon(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        let mmap = MmapOptions::new()
            .len(region_size(capacity))
            .map_anon()
            .map_err(RelayError::CreationFailure)?;

        let mut region = Self {
            mmap,
            capacity,
            backing: Backing::Anonymous,
        };
        region.initialize();
        Ok(region)
    }

    /// File-backed region that other processes can attach to
    ///
    /// An existing file at `path` is truncated and reinitialized.
    pub fn create_file<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        let path = path.as_ref();
        let total_size = region_size(capacity);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(RelayError::CreationFailure)?;
        file.set_len(total_size as u64)
            .map_err(RelayError::CreationFailure)?;

        // SAFETY: the file is open read/write and its length is already set
        let mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file) }
            .map_err(RelayError::CreationFailure)?;

        let mut region = Self {
            mmap,
            capacity,
            backing: Backing::Owned(path.to_path_buf()),
        };
        region.initialize();
        Ok(region)
    }

    /// Attach to an existing file-backed region
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let attach_err = |reason: String| RelayError::AttachFailure { reason };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| attach_err(format!("{}: {}", path.display(), e)))?;
        let file_len = file
            .metadata()
            .map_err(|e| attach_err(format!("{}: {}", path.display(), e)))?
            .len() as usize;
        if file_len < HEADER_SIZE {
            return Err(attach_err(format!(
                "{} is {} bytes, smaller than a control block",
                path.display(),
                file_len
            )));
        }

        // SAFETY: the file length was checked to be at least HEADER_SIZE
        let mmap = unsafe { MmapOptions::new().len(file_len).map_mut(&file) }
            .map_err(|e| attach_err(format!("{}: {}", path.display(), e)))?;

        // SAFETY: the mapping is page-aligned and holds at least one header
        let header = unsafe { std::ptr::read_volatile(mmap.as_ptr() as *const ControlHeader) };
        if !header.is_valid() {
            return Err(attach_err(format!(
                "{} does not hold a control block",
                path.display()
            )));
        }
        let capacity = header.capacity as usize;
        if file_len < region_size(capacity) {
            return Err(attach_err(format!(
                "{} is truncated: {} slots need {} bytes, found {}",
                path.display(),
                capacity,
                region_size(capacity),
                file_len
            )));
        }

        Ok(Self {
            mmap,
            capacity,
            backing: Backing::Attached(path.to_path_buf()),
        })
    }

    fn initialize(&mut self) {
        self.mmap.fill(0);
        *self.header_mut() = ControlHeader::new(self.capacity as i32);
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub fn header(&self) -> &ControlHeader {
        // SAFETY: the header sits at the page-aligned start of the mapping
        unsafe { &*(self.mmap.as_ptr() as *const ControlHeader) }
    }

    #[inline(always)]
    pub fn header_mut(&mut self) -> &mut ControlHeader {
        // SAFETY: the header sits at the start of the mapping; &mut self gives exclusive access
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut ControlHeader) }
    }

    #[inline(always)]
    pub fn slots(&self) -> &[SlotRecord] {
        // SAFETY: Region berukuran region_size(capacity); HEADER_SIZE kelipatan 8
        unsafe {
            std::slice::from_raw_parts(
                self.mmap.as_ptr().add(HEADER_SIZE) as *const SlotRecord,
                self.capacity,
            )
        }
    }

    #[inline(always)]
    pub fn slots_mut(&mut self) -> &mut [SlotRecord] {
        // SAFETY: as for slots(), with exclusive access
        unsafe {
            std::slice::from_raw_parts_mut(
                self.mmap.as_mut_ptr().add(HEADER_SIZE) as *mut SlotRecord,
                self.capacity,
            )
        }
    }

    /// Split borrow: header and slots at once.
    #[inline(always)]
    pub fn parts_mut(&mut self) -> (&mut ControlHeader, &mut [SlotRecord]) {
        let base = self.mmap.as_mut_ptr();
        // SAFETY: header and slots do not overlap inside the mapping
        unsafe {
            (
                &mut *(base as *mut ControlHeader),
                std::slice::from_raw_parts_mut(
                    base.add(HEADER_SIZE) as *mut SlotRecord,
                    self.capacity,
                ),
            )
        }
    }

    /// Copy the header without assuming nobody else is writing it.
    ///
    /// Fields may be torn relative to each other when another process is
    /// mutating the block; the result is for reporting only.
    pub fn snapshot(&self) -> ControlHeader {
        // SAFETY: Header valid selama mmap hidup
        unsafe { std::ptr::read_volatile(self.mmap.as_ptr() as *const ControlHeader) }
    }

    /// Bytes used by the control block and its slots.
    #[inline(always)]
    pub fn byte_len(&self) -> usize {
        region_size(self.capacity)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Anonymous => None,
            Backing::Owned(p) | Backing::Attached(p) => Some(p),
        }
    }

    /// Unmap the region; an owned backing file is removed.
    pub fn release(self) -> io::Result<()> {
        let Self { mmap, backing, .. } = self;
        drop(mmap);
        match backing {
            Backing::Owned(path) => fs::remove_file(path),
            Backing::Anonymous | Backing::Attached(_) => Ok(()),
        }
    }
}
