//! Swap space management
//!
//! The backing store is opened once when the kernel comes up and removed at
//! shutdown. It is addressed in fixed-size, slot-aligned blocks: slot `i`
//! lives at byte offset `i * page_size`. Slot allocation is a free list in
//! front of a monotonically growing high-water counter, so allocation never
//! fails; the store grows on demand.
//!
//! All slot I/O happens with the global VM lock held, so transfers never
//! interleave. That is a correctness simplification, not a performance
//! feature.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

/// Index of one page-sized slot in the backing store
pub type SlotId = usize;

/// Byte-addressed storage underneath the swap space.
///
/// Implementations must tolerate reads and writes at any offset previously
/// written; growing the store on a write past the current end is their job.
pub trait BackingStore: Send {
    /// Reads exactly `buf.len()` bytes at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `buf` at `offset`
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
}

/// An in-memory backing store, the default for tests and demos
#[derive(Default)]
pub struct MemStore {
    bytes: Vec<u8>,
}

impl MemStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for MemStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of swap store",
            ));
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }
}

/// A file-backed store.
///
/// The file is created (truncated) at construction and removed again when the
/// store is dropped, the same lifecycle the kernel gives its swap file
/// between initialization and terminate.
pub struct FileStore {
    file: File,
    path: PathBuf,
}

impl FileStore {
    /// Creates the swap file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!("swap file created at {}", path.display());
        Ok(Self { file, path })
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!("failed to remove swap file {}: {}", self.path.display(), err);
        }
    }
}

/// Slot allocator plus raw slot I/O over a backing store
pub struct SwapSpace {
    store: Box<dyn BackingStore>,
    page_size: usize,
    free_slots: Vec<SlotId>,
    next_slot: SlotId,
}

impl SwapSpace {
    /// Creates a swap space with no slots in use
    pub fn new(store: Box<dyn BackingStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size,
            free_slots: Vec::new(),
            next_slot: 0,
        }
    }

    /// Returns a free slot, reusing released slots before growing the store.
    /// Never fails.
    pub fn allocate(&mut self) -> SlotId {
        if let Some(slot) = self.free_slots.pop() {
            trace!("swap: reusing slot {}", slot);
            return slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        trace!("swap: new slot {}", slot);
        slot
    }

    /// Returns a slot to the free list. The caller must own the slot.
    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(slot < self.next_slot, "released slot was never allocated");
        debug_assert!(!self.free_slots.contains(&slot), "double release of swap slot");
        self.free_slots.push(slot);
    }

    /// Reads one slot into a page-sized buffer
    pub fn read_slot(&mut self, slot: SlotId, dest: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(dest.len(), self.page_size);
        self.store.read_at((slot * self.page_size) as u64, dest)
    }

    /// Writes a page-sized buffer to one slot
    pub fn write_slot(&mut self, slot: SlotId, src: &[u8]) -> io::Result<()> {
        debug_assert_eq!(src.len(), self.page_size);
        self.store.write_at((slot * self.page_size) as u64, src)
    }

    /// Number of slots currently holding a swapped-out page
    pub fn slots_in_use(&self) -> usize {
        self.next_slot - self.free_slots.len()
    }

    /// High-water mark of the slot counter
    pub fn high_water(&self) -> usize {
        self.next_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(page_size: usize) -> SwapSpace {
        SwapSpace::new(Box::new(MemStore::new()), page_size)
    }

    #[test]
    fn test_slot_write_read_round_trip() {
        let mut swap = swap(4);
        let slot = swap.allocate();
        swap.write_slot(slot, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        swap.read_slot(slot, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_freed_slots_are_reused_before_growing() {
        let mut swap = swap(4);
        let a = swap.allocate();
        let b = swap.allocate();
        assert_eq!((a, b), (0, 1));
        swap.release(a);
        assert_eq!(swap.allocate(), a);
        assert_eq!(swap.high_water(), 2);
    }

    #[test]
    fn test_slots_in_use_accounting() {
        let mut swap = swap(4);
        let a = swap.allocate();
        let _b = swap.allocate();
        assert_eq!(swap.slots_in_use(), 2);
        swap.release(a);
        assert_eq!(swap.slots_in_use(), 1);
    }

    #[test]
    fn test_slots_do_not_alias() {
        let mut swap = swap(2);
        let a = swap.allocate();
        let b = swap.allocate();
        swap.write_slot(a, &[0xAA, 0xAA]).unwrap();
        swap.write_slot(b, &[0xBB, 0xBB]).unwrap();
        let mut buf = [0u8; 2];
        swap.read_slot(a, &mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xAA]);
    }

    #[test]
    fn test_file_store_round_trip_and_cleanup() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pagevm-swap-test-{}", std::process::id()));
        {
            let mut swap = SwapSpace::new(Box::new(FileStore::create(&path).unwrap()), 4);
            let slot = swap.allocate();
            swap.write_slot(slot, &[9, 8, 7, 6]).unwrap();
            let mut buf = [0u8; 4];
            swap.read_slot(slot, &mut buf).unwrap();
            assert_eq!(buf, [9, 8, 7, 6]);
            assert!(path.exists());
        }
        assert!(!path.exists(), "swap file should be removed on drop");
    }
}
