//! The VM manager
//!
//! All mutable virtual-memory state lives in one [`VmState`] behind a single
//! global lock, with one condition variable whose only condition is "some
//! frame was unpinned". Every entry point of the subsystem goes through
//! method calls on [`VmManager`]; nothing else ever sees the raw state.
//!
//! Holding the lock across whole multi-page copies and across swap I/O fully
//! serializes concurrent callers. That trades throughput for a much simpler
//! correctness argument, which is the right trade for this kernel.

use std::path::Path;

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::addr::{DEFAULT_NUM_FRAMES, DEFAULT_PAGE_SIZE, PageGeometry};
use crate::error::{Result, VmError};
use crate::fault::FaultOutcome;
use crate::frame_table::{FrameTable, PageOwner};
use crate::image::ExecutableImage;
use crate::physical::PhysMemory;
use crate::process::{Backing, PageFlags, Pid, ProcessRegistry};
use crate::swap::{BackingStore, FileStore, MemStore, SwapSpace};

/// Number of stack pages given to every process when none is configured
pub const DEFAULT_STACK_PAGES: usize = 8;

/// Machine and policy configuration for a [`VmManager`]
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Page (and frame) size in bytes, a power of two
    pub page_size: usize,
    /// Number of physical frames
    pub num_frames: usize,
    /// Stack pages allocated to each process above its sections
    pub stack_pages: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            num_frames: DEFAULT_NUM_FRAMES,
            stack_pages: DEFAULT_STACK_PAGES,
        }
    }
}

/// Counters for the paging subsystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Faults resolved successfully
    pub page_faults: u64,
    /// Pages populated from an executable section
    pub section_loads: u64,
    /// Pages populated by zero fill
    pub zero_fills: u64,
    /// Pages read back from swap
    pub swap_ins: u64,
    /// Dirty victims written to swap
    pub swap_outs: u64,
    /// Frames reclaimed by the clock
    pub evictions: u64,
}

/// Everything the global VM lock protects
pub(crate) struct VmState {
    pub(crate) memory: PhysMemory,
    pub(crate) frames: FrameTable,
    pub(crate) free_frames: Vec<usize>,
    pub(crate) swap: SwapSpace,
    pub(crate) processes: ProcessRegistry,
    pub(crate) clock_hand: usize,
    pub(crate) stats: VmStats,
}

impl VmState {
    fn new(geometry: PageGeometry, store: Box<dyn BackingStore>) -> Self {
        // Reverse fill so allocation hands out frame 0 first.
        let free_frames = (0..geometry.num_frames()).rev().collect();
        Self {
            memory: PhysMemory::new(geometry),
            frames: FrameTable::new(geometry.num_frames()),
            free_frames,
            swap: SwapSpace::new(store, geometry.page_size()),
            processes: ProcessRegistry::new(),
            clock_hand: 0,
            stats: VmStats::default(),
        }
    }
}

/// The demand-paging virtual memory manager.
///
/// Shared across threads behind an `Arc`; every operation serializes on the
/// internal global lock.
pub struct VmManager {
    state: Mutex<VmState>,
    pub(crate) unpinned: Condvar,
    pub(crate) geometry: PageGeometry,
    stack_pages: usize,
}

impl VmManager {
    /// Creates a manager with an in-memory backing store
    pub fn new(config: VmConfig) -> Self {
        Self::with_store(config, Box::new(MemStore::new()))
    }

    /// Creates a manager over an arbitrary backing store
    pub fn with_store(config: VmConfig, store: Box<dyn BackingStore>) -> Self {
        let geometry = PageGeometry::new(config.page_size, config.num_frames);
        debug!(
            "vm init: {} frames of {} bytes, {} stack pages per process",
            geometry.num_frames(),
            geometry.page_size(),
            config.stack_pages
        );
        Self {
            state: Mutex::new(VmState::new(geometry, store)),
            unpinned: Condvar::new(),
            geometry,
            stack_pages: config.stack_pages,
        }
    }

    /// Creates a manager whose swap lives in a file, removed again on drop
    pub fn with_swap_file<P: AsRef<Path>>(config: VmConfig, path: P) -> Result<Self> {
        let store = FileStore::create(path)?;
        Ok(Self::with_store(config, Box::new(store)))
    }

    /// Machine geometry
    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, VmState> {
        self.state.lock()
    }

    /// Registers a new process for `image` and sizes its address space.
    ///
    /// No frame is allocated here; every page starts invalid and is faulted
    /// in on first touch.
    pub fn load_process(&self, image: Box<dyn ExecutableImage>) -> Result<Pid> {
        self.lock().processes.register(image, self.stack_pages)
    }

    /// Tears a process down, reclaiming its frames and swap slots
    pub fn unload_process(&self, pid: Pid) -> Result<()> {
        let mut state = self.lock();
        let space = state
            .processes
            .remove(pid)
            .ok_or(VmError::NoSuchProcess(pid))?;
        let mut freed_frames = 0;
        let mut freed_slots = 0;
        for entry in space.entries() {
            match entry.backing {
                Backing::Frame(frame) => {
                    debug_assert!(
                        !state.frames.is_pinned(frame),
                        "unloading process with pinned frame {frame}"
                    );
                    state.frames.clear_owner(frame);
                    state.free_frames.push(frame);
                    freed_frames += 1;
                }
                Backing::Swapped(slot) => {
                    state.swap.release(slot);
                    freed_slots += 1;
                }
                Backing::Unmapped => {}
            }
        }
        debug!(
            "process {} unloaded: {} frames and {} swap slots reclaimed",
            pid, freed_frames, freed_slots
        );
        drop(state);
        // Freed frames can satisfy a blocked evictor.
        self.unpinned.notify_all();
        Ok(())
    }

    /// Current paging counters
    pub fn stats(&self) -> VmStats {
        self.lock().stats
    }

    /// Pins a page's frame, faulting the page in first if needed.
    ///
    /// Used when kernel-side I/O must target user memory without the frame
    /// moving underneath it. Returns `Ok(false)` when the page is outside
    /// the process's address space. Pins do not nest.
    pub fn pin_page(&self, pid: Pid, vpn: usize) -> Result<bool> {
        let mut state = self.lock();
        let Some(space) = state.processes.get(pid) else {
            return Err(VmError::NoSuchProcess(pid));
        };
        let resident = space.entry(vpn).is_some_and(|e| e.is_resident());
        if !resident {
            match self.fault_in(&mut state, pid, vpn)? {
                FaultOutcome::Mapped => {}
                FaultOutcome::Unresolvable => return Ok(false),
            }
        }
        let Some(frame) = state
            .processes
            .get(pid)
            .and_then(|s| s.entry(vpn))
            .and_then(|e| e.frame())
        else {
            return Ok(false);
        };
        state.frames.pin(frame);
        if let Some(entry) = state.processes.get_mut(pid).and_then(|s| s.entry_mut(vpn)) {
            entry.flags.insert(PageFlags::USED);
        }
        Ok(true)
    }

    /// Releases a pin taken with [`pin_page`](Self::pin_page) and wakes any
    /// thread waiting for an evictable frame
    pub fn unpin_page(&self, pid: Pid, vpn: usize) -> Result<()> {
        let mut state = self.lock();
        let Some(space) = state.processes.get(pid) else {
            return Err(VmError::NoSuchProcess(pid));
        };
        let frame = space
            .entry(vpn)
            .and_then(|e| e.frame())
            .unwrap_or_else(|| panic!("unpin of non-resident page {pid}:{vpn}"));
        state.frames.unpin(frame);
        drop(state);
        self.unpinned.notify_one();
        Ok(())
    }

    // Inspection helpers, for tests and kernel debugging.

    /// Physical frame backing a page, if the page is resident
    pub fn resident_frame(&self, pid: Pid, vpn: usize) -> Option<usize> {
        self.lock()
            .processes
            .get(pid)
            .and_then(|s| s.entry(vpn))
            .and_then(|e| e.frame())
    }

    /// A page's current backing
    pub fn page_backing(&self, pid: Pid, vpn: usize) -> Option<Backing> {
        self.lock()
            .processes
            .get(pid)
            .and_then(|s| s.entry(vpn))
            .map(|e| e.backing)
    }

    /// A page's current access bits
    pub fn page_flags(&self, pid: Pid, vpn: usize) -> Option<PageFlags> {
        self.lock()
            .processes
            .get(pid)
            .and_then(|s| s.entry(vpn))
            .map(|e| e.flags)
    }

    /// Owner recorded in the inverted page table for a frame
    pub fn frame_owner(&self, frame: usize) -> Option<PageOwner> {
        self.lock().frames.owner(frame)
    }

    /// Frames on the free list
    pub fn free_frame_count(&self) -> usize {
        self.lock().free_frames.len()
    }

    /// Swap slots currently holding a swapped-out page
    pub fn swap_slots_in_use(&self) -> usize {
        self.lock().swap.slots_in_use()
    }
}
