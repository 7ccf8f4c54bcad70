//! Inverted page table
//!
//! One entry per physical frame, created at kernel start and mutated for the
//! lifetime of the machine. Each entry records which process page currently
//! owns the frame and whether the frame is pinned. Per the ownership rules of
//! the crate, the owner is a `(pid, vpn)` handle resolved through the process
//! registry; the authoritative translation entry always lives there.
//!
//! Waking threads that wait for a pinnable frame is the manager's job; this
//! table is pure state plus a pinned-frame count.

use crate::process::Pid;

/// Owner handle stored in an inverted page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOwner {
    /// Owning process
    pub pid: Pid,
    /// Virtual page number within that process
    pub vpn: usize,
}

/// State of one physical frame
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTableEntry {
    /// Process page backed by this frame, if any
    pub owner: Option<PageOwner>,
    pinned: bool,
}

/// The frame-indexed table
pub struct FrameTable {
    entries: Vec<FrameTableEntry>,
    pinned_count: usize,
}

impl FrameTable {
    /// Creates a table with every frame unowned and unpinned
    pub fn new(num_frames: usize) -> Self {
        Self {
            entries: vec![FrameTableEntry::default(); num_frames],
            pinned_count: 0,
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the machine has no frames, which the geometry forbids
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current owner of a frame
    #[inline]
    pub fn owner(&self, frame: usize) -> Option<PageOwner> {
        self.entries[frame].owner
    }

    /// Assigns a frame to a process page
    pub fn set_owner(&mut self, frame: usize, owner: PageOwner) {
        self.entries[frame].owner = Some(owner);
    }

    /// Clears a frame's ownership, making it reusable
    pub fn clear_owner(&mut self, frame: usize) {
        self.entries[frame].owner = None;
    }

    /// Pins a frame, excluding it from victim selection.
    ///
    /// Pins do not nest; pinning an already pinned frame is a protocol
    /// violation by the caller.
    pub fn pin(&mut self, frame: usize) {
        let entry = &mut self.entries[frame];
        debug_assert!(!entry.pinned, "pin of already pinned frame {frame}");
        entry.pinned = true;
        self.pinned_count += 1;
    }

    /// Unpins a frame
    pub fn unpin(&mut self, frame: usize) {
        let entry = &mut self.entries[frame];
        debug_assert!(entry.pinned, "unpin of unpinned frame {frame}");
        entry.pinned = false;
        self.pinned_count -= 1;
    }

    /// Whether a frame is currently pinned
    #[inline]
    pub fn is_pinned(&self, frame: usize) -> bool {
        self.entries[frame].pinned
    }

    /// Whether every frame in physical memory is pinned
    #[inline]
    pub fn all_pinned(&self) -> bool {
        self.pinned_count == self.entries.len()
    }

    /// Number of pinned frames
    pub fn pinned_count(&self) -> usize {
        self.pinned_count
    }
}
