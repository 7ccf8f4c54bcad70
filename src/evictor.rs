//! Frame allocation and clock eviction
//!
//! [`VmManager::obtain_frame`] is the only way the subsystem gets a physical
//! frame: the free list if it has one, otherwise a victim chosen by the
//! clock. The clock hand is process-wide and never resets between calls, so
//! the sweep is round-robin over all of physical memory and every unpinned
//! frame is eventually reachable.
//!
//! When every frame is pinned there is nothing to evict; the caller sleeps
//! on the eviction condition variable and restarts the scan after any unpin.
//! The wake is a hint, not a guarantee, so the scan always re-checks.

use log::{debug, trace};
use parking_lot::MutexGuard;

use crate::error::Result;
use crate::frame_table::PageOwner;
use crate::manager::{VmManager, VmState};
use crate::process::{Backing, PageFlags, TranslationEntry};

/// Outcome of one clock sweep
pub(crate) enum VictimScan {
    /// An unpinned frame with a clear reference bit
    Victim(usize),
    /// Every frame is pinned; the caller must wait for an unpin
    AllPinned,
}

impl VmState {
    /// Resolves an inverted-table owner handle to its translation entry.
    ///
    /// The two structures must agree at all times; disagreement is a logic
    /// defect and fails loudly.
    pub(crate) fn page_entry_mut(&mut self, owner: PageOwner) -> &mut TranslationEntry {
        self.processes
            .get_mut(owner.pid)
            .and_then(|space| space.entry_mut(owner.vpn))
            .unwrap_or_else(|| {
                panic!(
                    "inverted page table points at missing page {}:{}",
                    owner.pid, owner.vpn
                )
            })
    }

    fn advance_hand(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.frames.len();
    }

    /// One pass of the clock algorithm, starting at the persistent hand.
    ///
    /// Pinned frames are skipped. A set reference bit buys the frame a
    /// second chance and costs it the bit. Only called when the free list is
    /// empty, so every unpinned frame is owned.
    pub(crate) fn scan_victim(&mut self) -> VictimScan {
        if self.frames.all_pinned() {
            return VictimScan::AllPinned;
        }
        loop {
            let frame = self.clock_hand;
            if self.frames.is_pinned(frame) {
                self.advance_hand();
                continue;
            }
            let owner = self
                .frames
                .owner(frame)
                .unwrap_or_else(|| panic!("unowned frame {frame} during eviction scan"));
            let entry = self.page_entry_mut(owner);
            if entry.flags.contains(PageFlags::USED) {
                entry.flags.remove(PageFlags::USED);
                self.advance_hand();
                continue;
            }
            // Leave the hand past the victim so the next scan starts there.
            self.advance_hand();
            return VictimScan::Victim(frame);
        }
    }

    /// Reclaims a victim frame: writes it to swap if dirty, invalidates the
    /// owner's translation entry, and clears the inverted-table entry.
    pub(crate) fn evict_frame(&mut self, frame: usize) -> Result<()> {
        let owner = self
            .frames
            .owner(frame)
            .unwrap_or_else(|| panic!("evicting unowned frame {frame}"));
        let dirty = {
            let entry = self.page_entry_mut(owner);
            debug_assert_eq!(
                entry.frame(),
                Some(frame),
                "translation entry and inverted table disagree on frame {frame}"
            );
            entry.flags.contains(PageFlags::DIRTY)
        };
        if dirty {
            let slot = self.swap.allocate();
            let VmState { memory, swap, .. } = self;
            swap.write_slot(slot, memory.frame(frame))?;
            let entry = self.page_entry_mut(owner);
            entry.backing = Backing::Swapped(slot);
            entry.flags.remove(PageFlags::DIRTY | PageFlags::USED);
            self.stats.swap_outs += 1;
            debug!(
                "evict: frame {} ({}:{}) written to swap slot {}",
                frame, owner.pid, owner.vpn, slot
            );
        } else {
            // Clean contents are reconstructable from the image or by zero
            // fill, so no I/O.
            let entry = self.page_entry_mut(owner);
            entry.backing = Backing::Unmapped;
            entry.flags.remove(PageFlags::USED);
            trace!("evict: frame {} ({}:{}) dropped clean", frame, owner.pid, owner.vpn);
        }
        self.frames.clear_owner(frame);
        self.stats.evictions += 1;
        Ok(())
    }
}

impl VmManager {
    /// Returns a usable physical frame, evicting if necessary.
    ///
    /// Called with the global lock held. Blocks on the eviction condition
    /// variable (releasing the lock) while every frame is pinned, and
    /// restarts the scan after each wake.
    pub(crate) fn obtain_frame(&self, state: &mut MutexGuard<'_, VmState>) -> Result<usize> {
        loop {
            if let Some(frame) = state.free_frames.pop() {
                return Ok(frame);
            }
            match state.scan_victim() {
                VictimScan::Victim(frame) => {
                    state.evict_frame(frame)?;
                    return Ok(frame);
                }
                VictimScan::AllPinned => {
                    trace!("all frames pinned, waiting for an unpin");
                    self.unpinned.wait(state);
                }
            }
        }
    }
}
