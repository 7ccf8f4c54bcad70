//! Page fault handling
//!
//! A fault names a process and a virtual page. Classification decides the
//! content source: a previously swapped page always reloads from its
//! recorded slot; otherwise section pages load from the executable image and
//! stack or argument pages are zero-filled on first touch. Pages outside the
//! address space are unresolvable and are reported, not fatal.

use log::{debug, trace};
use parking_lot::MutexGuard;

use crate::error::{Result, VmError};
use crate::frame_table::PageOwner;
use crate::manager::{VmManager, VmState};
use crate::process::{Backing, PageFlags, PageKind, Pid};

/// What a fault attempt produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultOutcome {
    /// The page is now resident
    Mapped,
    /// The address is outside the process's space; the caller must treat
    /// this as a hard fault and stop its transfer
    Unresolvable,
}

impl VmManager {
    /// Resolves a fault on `(pid, vpn)`.
    ///
    /// Called with the global lock held; may release it inside the eviction
    /// wait, so nothing observed before [`obtain_frame`](Self::obtain_frame)
    /// is taken for granted afterwards.
    pub(crate) fn fault_in(
        &self,
        state: &mut MutexGuard<'_, VmState>,
        pid: Pid,
        vpn: usize,
    ) -> Result<FaultOutcome> {
        {
            let Some(space) = state.processes.get(pid) else {
                return Err(VmError::NoSuchProcess(pid));
            };
            if space.classify(vpn).is_none() {
                debug!("hard fault: pid {} vpn {} outside address space", pid, vpn);
                return Ok(FaultOutcome::Unresolvable);
            }
        }

        let frame = self.obtain_frame(state)?;

        let VmState {
            processes,
            memory,
            swap,
            frames,
            free_frames,
            stats,
            ..
        } = &mut **state;

        // The wait inside obtain_frame releases the lock, so the process may
        // have been unloaded and the page may even have become resident
        // through another thread's fault on it.
        let Some(space) = processes.get_mut(pid) else {
            free_frames.push(frame);
            return Ok(FaultOutcome::Unresolvable);
        };
        let Some(kind) = space.classify(vpn) else {
            free_frames.push(frame);
            return Ok(FaultOutcome::Unresolvable);
        };
        let backing = match space.entry(vpn) {
            Some(entry) => entry.backing,
            None => {
                free_frames.push(frame);
                return Ok(FaultOutcome::Unresolvable);
            }
        };
        if let Backing::Frame(_) = backing {
            trace!("fault on pid {} vpn {} raced with another fault", pid, vpn);
            free_frames.push(frame);
            return Ok(FaultOutcome::Mapped);
        }

        let flags = match backing {
            Backing::Swapped(slot) => {
                if let Err(err) = swap.read_slot(slot, memory.frame_mut(frame)) {
                    free_frames.push(frame);
                    return Err(err.into());
                }
                swap.release(slot);
                stats.swap_ins += 1;
                trace!("fault: pid {} vpn {} reloaded from swap slot {}", pid, vpn, slot);
                // Contents already diverged from the image once; keep the
                // page write-back eligible.
                PageFlags::USED | PageFlags::DIRTY
            }
            Backing::Unmapped => match kind {
                PageKind::Section(section, index) => {
                    let read_only = space.image().sections()[section].read_only;
                    if let Err(err) = space.image().load_page(section, index, memory.frame_mut(frame)) {
                        free_frames.push(frame);
                        return Err(err.into());
                    }
                    stats.section_loads += 1;
                    trace!(
                        "fault: pid {} vpn {} loaded from section {} page {}",
                        pid, vpn, section, index
                    );
                    if read_only {
                        PageFlags::USED | PageFlags::READ_ONLY
                    } else {
                        PageFlags::USED
                    }
                }
                PageKind::ZeroFill => {
                    memory.zero_frame(frame);
                    stats.zero_fills += 1;
                    trace!("fault: pid {} vpn {} zero-filled", pid, vpn);
                    PageFlags::USED
                }
            },
            Backing::Frame(_) => unreachable!("resident pages returned above"),
        };

        let entry = space
            .entry_mut(vpn)
            .unwrap_or_else(|| panic!("page {pid}:{vpn} vanished during fault"));
        entry.backing = Backing::Frame(frame);
        entry.flags = flags;
        frames.set_owner(frame, PageOwner { pid, vpn });
        stats.page_faults += 1;
        Ok(FaultOutcome::Mapped)
    }
}
