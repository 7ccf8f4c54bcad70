//! The virtual memory access layer
//!
//! Everything that touches a process's address space funnels through
//! [`VmManager::read_memory`] and [`VmManager::write_memory`]. The walk
//! takes the global lock once for the whole call, moves one page at a time,
//! faults invalid pages in transparently, and pins each frame for exactly
//! the duration of its byte copy so the evictor can never pull it out from
//! underneath.
//!
//! Hard faults and write-to-read-only stop the walk; the call then reports
//! the bytes moved so far. A short count is the whole error signal, which
//! the syscall layer above turns into a process fault.

use crate::error::{Result, VmError};
use crate::fault::FaultOutcome;
use crate::manager::VmManager;
use crate::process::{PageFlags, Pid};

enum Access<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Access<'_> {
    fn len(&self) -> usize {
        match self {
            Access::Read(buf) => buf.len(),
            Access::Write(buf) => buf.len(),
        }
    }
}

impl VmManager {
    /// Copies bytes out of a process's address space into `buf`.
    ///
    /// Returns the number of bytes actually read, which is short of
    /// `buf.len()` exactly when the walk hit an unresolvable fault.
    pub fn read_memory(&self, pid: Pid, vaddr: usize, buf: &mut [u8]) -> Result<usize> {
        self.copy(pid, vaddr, Access::Read(buf))
    }

    /// Copies `data` into a process's address space.
    ///
    /// Returns the number of bytes actually written, short when the walk hit
    /// an unresolvable fault or a read-only page.
    pub fn write_memory(&self, pid: Pid, vaddr: usize, data: &[u8]) -> Result<usize> {
        self.copy(pid, vaddr, Access::Write(data))
    }

    fn copy(&self, pid: Pid, vaddr: usize, mut access: Access<'_>) -> Result<usize> {
        let geom = self.geometry;
        let total = access.len();
        let is_write = matches!(access, Access::Write(_));

        let mut state = self.lock();
        if state.processes.get(pid).is_none() {
            return Err(VmError::NoSuchProcess(pid));
        }

        let mut moved = 0;
        while moved < total {
            let va = vaddr + moved;
            let vpn = geom.page_of(va);
            let offset = geom.offset_of(va);

            let resident = match state.processes.get(pid).and_then(|s| s.entry(vpn)) {
                Some(entry) => entry.is_resident(),
                // Outside the address space: hard fault, stop here.
                None => break,
            };
            if !resident {
                match self.fault_in(&mut state, pid, vpn)? {
                    FaultOutcome::Mapped => {}
                    FaultOutcome::Unresolvable => break,
                }
            }

            // Re-fetch: the fault may have slept and the world moved.
            let Some(entry) = state.processes.get_mut(pid).and_then(|s| s.entry_mut(vpn)) else {
                break;
            };
            let Some(frame) = entry.frame() else {
                break;
            };
            if is_write && entry.flags.contains(PageFlags::READ_ONLY) {
                break;
            }
            entry.flags.insert(PageFlags::USED);
            if is_write {
                entry.flags.insert(PageFlags::DIRTY);
            }
            state.frames.pin(frame);

            let chunk = (total - moved).min(geom.page_size() - offset);
            let phys = geom.frame_span(frame).start + offset;
            match &mut access {
                Access::Read(buf) => {
                    buf[moved..moved + chunk]
                        .copy_from_slice(&state.memory.bytes()[phys..phys + chunk]);
                }
                Access::Write(data) => {
                    state.memory.bytes_mut()[phys..phys + chunk]
                        .copy_from_slice(&data[moved..moved + chunk]);
                }
            }

            state.frames.unpin(frame);
            // A blocked evictor may now have a candidate.
            self.unpinned.notify_one();
            moved += chunk;
        }
        Ok(moved)
    }
}
