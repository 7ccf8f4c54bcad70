//! Per-process translation state and the process registry
//!
//! A process owns one translation entry per virtual page. The address space
//! is sized once at load time: the image's sections, then a run of stack
//! pages, then a single argument page at the top. Entries start invalid and
//! become valid on first fault.

use bitflags::bitflags;
use hashbrown::HashMap;
use log::debug;

use crate::error::{Result, VmError};
use crate::image::{ExecutableImage, Section};
use crate::swap::SlotId;

/// Process identifier
pub type Pid = u32;

bitflags! {
    /// Per-page access bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// Page may not be written
        const READ_ONLY = 1 << 0;
        /// Reference bit, set on every access and cleared by the clock sweep
        const USED = 1 << 1;
        /// Set on any write while resident; a dirty victim goes to swap
        const DIRTY = 1 << 2;
    }
}

/// What currently backs a virtual page.
///
/// `Frame` is the valid state. `Swapped` holds the slot written at eviction
/// time; the next fault reloads from there. `Unmapped` pages get their
/// content from the executable image or are zero-filled on first touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Never faulted, or evicted clean
    Unmapped,
    /// Resident in the given physical frame
    Frame(usize),
    /// Evicted to the given swap slot
    Swapped(SlotId),
}

/// Translation entry for one virtual page of one process
#[derive(Debug, Clone, Copy)]
pub struct TranslationEntry {
    /// Virtual page number
    pub vpn: usize,
    /// Current backing
    pub backing: Backing,
    /// Access bits
    pub flags: PageFlags,
}

impl TranslationEntry {
    fn invalid(vpn: usize) -> Self {
        Self {
            vpn,
            backing: Backing::Unmapped,
            flags: PageFlags::empty(),
        }
    }

    /// Whether the page is currently backed by a physical frame
    #[inline]
    pub fn is_resident(&self) -> bool {
        matches!(self.backing, Backing::Frame(_))
    }

    /// The backing frame, if resident
    #[inline]
    pub fn frame(&self) -> Option<usize> {
        match self.backing {
            Backing::Frame(f) => Some(f),
            _ => None,
        }
    }
}

/// Classification of a faulting page, derived from the address space layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Backed by an executable section: `(section index, page index within it)`
    Section(usize, usize),
    /// Stack or argument page, zero-filled on first touch
    ZeroFill,
}

/// One process's demand-paged address space
pub struct ProcessSpace {
    pid: Pid,
    image: Box<dyn ExecutableImage>,
    entries: Vec<TranslationEntry>,
    section_pages: usize,
}

impl ProcessSpace {
    /// Builds the address space for an image.
    ///
    /// Sections must be contiguous from virtual page zero. The space is the
    /// section pages followed by `stack_pages` of stack and one argument
    /// page.
    fn new(pid: Pid, image: Box<dyn ExecutableImage>, stack_pages: usize) -> Result<Self> {
        let mut section_pages = 0;
        for section in image.sections() {
            if section.first_vpn != section_pages {
                return Err(VmError::BadImage(format!(
                    "section at vpn {} leaves a gap (expected vpn {})",
                    section.first_vpn, section_pages
                )));
            }
            section_pages += section.page_count;
        }
        let num_pages = section_pages + stack_pages + 1;
        let entries = (0..num_pages).map(TranslationEntry::invalid).collect();
        Ok(Self {
            pid,
            image,
            entries,
            section_pages,
        })
    }

    /// Process identifier
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Total pages in the address space
    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    /// Pages covered by executable sections
    pub fn section_pages(&self) -> usize {
        self.section_pages
    }

    /// The program image backing the section pages
    pub fn image(&self) -> &dyn ExecutableImage {
        self.image.as_ref()
    }

    /// Translation entry for a page, if the page is inside the space
    pub fn entry(&self, vpn: usize) -> Option<&TranslationEntry> {
        self.entries.get(vpn)
    }

    /// Mutable translation entry for a page
    pub fn entry_mut(&mut self, vpn: usize) -> Option<&mut TranslationEntry> {
        self.entries.get_mut(vpn)
    }

    /// All translation entries, in page order
    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Classifies a page by the address space layout, or `None` when the
    /// page is outside the space entirely (an unresolvable fault).
    pub fn classify(&self, vpn: usize) -> Option<PageKind> {
        if vpn >= self.num_pages() {
            return None;
        }
        if vpn < self.section_pages {
            let (index, section) = self.section_containing(vpn)?;
            return Some(PageKind::Section(index, vpn - section.first_vpn));
        }
        Some(PageKind::ZeroFill)
    }

    fn section_containing(&self, vpn: usize) -> Option<(usize, Section)> {
        self.image
            .sections()
            .iter()
            .enumerate()
            .find(|(_, s)| vpn >= s.first_vpn && vpn < s.first_vpn + s.page_count)
            .map(|(i, s)| (i, *s))
    }
}

/// Registry of live processes, keyed by pid
pub struct ProcessRegistry {
    table: HashMap<Pid, ProcessSpace>,
    next_pid: Pid,
}

impl ProcessRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            next_pid: 1,
        }
    }

    /// Registers a new process for an image, returning its pid
    pub fn register(
        &mut self,
        image: Box<dyn ExecutableImage>,
        stack_pages: usize,
    ) -> Result<Pid> {
        let pid = self.next_pid;
        let space = ProcessSpace::new(pid, image, stack_pages)?;
        debug!(
            "process {} loaded: {} section pages, {} total pages",
            pid,
            space.section_pages(),
            space.num_pages()
        );
        self.next_pid += 1;
        self.table.insert(pid, space);
        Ok(pid)
    }

    /// Looks a process up
    pub fn get(&self, pid: Pid) -> Option<&ProcessSpace> {
        self.table.get(&pid)
    }

    /// Looks a process up for mutation
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessSpace> {
        self.table.get_mut(&pid)
    }

    /// Removes a process, returning its space for teardown
    pub fn remove(&mut self, pid: Pid) -> Option<ProcessSpace> {
        self.table.remove(&pid)
    }

    /// Number of live processes
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no process is registered
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemImage;

    fn image_with_pages(page_size: usize, ro_pages: usize, rw_pages: usize) -> Box<MemImage> {
        let mut image = MemImage::new(page_size);
        if ro_pages > 0 {
            image.add_section(true, &vec![1u8; ro_pages * page_size]);
        }
        if rw_pages > 0 {
            image.add_section(false, &vec![2u8; rw_pages * page_size]);
        }
        Box::new(image)
    }

    #[test]
    fn test_space_sizing() {
        let mut registry = ProcessRegistry::new();
        let pid = registry.register(image_with_pages(4, 2, 1), 8).unwrap();
        let space = registry.get(pid).unwrap();
        // 3 section pages + 8 stack pages + 1 argument page
        assert_eq!(space.num_pages(), 12);
        assert_eq!(space.section_pages(), 3);
        assert!(space.entries().iter().all(|e| !e.is_resident()));
    }

    #[test]
    fn test_classify_regions() {
        let mut registry = ProcessRegistry::new();
        let pid = registry.register(image_with_pages(4, 1, 2), 2).unwrap();
        let space = registry.get(pid).unwrap();
        assert_eq!(space.classify(0), Some(PageKind::Section(0, 0)));
        assert_eq!(space.classify(2), Some(PageKind::Section(1, 1)));
        assert_eq!(space.classify(3), Some(PageKind::ZeroFill));
        assert_eq!(space.classify(5), Some(PageKind::ZeroFill));
        assert_eq!(space.classify(6), None);
    }

    #[test]
    fn test_gapped_image_is_rejected() {
        let mut gapped = MemImage::new(4);
        gapped.add_section(false, &[0u8; 4]);
        // Force a gap by lying about the layout.
        gapped.sections_mut_for_tests()[0].first_vpn = 3;
        let mut registry = ProcessRegistry::new();
        assert!(matches!(
            registry.register(Box::new(gapped), 1),
            Err(VmError::BadImage(_))
        ));
    }

    #[test]
    fn test_pids_are_unique() {
        let mut registry = ProcessRegistry::new();
        let a = registry.register(image_with_pages(4, 1, 0), 1).unwrap();
        let b = registry.register(image_with_pages(4, 1, 0), 1).unwrap();
        assert_ne!(a, b);
        registry.remove(a).unwrap();
        let c = registry.register(image_with_pages(4, 1, 0), 1).unwrap();
        assert_ne!(b, c);
    }
}
