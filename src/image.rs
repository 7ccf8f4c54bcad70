//! Executable image interface
//!
//! The executable loader is an external collaborator. The VM subsystem only
//! needs an ordered list of sections and a way to pull one page of section
//! content into a physical frame, so that is the whole trait surface.

use std::io;

/// One section of an executable image.
///
/// Sections cover a contiguous run of virtual pages starting at `first_vpn`.
/// A complete image lists its sections in virtual page order with no gaps,
/// starting at page zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// First virtual page number covered by this section
    pub first_vpn: usize,
    /// Number of pages in this section
    pub page_count: usize,
    /// Whether pages of this section are mapped read-only
    pub read_only: bool,
}

/// A program image that can be demand-paged.
pub trait ExecutableImage: Send {
    /// Sections of this image, in virtual page order
    fn sections(&self) -> &[Section];

    /// Loads one page of a section into `dest`.
    ///
    /// # Arguments
    /// * `section` - index into [`sections`](Self::sections)
    /// * `index` - page index within that section
    /// * `dest` - exactly one page-sized destination buffer
    fn load_page(&self, section: usize, index: usize, dest: &mut [u8]) -> io::Result<()>;
}

/// An in-memory image, used by tests and demos in place of a real loader.
pub struct MemImage {
    page_size: usize,
    sections: Vec<Section>,
    contents: Vec<Vec<u8>>,
}

impl MemImage {
    /// Creates an empty image for the given page size
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            sections: Vec::new(),
            contents: Vec::new(),
        }
    }

    /// Appends a section holding `data`, padded to whole pages.
    ///
    /// Sections are laid out contiguously in the order they are added.
    pub fn add_section(&mut self, read_only: bool, data: &[u8]) -> &mut Self {
        let page_count = data.len().div_ceil(self.page_size).max(1);
        let first_vpn = self
            .sections
            .last()
            .map(|s| s.first_vpn + s.page_count)
            .unwrap_or(0);
        let mut padded = data.to_vec();
        padded.resize(page_count * self.page_size, 0);
        self.sections.push(Section {
            first_vpn,
            page_count,
            read_only,
        });
        self.contents.push(padded);
        self
    }

    #[cfg(test)]
    pub(crate) fn sections_mut_for_tests(&mut self) -> &mut [Section] {
        &mut self.sections
    }
}

impl ExecutableImage for MemImage {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn load_page(&self, section: usize, index: usize, dest: &mut [u8]) -> io::Result<()> {
        let data = &self.contents[section];
        let start = index * self.page_size;
        dest.copy_from_slice(&data[start..start + self.page_size]);
        Ok(())
    }
}
