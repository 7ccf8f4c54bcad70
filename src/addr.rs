//! Address decomposition and machine geometry
//!
//! Every virtual or physical address used by the VM subsystem decomposes
//! deterministically into a page number and an in-page offset, and the pair
//! re-encodes to the same address. All address arithmetic goes through
//! [`PageGeometry`] so the rest of the crate never hand-rolls shifts.

use static_assertions::const_assert;

/// Default page size when none is configured (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;
/// Default number of physical frames when none is configured
pub const DEFAULT_NUM_FRAMES: usize = 64;

const_assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
const_assert!(DEFAULT_NUM_FRAMES > 0);

/// Page size and physical frame count of the simulated machine.
///
/// The page size must be a power of two so page numbers and offsets are a
/// shift and a mask. Tiny page sizes are legal and used by the test suite to
/// force eviction with a handful of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    page_size: usize,
    page_shift: u32,
    num_frames: usize,
}

impl PageGeometry {
    /// Creates a new geometry.
    ///
    /// # Panics
    /// Panics if `page_size` is not a power of two or `num_frames` is zero.
    pub fn new(page_size: usize, num_frames: usize) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert!(num_frames > 0, "machine needs at least one physical frame");
        Self {
            page_size,
            page_shift: page_size.trailing_zeros(),
            num_frames,
        }
    }

    /// Page size in bytes
    #[inline]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of physical frames
    #[inline]
    pub const fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Total bytes of physical memory
    #[inline]
    pub const fn phys_bytes(&self) -> usize {
        self.num_frames * self.page_size
    }

    /// Page number of an address
    #[inline]
    pub const fn page_of(&self, addr: usize) -> usize {
        addr >> self.page_shift
    }

    /// Offset of an address within its page
    #[inline]
    pub const fn offset_of(&self, addr: usize) -> usize {
        addr & (self.page_size - 1)
    }

    /// Re-encodes a page number and in-page offset into an address
    #[inline]
    pub const fn address_of(&self, page: usize, offset: usize) -> usize {
        (page << self.page_shift) | (offset & (self.page_size - 1))
    }

    /// Byte range of a physical frame within the physical memory buffer
    #[inline]
    pub fn frame_span(&self, frame: usize) -> core::ops::Range<usize> {
        debug_assert!(frame < self.num_frames);
        let start = frame * self.page_size;
        start..start + self.page_size
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_NUM_FRAMES)
    }
}
