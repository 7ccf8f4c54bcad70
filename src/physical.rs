//! Physical memory
//!
//! The simulated machine exposes physical memory as one contiguous byte
//! buffer of `num_frames * page_size` bytes. Frame-level transfers are always
//! page-sized and page-aligned; the access layer additionally copies
//! sub-page ranges at raw physical offsets while the owning frame is pinned.

use crate::addr::PageGeometry;

/// The flat physical memory buffer of the simulated machine
pub struct PhysMemory {
    bytes: Vec<u8>,
    geometry: PageGeometry,
}

impl PhysMemory {
    /// Allocates zeroed physical memory for the given geometry
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            bytes: vec![0u8; geometry.phys_bytes()],
            geometry,
        }
    }

    /// Machine geometry backing this buffer
    #[inline]
    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Read-only view of one frame
    #[inline]
    pub fn frame(&self, frame: usize) -> &[u8] {
        &self.bytes[self.geometry.frame_span(frame)]
    }

    /// Mutable view of one frame
    #[inline]
    pub fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        let span = self.geometry.frame_span(frame);
        &mut self.bytes[span]
    }

    /// Zero-fills one frame
    pub fn zero_frame(&mut self, frame: usize) {
        self.frame_mut(frame).fill(0);
    }

    /// Raw view of the whole buffer, for sub-page copies at physical offsets
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw mutable view of the whole buffer
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
