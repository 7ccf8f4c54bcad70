//! pagevm
//!
//! A demand-paging virtual memory manager for a cooperatively scheduled
//! teaching kernel, run as a hosted simulation. Each process gets a virtual
//! page range larger than physical memory; pages are faulted in from an
//! executable image or a swap store on first touch, and frames are reclaimed
//! under pressure by a clock (second-chance) evictor. A pin protocol keeps
//! concurrent access safe while eviction runs.
//!
//! # Architecture
//!
//! - **addr** / **physical**: machine geometry and the flat physical memory
//!   buffer.
//! - **image**: the executable-image interface (sections plus a per-page
//!   loader).
//! - **swap**: slot allocation and raw slot I/O over a backing store.
//! - **frame_table**: the inverted (frame-indexed) page table with the pin
//!   flags.
//! - **process**: per-process translation entries and the process registry.
//! - **manager** / **evictor** / **fault** / **access**: the VM manager
//!   proper, split along the subsystem's seams. One global lock guards all
//!   mutable state; one condition variable wakes evictors waiting for an
//!   unpinned frame.
//!
//! # Usage
//!
//! ```rust
//! use pagevm::{MemImage, VmConfig, VmManager};
//!
//! let vm = VmManager::new(VmConfig { page_size: 16, num_frames: 4, stack_pages: 2 });
//! let mut image = MemImage::new(16);
//! image.add_section(true, b"some program text");
//! let pid = vm.load_process(Box::new(image)).unwrap();
//!
//! let mut text = [0u8; 4];
//! vm.read_memory(pid, 0, &mut text).unwrap();
//! assert_eq!(&text, b"some");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod error;
pub mod frame_table;
pub mod image;
pub mod manager;
pub mod physical;
pub mod process;
pub mod swap;

mod access;
mod evictor;
mod fault;

// Re-export commonly used types
pub use addr::{DEFAULT_NUM_FRAMES, DEFAULT_PAGE_SIZE, PageGeometry};
pub use error::{Result, VmError};
pub use frame_table::PageOwner;
pub use image::{ExecutableImage, MemImage, Section};
pub use manager::{DEFAULT_STACK_PAGES, VmConfig, VmManager, VmStats};
pub use physical::PhysMemory;
pub use process::{Backing, PageFlags, Pid, TranslationEntry};
pub use swap::{BackingStore, FileStore, MemStore, SlotId, SwapSpace};
