//! Virtual memory subsystem tests
//!
//! Exercised through the public API only: small page sizes and frame counts
//! make eviction cheap to force.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pagevm::{Backing, MemImage, PageFlags, Pid, VmConfig, VmManager};

const PAGE: usize = 4;

fn vm(num_frames: usize, stack_pages: usize) -> VmManager {
    VmManager::new(VmConfig {
        page_size: PAGE,
        num_frames,
        stack_pages,
    })
}

/// Image with one read-only page of section data.
fn ro_image(data: &[u8]) -> Box<MemImage> {
    let mut image = MemImage::new(PAGE);
    image.add_section(true, data);
    Box::new(image)
}

/// Image with no sections at all; every page is stack or argument space.
fn empty_image() -> Box<MemImage> {
    Box::new(MemImage::new(PAGE))
}

#[test]
fn read_faults_section_page_in() {
    let vm = vm(4, 1);
    let pid = vm.load_process(ro_image(b"abcd")).unwrap();
    assert_eq!(vm.page_backing(pid, 0), Some(Backing::Unmapped));

    let mut buf = [0u8; 4];
    assert_eq!(vm.read_memory(pid, 0, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"abcd");
    assert!(vm.resident_frame(pid, 0).is_some());
    assert!(vm.page_flags(pid, 0).unwrap().contains(PageFlags::READ_ONLY));

    let stats = vm.stats();
    assert_eq!(stats.page_faults, 1);
    assert_eq!(stats.section_loads, 1);
}

#[test]
fn stack_pages_are_zero_filled() {
    let vm = vm(4, 2);
    let pid = vm.load_process(ro_image(b"abcd")).unwrap();

    // vpn 1 is a stack page; first touch reads zeros.
    let mut buf = [0xFFu8; 4];
    assert_eq!(vm.read_memory(pid, PAGE, &mut buf).unwrap(), 4);
    assert_eq!(buf, [0, 0, 0, 0]);
    assert_eq!(vm.stats().zero_fills, 1);
}

#[test]
fn write_to_read_only_page_is_a_short_transfer() {
    let vm = vm(4, 1);
    let pid = vm.load_process(ro_image(b"abcd")).unwrap();
    assert_eq!(vm.write_memory(pid, 0, b"xy").unwrap(), 0);

    // The section content is untouched.
    let mut buf = [0u8; 4];
    vm.read_memory(pid, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"abcd");
}

#[test]
fn partial_transfer_stops_at_address_space_end() {
    // 1 section page + 0 stack pages + 1 argument page = 2 pages of space.
    let vm = vm(4, 0);
    let pid = vm.load_process(ro_image(b"abcd")).unwrap();

    // Spans the argument page and then runs off the end of the space.
    let mut buf = [0u8; 8];
    assert_eq!(vm.read_memory(pid, PAGE, &mut buf).unwrap(), 4);

    // Entirely outside the space: zero bytes, not an error.
    assert_eq!(vm.read_memory(pid, 4 * PAGE, &mut buf).unwrap(), 0);
}

#[test]
fn write_spanning_pages_lands_byte_exact() {
    let vm = vm(4, 3);
    let pid = vm.load_process(empty_image()).unwrap();

    // Unaligned write across two stack pages.
    assert_eq!(vm.write_memory(pid, 2, b"abcdef").unwrap(), 6);
    let mut buf = [0u8; 10];
    assert_eq!(vm.read_memory(pid, 0, &mut buf).unwrap(), 10);
    assert_eq!(&buf, b"\0\0abcdef\0\0");
}

#[test]
fn dirty_page_round_trips_through_swap() {
    let vm = vm(2, 4);
    let pid = vm.load_process(empty_image()).unwrap();

    vm.write_memory(pid, 0, b"AAAA").unwrap();
    vm.write_memory(pid, PAGE, b"BBBB").unwrap();
    // Both frames taken; the next fault must evict.
    assert_eq!(vm.free_frame_count(), 0);

    vm.write_memory(pid, 2 * PAGE, b"CCCC").unwrap();
    let stats = vm.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap_outs, 1, "dirty victim must be written out");

    // Whichever page was evicted comes back bit-exact.
    let mut buf = [0u8; 4];
    vm.read_memory(pid, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"AAAA");
    vm.read_memory(pid, PAGE, &mut buf).unwrap();
    assert_eq!(&buf, b"BBBB");
    vm.read_memory(pid, 2 * PAGE, &mut buf).unwrap();
    assert_eq!(&buf, b"CCCC");
    assert!(vm.stats().swap_ins >= 1);
}

#[test]
fn swap_slots_are_reclaimed_on_swap_in() {
    let vm = vm(2, 4);
    let pid = vm.load_process(empty_image()).unwrap();

    vm.write_memory(pid, 0, b"AAAA").unwrap();
    vm.write_memory(pid, PAGE, b"BBBB").unwrap();
    vm.write_memory(pid, 2 * PAGE, b"CCCC").unwrap();
    assert_eq!(vm.swap_slots_in_use(), 1);

    // Touch everything once more; every swapped page is faulted back in and
    // its slot freed, while newly evicted dirty pages take slots again.
    let mut buf = [0u8; 4];
    vm.read_memory(pid, 0, &mut buf).unwrap();
    vm.read_memory(pid, PAGE, &mut buf).unwrap();
    vm.read_memory(pid, 2 * PAGE, &mut buf).unwrap();

    // 3 dirty pages, 2 frames: exactly one page is out at a time.
    assert_eq!(vm.swap_slots_in_use(), 1);
}

#[test]
fn clean_pages_are_evicted_without_swap_io() {
    let vm = vm(2, 2);
    let pid = vm.load_process(ro_image(b"abcd")).unwrap();

    let mut buf = [0u8; 4];
    vm.read_memory(pid, 0, &mut buf).unwrap(); // section page, clean
    vm.read_memory(pid, PAGE, &mut buf).unwrap(); // stack page, clean
    vm.read_memory(pid, 2 * PAGE, &mut buf).unwrap(); // forces an eviction

    let stats = vm.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap_outs, 0, "clean victim must not be written out");
    assert_eq!(vm.swap_slots_in_use(), 0);
}

#[test]
fn clock_gives_used_pages_a_second_chance() {
    let vm = vm(4, 5);
    let pid = vm.load_process(empty_image()).unwrap();

    for vpn in 0..4 {
        vm.write_memory(pid, vpn * PAGE, b"XXXX").unwrap();
    }
    // All four frames resident with the reference bit set. One more fault
    // sweeps the clock once, clearing every bit, and takes frame 0's page.
    vm.write_memory(pid, 4 * PAGE, b"YYYY").unwrap();

    assert_eq!(vm.stats().evictions, 1);
    let mut resident = 0;
    for vpn in 0..4 {
        if let Some(flags) = vm.page_flags(pid, vpn) {
            if vm.resident_frame(pid, vpn).is_some() {
                resident += 1;
                assert!(
                    !flags.contains(PageFlags::USED),
                    "sweep should have cleared the reference bit of vpn {vpn}"
                );
            }
        }
    }
    assert_eq!(resident, 3);
    // vpn 4 was just faulted in and keeps its bit.
    assert!(vm.page_flags(pid, 4).unwrap().contains(PageFlags::USED));
}

#[test]
fn pinned_frames_are_never_victims() {
    let vm = vm(2, 4);
    let pid = vm.load_process(empty_image()).unwrap();

    vm.write_memory(pid, 0, b"KEEP").unwrap();
    vm.write_memory(pid, PAGE, b"DROP").unwrap();
    assert!(vm.pin_page(pid, 0).unwrap());
    let pinned_frame = vm.resident_frame(pid, 0).unwrap();

    // Force an eviction; the pinned frame must be skipped even though the
    // clock reaches it first.
    vm.write_memory(pid, 2 * PAGE, b"NEWP").unwrap();
    assert_eq!(vm.resident_frame(pid, 0), Some(pinned_frame));
    assert_eq!(vm.page_backing(pid, 1), Some(Backing::Swapped(0)));

    vm.unpin_page(pid, 0).unwrap();
    let mut buf = [0u8; 4];
    vm.read_memory(pid, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"KEEP");
}

#[test]
fn evictor_blocks_until_a_pin_is_released() {
    let vm = Arc::new(vm(2, 4));
    let pid = vm.load_process(empty_image()).unwrap();

    vm.write_memory(pid, 0, b"AAAA").unwrap();
    vm.write_memory(pid, PAGE, b"BBBB").unwrap();
    assert!(vm.pin_page(pid, 0).unwrap());
    assert!(vm.pin_page(pid, 1).unwrap());

    let done = Arc::new(AtomicBool::new(false));
    let handle = {
        let vm = Arc::clone(&vm);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            // Needs a frame, finds every one pinned, and must sleep until
            // the unpin below.
            let written = vm.write_memory(pid, 2 * PAGE, b"CCCC").unwrap();
            done.store(true, Ordering::SeqCst);
            written
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(
        !done.load(Ordering::SeqCst),
        "fault should be blocked while every frame is pinned"
    );

    vm.unpin_page(pid, 1).unwrap();
    assert_eq!(handle.join().unwrap(), 4);
    assert!(done.load(Ordering::SeqCst));

    // The frame that was unpinned is the one that got evicted.
    assert_eq!(vm.resident_frame(pid, 0), Some(0));
    assert!(vm.resident_frame(pid, 1).is_none());
    vm.unpin_page(pid, 0).unwrap();
}

#[test]
fn inverted_table_and_translations_agree() {
    let vm = vm(3, 4);
    let pid_a = vm.load_process(ro_image(b"abcd")).unwrap();
    let pid_b = vm.load_process(empty_image()).unwrap();

    let mut buf = [0u8; 4];
    vm.read_memory(pid_a, 0, &mut buf).unwrap();
    vm.write_memory(pid_b, 0, b"1111").unwrap();
    vm.write_memory(pid_b, PAGE, b"2222").unwrap();
    vm.write_memory(pid_b, 2 * PAGE, b"3333").unwrap(); // evicts someone

    // Every owned frame points at a translation entry that points back, and
    // no two frames share an owner.
    let mut seen: Vec<(Pid, usize)> = Vec::new();
    for frame in 0..3 {
        let Some(owner) = vm.frame_owner(frame) else { continue };
        assert_eq!(
            vm.page_backing(owner.pid, owner.vpn),
            Some(Backing::Frame(frame)),
            "frame {frame} and its owner disagree"
        );
        assert!(!seen.contains(&(owner.pid, owner.vpn)));
        seen.push((owner.pid, owner.vpn));
    }
}

#[test]
fn unload_reclaims_frames_and_swap_slots() {
    let vm = vm(2, 4);
    let pid = vm.load_process(empty_image()).unwrap();

    vm.write_memory(pid, 0, b"AAAA").unwrap();
    vm.write_memory(pid, PAGE, b"BBBB").unwrap();
    vm.write_memory(pid, 2 * PAGE, b"CCCC").unwrap();
    assert_eq!(vm.swap_slots_in_use(), 1);
    assert_eq!(vm.free_frame_count(), 0);

    vm.unload_process(pid).unwrap();
    assert_eq!(vm.free_frame_count(), 2);
    assert_eq!(vm.swap_slots_in_use(), 0);

    // The pid is gone.
    assert!(vm.read_memory(pid, 0, &mut [0u8; 1]).is_err());
    assert!(vm.unload_process(pid).is_err());
}

#[test]
fn file_backed_swap_round_trips_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swapfile");
    {
        let vm = VmManager::with_swap_file(
            VmConfig {
                page_size: PAGE,
                num_frames: 2,
                stack_pages: 4,
            },
            &path,
        )
        .unwrap();
        let pid = vm.load_process(empty_image()).unwrap();
        vm.write_memory(pid, 0, b"AAAA").unwrap();
        vm.write_memory(pid, PAGE, b"BBBB").unwrap();
        vm.write_memory(pid, 2 * PAGE, b"CCCC").unwrap();
        assert!(path.exists());

        let mut buf = [0u8; 4];
        vm.read_memory(pid, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"AAAA");
    }
    assert!(!path.exists(), "swap file should be removed with the manager");
}

/// The two-frame scenario from the design notes: a dirty zero-fill page and
/// a clean section page compete for residency.
#[test]
fn two_frame_eviction_scenario() {
    let vm = vm(2, 1);
    // vpn 0: read-only section page. vpn 1: stack page. vpn 2: argument page.
    let pid = vm.load_process(ro_image(b"sect")).unwrap();

    // Dirty the stack page, then fault the section page in.
    vm.write_memory(pid, PAGE, b"P0P0").unwrap();
    let mut buf = [0u8; 4];
    vm.read_memory(pid, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"sect");
    assert_eq!(vm.free_frame_count(), 0);

    // Fault the argument page; the clock sweeps both frames and evicts the
    // stack page (its frame is reached first), which is dirty and goes to
    // swap.
    vm.write_memory(pid, 2 * PAGE, b"P2P2").unwrap();
    assert_eq!(vm.page_backing(pid, 1), Some(Backing::Swapped(0)));
    assert!(vm.resident_frame(pid, 0).is_some(), "section page survived");

    // The swapped bytes come back bit-exact.
    vm.read_memory(pid, PAGE, &mut buf).unwrap();
    assert_eq!(&buf, b"P0P0");

    // And the section page, however often it is bounced, reloads its data.
    vm.read_memory(pid, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"sect");
    vm.read_memory(pid, 2 * PAGE, &mut buf).unwrap();
    assert_eq!(&buf, b"P2P2");

    // Two dirty pages chasing two frames with a clean page in the mix:
    // exactly one of them is out at any observation point.
    let stats = vm.stats();
    assert!(stats.swap_outs >= 2);
    assert_eq!(vm.swap_slots_in_use(), 1);
}

#[test]
fn pin_of_unmapped_region_reports_failure() {
    let vm = vm(2, 1);
    let pid = vm.load_process(ro_image(b"abcd")).unwrap();
    // Outside the 3-page address space.
    assert!(!vm.pin_page(pid, 9).unwrap());
    assert!(vm.pin_page(99, 0).is_err());
}
