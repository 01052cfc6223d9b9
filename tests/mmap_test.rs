//! Mapping integration tests: region checks, faults, page pinning and the
//! interaction between live mappings and trim.
//!
//! Run with: `cargo test`

use std::sync::Arc;
use std::thread;

use qstore::storage::{MemoryBudget, PageAllocator, SlabCache, VmallocAllocator, PAGE_SIZE};
use qstore::{AccessMode, Device, MapRegion, Session, Signal, StorageError, Tunables};

const BASE: usize = 0x4000_0000;

fn pages_device(qset: usize, order: u32) -> Arc<Device<PageAllocator>> {
    let allocator = Arc::new(PageAllocator::new(MemoryBudget::unlimited()));
    Arc::new(Device::new(1, allocator, Tunables::new(order, qset).expect("tunables")).expect("device"))
}

fn vmalloc_device(qset: usize, order: u32) -> Arc<Device<VmallocAllocator>> {
    let allocator = Arc::new(VmallocAllocator::new(MemoryBudget::unlimited()));
    Arc::new(Device::new(2, allocator, Tunables::new(order, qset).expect("tunables")).expect("device"))
}

fn fill_pages(dev: &Device<PageAllocator>, pages: u64) {
    let signal = Signal::new();
    for p in 0..pages {
        let data = vec![p as u8 + 1; PAGE_SIZE];
        dev.write_at(&signal, p * PAGE_SIZE as u64, &data).expect("write");
    }
}

fn region(pages: usize, pgoff: u64) -> MapRegion {
    MapRegion::new(BASE, pages * PAGE_SIZE, pgoff).expect("region")
}

#[test]
fn test_region_validation() {
    assert!(MapRegion::new(BASE + 1, PAGE_SIZE, 0).is_err());
    assert!(MapRegion::new(BASE, 0, 0).is_err());
    assert!(matches!(MapRegion::new(BASE, PAGE_SIZE + 1, 0), Err(StorageError::InvalidOffset { .. })));
    assert!(MapRegion::new(BASE, PAGE_SIZE / 2, 0).is_err());
    assert!(MapRegion::new(usize::MAX & !(PAGE_SIZE - 1), 2 * PAGE_SIZE, 0).is_err());

    let r = region(2, 3);
    assert!(r.contains(BASE));
    assert!(r.contains(BASE + 2 * PAGE_SIZE - 1));
    assert!(!r.contains(BASE + 2 * PAGE_SIZE));
    assert_eq!(r.device_offset(BASE + PAGE_SIZE + 17), Some(4 * PAGE_SIZE as u64));
    assert_eq!(r.device_offset(BASE - 1), None);
}

#[test]
fn test_fault_returns_written_page() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 3);

    let mapping = dev.map(region(3, 0)).expect("map");
    for p in 0..3 {
        let page = mapping.fault(BASE + p * PAGE_SIZE + 5).expect("fault");
        assert!(page.read(|bytes| bytes.iter().all(|&b| b == p as u8 + 1)));
    }
}

#[test]
fn test_fault_honours_page_offset() {
    let dev = pages_device(2, 0);
    fill_pages(&dev, 5);

    // Page 4 sits in the third set with qset 2.
    let mapping = dev.map(region(1, 4)).expect("map");
    let page = mapping.fault(BASE).expect("fault");
    assert_eq!(page.read(|bytes| bytes[0]), 5);
}

#[test]
fn test_fault_misses_are_no_page() {
    let dev = pages_device(4, 0);
    let signal = Signal::new();
    dev.write_at(&signal, 2 * PAGE_SIZE as u64, b"only page two").expect("write");

    let mapping = dev.map(region(8, 0)).expect("map");
    // Hole below the high-water mark.
    assert!(matches!(mapping.fault(BASE), Err(StorageError::NoPage { .. })));
    assert!(mapping.fault(BASE + 2 * PAGE_SIZE).is_ok());
    // Past the end of data.
    let err = mapping.fault(BASE + 3 * PAGE_SIZE).unwrap_err();
    assert!(matches!(err, StorageError::NoPage { offset } if offset == 3 * PAGE_SIZE as u64));
    // Outside the region.
    assert!(matches!(mapping.fault(BASE + 8 * PAGE_SIZE), Err(StorageError::NoPage { .. })));

    // Faults never grow the set chain.
    assert_eq!(dev.stats().sets, 1);
    assert_eq!(dev.stats().quanta, 1);
}

#[test]
fn test_fault_pins_and_unpins() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 1);
    let mapping = dev.map(region(1, 0)).expect("map");

    let first = mapping.fault(BASE).expect("fault");
    assert_eq!(first.ref_count(), 2);
    let second = mapping.fault(BASE + 100).expect("fault");
    assert!(first.same_page(&second));
    assert_eq!(first.ref_count(), 3);

    drop(second);
    assert_eq!(first.ref_count(), 2);
}

#[test]
fn test_pinned_page_outlives_trim() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 1);
    let mapping = dev.map(region(1, 0)).expect("map");
    let page = mapping.fault(BASE).expect("fault");
    drop(mapping);

    dev.trim(&Signal::new()).expect("trim");
    assert_eq!(page.ref_count(), 1);
    assert!(page.read(|bytes| bytes.iter().all(|&b| b == 1)));
    assert_eq!(dev.stats().quanta, 0);
}

#[test]
fn test_store_through_page_visible_to_read() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 1);
    let mapping = dev.map(region(1, 0)).expect("map");

    let page = mapping.fault(BASE).expect("fault");
    page.write(|bytes| bytes[..5].copy_from_slice(b"hello"));

    let mut buf = [0u8; 5];
    assert_eq!(dev.read_at(&Signal::new(), 0, &mut buf).expect("read"), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn test_mapping_blocks_trim_until_released() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 2);
    let signal = Signal::new();

    let mapping = dev.map(region(2, 0)).expect("map");
    let nested = mapping.clone();
    assert_eq!(dev.active_mappings(), 2);
    assert_eq!(nested.active(), 2);

    assert!(matches!(dev.trim(&signal), Err(StorageError::Busy { mappings: 2 })));
    drop(mapping);
    assert!(matches!(dev.trim(&signal), Err(StorageError::Busy { mappings: 1 })));
    assert_eq!(dev.size(), 2 * PAGE_SIZE as u64);

    drop(nested);
    assert_eq!(dev.active_mappings(), 0);
    dev.trim(&signal).expect("trim");
    assert_eq!(dev.size(), 0);
}

#[test]
fn test_write_only_open_keeps_mapped_data() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 1);
    let _mapping = dev.map(region(1, 0)).expect("map");

    let session = Session::open(dev.clone(), AccessMode::WriteOnly).expect("open");
    assert_eq!(session.position(), 0);
    assert_eq!(dev.size(), PAGE_SIZE as u64);
}

#[test]
fn test_unmappable_devices_refused() {
    let paged = pages_device(4, 1);
    assert!(matches!(paged.map(region(1, 0)), Err(StorageError::Unsupported(_))));

    let slab = Arc::new(
        Device::new(
            0,
            Arc::new(SlabCache::new(4000, MemoryBudget::unlimited()).expect("slab")),
            Tunables::new(0, 4).expect("tunables"),
        )
        .expect("device"),
    );
    slab.write_at(&Signal::new(), 0, b"data").expect("write");
    assert!(matches!(slab.map(region(1, 0)), Err(StorageError::Unsupported(_))));
    assert!(slab.resolve(0).is_none());

    let vmalloc = vmalloc_device(4, 4);
    assert!(matches!(vmalloc.map(region(1, 0)), Err(StorageError::Unsupported(_))));

    for dev_mappings in [paged.active_mappings(), slab.active_mappings(), vmalloc.active_mappings()] {
        assert_eq!(dev_mappings, 0);
    }
}

#[test]
fn test_order_change_takes_effect_at_trim() {
    let dev = pages_device(4, 0);
    let signal = Signal::new();
    dev.set_order(&signal, 2).expect("order");

    // Still order 0 until the next trim.
    let mapping = dev.map(region(1, 0)).expect("map");
    drop(mapping);

    dev.trim(&signal).expect("trim");
    assert!(matches!(dev.map(region(1, 0)), Err(StorageError::Unsupported(_))));
}

#[test]
fn test_vmalloc_order_zero_mapping() {
    let dev = vmalloc_device(2, 0);
    let signal = Signal::new();
    for p in 0..3u64 {
        dev.write_at(&signal, p * PAGE_SIZE as u64, &[0xA0 + p as u8; PAGE_SIZE]).expect("write");
    }

    let mapping = dev.map(region(3, 0)).expect("map");
    for p in 0..3 {
        let page = mapping.fault(BASE + p * PAGE_SIZE).expect("fault");
        assert_eq!(page.ref_count(), 2);
        assert_eq!(page.read(|bytes| bytes[PAGE_SIZE - 1]), 0xA0 + p as u8);
    }
}

#[test]
fn test_mapping_accessors() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 1);
    let r = region(1, 0);
    let mapping = dev.map(r).expect("map");

    assert_eq!(mapping.region(), r);
    assert!(Arc::ptr_eq(mapping.device(), &dev));
    assert_eq!(mapping.fault(BASE).expect("fault").index(), 0);
}

#[test]
fn test_resolve_indexes_pages_of_larger_quanta() {
    // Order-1 devices cannot be mapped, but the resolver still finds each
    // page inside a two-page block.
    let dev = pages_device(4, 1);
    let signal = Signal::new();
    let data: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i / PAGE_SIZE) as u8 + 10).collect();
    dev.write_at(&signal, 0, &data).expect("write");

    let first = dev.resolve(0).expect("page 0");
    let second = dev.resolve(1).expect("page 1");
    assert_eq!(first.index(), 0);
    assert_eq!(second.index(), 1);
    assert!(!first.same_page(&second));
    assert_eq!(second.read(|bytes| bytes[0]), 11);
}

#[test]
fn test_resolve_without_mapping() {
    let dev = pages_device(4, 0);
    fill_pages(&dev, 2);

    let page = dev.resolve(1).expect("resolved");
    assert_eq!(page.read(|bytes| bytes[0]), 2);
    assert!(dev.resolve(2).is_none());
    assert!(dev.resolve(u64::MAX).is_none());
}

#[test]
fn test_concurrent_faults_and_writes() {
    let dev = pages_device(8, 0);
    fill_pages(&dev, 8);
    let mapping = dev.map(region(8, 0)).expect("map");

    thread::scope(|s| {
        for t in 0..4 {
            let mapping = mapping.clone();
            s.spawn(move || {
                for round in 0..50 {
                    let p = (t + round) % 8;
                    let page = mapping.fault(BASE + p * PAGE_SIZE).expect("fault");
                    assert!(page.ref_count() >= 2);
                }
            });
        }
        let dev = dev.clone();
        s.spawn(move || {
            let signal = Signal::new();
            for round in 0..50u64 {
                dev.write_at(&signal, (round % 8) * PAGE_SIZE as u64, b"x").expect("write");
            }
        });
    });

    assert_eq!(dev.active_mappings(), 1);
    drop(mapping);
    assert_eq!(dev.active_mappings(), 0);
}
