//! Registry integration tests: config files, backend selection, shutdown.
//!
//! Run with: `cargo test`

use std::io::Write;

use qstore::storage::{PageAllocator, SlabCache, VmallocAllocator, PAGE_SIZE};
use qstore::{AccessMode, BackendKind, Config, DeviceRegistry, MapRegion, Signal, StorageError};

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn test_registry_from_config_file() {
    let file = write_config(
        r#"
[backend]
kind = "slab"
quantum = 1000
memory_limit_mb = 1

[devices]
count = 2
qset = 8
"#,
    );
    let config = Config::from_file(file.path()).expect("config");
    assert_eq!(config.backend.kind, BackendKind::Slab);

    let registry = DeviceRegistry::<SlabCache>::from_config(&config).expect("registry");
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.allocator().object_size(), 1000);

    let dev = registry.device(1).expect("device");
    let geometry = dev.geometry();
    assert_eq!(geometry.quantum, 1000);
    assert_eq!(geometry.qset, 8);
    assert_eq!(geometry.order, 0);

    let mut session = registry.open(1, AccessMode::ReadWrite).expect("open");
    session.write_all(&[7u8; 2500]).expect("write");
    assert_eq!(registry.alloc_stats().live(), 3);
    assert_eq!(registry.stats()[1].quanta, 3);
    assert_eq!(registry.stats()[0].size, 0);
}

#[test]
fn test_backend_mismatch_rejected() {
    let config = Config::from_toml_str("[backend]\nkind = \"vmalloc\"\n").expect("config");
    let err = DeviceRegistry::<PageAllocator>::from_config(&config).err().expect("mismatch");
    assert!(matches!(err, StorageError::Config(_)));

    let registry = DeviceRegistry::<VmallocAllocator>::from_config(&config).expect("registry");
    assert_eq!(registry.defaults().order, 4);
    assert_eq!(registry.device(0).expect("device").geometry().quantum, PAGE_SIZE << 4);
}

#[test]
fn test_missing_device_and_file() {
    let registry = DeviceRegistry::<PageAllocator>::from_config(&Config::default()).expect("registry");
    assert!(matches!(registry.device(4), Err(StorageError::NoDevice { minor: 4 })));
    assert!(registry.open(99, AccessMode::ReadOnly).is_err());

    let missing = std::path::Path::new("/nonexistent/qstore.toml");
    let err = Config::from_file(missing).unwrap_err();
    assert!(matches!(err, StorageError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    assert_eq!(std::io::Error::from(err).kind(), std::io::ErrorKind::NotFound);
}

#[test]
fn test_memory_limit_shared_across_devices() {
    let config = Config::from_toml_str("[backend]\nmemory_limit_mb = 1\n[devices]\ncount = 2\n").expect("config");
    let registry = DeviceRegistry::<PageAllocator>::from_config(&config).expect("registry");
    let signal = Signal::new();
    let pages = (1024 * 1024) / PAGE_SIZE;

    let a = registry.device(0).expect("device");
    let b = registry.device(1).expect("device");
    for p in 0..pages / 2 {
        a.write_at(&signal, (p * PAGE_SIZE) as u64, b"a").expect("write");
        b.write_at(&signal, (p * PAGE_SIZE) as u64, b"b").expect("write");
    }
    let err = a.write_at(&signal, (pages * PAGE_SIZE) as u64, b"a").unwrap_err();
    assert!(matches!(err, StorageError::OutOfMemory { .. }));

    b.trim(&signal).expect("trim");
    a.write_at(&signal, (pages * PAGE_SIZE) as u64, b"a").expect("write after trim");
}

#[test]
fn test_shutdown_reports_mapped_devices() {
    let registry = DeviceRegistry::<PageAllocator>::from_config(&Config::default()).expect("registry");
    let signal = Signal::new();
    for dev in registry.iter() {
        dev.write_at(&signal, 0, b"data").expect("write");
    }

    let mapped = registry.device(2).expect("device").clone();
    let mapping = mapped.map(MapRegion::new(0x1000, PAGE_SIZE, 0).expect("region")).expect("map");

    assert_eq!(registry.shutdown(), 1);
    assert_eq!(mapped.size(), 4);
    drop(mapping);
    mapped.trim(&signal).expect("trim");
    assert_eq!(mapped.size(), 0);
}

#[test]
fn test_reset_tunables_restores_defaults() {
    let registry = DeviceRegistry::<PageAllocator>::from_config(&Config::default()).expect("registry");
    let dev = registry.device(0).expect("device");
    let signal = Signal::new();

    assert_eq!(dev.set_qset(&signal, 16).expect("qset"), 500);
    assert_eq!(dev.set_order(&signal, 3).expect("order"), 0);
    assert!(dev.set_order(&signal, 11).is_err());
    assert_eq!(dev.tunables().order, 3);

    dev.reset_tunables(&signal).expect("reset");
    assert_eq!(dev.tunables(), registry.defaults());
}
