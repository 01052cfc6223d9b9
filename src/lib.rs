// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod mmap;
pub mod session;
pub mod storage;

pub use config::{BackendKind, Config, Tunables};
pub use device::{Device, DeviceStats, Signal};
pub use error::{Result, StorageError};
pub use manager::DeviceRegistry;
pub use mmap::{MapRegion, Mapping};
pub use session::{AccessMode, Session};
