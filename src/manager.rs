// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Device registry: owns the shared allocator and every device built on it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, Tunables};
use crate::device::{Device, DeviceStats, Signal};
use crate::error::{Result, StorageError};
use crate::session::{AccessMode, Session};
use crate::storage::alloc::{AllocStats, ConfiguredAllocator, QuantumAllocator};

/// Top-level registry.
pub struct DeviceRegistry<A: QuantumAllocator> {
    allocator: Arc<A>,
    defaults: Tunables,
    devices: Vec<Arc<Device<A>>>,
}

impl<A: QuantumAllocator> DeviceRegistry<A> {
    /// Create `count` empty devices sharing `allocator`.
    pub fn new(allocator: Arc<A>, count: usize, defaults: Tunables) -> Result<Self> {
        let devices = (0..count)
            .map(|minor| Device::new(minor, allocator.clone(), defaults).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        info!(
            backend = %allocator.kind(),
            devices = count,
            order = defaults.order,
            qset = defaults.qset,
            "Device registry created"
        );
        Ok(Self { allocator, defaults, devices })
    }

    pub fn allocator(&self) -> &Arc<A> {
        &self.allocator
    }

    pub fn defaults(&self) -> Tunables {
        self.defaults
    }

    pub fn device(&self, minor: usize) -> Result<&Arc<Device<A>>> {
        self.devices.get(minor).ok_or(StorageError::NoDevice { minor })
    }

    pub fn open(&self, minor: usize, mode: AccessMode) -> Result<Session<A>> {
        Session::open(self.device(minor)?.clone(), mode)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device<A>>> {
        self.devices.iter()
    }

    pub fn stats(&self) -> Vec<DeviceStats> {
        self.devices.iter().map(|d| d.stats()).collect()
    }

    pub fn alloc_stats(&self) -> AllocStats {
        self.allocator.stats()
    }

    /// Trim every device. Returns how many were left intact because they
    /// are still mapped.
    pub fn shutdown(self) -> usize {
        let signal = Signal::new();
        let mut busy = 0;
        for device in &self.devices {
            match device.trim(&signal) {
                Ok(()) => {}
                Err(e) => {
                    busy += 1;
                    warn!(minor = device.minor(), error = %e, "Device left intact at shutdown");
                }
            }
        }
        info!(devices = self.devices.len(), busy, "Device registry shut down");
        busy
    }
}

impl<A: ConfiguredAllocator> DeviceRegistry<A> {
    /// Build the allocator and devices described by a validated [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.backend.kind != A::KIND {
            return Err(StorageError::Config(format!(
                "config selects the {} backend, registry built for {}",
                config.backend.kind,
                A::KIND
            )));
        }
        let allocator = Arc::new(A::from_config(config)?);
        Self::new(allocator, config.devices.count, config.tunables())
    }
}
