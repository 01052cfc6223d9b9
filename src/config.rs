// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::storage::page::PAGE_SIZE;

/// Largest allocation order accepted for page backends.
pub const MAX_ORDER: u32 = 10;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Quantum allocator shared by every device.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Registry size and per-device defaults.
    #[serde(default)]
    pub devices: DevicesConfig,
}

/// Which quantum allocator backs the devices.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fixed-size objects from a shared slab cache. Read/write only.
    Slab,
    /// Power-of-two runs of contiguous pages.
    #[default]
    Pages,
    /// Power-of-two runs of individually allocated pages.
    Vmalloc,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Slab => "slab",
            BackendKind::Pages => "pages",
            BackendKind::Vmalloc => "vmalloc",
        };
        f.write_str(name)
    }
}

/// Allocator parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Slab object size in bytes. Ignored by the page backends.
    #[serde(default = "default_quantum")]
    pub quantum: usize,
    /// Upper bound on live quantum memory, in megabytes (0 = unlimited).
    #[serde(default)]
    pub memory_limit_mb: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { kind: BackendKind::default(), quantum: default_quantum(), memory_limit_mb: 0 }
    }
}

/// Device registry parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct DevicesConfig {
    /// Number of devices created at startup.
    #[serde(default = "default_count")]
    pub count: usize,
    /// Allocation order for page backends. Unset picks the backend's default.
    #[serde(default)]
    pub order: Option<u32>,
    /// Quanta per set.
    #[serde(default = "default_qset")]
    pub qset: usize,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self { count: default_count(), order: None, qset: default_qset() }
    }
}

fn default_quantum() -> usize { 4000 }
fn default_count() -> usize { 4 }
fn default_qset() -> usize { 500 }

/// Per-device tunables. Changes take effect on the next trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tunables {
    pub order: u32,
    pub qset: usize,
}

impl Tunables {
    pub fn new(order: u32, qset: usize) -> Result<Self> {
        let t = Self { order, qset };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<()> {
        if self.qset == 0 {
            return Err(StorageError::InvalidConfig("qset must be > 0".into()));
        }
        if self.order > MAX_ORDER {
            return Err(StorageError::InvalidConfig(format!(
                "order {} exceeds maximum {MAX_ORDER}",
                self.order
            )));
        }
        Ok(())
    }

    /// Like [`Tunables::validate`], and also rejects a qset whose sets of
    /// `quantum`-byte quanta would not fit the 64-bit offset space.
    pub fn validate_for(&self, quantum: usize) -> Result<()> {
        self.validate()?;
        if (quantum as u64).checked_mul(self.qset as u64).is_none() {
            return Err(StorageError::InvalidConfig(format!(
                "qset {} of {quantum}-byte quanta overflows the offset space",
                self.qset
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| StorageError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.count == 0 {
            return Err(StorageError::Config("devices.count must be > 0".into()));
        }
        if self.backend.kind == BackendKind::Slab && self.backend.quantum == 0 {
            return Err(StorageError::Config("backend.quantum must be > 0".into()));
        }
        let tunables = self.tunables();
        let quantum = match self.backend.kind {
            BackendKind::Slab => self.backend.quantum,
            BackendKind::Pages | BackendKind::Vmalloc => {
                tunables.validate().map_err(|e| StorageError::Config(e.to_string()))?;
                PAGE_SIZE << tunables.order
            }
        };
        tunables
            .validate_for(quantum)
            .map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Default tunables every device starts with and returns to on reset.
    pub fn tunables(&self) -> Tunables {
        let order = self.devices.order.unwrap_or(match self.backend.kind {
            BackendKind::Vmalloc => 4,
            BackendKind::Slab | BackendKind::Pages => 0,
        });
        Tunables { order, qset: self.devices.qset }
    }

    /// Memory budget in bytes, if one is configured.
    pub fn memory_limit(&self) -> Option<usize> {
        match self.backend.memory_limit_mb {
            0 => None,
            mb => Some(mb.saturating_mul(1024 * 1024)),
        }
    }
}
