// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Interrupted while waiting for the device lock")]
    Interrupted,

    #[error("Out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Device busy: {mappings} active mapping(s)")]
    Busy { mappings: usize },

    #[error("Not supported by this device: {0}")]
    Unsupported(String),

    #[error("No page at offset {offset:#x}")]
    NoPage { offset: u64 },

    #[error("Invalid seek: resulting position {position} is out of range")]
    InvalidSeek { position: i128 },

    #[error("Invalid offset {offset} for a transfer of {len} bytes")]
    InvalidOffset { offset: u64, len: usize },

    #[error("Invalid tunable: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device {minor} not found")]
    NoDevice { minor: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Interrupted)
    }

    fn io_kind(&self) -> Option<io::ErrorKind> {
        let kind = match self {
            StorageError::Interrupted => io::ErrorKind::Interrupted,
            StorageError::OutOfMemory { .. } => io::ErrorKind::OutOfMemory,
            StorageError::Unsupported(_) => io::ErrorKind::Unsupported,
            StorageError::Busy { .. } => io::ErrorKind::ResourceBusy,
            StorageError::InvalidSeek { .. }
            | StorageError::InvalidOffset { .. }
            | StorageError::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            StorageError::NoDevice { .. } => io::ErrorKind::NotFound,
            StorageError::Io(e) => e.kind(),
            StorageError::NoPage { .. } | StorageError::Config(_) => return None,
        };
        Some(kind)
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        match err.io_kind() {
            Some(kind) => io::Error::new(kind, err),
            None => io::Error::other(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
