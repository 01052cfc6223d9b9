// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Open sessions on a device: a file position plus the caller's signal.

use std::io::{self, SeekFrom};
use std::sync::Arc;

use tracing::warn;

use crate::device::{Device, Signal};
use crate::error::{Result, StorageError};
use crate::storage::alloc::QuantumAllocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

pub struct Session<A: QuantumAllocator> {
    device: Arc<Device<A>>,
    mode: AccessMode,
    pos: u64,
    signal: Signal,
}

impl<A: QuantumAllocator> Session<A> {
    /// Open `device`. A write-only open truncates the device first.
    pub fn open(device: Arc<Device<A>>, mode: AccessMode) -> Result<Self> {
        Self::open_with_signal(device, mode, Signal::new())
    }

    /// Open with a caller-owned cancellation signal.
    pub fn open_with_signal(device: Arc<Device<A>>, mode: AccessMode, signal: Signal) -> Result<Self> {
        if mode == AccessMode::WriteOnly {
            let mut state = device.lock(&signal)?;
            if let Err(e) = device.trim_locked(&mut state) {
                warn!(minor = device.minor(), error = %e, "Write-only open could not trim, continuing");
            }
        }
        Ok(Self { device, mode, pos: 0, signal })
    }

    pub fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read from the current position, advancing it by the bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.device.read_at(&self.signal, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the current position, advancing it by the bytes written.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.device.write_at(&self.signal, self.pos, data)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Move the position. Results below zero are rejected; positions past
    /// the end of data are allowed.
    pub fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.device.size()) + i128::from(delta),
        };
        let pos = u64::try_from(target).map_err(|_| StorageError::InvalidSeek { position: target })?;
        self.pos = pos;
        Ok(pos)
    }
}

impl<A: QuantumAllocator> io::Read for Session<A> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Session::read(self, buf).map_err(Into::into)
    }
}

impl<A: QuantumAllocator> io::Write for Session<A> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Session::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<A: QuantumAllocator> io::Seek for Session<A> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Session::seek(self, pos).map_err(Into::into)
    }
}
