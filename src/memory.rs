//! Flat guest memory.
//!
//! The emulated machine has no segmentation and no paging: guest addresses are
//! plain offsets into a single zero-initialized byte buffer. Every access is
//! bounds-checked against the buffer's capacity, and an access outside of it
//! is reported as an error instead of silently reading garbage or wrapping
//! around.
//!
//! Multi-byte values are stored little-endian and are composed out of single
//! byte accesses at ascending addresses, so any `VirtualMemory` implementation
//! only has to provide `read8`, `write8` and `capacity`.

use crate::utils::NoDebug;

use std::error::Error;
use std::fmt;

/// Default memory capacity: 10 MiB.
pub const MEMORY_SIZE: u32 = 10 * 1024 * 1024;

/// Byte-addressable guest memory.
pub trait VirtualMemory {
    /// Returns the number of addressable bytes. Valid addresses are
    /// `0..capacity()`.
    fn capacity(&self) -> u32;

    fn read8(&self, addr: u32) -> Result<u8, MemoryError>;

    fn write8(&mut self, addr: u32, value: u8) -> Result<(), MemoryError>;

    /// Makes sure that `len` bytes starting at `addr` are accessible.
    ///
    /// Multi-byte accesses call this before touching any byte, so a failing
    /// write leaves memory untouched.
    fn check_range(&self, addr: u32, len: u32) -> Result<(), MemoryError> {
        if len == 0 {
            return Ok(());
        }
        let capacity = self.capacity();
        let last = u64::from(addr) + u64::from(len) - 1;
        if last >= u64::from(capacity) {
            // report the first byte that is out of range
            let addr = if addr >= capacity { addr } else { capacity };
            return Err(MemoryError::OutOfBounds { addr, capacity });
        }
        Ok(())
    }

    fn read16(&self, addr: u32) -> Result<u16, MemoryError> {
        self.check_range(addr, 2)?;
        let (b0, b1) = (
            u16::from(self.read8(addr)?),
            u16::from(self.read8(addr + 1)?),
        );
        Ok(b1 << 8 | b0)
    }

    fn read32(&self, addr: u32) -> Result<u32, MemoryError> {
        self.check_range(addr, 4)?;
        let (b0, b1, b2, b3) = (
            u32::from(self.read8(addr)?),
            u32::from(self.read8(addr + 1)?),
            u32::from(self.read8(addr + 2)?),
            u32::from(self.read8(addr + 3)?),
        );

        Ok(
            b3 << 24 |
            b2 << 16 |
            b1 << 8 |
            b0
        )
    }

    fn write16(&mut self, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.check_range(addr, 2)?;
        self.write8(addr, value as u8)?;
        self.write8(addr + 1, (value >> 8) as u8)
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.check_range(addr, 4)?;
        for i in 0..4 {
            self.write8(addr + i, (value >> (i * 8)) as u8)?;
        }
        Ok(())
    }
}

/// Contiguous guest memory backed by a `Vec`.
#[derive(Debug)]
pub struct FlatMemory {
    mem: NoDebug<Vec<u8>>,
}

impl FlatMemory {
    /// Creates a zero-filled memory of `capacity` bytes.
    pub fn new(capacity: u32) -> Self {
        Self {
            mem: NoDebug(vec![0; capacity as usize]),
        }
    }

    /// Copies `image` into memory, starting at `addr`.
    ///
    /// Fails without modifying memory if the image doesn't fit.
    pub fn load_image(&mut self, addr: u32, image: &[u8]) -> Result<(), MemoryError> {
        if image.is_empty() {
            return Ok(());
        }
        if image.len() as u64 > u64::from(u32::max_value()) {
            return Err(MemoryError::OutOfBounds { addr: u32::max_value(), capacity: self.capacity() });
        }
        self.check_range(addr, image.len() as u32)?;

        let start = addr as usize;
        self.mem[start..start + image.len()].copy_from_slice(image);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new(MEMORY_SIZE)
    }
}

impl VirtualMemory for FlatMemory {
    fn capacity(&self) -> u32 {
        self.mem.len() as u32
    }

    fn read8(&self, addr: u32) -> Result<u8, MemoryError> {
        self.mem.get(addr as usize).cloned().ok_or(MemoryError::OutOfBounds {
            addr,
            capacity: self.capacity(),
        })
    }

    fn write8(&mut self, addr: u32, value: u8) -> Result<(), MemoryError> {
        let capacity = self.capacity();
        match self.mem.get_mut(addr as usize) {
            Some(byte) => {
                *byte = value;
                Ok(())
            }
            None => Err(MemoryError::OutOfBounds { addr, capacity }),
        }
    }
}

/// An error that can occur when reading or writing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The accessed address is at or beyond the end of memory.
    OutOfBounds {
        addr: u32,
        capacity: u32,
    },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::OutOfBounds { addr, capacity } => write!(
                f,
                "memory access at {:#010X} is out of bounds (capacity {:#X})",
                addr, capacity
            ),
        }
    }
}

impl Error for MemoryError {}
