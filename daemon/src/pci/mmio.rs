// This file is part of atgd, an application to drive PCIe FPGA test-pattern and interrupt logic from user space.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// atgd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// atgd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Register access over a mapped BAR.
//!
//! [`Bar`] is the only way the drivers touch device registers. It exposes two primitives,
//! [`Bar::poke`] (32-bit write) and [`Bar::peek`] (32-bit read). Both are volatile and ordered
//! only by program order; no barrier is implied beyond what the architecture gives ordinary
//! memory-mapped I/O.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use atgd::pci::mmio::Bar;
//! # fn example(ocl: &Bar) -> Result<(), atgd::error::AtgdError> {
//! ocl.poke(0x08, 0x3)?;
//! let status = ocl.peek(0x08)?;
//! # Ok(())
//! # }
//! ```

use crate::error::AtgdError;
use crate::pci::host::MmioRegion;
use std::fmt;

/// Validate a 32-bit access at `offset` into a region of `len` bytes.
///
/// # Returns: `Result<(), AtgdError>`
/// * `Ok(())` - `offset` is 4-byte aligned and `offset + 4 <= len`
/// * `Err(AtgdError::Mmio)` - Otherwise
pub fn check_access(bar: u8, offset: usize, len: usize) -> Result<(), AtgdError> {
    let in_range = offset.checked_add(4).is_some_and(|end| end <= len);
    if offset % 4 != 0 || !in_range {
        return Err(AtgdError::Mmio { bar, offset, len });
    }
    Ok(())
}

/// A mapped BAR. Unmapped when dropped.
pub struct Bar {
    region: Box<dyn MmioRegion>,
}

impl Bar {
    pub fn new(region: Box<dyn MmioRegion>) -> Self {
        Bar { region }
    }

    pub fn index(&self) -> u8 {
        self.region.bar()
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.len() == 0
    }

    /// Read the 32-bit register at `offset`.
    pub fn peek(&self, offset: usize) -> Result<u32, AtgdError> {
        check_access(self.index(), offset, self.len())?;
        self.region.read32(offset)
    }

    /// Write `value` to the 32-bit register at `offset`.
    pub fn poke(&self, offset: usize, value: u32) -> Result<(), AtgdError> {
        check_access(self.index(), offset, self.len())?;
        self.region.write32(offset, value)
    }

    /// Write the low and high halves of a 64-bit value to two consecutive registers.
    pub fn poke64(&self, low_offset: usize, high_offset: usize, value: u64) -> Result<(), AtgdError> {
        self.poke(low_offset, (value & 0xffff_ffff) as u32)?;
        self.poke(high_offset, (value >> 32) as u32)
    }

    /// Read a 64-bit value split across two registers, low word first.
    pub fn peek64(&self, low_offset: usize, high_offset: usize) -> Result<u64, AtgdError> {
        let low = self.peek(low_offset)? as u64;
        let high = self.peek(high_offset)? as u64;
        Ok((high << 32) | low)
    }
}

impl fmt::Debug for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bar")
            .field("index", &self.index())
            .field("len", &format_args!("{:#x}", self.len()))
            .finish()
    }
}
