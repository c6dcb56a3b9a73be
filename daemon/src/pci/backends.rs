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

//! Host backends.
//!
//! - [`sysfs`] - Plain sysfs: `enable`, `resourceN` mappings and pagemap-resolved DMA pages.
//!   Has no MSI-X support, which needs a kernel driver or VFIO.
//! - [`vfio`] - A device bound to `vfio-pci`: region mappings through the device fd,
//!   IOMMU-mapped DMA and MSI-X delivered through eventfds.
//! - [`mock`] - In-memory host with a resource ledger and failure injection.

mod memory;
pub mod mock;
pub mod sysfs;
pub mod vfio;

use crate::error::AtgdError;
use crate::pci::host::DevNo;
use log::{trace, warn};
use std::collections::HashMap;
use std::sync::Mutex;

/// Highest major handed out, matching the top of the kernel's dynamic major range.
pub const CHRDEV_MAJOR_DYN_END: u32 = 254;
/// Lowest major handed out.
pub const CHRDEV_MAJOR_DYN_START: u32 = 234;

/// Process-local device number allocator.
///
/// A user-space driver has no `alloc_chrdev_region`, so the backends hand out device numbers
/// from the same dynamic range the kernel uses, top down. The numbers identify endpoints in
/// logs and on the status interface; the endpoint itself is a DBus object.
#[derive(Debug, Default)]
pub struct ChrdevRegistry {
    ranges: Mutex<HashMap<u32, (String, u32)>>,
}

impl ChrdevRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, count: u32) -> Result<DevNo, AtgdError> {
        if count == 0 {
            return Err(AtgdError::Argument(format!(
                "Cannot register an empty device number range for {name}"
            )));
        }
        let mut ranges = self
            .ranges
            .lock()
            .map_err(|_| AtgdError::Internal("couldn't lock chrdev ranges".into()))?;
        let major = (CHRDEV_MAJOR_DYN_START..=CHRDEV_MAJOR_DYN_END)
            .rev()
            .find(|major| !ranges.contains_key(major))
            .ok_or_else(|| {
                AtgdError::AllocationFailure(format!("no free major number left for {name}"))
            })?;
        ranges.insert(major, (name.to_owned(), count));
        trace!("Registered {name} as {major}:0 (+{count})");
        Ok(DevNo { major, minor: 0 })
    }

    pub fn unregister(&self, first: DevNo, count: u32) {
        if let Ok(mut ranges) = self.ranges.lock() {
            match ranges.remove(&first.major) {
                Some((name, registered)) if registered == count => {
                    trace!("Unregistered {name} at {first}");
                }
                Some((name, registered)) => {
                    warn!(
                        "Unregistered {name} at {first} with count {count}, but {registered} were registered"
                    );
                }
                None => warn!("Device number {first} was not registered"),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
