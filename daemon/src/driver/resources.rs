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


//! Acquisition guards.
//!
//! Every kernel resource the drivers take is wrapped in a guard whose constructor performs the
//! acquire call and whose `Drop` performs the matching release. A guard only exists if the
//! acquire succeeded, so a resource is released exactly once and only if it was acquired.
//!
//! Drivers keep their guards as struct fields (or locals during probe); Rust drops fields in
//! declaration order and locals in reverse, which is how the teardown order is fixed.

use crate::error::AtgdError;
use crate::pci::address::PciAddress;
use crate::pci::host::{DevNo, DmaMemory, IrqHandler, MsixEntry, PciDeviceInfo, PciHost};
use log::{debug, info, trace};
use std::sync::Arc;

/// A reference to a PCI function, taken with `get_device`.
pub struct PciDeviceRef {
    host: Arc<dyn PciHost>,
    info: PciDeviceInfo,
}

impl PciDeviceRef {
    pub fn get(host: Arc<dyn PciHost>, address: PciAddress) -> Result<Self, AtgdError> {
        let info = host.get_device(&address)?;
        info!("vendor: {:x}, device: {:x}", info.vendor, info.device);
        Ok(PciDeviceRef { host, info })
    }

    pub fn info(&self) -> PciDeviceInfo {
        self.info
    }

    pub fn address(&self) -> PciAddress {
        self.info.address
    }

    pub fn host(&self) -> &Arc<dyn PciHost> {
        &self.host
    }
}

impl Drop for PciDeviceRef {
    fn drop(&mut self) {
        trace!("put_device {}", self.info.address);
        self.host.put_device(&self.info.address);
    }
}

pub struct EnabledDevice {
    host: Arc<dyn PciHost>,
    address: PciAddress,
}

impl EnabledDevice {
    pub fn enable(host: Arc<dyn PciHost>, address: PciAddress) -> Result<Self, AtgdError> {
        host.enable_device(&address)?;
        debug!("Enabled {address}");
        Ok(EnabledDevice { host, address })
    }
}

impl Drop for EnabledDevice {
    fn drop(&mut self) {
        trace!("disable_device {}", self.address);
        self.host.disable_device(&self.address);
    }
}

/// Ownership of one BAR, tagged with a human readable owner such as `"DDR Region"`.
pub struct RegionClaim {
    host: Arc<dyn PciHost>,
    address: PciAddress,
    bar: u8,
    owner: &'static str,
}

impl RegionClaim {
    pub fn request(
        host: Arc<dyn PciHost>,
        address: PciAddress,
        bar: u8,
        owner: &'static str,
    ) -> Result<Self, AtgdError> {
        host.request_region(&address, bar, owner)?;
        debug!("Obtained BAR {bar} of {address} as {owner}");
        Ok(RegionClaim {
            host,
            address,
            bar,
            owner,
        })
    }

    pub fn bar(&self) -> u8 {
        self.bar
    }
}

impl Drop for RegionClaim {
    fn drop(&mut self) {
        trace!("release_region {} ({})", self.bar, self.owner);
        self.host.release_region(&self.address, self.bar);
    }
}

/// Device-visible memory with a bus address fixed at allocation.
pub struct DmaBuffer {
    memory: Box<dyn DmaMemory>,
    bus_address: u64,
}

impl DmaBuffer {
    pub fn alloc(host: &dyn PciHost, address: PciAddress, size: usize) -> Result<Self, AtgdError> {
        let memory = host.alloc_dma(&address, size)?;
        let bus_address = memory.bus_address();
        info!("DMA buffer of {size} bytes at bus address {bus_address:#x}");
        Ok(DmaBuffer {
            memory,
            bus_address,
        })
    }

    pub fn bus_address(&self) -> u64 {
        self.bus_address
    }

    pub fn len(&self) -> usize {
        self.memory.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.memory.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.memory.as_mut_slice()
    }
}

/// A registered range of character device numbers.
pub struct CharDevRegion {
    host: Arc<dyn PciHost>,
    first: DevNo,
    count: u32,
}

impl CharDevRegion {
    pub fn register(host: Arc<dyn PciHost>, name: &str, count: u32) -> Result<Self, AtgdError> {
        let first = host.register_chrdev_region(name, count)?;
        info!("The {name} major number is: {}", first.major);
        Ok(CharDevRegion { host, first, count })
    }

    pub fn devno(&self) -> DevNo {
        self.first
    }
}

impl Drop for CharDevRegion {
    fn drop(&mut self) {
        trace!("unregister_chrdev_region {}", self.first);
        self.host.unregister_chrdev_region(self.first, self.count);
    }
}

/// MSI-X enabled with exactly `entries.len()` vectors.
pub struct MsixTable {
    host: Arc<dyn PciHost>,
    address: PciAddress,
    entries: Vec<MsixEntry>,
}

impl MsixTable {
    /// Request table entries `0..count` as one block.
    ///
    /// # Returns: `Result<MsixTable, AtgdError>`
    /// * `Ok(MsixTable)` - Every entry has a distinct vector
    /// * `Err(AtgdError::Msix)` - The host did not grant exactly `count` vectors
    pub fn enable_exact(host: Arc<dyn PciHost>, address: PciAddress, count: usize) -> Result<Self, AtgdError> {
        let mut entries = (0..count)
            .map(|entry| {
                u16::try_from(entry)
                    .map(|entry| MsixEntry { vector: 0, entry })
                    .map_err(|_| AtgdError::Argument(format!("MSI-X entry {entry} is out of range")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        host.enable_msix_exact(&address, &mut entries)?;
        let table = MsixTable {
            host,
            address,
            entries,
        };
        let mut vectors: Vec<u32> = table.entries.iter().map(|e| e.vector).collect();
        vectors.sort_unstable();
        vectors.dedup();
        if vectors.len() != count {
            // dropping `table` disables MSI-X again
            return Err(AtgdError::Msix(format!(
                "{} distinct vectors granted for {count} entries",
                vectors.len()
            )));
        }
        debug!("MSI-X enabled on {address} with {count} vectors");
        Ok(table)
    }

    pub fn entries(&self) -> &[MsixEntry] {
        &self.entries
    }
}

impl Drop for MsixTable {
    fn drop(&mut self) {
        trace!("disable_msix {}", self.address);
        self.host.disable_msix(&self.address);
    }
}

/// A handler bound to one vector.
pub struct IrqBinding {
    host: Arc<dyn PciHost>,
    vector: u32,
}

impl IrqBinding {
    pub fn request(
        host: Arc<dyn PciHost>,
        vector: u32,
        name: &str,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<Self, AtgdError> {
        host.request_irq(vector, name, handler)?;
        Ok(IrqBinding { host, vector })
    }

    pub fn vector(&self) -> u32 {
        self.vector
    }
}

impl Drop for IrqBinding {
    fn drop(&mut self) {
        trace!("free_irq {}", self.vector);
        self.host.free_irq(self.vector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::backends::mock::{HostEvent, MockFaults, MockHost};
    use googletest::prelude::*;

    fn f1() -> (MockHost, Arc<dyn PciHost>, PciAddress) {
        let mock = MockHost::f1();
        let host: Arc<dyn PciHost> = Arc::new(mock.clone());
        (mock, host, PciAddress::new(0, 0, 0x0f, 0))
    }

    #[gtest]
    fn guards_release_in_reverse_local_order() {
        let (mock, host, address) = f1();
        {
            let _device = PciDeviceRef::get(host.clone(), address).unwrap();
            let _enabled = EnabledDevice::enable(host.clone(), address).unwrap();
            let _claim = RegionClaim::request(host.clone(), address, 3, "DDR Region").unwrap();
        }
        assert_that!(
            mock.events(),
            elements_are![
                eq(&HostEvent::GetDevice),
                eq(&HostEvent::EnableDevice),
                eq(&HostEvent::RequestRegion {
                    bar: 3,
                    owner: "DDR Region".into()
                }),
                eq(&HostEvent::ReleaseRegion { bar: 3 }),
                eq(&HostEvent::DisableDevice),
                eq(&HostEvent::PutDevice)
            ]
        );
        assert_that!(mock.outstanding(), is_empty());
    }

    #[gtest]
    fn failed_acquire_leaves_nothing_to_release() {
        let (mock, host, address) = f1();
        mock.set_faults(MockFaults {
            enable: true,
            ..Default::default()
        });
        assert_that!(EnabledDevice::enable(host, address).is_err(), eq(true));
        assert_that!(mock.events(), is_empty());
    }

    #[gtest]
    fn msix_table_fills_every_entry() {
        let (mock, host, address) = f1();
        let table = MsixTable::enable_exact(host, address, 16).unwrap();
        assert_that!(table.entries().len(), eq(16));
        assert_that!(
            table.entries().iter().map(|e| e.entry).collect::<Vec<_>>(),
            eq(&(0..16).collect::<Vec<u16>>())
        );
        drop(table);
        assert_that!(mock.events().last(), some(eq(&HostEvent::DisableMsix)));
    }

    #[gtest]
    fn dma_buffer_records_bus_address_once() {
        let (_mock, host, address) = f1();
        let mut buffer = DmaBuffer::alloc(host.as_ref(), address, 4096).unwrap();
        let bus_address = buffer.bus_address();
        buffer.as_mut_slice()[0] = b'x';
        assert_that!(buffer.bus_address(), eq(bus_address));
        assert_that!(buffer.len(), eq(4096));
    }
}
