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


//! The interrupt driver (`f1_driver`).
//!
//! Maps the DDR, OCL and XDMA BARs of the F1 application function, zeroes the interrupt
//! counter at DDR offset 0 and arms an [`InterruptBridge`] of 16 vectors. Teardown frees the
//! bridge first, then unmaps DDR, OCL and XDMA, releases them in the same order, disables the
//! device and drops the reference.
//!
//! [`InterruptDriver::trigger_interrupts`] exercises the whole path from the card's side: it
//! routes the XDMA user interrupts to vectors 0..15, fires each of them through the CL's
//! interrupt register and watches the counter.

use crate::config::{DriverParams, NUM_OF_USER_INTS, f1_bars};
use crate::driver::irq::{COUNTER_OFFSET, InterruptBridge};
use crate::driver::resources::{EnabledDevice, PciDeviceRef, RegionClaim};
use crate::error::AtgdError;
use crate::pci::host::{PciDeviceInfo, PciHost};
use crate::pci::mmio::Bar;
use log::{error, info};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Name every vector is registered under.
pub const F1_DEVICE_NAME: &str = "f1_driver";

/// XDMA register target of the IRQ block.
pub const IRQ_TGT: usize = 0x2;
pub const IRQ_BLOCK_ID: usize = 0x000;
pub const IRQ_USER_INT_ENABLE: usize = 0x004;
pub const IRQ_USER_VECTOR_BASE: usize = 0x080;
/// User interrupt `4n..4n+3` go to the vectors in the bytes of word `n`.
pub const USER_VECTOR_MAP: [u32; 4] = [0x0302_0100, 0x0706_0504, 0x0b0a_0908, 0x0f0e_0d0c];

/// CL register: writing bit `i` fires user interrupt `i`, bit `i + 16` acknowledges it.
pub const CL_INTERRUPT_REG: usize = 0xd00;
/// Counter reads before giving up on a change.
pub const POLL_LIMIT: u32 = 100;

/// Address of an XDMA register: target, channel and offset packed as `tttt cccc oooo oooo`.
pub const fn dma_reg_addr(target: usize, channel: usize, offset: usize) -> usize {
    (target << 12) | (channel << 8) | offset
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptTriggerReport {
    pub irq_block_id: u32,
    pub vector_map: u32,
    pub counter_before: u32,
    pub counter_after: u32,
    pub polls: u32,
    /// CL interrupt register right after firing.
    pub status: u32,
    /// CL interrupt register once the counter moved, written back to clear it.
    pub acknowledged: u32,
    pub status_after_clear: u32,
    pub elapsed: Duration,
}

impl InterruptTriggerReport {
    /// User interrupts whose acknowledge bit was set.
    pub fn acknowledged_interrupts(&self) -> Vec<usize> {
        (0..NUM_OF_USER_INTS)
            .filter(|i| self.acknowledged & (1 << (i + 16)) != 0)
            .collect()
    }
}

impl fmt::Display for InterruptTriggerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "IRQ Block Identifier: {:x}", self.irq_block_id)?;
        writeln!(f, "IRQ Block User Vector Number: {:x}", self.vector_map)?;
        writeln!(f, "CL interrupt status: {:08x}", self.status)?;
        writeln!(
            f,
            "counter: {:x} -> {:x} after {} reads",
            self.counter_before, self.counter_after, self.polls
        )?;
        writeln!(f, "time {:?} for ISR", self.elapsed)?;
        writeln!(f, "CL read_data: {:08x}", self.acknowledged)?;
        write!(f, "CL read_data: {:08x}", self.status_after_clear)
    }
}

/// A probed interrupt card. Field order is teardown order.
pub struct InterruptDriver {
    bridge: InterruptBridge,
    ddr: Arc<Bar>,
    ocl: Bar,
    xdma: Bar,
    _ddr_claim: RegionClaim,
    _ocl_claim: RegionClaim,
    _xdma_claim: RegionClaim,
    _enabled: EnabledDevice,
    device: PciDeviceRef,
    trigger: Mutex<()>,
}

impl InterruptDriver {
    /// Take the function described by `params`, map its BARs and arm 16 vectors.
    ///
    /// # Returns: `Result<InterruptDriver, AtgdError>`
    /// * `Ok(InterruptDriver)` - Every vector has a handler
    /// * `Err(AtgdError::NotFound)` - No function at the address
    /// * `Err(AtgdError::ResourceBusy)` - A BAR is owned by someone else
    /// * `Err(AtgdError::Msix)` - Not exactly 16 vectors, or a vector could not be bound
    ///
    /// On error everything acquired so far has already been released.
    pub fn probe(host: Arc<dyn PciHost>, params: &DriverParams) -> Result<Self, AtgdError> {
        info!("Installing f1 module");
        let address = params.address();
        let device = PciDeviceRef::get(host.clone(), address)
            .inspect_err(|_| error!("f1_driver: Unable to locate PCI card."))?;
        let enabled = EnabledDevice::enable(host.clone(), address)?;

        let ddr_claim = RegionClaim::request(host.clone(), address, f1_bars::DDR_BAR, "DDR Region")
            .inspect_err(|_| error!("f1_driver: cannot obtain the DDR region."))?;
        let ddr = Arc::new(Bar::new(host.iomap(&address, f1_bars::DDR_BAR)?));
        let ocl_claim = RegionClaim::request(host.clone(), address, f1_bars::OCL_BAR, "OCL Region")
            .inspect_err(|_| error!("f1_driver: cannot obtain the OCL region."))?;
        let ocl = Bar::new(host.iomap(&address, f1_bars::OCL_BAR)?);
        let xdma_claim = RegionClaim::request(host.clone(), address, f1_bars::XDMA_BAR, "XDMA Region")
            .inspect_err(|_| error!("f1_driver: cannot obtain the XDMA region."))?;
        let xdma = Bar::new(host.iomap(&address, f1_bars::XDMA_BAR)?);

        ddr.poke(COUNTER_OFFSET, 0)?;
        let bridge = InterruptBridge::arm(
            host.clone(),
            address,
            NUM_OF_USER_INTS,
            F1_DEVICE_NAME,
            ddr.clone(),
        )?;

        Ok(InterruptDriver {
            bridge,
            ddr,
            ocl,
            xdma,
            _ddr_claim: ddr_claim,
            _ocl_claim: ocl_claim,
            _xdma_claim: xdma_claim,
            _enabled: enabled,
            device,
            trigger: Mutex::new(()),
        })
    }

    pub fn info(&self) -> PciDeviceInfo {
        self.device.info()
    }

    pub fn backend(&self) -> &str {
        self.device.host().name()
    }

    pub fn bridge(&self) -> &InterruptBridge {
        &self.bridge
    }

    /// The counter the handler increments.
    pub fn counter(&self) -> Result<u32, AtgdError> {
        self.ddr.peek(COUNTER_OFFSET)
    }

    /// Route user interrupts 0..15 to vectors 0..15, fire each once and wait for the counter.
    pub fn trigger_interrupts(&self) -> Result<InterruptTriggerReport, AtgdError> {
        let _one_at_a_time = self
            .trigger
            .lock()
            .map_err(|_| AtgdError::Internal("couldn't lock the interrupt trigger".into()))?;
        info!("Starting MSI-X Interrupt test");
        let counter_before = self.counter()?;
        let irq_block_id = self.xdma.peek(dma_reg_addr(IRQ_TGT, 0, IRQ_BLOCK_ID))?;
        for (n, word) in USER_VECTOR_MAP.iter().enumerate() {
            self.xdma
                .poke(dma_reg_addr(IRQ_TGT, 0, IRQ_USER_VECTOR_BASE + 4 * n), *word)?;
        }
        let vector_map = self.xdma.peek(dma_reg_addr(IRQ_TGT, 0, IRQ_USER_VECTOR_BASE))?;
        self.xdma
            .poke(dma_reg_addr(IRQ_TGT, 0, IRQ_USER_INT_ENABLE), 0xffff)?;

        info!("Triggering each of the MSI-X interrupts...");
        for i in 0..NUM_OF_USER_INTS {
            self.ocl.poke(CL_INTERRUPT_REG, 1 << i)?;
        }
        let started = Instant::now();
        let status = self.ocl.peek(CL_INTERRUPT_REG)?;

        let mut counter_after = self.counter()?;
        let mut polls = 1;
        while counter_after == counter_before && polls < POLL_LIMIT {
            counter_after = self.counter()?;
            polls += 1;
        }
        let elapsed = started.elapsed();

        let acknowledged = self.ocl.peek(CL_INTERRUPT_REG)?;
        self.ocl.poke(CL_INTERRUPT_REG, acknowledged)?;
        let status_after_clear = self.ocl.peek(CL_INTERRUPT_REG)?;

        let report = InterruptTriggerReport {
            irq_block_id,
            vector_map,
            counter_before,
            counter_after,
            polls,
            status,
            acknowledged,
            status_after_clear,
            elapsed,
        };
        for line in report.to_string().lines() {
            info!("{line}");
        }
        Ok(report)
    }
}

impl Drop for InterruptDriver {
    fn drop(&mut self) {
        info!("Removing f1 module");
    }
}
