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


//! The traffic-generator driver (`atg_driver`).
//!
//! [`AtgDriver::probe`] takes the function at the configured slot, enables it, reserves the DDR
//! and OCL BARs, maps the OCL BAR, registers a device number for the endpoint and allocates the
//! one-page staging buffer. Dropping the driver gives everything back in this order:
//!
//! 1. device number
//! 2. staging buffer
//! 3. OCL mapping
//! 4. OCL then DDR reservation
//! 5. enable
//! 6. device reference
//!
//! The endpoint's `write` runs the hardware self-test unless the first byte written is `'0'`.

use crate::config::{ATG_BUFFER_SIZE, DriverParams, atg_bars};
use crate::driver::atg_regs::*;
use crate::driver::chardev::{
    FileOperations, SessionId, SessionTable, UserSink, UserSource, copy_from_user, copy_to_user,
    report_copy_fault,
};
use crate::driver::resources::{CharDevRegion, DmaBuffer, EnabledDevice, PciDeviceRef, RegionClaim};
use crate::error::AtgdError;
use crate::pci::host::{DevNo, PciDeviceInfo, PciHost};
use crate::pci::mmio::{Bar, check_access};
use log::{debug, error, info};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Name the endpoint's device numbers are registered under.
pub const ATG_DEVICE_NAME: &str = "atg_driver";

/// What the self-test read back. Nothing in here says whether the transfer succeeded; the
/// sequence starts the generator and stops it straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfTestReport {
    pub bus_address: u64,
    /// `CFG_REG` before anything was written.
    pub cfg_before: u32,
    pub wr_addr_low: u32,
    pub wr_addr_high: u32,
    pub rd_addr_low: u32,
    pub rd_addr_high: u32,
    pub status: u32,
    pub wr_cycles: u64,
    pub rd_cycles: u64,
    pub rd_err: u32,
    pub rd_err_addr: u64,
    pub rd_err_index: u32,
}

impl fmt::Display for SelfTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bus address: {:#x}", self.bus_address)?;
        writeln!(f, "peek 0: {:x}", self.cfg_before)?;
        writeln!(f, "wr low: {:x}", self.wr_addr_low)?;
        writeln!(f, "  high: {:x}", self.wr_addr_high)?;
        writeln!(f, "rd low: {:x}", self.rd_addr_low)?;
        writeln!(f, "  high: {:x}", self.rd_addr_high)?;
        writeln!(f, "status: {}", self.status)?;
        writeln!(f, "Write Cycle Count: {}", self.wr_cycles)?;
        writeln!(f, "Read Cycle Count: {}", self.rd_cycles)?;
        write!(
            f,
            "Read Error: {:#x} at {:#x} (index {})",
            self.rd_err, self.rd_err_addr, self.rd_err_index
        )
    }
}

/// Program one write and one read of `TEST_PATTERN` at `bus_address`, start both channels, then
/// stop them and collect the counters.
pub fn run_self_test(ocl: &Bar, bus_address: u64) -> Result<SelfTestReport, AtgdError> {
    let mut report = SelfTestReport {
        bus_address,
        cfg_before: ocl.peek(CFG_REG)?,
        ..Default::default()
    };

    ocl.poke(CFG_REG, CFG_INCR_SYNC_COMPARE)?;
    ocl.poke(MAX_RD_REQ, MAX_RD_REQ_VALUE)?;

    ocl.poke(WR_INSTR_INDEX, 0)?;
    ocl.poke64(WR_ADDR_LOW, WR_ADDR_HIGH, bus_address)?;
    ocl.poke(WR_DATA, TEST_PATTERN)?;
    ocl.poke(WR_LEN, ONE_BURST)?;
    report.wr_addr_low = ocl.peek(WR_ADDR_LOW)?;
    report.wr_addr_high = ocl.peek(WR_ADDR_HIGH)?;

    ocl.poke(RD_INSTR_INDEX, 0)?;
    ocl.poke64(RD_ADDR_LOW, RD_ADDR_HIGH, bus_address)?;
    ocl.poke(RD_DATA, TEST_PATTERN)?;
    ocl.poke(RD_LEN, ONE_BURST)?;
    report.rd_addr_low = ocl.peek(RD_ADDR_LOW)?;
    report.rd_addr_high = ocl.peek(RD_ADDR_HIGH)?;

    // zero based, [31:16] reads and [15:0] writes
    ocl.poke(NUM_INST, 0)?;

    ocl.poke(CNTL_REG, WR_START_BIT | RD_START_BIT)?;
    report.status = ocl.peek(CNTL_REG)?;
    ocl.poke(CNTL_REG, 0)?;

    report.wr_cycles = ocl.peek64(WR_CYCLE_CNT_LOW, WR_CYCLE_CNT_HIGH)?;
    report.rd_cycles = ocl.peek64(RD_CYCLE_CNT_LOW, RD_CYCLE_CNT_HIGH)?;
    report.rd_err = ocl.peek(RD_ERR)?;
    report.rd_err_addr = ocl.peek64(RD_ERR_ADDR_LOW, RD_ERR_ADDR_HIGH)?;
    report.rd_err_index = ocl.peek(RD_ERR_INDEX)?;

    for line in report.to_string().lines() {
        info!("{line}");
    }
    Ok(report)
}

/// A probed traffic generator. Field order is teardown order.
pub struct AtgDriver {
    chardev: CharDevRegion,
    staging: Mutex<DmaBuffer>,
    ocl: Bar,
    _ocl_claim: RegionClaim,
    _ddr_claim: RegionClaim,
    _enabled: EnabledDevice,
    device: PciDeviceRef,
    bus_address: u64,
    sessions: SessionTable,
    self_tests: AtomicU64,
}

impl AtgDriver {
    /// Take and set up the function described by `params`.
    ///
    /// # Returns: `Result<AtgDriver, AtgdError>`
    /// * `Ok(AtgDriver)` - Every resource is held and the endpoint is live
    /// * `Err(AtgdError::NotFound)` - No function at the address
    /// * `Err(AtgdError::ResourceBusy)` - A BAR is owned by someone else
    /// * `Err(AtgdError::Mmio)` - The OCL BAR does not cover every traffic-generator register
    /// * `Err(AtgdError::AllocationFailure)` - No DMA memory
    ///
    /// On error everything acquired so far has already been released.
    pub fn probe(host: Arc<dyn PciHost>, params: &DriverParams) -> Result<Self, AtgdError> {
        info!("Installing atg module");
        let address = params.address();
        let device = PciDeviceRef::get(host.clone(), address)
            .inspect_err(|_| error!("atg_driver: Unable to locate PCI card."))?;
        let enabled = EnabledDevice::enable(host.clone(), address)?;
        let ddr_claim = RegionClaim::request(host.clone(), address, atg_bars::DDR_BAR, "DDR Region")
            .inspect_err(|_| error!("atg_driver: cannot obtain the DDR region."))?;
        let ocl_claim = RegionClaim::request(host.clone(), address, atg_bars::OCL_BAR, "OCL Region")
            .inspect_err(|_| error!("atg_driver: cannot obtain the OCL region."))?;
        let ocl = Bar::new(host.iomap(&address, atg_bars::OCL_BAR)?);
        check_access(atg_bars::OCL_BAR, LAST_REGISTER, ocl.len())
            .inspect_err(|_| error!("atg_driver: the OCL region is too small."))?;
        let chardev = CharDevRegion::register(host.clone(), ATG_DEVICE_NAME, 1)
            .inspect_err(|_| error!("atg_driver: cannot obtain major number."))?;
        let staging = DmaBuffer::alloc(host.as_ref(), address, ATG_BUFFER_SIZE)?;
        let bus_address = staging.bus_address();

        Ok(AtgDriver {
            chardev,
            staging: Mutex::new(staging),
            ocl,
            _ocl_claim: ocl_claim,
            _ddr_claim: ddr_claim,
            _enabled: enabled,
            device,
            bus_address,
            sessions: SessionTable::new(ATG_DEVICE_NAME),
            self_tests: AtomicU64::new(0),
        })
    }

    pub fn info(&self) -> PciDeviceInfo {
        self.device.info()
    }

    pub fn backend(&self) -> &str {
        self.device.host().name()
    }

    pub fn devno(&self) -> DevNo {
        self.chardev.devno()
    }

    pub fn bus_address(&self) -> u64 {
        self.bus_address
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Number of self-tests run since probe.
    pub fn self_test_count(&self) -> u64 {
        self.self_tests.load(Ordering::SeqCst)
    }

    pub fn self_test(&self) -> Result<SelfTestReport, AtgdError> {
        debug!("ocl: {:?}", self.ocl);
        let report = run_self_test(&self.ocl, self.bus_address)?;
        self.self_tests.fetch_add(1, Ordering::SeqCst);
        Ok(report)
    }

    fn staging(&self) -> Result<MutexGuard<'_, DmaBuffer>, AtgdError> {
        self.staging
            .lock()
            .map_err(|_| AtgdError::Internal("couldn't lock the staging buffer".into()))
    }
}

impl FileOperations for AtgDriver {
    fn open(&self) -> SessionId {
        self.sessions.open()
    }

    fn release(&self, session: SessionId) {
        self.sessions.release(session)
    }

    fn read(&self, session: SessionId, dst: &mut dyn UserSink, count: usize) -> Result<usize, AtgdError> {
        self.sessions.check(session)?;
        info!("user read size: {count}");
        let staging = self.staging()?;
        let n = count.min(staging.len());
        let missed = copy_to_user(dst, &staging.as_slice()[..n]);
        drop(staging);
        report_copy_fault(n, missed);
        self.sessions.advance(session, n - missed)?;
        Ok(n - missed)
    }

    fn write(&self, session: SessionId, src: &dyn UserSource) -> Result<usize, AtgdError> {
        self.sessions.check(session)?;
        let count = src.len();
        info!("user write size: {count}");
        let (copied, run_test) = {
            let mut staging = self.staging()?;
            let n = count.min(staging.len());
            let missed = copy_from_user(&mut staging.as_mut_slice()[..n], src);
            report_copy_fault(n, missed);
            let copied = n - missed;
            let written = &staging.as_slice()[..copied];
            debug!("user write buffer: {:?}", String::from_utf8_lossy(written));
            (copied, written.first().is_some_and(|first| *first != b'0'))
        };
        // the bytes are in the staging buffer by now, so the write stands either way
        if run_test && let Err(e) = self.self_test() {
            error!("atg_driver: self-test failed: {e}");
        }
        self.sessions.advance(session, copied)?;
        Ok(copied)
    }
}

impl Drop for AtgDriver {
    fn drop(&mut self) {
        info!("Removing atg module");
    }
}
