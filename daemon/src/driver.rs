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


//! The two driver personalities.
//!
//! - [`atg`] - Traffic generator (`atg_driver`). Holds the DDR and OCL BARs, a 4 KiB DMA
//!   staging buffer and a character device endpoint whose writes kick off the hardware
//!   self-test.
//! - [`f1`] - Interrupt driver (`f1_driver`). Holds the DDR, OCL and XDMA BARs and routes 16
//!   MSI-X vectors to a shared handler that counts them in DDR.
//!
//! Both are built the same way: [`resources`] wraps each kernel service in a guard, `probe`
//! acquires the guards in order, and the driver struct lists them in teardown order. A failed
//! probe drops what it holds so far, in reverse.

pub mod atg;
pub mod atg_regs;
pub mod chardev;
pub mod f1;
pub mod irq;
pub mod resources;

use crate::config::DriverParams;
use crate::driver::atg::AtgDriver;
use crate::driver::f1::InterruptDriver;
use crate::error::AtgdError;
use crate::pci::host::{PciDeviceInfo, PciHost};
use std::fmt;
use std::sync::Arc;

/// Which driver the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    Atg,
    Interrupts,
}

impl Personality {
    /// Backend used when none is given on the command line. The interrupt driver needs MSI-X,
    /// which plain sysfs cannot deliver.
    pub fn default_backend(&self) -> &'static str {
        match self {
            Personality::Atg => "sysfs",
            Personality::Interrupts => "vfio",
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Personality::Atg => write!(f, "{}", atg::ATG_DEVICE_NAME),
            Personality::Interrupts => write!(f, "{}", f1::F1_DEVICE_NAME),
        }
    }
}

/// A probed driver of either personality.
pub enum LoadedDriver {
    Atg(Arc<AtgDriver>),
    Interrupts(Arc<InterruptDriver>),
}

impl LoadedDriver {
    pub fn probe(
        personality: Personality,
        host: Arc<dyn PciHost>,
        params: &DriverParams,
    ) -> Result<Self, AtgdError> {
        Ok(match personality {
            Personality::Atg => LoadedDriver::Atg(Arc::new(AtgDriver::probe(host, params)?)),
            Personality::Interrupts => {
                LoadedDriver::Interrupts(Arc::new(InterruptDriver::probe(host, params)?))
            }
        })
    }

    pub fn personality(&self) -> Personality {
        match self {
            LoadedDriver::Atg(_) => Personality::Atg,
            LoadedDriver::Interrupts(_) => Personality::Interrupts,
        }
    }

    pub fn info(&self) -> PciDeviceInfo {
        match self {
            LoadedDriver::Atg(driver) => driver.info(),
            LoadedDriver::Interrupts(driver) => driver.info(),
        }
    }

    pub fn backend(&self) -> String {
        match self {
            LoadedDriver::Atg(driver) => driver.backend().to_owned(),
            LoadedDriver::Interrupts(driver) => driver.backend().to_owned(),
        }
    }

    /// The traffic generator, or an `Argument` error naming `what` was asked of the wrong driver.
    pub fn atg(&self, what: &str) -> Result<&Arc<AtgDriver>, AtgdError> {
        match self {
            LoadedDriver::Atg(driver) => Ok(driver),
            other => Err(AtgdError::Argument(format!(
                "{what} is not provided by {}",
                other.personality()
            ))),
        }
    }

    /// The interrupt driver, or an `Argument` error naming `what` was asked of the wrong driver.
    pub fn interrupts(&self, what: &str) -> Result<&Arc<InterruptDriver>, AtgdError> {
        match self {
            LoadedDriver::Interrupts(driver) => Ok(driver),
            other => Err(AtgdError::Argument(format!(
                "{what} is not provided by {}",
                other.personality()
            ))),
        }
    }
}
