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

//! Static locations and fixed driver constants.
//!
//! Runtime parameters (the equivalent of kernel module parameters) are parsed by `clap` into
//! [`DriverParams`], everything else lives here as constants.

use crate::pci::address::PciAddress;

/// The kernel's PCI device directory. Typically `/sys/bus/pci/devices/`.
pub static PCI_DEVICES_DIR: &str = "/sys/bus/pci/devices/";

/// The VFIO character device directory. Holds the `vfio` container node and one node per IOMMU
/// group.

/// Used to translate the virtual address of a pinned page into its physical frame.
/// See [https://docs.kernel.org/admin-guide/mm/pagemap.html](https://docs.kernel.org/admin-guide/mm/pagemap.html)
pub static PAGEMAP_PATH: &str = "/proc/self/pagemap";

/// DBus well-known name of the daemon.
pub static DBUS_SERVICE_NAME: &str = "io.atgd";
pub static CHARDEV_OBJECT_PATH: &str = "/io/atgd/chardev";
pub static STATUS_OBJECT_PATH: &str = "/io/atgd/status";
pub static CONTROL_OBJECT_PATH: &str = "/io/atgd/control";

pub const DEFAULT_DOMAIN: u16 = 0;
pub const DEFAULT_BUS: u8 = 0;
pub const DEFAULT_FUNCTION: u8 = 0;
/// The slot index of the F1 card.
pub const DEFAULT_SLOT: u8 = 0x0f;

/// Size of the DMA staging buffer shared by every endpoint session.
pub const ATG_BUFFER_SIZE: usize = 4096;

/// Number of user interrupts routed through the MSI-X table.
pub const NUM_OF_USER_INTS: usize = 16;

/// BAR indices used by the traffic-generator driver.
pub mod atg_bars {
    pub const OCL_BAR: u8 = 0;
    pub const DDR_BAR: u8 = 3;
}

/// BAR indices used by the interrupt driver.
pub mod f1_bars {
    pub const OCL_BAR: u8 = 0;
    pub const XDMA_BAR: u8 = 2;
    pub const DDR_BAR: u8 = 4;
}

/// Load-time parameters for either driver. Not mutable once a driver has been probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverParams {
    pub domain: u16,
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
}

impl Default for DriverParams {
    fn default() -> Self {
        DriverParams {
            domain: DEFAULT_DOMAIN,
            bus: DEFAULT_BUS,
            slot: DEFAULT_SLOT,
            function: DEFAULT_FUNCTION,
        }
    }
}

impl DriverParams {
    pub fn with_slot(slot: u8) -> Self {
        DriverParams {
            slot,
            ..Default::default()
        }
    }

    pub fn address(&self) -> PciAddress {
        PciAddress::new(self.domain, self.bus, self.slot, self.function)
    }
}

/// Parse a slot index given either in decimal (`15`) or `0x` hexadecimal (`0x0f`).
pub fn parse_slot(value: &str) -> Result<u8, String> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x").or(trimmed.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => trimmed.parse::<u8>(),
    }
    .map_err(|e| format!("'{value}' is not a valid slot index: {e}"))?;
    // devfn only has five bits for the device number
    if parsed > 0x1f {
        return Err(format!("slot {parsed:#x} is out of range (max 0x1f)"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::hex("0x0f", 0x0f)]
    #[case::upper_hex("0X1F", 0x1f)]
    #[case::decimal("15", 15)]
    #[case::padded(" 3 ", 3)]
    fn parse_slot_accepts(#[case] input: &str, #[case] expected: u8) {
        assert_that!(parse_slot(input), ok(eq(&expected)));
    }

    #[gtest]
    #[rstest]
    #[case::too_big("0x20", err(contains_substring("out of range")))]
    #[case::garbage("slot", err(contains_substring("not a valid slot index")))]
    #[case::empty("", err(contains_substring("not a valid slot index")))]
    fn parse_slot_rejects<M: for<'a> Matcher<&'a std::result::Result<u8, String>>>(
        #[case] input: &str,
        #[case] condition: M,
    ) {
        expect_that!(&parse_slot(input), condition);
    }

    #[gtest]
    fn default_params_point_at_slot_0x0f() {
        let params = DriverParams::default();
        assert_that!(params.address().to_string(), eq("0000:00:0f.0"));
    }
}
