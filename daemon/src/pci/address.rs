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

use std::fmt;
use std::str::FromStr;

/// Location of a PCI function, printed the way sysfs names it: `dddd:bb:ss.f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(domain: u16, bus: u8, slot: u8, function: u8) -> Self {
        PciAddress {
            domain,
            bus,
            slot,
            function,
        }
    }

    /// The combined device/function byte (`PCI_DEVFN`).
    pub const fn devfn(&self) -> u8 {
        ((self.slot & 0x1f) << 3) | (self.function & 0x07)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}

impl FromStr for PciAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("'{s}' is not a PCI address of the form dddd:bb:ss.f");
        let (domain, rest) = s.split_once(':').ok_or_else(bad)?;
        let (bus, rest) = rest.split_once(':').ok_or_else(bad)?;
        let (slot, function) = rest.split_once('.').ok_or_else(bad)?;

        let domain = u16::from_str_radix(domain, 16).map_err(|_| bad())?;
        let bus = u8::from_str_radix(bus, 16).map_err(|_| bad())?;
        let slot = u8::from_str_radix(slot, 16).map_err(|_| bad())?;
        let function = u8::from_str_radix(function, 16).map_err(|_| bad())?;
        if slot > 0x1f || function > 0x07 {
            return Err(bad());
        }
        Ok(PciAddress::new(domain, bus, slot, function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::f1_default(PciAddress::new(0, 0, 0x0f, 0), "0000:00:0f.0")]
    #[case::wide(PciAddress::new(0x10, 0xab, 0x1f, 7), "0010:ab:1f.7")]
    fn display_matches_sysfs(#[case] address: PciAddress, #[case] expected: &str) {
        assert_that!(address.to_string(), eq(expected));
        assert_that!(expected.parse::<PciAddress>(), ok(eq(&address)));
    }

    #[gtest]
    #[rstest]
    #[case::no_function("0000:00:0f")]
    #[case::slot_too_big("0000:00:20.0")]
    #[case::function_too_big("0000:00:0f.8")]
    #[case::not_hex("0000:zz:0f.0")]
    fn parse_rejects(#[case] input: &str) {
        assert_that!(
            input.parse::<PciAddress>(),
            err(contains_substring("is not a PCI address"))
        );
    }

    #[gtest]
    fn devfn_packs_slot_and_function() {
        assert_that!(PciAddress::new(0, 0, 0x0f, 0).devfn(), eq(0x78));
        assert_that!(PciAddress::new(0, 0, 0x01, 3).devfn(), eq(0x0b));
    }
}
