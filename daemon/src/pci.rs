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

//! PCI host abstraction.
//!
//! The drivers never touch sysfs, VFIO or memory maps directly. Every kernel service they need
//! (device lookup, BAR reservation and mapping, DMA memory, device numbers, MSI-X and interrupt
//! registration) goes through the [`PciHost`](host::PciHost) trait, which is implemented by the
//! backends in [`backends`].
//!
//! - [`address`] - domain/bus/slot/function coordinates
//! - [`host`] - the host trait, its resource types and the backend registry
//! - [`mmio`] - offset-checked register access over a mapped BAR
//! - [`backends`] - `sysfs`, `vfio` and `mock` hosts

pub mod address;
pub mod backends;
pub mod host;
pub mod mmio;
