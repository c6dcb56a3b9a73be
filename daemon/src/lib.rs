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


//! atgd - user-space drivers for the FPGA traffic generator and interrupt logic of an F1 card.
//!
//! The crate is split the way a kernel driver would be:
//! - [`pci`] - The host services a driver needs ([`pci::host::PciHost`]) and the backends
//!   that provide them from user space (sysfs, VFIO) or from memory (mock).
//! - [`driver`] - The two drivers, built from RAII guards over those services.
//! - [`comm`] - The DBus service that stands in for the character device node and adds status
//!   and control objects.
//!
//! Configuration is split between [`config`] (constants and load-time parameters) and the
//! command line of the `atgd` binary.

pub mod comm;
pub mod config;
pub mod driver;
pub mod error;
pub mod pci;
pub mod system_io;

use crate::pci::backends::{mock::MockHost, sysfs::SysfsHost, vfio::VfioHost};
use crate::pci::host::register_host;
use std::sync::Arc;

/// Register every host backend under the name `--backend` accepts.
///
/// `mock` is a bus with one simulated F1 function at the default slot, useful for trying the
/// DBus service on a machine without the card.
pub fn register_hosts() {
    register_host("sysfs", || Arc::new(SysfsHost::new()));
    register_host("vfio", || Arc::new(VfioHost::new()));
    register_host("mock", || Arc::new(MockHost::f1()));
}
