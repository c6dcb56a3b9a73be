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


//! DBus proxy interfaces for the atgd daemon, generated with `zbus`'s `#[proxy]` macro.
//!
//! - [`chardev_proxy`] - The character device endpoint (open, release, read, write)
//! - [`status_proxy`] - Read-only queries
//! - [`control_proxy`] - Self-test and interrupt trigger
//!
//! All three talk to the service `io.atgd` under `/io/atgd/`.

pub mod chardev_proxy;
pub mod control_proxy;
pub mod status_proxy;
