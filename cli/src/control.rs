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


//! `selftest` and `trigger`.

use crate::proxies::control_proxy::ControlProxy;
use zbus::Connection;

pub async fn selftest_handler(connection: &Connection) -> Result<String, zbus::Error> {
    let proxy = ControlProxy::new(connection).await?;
    proxy.run_self_test().await
}

pub async fn trigger_handler(connection: &Connection) -> Result<String, zbus::Error> {
    let proxy = ControlProxy::new(connection).await?;
    proxy.trigger_interrupts().await
}
