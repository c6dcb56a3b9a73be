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


//! Status command implementation.
//!
//! The daemon runs one of two drivers and answers only the queries that driver supports, so
//! the table lists the device and then whatever the loaded driver has to say.

use crate::proxies::status_proxy::StatusProxy;
use zbus::Connection;

/// Formats the per-identity interrupt counts as `identity:count` pairs, skipping zeros.
pub fn format_counts(counts: &[u64]) -> String {
    let fired: Vec<String> = counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(identity, count)| format!("{identity}:{count}"))
        .collect();
    if fired.is_empty() {
        "none".to_string()
    } else {
        fired.join(" ")
    }
}

pub async fn status_handler(connection: &Connection) -> Result<String, zbus::Error> {
    let proxy = StatusProxy::new(connection).await?;
    let (address, vendor, device, backend) = proxy.get_device().await?;
    let mut ret_string = format!(
        "---- DEVICE ----\n\
        | address | vendor | device | backend |\n\
        | {address} | {vendor:04x} | {device:04x} | {backend} |\n"
    );
    if let Ok(devno) = proxy.get_dev_no().await {
        let self_tests = proxy.get_self_test_count().await?;
        ret_string += "\n---- ATG DRIVER ----\n\
                       | devno | self-tests |\n";
        ret_string += format!("| {devno} | {self_tests} |\n").as_str();
    }
    if let Ok(counter) = proxy.get_interrupt_counter().await {
        let counts = proxy.get_interrupt_counts().await?;
        ret_string += "\n---- F1 DRIVER ----\n\
                       | counter | handled |\n";
        ret_string += format!("| {counter:#x} | {} |\n", format_counts(&counts)).as_str();
    }
    Ok(ret_string)
}
