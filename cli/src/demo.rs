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


//! Replays the traffic generator's test program: write a message that only round trips, then
//! one that also starts the self-test, reading each back.

use crate::endpoint::{payload, printable};
use crate::proxies::chardev_proxy::ChardevProxy;
use crate::proxies::status_proxy::StatusProxy;
use log::info;
use zbus::Connection;

/// `(text, nul-terminated)` for each message, in order.
pub const TEST_MESSAGES: [(&str, bool); 2] =
    [("0 This is a test.", true), ("1 Print Test Pattern", false)];

pub async fn demo_handler(connection: &Connection) -> Result<String, zbus::Error> {
    let chardev = ChardevProxy::new(connection).await?;
    let status = StatusProxy::new(connection).await?;
    let before = status.get_self_test_count().await?;

    let session = chardev.open().await?;
    let mut lines = Vec::new();
    for (text, nul) in TEST_MESSAGES {
        let data = payload(text, nul);
        let step = async {
            chardev.write(session, &data).await?;
            chardev.read(session, data.len() as u32).await
        };
        match step.await {
            Ok(result) => lines.push(format!("msg_result: {}", printable(&result))),
            Err(e) => {
                chardev.release(session).await?;
                return Err(e);
            }
        }
    }
    chardev.release(session).await?;

    let after = status.get_self_test_count().await?;
    let ran = after.saturating_sub(before);
    info!("demo ran {ran} self-test(s)");
    lines.push(format!("self-tests run: {ran}"));
    Ok(lines.join("\n"))
}
