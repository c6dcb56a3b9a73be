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


//! `read` and `write` against the character device endpoint.

use crate::proxies::chardev_proxy::ChardevProxy;
use zbus::Connection;

/// Render endpoint bytes the way `printf("%s")` would: up to the first NUL, lossily decoded.
pub fn printable(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// The bytes `write` sends for `text`.
pub fn payload(text: &str, nul: bool) -> Vec<u8> {
    let mut data = text.as_bytes().to_vec();
    if nul {
        data.push(0);
    }
    data
}

/// Write `data` in a session of its own.
pub async fn call_write(proxy: &ChardevProxy<'_>, data: &[u8]) -> Result<u32, zbus::Error> {
    let session = proxy.open().await?;
    let written = proxy.write(session, data).await;
    proxy.release(session).await?;
    written
}

/// Read up to `count` bytes in a session of its own.
pub async fn call_read(proxy: &ChardevProxy<'_>, count: u32) -> Result<Vec<u8>, zbus::Error> {
    let session = proxy.open().await?;
    let data = proxy.read(session, count).await;
    proxy.release(session).await?;
    data
}

pub async fn read_handler(connection: &Connection, count: u32) -> Result<String, zbus::Error> {
    let proxy = ChardevProxy::new(connection).await?;
    let data = call_read(&proxy, count).await?;
    Ok(format!("read {} bytes: {}", data.len(), printable(&data)))
}

pub async fn write_handler(
    connection: &Connection,
    text: &str,
    nul: bool,
) -> Result<String, zbus::Error> {
    let proxy = ChardevProxy::new(connection).await?;
    let data = payload(text, nul);
    let written = call_write(&proxy, &data).await?;
    Ok(format!("wrote {written} of {} bytes", data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::stops_at_nul(b"0 This is a test.\0junk", "0 This is a test.")]
    #[case::no_nul(b"1 Print Test Pattern", "1 Print Test Pattern")]
    #[case::empty(b"", "")]
    fn printable_stops_at_nul(#[case] data: &[u8], #[case] expected: &str) {
        assert_that!(printable(data), eq(expected));
    }

    #[gtest]
    fn payload_appends_nul_on_request() {
        assert_that!(payload("0 This is a test.", true).len(), eq(18));
        assert_that!(payload("1 Print Test Pattern", false).len(), eq(20));
    }
}
