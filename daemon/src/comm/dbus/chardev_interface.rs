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


//! The character device endpoint as a DBus object.
//!
//! Each method forwards to the [`FileOperations`] table of the loaded driver. `Open` hands out
//! the session id that later calls pass back, the way a file descriptor would be.

use crate::driver::chardev::{FileOperations, SessionId};
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct ChardevInterface {
    fops: Arc<dyn FileOperations>,
}

impl ChardevInterface {
    pub fn new(fops: Arc<dyn FileOperations>) -> Self {
        ChardevInterface { fops }
    }
}

#[interface(name = "io.atgd.chardev")]
impl ChardevInterface {
    async fn open(&self) -> SessionId {
        info!("open called");
        self.fops.open()
    }

    async fn release(&self, session: SessionId) {
        info!("release called with session: {session}");
        self.fops.release(session)
    }

    async fn read(&self, session: SessionId, count: u32) -> Result<Vec<u8>, fdo::Error> {
        info!("read called with session: {session} and count: {count}");
        let mut data = Vec::new();
        self.fops.read(session, &mut data, count as usize)?;
        Ok(data)
    }

    async fn write(&self, session: SessionId, data: Vec<u8>) -> Result<u32, fdo::Error> {
        info!("write called with session: {session} and {} bytes", data.len());
        let written = self.fops.write(session, &data)?;
        Ok(written as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverParams;
    use crate::driver::atg::AtgDriver;
    use crate::pci::backends::mock::MockHost;
    use googletest::prelude::*;

    fn interface() -> (ChardevInterface, Arc<AtgDriver>) {
        let driver =
            Arc::new(AtgDriver::probe(Arc::new(MockHost::f1()), &DriverParams::default()).unwrap());
        (ChardevInterface::new(driver.clone()), driver)
    }

    #[tokio::test]
    async fn write_then_read_through_the_interface() {
        let (chardev, driver) = interface();
        let session = chardev.open().await;
        let written = chardev.write(session, b"0 hello".to_vec()).await;
        assert_that!(written, ok(eq(&7_u32)));
        let data = chardev.read(session, 7).await;
        assert_that!(data, ok(eq(&b"0 hello".to_vec())));
        assert_that!(driver.self_test_count(), eq(0));
        chardev.release(session).await;
        assert_that!(driver.sessions().is_empty(), eq(true));
    }

    #[tokio::test]
    async fn unknown_session_is_invalid_args() {
        let (chardev, _driver) = interface();
        let result = chardev.read(42, 1).await;
        assert_that!(matches!(result, Err(fdo::Error::InvalidArgs(_))), eq(true));
    }

    #[gtest]
    fn release_of_unknown_session_is_harmless() {
        let (chardev, driver) = interface();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(chardev.release(7));
        assert_that!(driver.sessions().len(), eq(0));
    }
}
