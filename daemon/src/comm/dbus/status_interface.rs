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


use crate::driver::LoadedDriver;
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct StatusInterface {
    driver: Arc<LoadedDriver>,
}

impl StatusInterface {
    pub fn new(driver: Arc<LoadedDriver>) -> Self {
        StatusInterface { driver }
    }
}

#[interface(name = "io.atgd.status")]
impl StatusInterface {
    /// PCI address, vendor id, device id and host backend of the probed function.
    async fn get_device(&self) -> (String, u16, u16, String) {
        info!("get_device called");
        let info = self.driver.info();
        (
            info.address.to_string(),
            info.vendor,
            info.device,
            self.driver.backend(),
        )
    }

    async fn get_dev_no(&self) -> Result<String, fdo::Error> {
        info!("get_dev_no called");
        Ok(self.driver.atg("GetDevNo")?.devno().to_string())
    }

    async fn get_self_test_count(&self) -> Result<u64, fdo::Error> {
        info!("get_self_test_count called");
        Ok(self.driver.atg("GetSelfTestCount")?.self_test_count())
    }

    async fn get_interrupt_counter(&self) -> Result<u32, fdo::Error> {
        info!("get_interrupt_counter called");
        Ok(self.driver.interrupts("GetInterruptCounter")?.counter()?)
    }

    /// How often each vector's handler claimed an interrupt, by identity.
    async fn get_interrupt_counts(&self) -> Result<Vec<u64>, fdo::Error> {
        info!("get_interrupt_counts called");
        Ok(self
            .driver
            .interrupts("GetInterruptCounts")?
            .bridge()
            .handled_counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverParams;
    use crate::driver::Personality;
    use crate::pci::backends::mock::MockHost;
    use googletest::prelude::*;

    fn status(personality: Personality, host: &MockHost) -> StatusInterface {
        let driver =
            LoadedDriver::probe(personality, Arc::new(host.clone()), &DriverParams::default())
                .unwrap();
        StatusInterface::new(Arc::new(driver))
    }

    #[tokio::test]
    async fn atg_reports_device_and_devno() {
        let status = status(Personality::Atg, &MockHost::f1());
        let (address, vendor, device, backend) = status.get_device().await;
        assert_that!(address, eq("0000:00:0f.0"));
        assert_that!(vendor, eq(0x1d0f));
        assert_that!(device, eq(0xf000));
        assert_that!(backend, eq("mock"));
        assert_that!(status.get_dev_no().await, ok(eq(&"254:0".to_string())));
        assert_that!(status.get_self_test_count().await, ok(eq(&0_u64)));
    }

    #[tokio::test]
    async fn interrupt_queries_need_the_interrupt_driver() {
        let status = status(Personality::Atg, &MockHost::f1());
        let result = status.get_interrupt_counter().await;
        assert_that!(matches!(result, Err(fdo::Error::InvalidArgs(_))), eq(true));
    }

    #[tokio::test]
    async fn interrupt_counts_follow_raised_vectors() {
        let host = MockHost::f1();
        let status = status(Personality::Interrupts, &host);
        let vectors = host.vectors(DriverParams::default().address());
        host.raise_irq(vectors[3]);
        host.raise_irq(vectors[3]);
        assert_that!(status.get_interrupt_counter().await, ok(eq(&2_u32)));
        let counts = status.get_interrupt_counts().await.unwrap_or_default();
        assert_that!(counts.len(), eq(16));
        assert_that!(counts[3], eq(2));
        assert_that!(counts.iter().sum::<u64>(), eq(2));
        assert_that!(status.get_dev_no().await.is_err(), eq(true));
    }
}
