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

pub struct ControlInterface {
    driver: Arc<LoadedDriver>,
}

impl ControlInterface {
    pub fn new(driver: Arc<LoadedDriver>) -> Self {
        ControlInterface { driver }
    }
}

#[interface(name = "io.atgd.control")]
impl ControlInterface {
    /// Run the traffic generator self-test without going through the endpoint.
    async fn run_self_test(&self) -> Result<String, fdo::Error> {
        info!("run_self_test called");
        Ok(self.driver.atg("RunSelfTest")?.self_test()?.to_string())
    }

    /// Fire all 16 user interrupts from the card and report what the handler counted.
    async fn trigger_interrupts(&self) -> Result<String, fdo::Error> {
        info!("trigger_interrupts called");
        Ok(self
            .driver
            .interrupts("TriggerInterrupts")?
            .trigger_interrupts()?
            .to_string())
    }
}
