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


//! The DBus service `io.atgd`.
//!
//! | Object | Interface | Served by |
//! |---|---|---|
//! | `/io/atgd/chardev` | `io.atgd.chardev` | traffic generator only |
//! | `/io/atgd/status` | `io.atgd.status` | both drivers |
//! | `/io/atgd/control` | `io.atgd.control` | both drivers |
//!
//! Methods that only make sense for the other driver fail with `InvalidArgs`.

pub mod chardev_interface;
pub mod control_interface;
pub mod status_interface;

use crate::comm::dbus::{
    chardev_interface::ChardevInterface, control_interface::ControlInterface,
    status_interface::StatusInterface,
};
use crate::config;
use crate::driver::{LoadedDriver, Personality};
use log::info;
use std::sync::Arc;
use zbus::{Connection, connection};

/// Claim [`config::DBUS_SERVICE_NAME`] and serve `driver`'s objects until the returned
/// connection is dropped.
///
/// # Returns: `zbus::Result<Connection>`
/// * `Ok(Connection)` - The service name is owned and every object is served
/// * `Err(zbus::Error)` - No bus, or the name is already taken
pub async fn serve(driver: Arc<LoadedDriver>, session_bus: bool) -> zbus::Result<Connection> {
    let builder = if session_bus {
        connection::Builder::session()?
    } else {
        connection::Builder::system()?
    };
    let mut builder = builder
        .name(config::DBUS_SERVICE_NAME)?
        .serve_at(
            config::STATUS_OBJECT_PATH,
            StatusInterface::new(driver.clone()),
        )?
        .serve_at(
            config::CONTROL_OBJECT_PATH,
            ControlInterface::new(driver.clone()),
        )?;
    if let LoadedDriver::Atg(atg) = driver.as_ref() {
        builder = builder.serve_at(
            config::CHARDEV_OBJECT_PATH,
            ChardevInterface::new(atg.clone()),
        )?;
    }
    let conn = builder.build().await?;
    info!(
        "Started {} dbus service for {}",
        config::DBUS_SERVICE_NAME,
        driver.personality()
    );
    Ok(conn)
}

/// Whether `personality` puts the chardev object on the bus.
pub fn serves_chardev(personality: Personality) -> bool {
    personality == Personality::Atg
}

/// Take every object `personality` served off the bus so the interfaces drop their references
/// to the driver.
pub async fn withdraw(conn: &Connection, personality: Personality) -> zbus::Result<()> {
    let server = conn.object_server();
    server
        .remove::<StatusInterface, _>(config::STATUS_OBJECT_PATH)
        .await?;
    server
        .remove::<ControlInterface, _>(config::CONTROL_OBJECT_PATH)
        .await?;
    if serves_chardev(personality) {
        server
            .remove::<ChardevInterface, _>(config::CHARDEV_OBJECT_PATH)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::atg(Personality::Atg, true)]
    #[case::interrupts(Personality::Interrupts, false)]
    fn chardev_is_served_by_the_traffic_generator_only(
        #[case] personality: Personality,
        #[case] expected: bool,
    ) {
        assert_that!(serves_chardev(personality), eq(expected));
    }
}
