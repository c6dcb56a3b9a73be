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


use crate::mock_host::{STAGING_BUS_ADDRESS, probe_atg, probe_f1};
use atgd::pci::backends::mock::{HostEvent, MockHost};
use atgd::pci::host::DevNo;
use googletest::prelude::*;

const ATG_DEVNO: DevNo = DevNo {
    major: 254,
    minor: 0,
};

fn region(bar: u8, owner: &str) -> HostEvent {
    HostEvent::RequestRegion {
        bar,
        owner: owner.to_owned(),
    }
}

#[gtest]
fn atg_acquires_in_probe_order() {
    let host = MockHost::f1();
    let _driver = probe_atg(&host).unwrap();
    assert_that!(
        host.events(),
        elements_are![
            eq(&HostEvent::GetDevice),
            eq(&HostEvent::EnableDevice),
            eq(&region(3, "DDR Region")),
            eq(&region(0, "OCL Region")),
            eq(&HostEvent::Iomap { bar: 0 }),
            eq(&HostEvent::RegisterChrdev(ATG_DEVNO)),
            eq(&HostEvent::AllocDma {
                bus_address: STAGING_BUS_ADDRESS
            })
        ]
    );
}

#[gtest]
fn atg_tears_down_node_then_regions_then_device() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    host.clear_events();
    drop(driver);
    assert_that!(
        host.events(),
        elements_are![
            eq(&HostEvent::UnregisterChrdev(ATG_DEVNO)),
            eq(&HostEvent::FreeDma {
                bus_address: STAGING_BUS_ADDRESS
            }),
            eq(&HostEvent::Iounmap { bar: 0 }),
            eq(&HostEvent::ReleaseRegion { bar: 0 }),
            eq(&HostEvent::ReleaseRegion { bar: 3 }),
            eq(&HostEvent::DisableDevice),
            eq(&HostEvent::PutDevice)
        ]
    );
    assert_that!(host.outstanding(), is_empty());
}

#[gtest]
fn f1_tears_down_vectors_first() {
    let host = MockHost::f1();
    let driver = probe_f1(&host).unwrap();
    let vectors = driver.bridge().vectors();
    host.clear_events();
    drop(driver);

    let mut expected: Vec<HostEvent> = vectors
        .iter()
        .map(|vector| HostEvent::FreeIrq { vector: *vector })
        .collect();
    expected.extend([
        HostEvent::DisableMsix,
        HostEvent::Iounmap { bar: 4 },
        HostEvent::Iounmap { bar: 0 },
        HostEvent::Iounmap { bar: 2 },
        HostEvent::ReleaseRegion { bar: 4 },
        HostEvent::ReleaseRegion { bar: 0 },
        HostEvent::ReleaseRegion { bar: 2 },
        HostEvent::DisableDevice,
        HostEvent::PutDevice,
    ]);
    assert_that!(host.events(), eq(&expected));
    assert_that!(host.outstanding(), is_empty());
}

#[gtest]
fn f1_binds_after_mapping_everything() {
    let host = MockHost::f1();
    let _driver = probe_f1(&host).unwrap();
    let events = host.events();
    let msix = events
        .iter()
        .position(|e| *e == HostEvent::EnableMsix { vectors: 16 });
    let last_map = events
        .iter()
        .rposition(|e| matches!(e, HostEvent::Iomap { .. }));
    assert_that!(msix, some(gt(last_map.unwrap_or(usize::MAX))));
    assert_that!(
        events
            .iter()
            .filter(|e| matches!(e, HostEvent::RequestIrq { .. }))
            .count(),
        eq(16)
    );
}

#[gtest]
fn regions_can_be_taken_again_after_teardown() {
    let host = MockHost::f1();
    drop(probe_atg(&host).unwrap());
    let again = probe_atg(&host);
    assert_that!(again.is_ok(), eq(true));
}
