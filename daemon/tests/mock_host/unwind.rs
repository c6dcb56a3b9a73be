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


use crate::mock_host::{card, probe_atg, probe_f1};
use atgd::pci::backends::mock::{HostEvent, MockFaults, MockHost};
use googletest::prelude::*;
use rstest::*;

fn faulty_host(faults: MockFaults, foreign_bar: Option<u8>) -> MockHost {
    let host = MockHost::f1();
    host.set_faults(faults);
    if let Some(bar) = foreign_bar {
        host.reserve_foreign(card(), bar, "xdma");
    }
    host
}

#[gtest]
#[rstest]
#[case::enable(MockFaults { enable: true, ..Default::default() }, None, "AtgdError::IOWrite")]
#[case::ddr_busy(MockFaults::default(), Some(3), "AtgdError::ResourceBusy")]
#[case::ocl_busy(MockFaults::default(), Some(0), "AtgdError::ResourceBusy")]
#[case::ocl_map(MockFaults { iomap: Some(0), ..Default::default() }, None, "AtgdError::IOMap")]
#[case::chrdev(MockFaults { chrdev: true, ..Default::default() }, None, "AtgdError::AllocationFailure")]
#[case::dma(MockFaults { dma: true, ..Default::default() }, None, "AtgdError::AllocationFailure")]
fn atg_probe_failure_releases_everything(
    #[case] faults: MockFaults,
    #[case] foreign_bar: Option<u8>,
    #[case] expected: &str,
) {
    let host = faulty_host(faults, foreign_bar);
    let result = probe_atg(&host);
    assert_that!(result.err().map(|e| e.to_string()), some(contains_substring(expected)));
    assert_that!(host.outstanding(), is_empty());
    let events = host.events();
    assert_that!(events.last(), some(eq(&HostEvent::PutDevice)));
}

#[gtest]
fn short_ocl_bar_is_refused_before_anything_reaches_the_card() {
    let host = MockHost::f1().with_bar_size(card(), 0, 0x80);
    let result = probe_atg(&host);
    assert_that!(
        result.err().map(|e| e.to_string()),
        some(all!(
            contains_substring("AtgdError::Mmio"),
            contains_substring("offset 0xfc")
        ))
    );
    assert_that!(host.outstanding(), is_empty());
    assert_that!(host.writes(card(), 0), is_empty());
    let events = host.events();
    assert_that!(events, contains(eq(&HostEvent::Iounmap { bar: 0 })));
    assert_that!(
        events.iter().any(|e| matches!(e, HostEvent::RegisterChrdev(_))),
        eq(false)
    );
}

#[gtest]
#[rstest]
#[case::enable(MockFaults { enable: true, ..Default::default() }, None, "AtgdError::IOWrite")]
#[case::ddr_busy(MockFaults::default(), Some(4), "AtgdError::ResourceBusy")]
#[case::ocl_busy(MockFaults::default(), Some(0), "AtgdError::ResourceBusy")]
#[case::xdma_busy(MockFaults::default(), Some(2), "AtgdError::ResourceBusy")]
#[case::ddr_map(MockFaults { iomap: Some(4), ..Default::default() }, None, "AtgdError::IOMap")]
#[case::xdma_map(MockFaults { iomap: Some(2), ..Default::default() }, None, "AtgdError::IOMap")]
#[case::partial_grant(MockFaults { msix_grant: Some(8), ..Default::default() }, None, "can provide 8 MSI-X vectors")]
#[case::first_irq(MockFaults { irq_after: Some(0), ..Default::default() }, None, "AtgdError::Msix")]
#[case::sixth_irq(MockFaults { irq_after: Some(5), ..Default::default() }, None, "AtgdError::Msix")]
fn f1_probe_failure_releases_everything(
    #[case] faults: MockFaults,
    #[case] foreign_bar: Option<u8>,
    #[case] expected: &str,
) {
    let host = faulty_host(faults, foreign_bar);
    let result = probe_f1(&host);
    assert_that!(result.err().map(|e| e.to_string()), some(contains_substring(expected)));
    assert_that!(host.outstanding(), is_empty());
    let events = host.events();
    assert_that!(events.last(), some(eq(&HostEvent::PutDevice)));
}

#[gtest]
fn missing_card_is_not_found() {
    let host = MockHost::new();
    assert_that!(
        probe_atg(&host).err().map(|e| e.to_string()),
        some(all!(
            contains_substring("AtgdError::NotFound"),
            contains_substring("0000:00:0f.0")
        ))
    );
    assert_that!(host.events(), is_empty());
}

#[gtest]
fn busy_region_names_its_holder() {
    let host = faulty_host(MockFaults::default(), Some(3));
    assert_that!(
        probe_atg(&host).err().map(|e| e.to_string()),
        some(all!(
            contains_substring("BAR 3 (DDR Region)"),
            contains_substring("already owned as xdma")
        ))
    );
}

#[gtest]
fn half_bound_vectors_are_freed_before_msix_is_disabled() {
    let host = faulty_host(
        MockFaults {
            irq_after: Some(5),
            ..Default::default()
        },
        None,
    );
    let _ = probe_f1(&host);
    let events = host.events();
    let frees: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, HostEvent::FreeIrq { .. }))
        .map(|(i, _)| i)
        .collect();
    let disable = events.iter().position(|e| *e == HostEvent::DisableMsix);
    assert_that!(frees.len(), eq(5));
    assert_that!(disable, some(gt(frees.last().copied().unwrap_or(usize::MAX))));
}

#[gtest]
fn second_driver_on_the_same_card_is_busy() {
    let host = MockHost::f1();
    let _first = probe_atg(&host).unwrap();
    assert_that!(
        probe_atg(&host).err().map(|e| e.to_string()),
        some(contains_substring("AtgdError::ResourceBusy"))
    );
}
