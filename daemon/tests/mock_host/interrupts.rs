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


use crate::mock_host::{card, probe_f1};
use atgd::driver::f1::{CL_INTERRUPT_REG, USER_VECTOR_MAP};
use atgd::pci::backends::mock::MockHost;
use atgd::pci::host::IrqReturn;
use googletest::prelude::*;

const IRQ_BLOCK_IDENTIFIER: u32 = 0x1fc2_0006;

#[gtest]
fn probe_zeroes_the_counter_and_binds_sixteen_vectors() {
    let host = MockHost::f1();
    host.set_register(card(), 4, 0, 0xdead_beef);
    let driver = probe_f1(&host).unwrap();
    assert_that!(driver.counter(), ok(eq(&0_u32)));
    assert_that!(host.bound_irqs(), eq(16));
    assert_that!(driver.bridge().vectors(), eq(&host.vectors(card())));
    assert_that!(driver.bridge().identities(), eq(&(0..16).collect::<Vec<usize>>()));
}

#[gtest]
fn every_vector_counts_into_ddr() {
    let host = MockHost::f1();
    let driver = probe_f1(&host).unwrap();
    for vector in host.vectors(card()) {
        assert_that!(host.raise_irq(vector), some(eq(IrqReturn::Handled)));
    }
    assert_that!(host.register(card(), 4, 0), eq(16));
    assert_that!(driver.bridge().handled_counts(), each(eq(&1_u64)));
}

#[gtest]
fn trigger_fires_each_user_interrupt_once() {
    let host = MockHost::f1();
    host.set_register(card(), 2, 0x2000, IRQ_BLOCK_IDENTIFIER);
    let driver = probe_f1(&host).unwrap();

    let report = driver.trigger_interrupts().unwrap();
    expect_that!(report.irq_block_id, eq(IRQ_BLOCK_IDENTIFIER));
    expect_that!(report.vector_map, eq(USER_VECTOR_MAP[0]));
    expect_that!(report.counter_before, eq(0));
    expect_that!(report.counter_after, eq(16));
    expect_that!(report.polls, eq(1));
    expect_that!(report.status, eq(0xffff_0000));
    expect_that!(report.acknowledged_interrupts(), eq(&(0..16).collect::<Vec<usize>>()));
    expect_that!(report.status_after_clear, eq(0));
    expect_that!(driver.bridge().handled_counts(), each(eq(&1_u64)));
}

#[gtest]
fn trigger_programs_the_irq_block_before_firing() {
    let host = MockHost::f1();
    let driver = probe_f1(&host).unwrap();
    driver.trigger_interrupts().unwrap();

    assert_that!(
        host.writes(card(), 2),
        elements_are![
            eq(&(0x2080, USER_VECTOR_MAP[0])),
            eq(&(0x2084, USER_VECTOR_MAP[1])),
            eq(&(0x2088, USER_VECTOR_MAP[2])),
            eq(&(0x208c, USER_VECTOR_MAP[3])),
            eq(&(0x2004, 0xffff_u32))
        ]
    );
    let doorbell = host.writes(card(), 0);
    let expected: Vec<(usize, u32)> = (0..16)
        .map(|i| (CL_INTERRUPT_REG, 1_u32 << i))
        .chain(std::iter::once((CL_INTERRUPT_REG, 0xffff_0000)))
        .collect();
    assert_that!(doorbell, eq(&expected));
}

#[gtest]
fn unanswered_trigger_gives_up_after_the_poll_limit() {
    let host = MockHost::f1();
    let driver = probe_f1(&host).unwrap();
    // no doorbell wired: firing does nothing and the counter never moves
    host.set_doorbell(card(), 0, 0xffc);
    let report = driver.trigger_interrupts().unwrap();
    expect_that!(report.counter_after, eq(0));
    expect_that!(report.polls, eq(100));
    expect_that!(report.acknowledged_interrupts(), is_empty());
}
