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


use crate::mock_host::{STAGING_BUS_ADDRESS, card, probe_atg};
use atgd::driver::atg_regs::*;
use atgd::driver::chardev::FileOperations;
use atgd::pci::backends::mock::MockHost;
use googletest::prelude::*;
use rstest::*;

fn read(driver: &dyn FileOperations, session: u64, count: usize) -> Vec<u8> {
    let mut data = Vec::new();
    driver
        .read(session, &mut data, count)
        .expect("read on an open session");
    data
}

#[gtest]
fn nul_terminated_message_round_trips_without_self_test() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    let message = b"0 This is a test.\0".to_vec();
    assert_that!(message.len(), eq(18));

    assert_that!(driver.write(session, &message), ok(eq(&18)));
    assert_that!(driver.self_test_count(), eq(0));
    assert_that!(host.writes(card(), 0), is_empty());
    assert_that!(read(&driver, session, 18), eq(&message));
}

#[gtest]
fn test_pattern_message_runs_one_self_test() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    let message = b"1 Print Test Pattern".to_vec();
    assert_that!(message.len(), eq(20));

    assert_that!(driver.write(session, &message), ok(eq(&20)));
    assert_that!(driver.self_test_count(), eq(1));
    assert_that!(read(&driver, session, 20), eq(&message));

    let writes = host.writes(card(), 0);
    assert_that!(writes.len(), eq(15));
    expect_that!(writes.first(), some(eq(&(CFG_REG, CFG_INCR_SYNC_COMPARE))));
    expect_that!(writes.contains(&(WR_ADDR_LOW, 0x0010_0000)), eq(true));
    expect_that!(
        writes.contains(&(WR_ADDR_HIGH, (STAGING_BUS_ADDRESS >> 32) as u32)),
        eq(true)
    );
    expect_that!(writes.contains(&(RD_DATA, TEST_PATTERN)), eq(true));
    expect_that!(
        writes.last(),
        some(eq(&(CNTL_REG, 0)))
    );
}

#[gtest]
#[rstest]
#[case::zero_prefix(b"0abc", 0)]
#[case::one_prefix(b"1", 1)]
#[case::empty(b"", 0)]
#[case::zero_later(b"x0", 1)]
#[case::leading_space(b" 0", 1)]
fn one_self_test_per_triggering_write(#[case] data: &[u8], #[case] expected: u64) {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    driver.write(session, &data).unwrap();
    assert_that!(driver.self_test_count(), eq(expected));
    assert_that!(host.writes(card(), 0).len() as u64, eq(15 * expected));
}

#[gtest]
fn reads_are_capped_at_the_staging_buffer() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    assert_that!(read(&driver, session, 8192).len(), eq(4096));
}

#[gtest]
fn writes_are_capped_at_the_staging_buffer() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    let mut data = vec![b'0'];
    data.resize(5000, b'z');
    assert_that!(driver.write(session, &data), ok(eq(&4096)));
    let back = read(&driver, session, 5000);
    assert_that!(back.as_slice(), eq(&data[..4096]));
}

#[gtest]
fn zero_length_read_is_empty() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    assert_that!(read(&driver, session, 0), is_empty());
}

#[gtest]
fn sessions_share_the_staging_buffer() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let writer = driver.open();
    let reader = driver.open();
    driver.write(writer, &b"0 shared".to_vec()).unwrap();
    assert_that!(read(&driver, reader, 8), eq(&b"0 shared".to_vec()));
    driver.release(writer);
    driver.release(reader);
    assert_that!(driver.sessions().is_empty(), eq(true));
}

#[gtest]
fn position_advances_but_reads_start_at_the_buffer() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    driver.write(session, &b"0123".to_vec()).unwrap();
    let first = read(&driver, session, 4);
    let second = read(&driver, session, 4);
    assert_that!(first, eq(&second));
    assert_that!(driver.sessions().position(session), some(eq(12)));
}

#[gtest]
fn closed_session_is_rejected() {
    let host = MockHost::f1();
    let driver = probe_atg(&host).unwrap();
    let session = driver.open();
    driver.release(session);
    let mut data = Vec::new();
    assert_that!(
        driver.read(session, &mut data, 4),
        err(displays_as(contains_substring("AtgdError::Argument")))
    );
    assert_that!(
        driver.write(session, &b"1".to_vec()),
        err(displays_as(contains_substring("is not open")))
    );
    assert_that!(driver.self_test_count(), eq(0));
}
