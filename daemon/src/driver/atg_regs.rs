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


//! Register map of the traffic generator behind the OCL BAR. Byte offsets.

pub const CFG_REG: usize = 0x00;
pub const CNTL_REG: usize = 0x08;
pub const NUM_INST: usize = 0x10;
pub const MAX_RD_REQ: usize = 0x14;

pub const WR_INSTR_INDEX: usize = 0x1c;
pub const WR_ADDR_LOW: usize = 0x20;
pub const WR_ADDR_HIGH: usize = 0x24;
pub const WR_DATA: usize = 0x28;
pub const WR_LEN: usize = 0x2c;

pub const RD_INSTR_INDEX: usize = 0x3c;
pub const RD_ADDR_LOW: usize = 0x40;
pub const RD_ADDR_HIGH: usize = 0x44;
pub const RD_DATA: usize = 0x48;
pub const RD_LEN: usize = 0x4c;

pub const RD_ERR: usize = 0xb0;
pub const RD_ERR_ADDR_LOW: usize = 0xb4;
pub const RD_ERR_ADDR_HIGH: usize = 0xb8;
pub const RD_ERR_INDEX: usize = 0xbc;

pub const WR_CYCLE_CNT_LOW: usize = 0xf0;
pub const WR_CYCLE_CNT_HIGH: usize = 0xf4;
pub const RD_CYCLE_CNT_LOW: usize = 0xf8;
pub const RD_CYCLE_CNT_HIGH: usize = 0xfc;
/// Highest register the self-test touches. The OCL BAR has to reach past it.
pub const LAST_REGISTER: usize = RD_CYCLE_CNT_HIGH;

pub const WR_START_BIT: u32 = 0x0000_0001;
pub const RD_START_BIT: u32 = 0x0000_0002;

/// Incrementing ID mode, sync mode and read compare.
pub const CFG_INCR_SYNC_COMPARE: u32 = 0x0100_0018;
/// Maximum number of outstanding read requests.
pub const MAX_RD_REQ_VALUE: u32 = 0x0000_000f;
/// One 128-byte burst.
pub const ONE_BURST: u32 = 0x0000_0001;
/// "ABCD" in memory order.
pub const TEST_PATTERN: u32 = 0x4443_4241;
