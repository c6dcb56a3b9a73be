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

use crate::pci::address::PciAddress;
use log::error;
use std::path::PathBuf;
use zbus::fdo;

#[derive(Debug, thiserror::Error)]
pub enum AtgdError {
    #[error("AtgdError::NotFound: Unable to locate PCI function {0}")]
    NotFound(PciAddress),
    #[error("AtgdError::ResourceBusy: Cannot obtain BAR {bar} ({owner}) of {address}: {reason}")]
    ResourceBusy {
        address: PciAddress,
        bar: u8,
        owner: String,
        reason: String,
    },
    #[error("AtgdError::CopyFault: Could not copy {missed} of {requested} bytes")]
    CopyFault { requested: usize, missed: usize },
    #[error("AtgdError::AllocationFailure: {0}")]
    AllocationFailure(String),
    #[error("AtgdError::Msix: {0}")]
    Msix(String),
    #[error(
        "AtgdError::Mmio: Access at offset {offset:#x} is outside or misaligned in BAR {bar} of length {len:#x}"
    )]
    Mmio { bar: u8, offset: usize, len: usize },
    #[error("AtgdError::Argument: {0}")]
    Argument(String),
    #[error("AtgdError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IORead { file: PathBuf, e: std::io::Error },
    #[error("AtgdError::IOWrite: An IO error occurred when writing to {file:?}: {e}")]
    IOWrite { file: PathBuf, e: std::io::Error },
    #[error("AtgdError::IOMap: Failed to map {file:?}: {e}")]
    IOMap { file: PathBuf, e: std::io::Error },
    #[error("AtgdError::Ioctl: {request} failed: {e}")]
    Ioctl {
        request: &'static str,
        e: std::io::Error,
    },
    #[error("AtgdError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl From<AtgdError> for fdo::Error {
    fn from(err: AtgdError) -> Self {
        error!("{err}");
        match err {
            AtgdError::Argument(..) => fdo::Error::InvalidArgs(err.to_string()),
            AtgdError::NotFound(..) => fdo::Error::InvalidArgs(err.to_string()),
            AtgdError::IORead { .. } => fdo::Error::IOError(err.to_string()),
            AtgdError::IOWrite { .. } => fdo::Error::IOError(err.to_string()),
            AtgdError::IOMap { .. } => fdo::Error::IOError(err.to_string()),
            AtgdError::Ioctl { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[gtest]
    fn not_found_maps_to_invalid_args() {
        let err: fdo::Error = AtgdError::NotFound(PciAddress::new(0, 0, 0x0f, 0)).into();
        assert_that!(
            matches!(err, fdo::Error::InvalidArgs(_)),
            eq(true),
            "NotFound should surface as InvalidArgs"
        );
    }

    #[gtest]
    fn busy_message_names_the_owner() {
        let err = AtgdError::ResourceBusy {
            address: PciAddress::new(0, 0, 0x0f, 0),
            bar: 3,
            owner: "DDR Region".into(),
            reason: "claimed by xdma".into(),
        };
        expect_that!(
            err.to_string(),
            all!(
                contains_substring("AtgdError::ResourceBusy"),
                contains_substring("BAR 3 (DDR Region)"),
                contains_substring("0000:00:0f.0")
            )
        );
        let err: fdo::Error = err.into();
        assert_that!(matches!(err, fdo::Error::Failed(_)), eq(true));
    }
}
