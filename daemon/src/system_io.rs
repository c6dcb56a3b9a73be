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


//! Error Wrapping File System I/O Helpers
//!
//! Thin wrappers around the standard file operations the backends need, with trace logging and
//! automatic conversion to [`AtgdError`]. Every error carries the path it happened on.
//!
//! Includes: read, write, symlink and raw open operations.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use atgd::system_io::{fs_read, fs_write};
//! # use std::path::Path;
//!
//! # fn example() -> Result<(), atgd::error::AtgdError> {
//! let vendor = fs_read(Path::new("/sys/bus/pci/devices/0000:00:0f.0/vendor"))?;
//! fs_write(Path::new("/sys/bus/pci/devices/0000:00:0f.0/enable"), false, "1")?;
//! # Ok(())
//! # }
//! ```

use crate::error::AtgdError;
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Read the contents of a file to a String.
///
/// # Arguments
///
/// * `file_path` - Path to the file to read
///
/// # Returns: `Result<String, AtgdError>`
/// * `Ok(String)` - The complete contents of the file
/// * `Err(AtgdError::IORead)` - If the file cannot be read (doesn't exist, permissions, etc.)
pub fn fs_read(file_path: &Path) -> Result<String, AtgdError> {
    trace!("Attempting to read from {file_path:?}");
    let mut buf: String = String::new();
    let result = OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|mut f| f.read_to_string(&mut buf));

    match result {
        Ok(_) => {
            trace!("Reading done");
            Ok(buf)
        }
        Err(e) => Err(AtgdError::IORead {
            file: file_path.into(),
            e,
        }),
    }
}

/// Read a sysfs attribute holding a single `0x`-prefixed hexadecimal number, such as
/// `vendor` or `device`.
///
/// # Returns: `Result<u32, AtgdError>`
/// * `Ok(u32)` - The parsed value
/// * `Err(AtgdError::IORead)` - If the file cannot be read
/// * `Err(AtgdError::Argument)` - If the contents are not a hexadecimal number
pub fn fs_read_hex(file_path: &Path) -> Result<u32, AtgdError> {
    let contents = fs_read(file_path)?;
    let trimmed = contents.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|_| {
        AtgdError::Argument(format!(
            "{file_path:?} contains '{trimmed}', which is not a hexadecimal number"
        ))
    })
}

/// Write a string value to a file.
///
/// # Arguments
///
/// * `file_path` - Path to the file to write
/// * `create` - If `true`, create the file if it doesn't exist; if `false`, file must already exist
/// * `value` - The string value to write (implements `AsRef<str>`)
///
/// # Returns: `Result<(), AtgdError>`
/// * `Ok(())` - Write succeeded
/// * `Err(AtgdError::IOWrite)` - If the write fails (permissions, file doesn't exist when create=false, etc.)
pub fn fs_write(file_path: &Path, create: bool, value: impl AsRef<str>) -> Result<(), AtgdError> {
    trace!(
        "Attempting to write {:?} to {:?}",
        value.as_ref(),
        file_path
    );
    let result = OpenOptions::new()
        .create(create)
        .read(false)
        .write(true)
        .open(file_path)
        .and_then(|mut f| write!(f, "{}", value.as_ref()));
    match result {
        Ok(_) => {
            trace!("Write done.");
            Ok(())
        }
        Err(e) => Err(AtgdError::IOWrite {
            file: file_path.into(),
            e,
        }),
    }
}

/// Resolve a symbolic link, e.g. a device's `iommu_group`.
///
/// # Returns: `Result<PathBuf, AtgdError>`
/// * `Ok(PathBuf)` - The link target, as stored in the link
/// * `Err(AtgdError::IORead)` - If the path is not a link or cannot be read
pub fn fs_read_link(link: &Path) -> Result<PathBuf, AtgdError> {
    trace!("Attempting to resolve link {link:?}");
    std::fs::read_link(link).map_err(|e| AtgdError::IORead {
        file: link.into(),
        e,
    })
}

/// Open a file for raw access, read-only or read-write, without truncating it.
///
/// Used for files that are mapped or `ioctl`ed rather than read as text: BAR resources,
/// `/proc/self/pagemap` and the VFIO character devices.
///
/// # Returns: `Result<File, AtgdError>`
/// * `Ok(File)` - The open file
/// * `Err(AtgdError::IORead)` - Opening read-only failed
/// * `Err(AtgdError::IOWrite)` - Opening read-write failed
pub fn fs_open(file_path: &Path, writable: bool) -> Result<File, AtgdError> {
    trace!("Attempting to open {file_path:?} (writable: {writable})");
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(file_path)
        .map_err(|e| {
            if writable {
                AtgdError::IOWrite {
                    file: file_path.into(),
                    e,
                }
            } else {
                AtgdError::IORead {
                    file: file_path.into(),
                    e,
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("atgd-system-io-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[gtest]
    #[rstest]
    #[case::sysfs_style("vendor_a", "0x1d0f\n", 0x1d0f)]
    #[case::bare_digits("vendor_b", "f001", 0xf001)]
    fn read_hex_parses_attributes(#[case] name: &str, #[case] contents: &str, #[case] expected: u32) {
        let path = scratch_file(name, contents);
        assert_that!(fs_read_hex(&path), ok(eq(&expected)));
    }

    #[gtest]
    fn read_hex_rejects_garbage() {
        let path = scratch_file("vendor_c", "not a number\n");
        assert_that!(
            fs_read_hex(&path),
            err(displays_as(contains_substring("AtgdError::Argument")))
        );
    }

    #[gtest]
    fn read_missing_file_names_the_path() {
        let result = fs_read(Path::new("/nonexistent/atgd/enable"));
        assert_that!(
            result,
            err(displays_as(all!(
                contains_substring("AtgdError::IORead"),
                contains_substring("/nonexistent/atgd/enable")
            )))
        );
    }

    #[gtest]
    fn write_without_create_needs_existing_file() {
        let result = fs_write(Path::new("/nonexistent/atgd/enable"), false, "1");
        assert_that!(
            result,
            err(displays_as(contains_substring("AtgdError::IOWrite")))
        );
    }
}
