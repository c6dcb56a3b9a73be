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


//! Raw memory shared by the sysfs and VFIO backends: BAR mappings and pinned pages.

use crate::error::AtgdError;
use crate::pci::host::MmioRegion;
use crate::pci::mmio::check_access;
use log::trace;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub(super) fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// A BAR mapped into the daemon. The mapping outlives the descriptor it was made from.
pub struct MappedRegion {
    bar: u8,
    base: *mut libc::c_void,
    len: usize,
}

// The mapping is device memory; every access is a single volatile load or store.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of `file` starting at `offset`, shared and read-write.
    pub(super) fn map(file: &File, path: &Path, bar: u8, offset: u64, len: usize) -> Result<Self, AtgdError> {
        // SAFETY: a fresh shared mapping of an open descriptor; the kernel picks the address.
        let base = unsafe {
            match libc::mmap(
                std::ptr::null_mut::<libc::c_void>(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset as libc::off_t,
            ) {
                libc::MAP_FAILED => {
                    return Err(AtgdError::IOMap {
                        file: path.into(),
                        e: io::Error::last_os_error(),
                    });
                }
                x => x,
            }
        };
        Ok(MappedRegion { bar, base, len })
    }
}

impl MmioRegion for MappedRegion {
    fn bar(&self) -> u8 {
        self.bar
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: usize) -> Result<u32, AtgdError> {
        check_access(self.bar, offset, self.len)?;
        // SAFETY: check_access keeps the aligned access inside the mapping.
        Ok(unsafe { std::ptr::read_volatile(self.base.add(offset) as *const u32) })
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), AtgdError> {
        check_access(self.bar, offset, self.len)?;
        // SAFETY: check_access keeps the aligned access inside the mapping.
        unsafe { std::ptr::write_volatile(self.base.add(offset) as *mut u32, value) };
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        trace!("Unmapping BAR {}", self.bar);
        // SAFETY: base and len are exactly what mmap returned.
        unsafe {
            libc::munmap(self.base, self.len);
        }
    }
}

/// Zeroed anonymous pages locked into RAM. Only the first `len` bytes are exposed.
pub(super) struct PinnedPages {
    base: *mut libc::c_void,
    mapped: usize,
    len: usize,
}

unsafe impl Send for PinnedPages {}

impl PinnedPages {
    pub(super) fn pin(len: usize) -> Result<Self, AtgdError> {
        let page = page_size();
        let mapped = len.div_ceil(page).max(1) * page;
        // SAFETY: anonymous private mapping, no file involved.
        let base = unsafe {
            match libc::mmap(
                std::ptr::null_mut::<libc::c_void>(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            ) {
                libc::MAP_FAILED => {
                    return Err(AtgdError::AllocationFailure(format!(
                        "mmap of {mapped} DMA bytes failed: {}",
                        io::Error::last_os_error()
                    )));
                }
                x => x,
            }
        };
        let pages = PinnedPages { base, mapped, len };
        // SAFETY: base..base+mapped is the mapping created above.
        if unsafe { libc::mlock(pages.base, pages.mapped) } != 0 {
            return Err(AtgdError::AllocationFailure(format!(
                "mlock of {mapped} DMA bytes failed: {}",
                io::Error::last_os_error()
            )));
        }
        // touching every page makes its frame present
        // SAFETY: the pages are mapped and writable.
        unsafe { std::ptr::write_bytes(pages.base as *mut u8, 0, pages.mapped) };
        Ok(pages)
    }

    pub(super) fn vaddr(&self) -> u64 {
        self.base as u64
    }

    pub(super) fn mapped_len(&self) -> usize {
        self.mapped
    }

    pub(super) fn as_slice(&self) -> &[u8] {
        // SAFETY: len <= mapped and the mapping lives as long as self.
        unsafe { std::slice::from_raw_parts(self.base as *const u8, self.len) }
    }

    pub(super) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.base as *mut u8, self.len) }
    }
}

impl Drop for PinnedPages {
    fn drop(&mut self) {
        // SAFETY: base and mapped are exactly what mmap returned.
        unsafe {
            libc::munlock(self.base, self.mapped);
            libc::munmap(self.base, self.mapped);
        }
    }
}
