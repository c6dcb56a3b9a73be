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


//! Plain sysfs backend.
//!
//! Works on any function that is not bound to a kernel driver:
//!
//! - lookup reads `vendor` and `device` under `/sys/bus/pci/devices/<address>/`
//! - enabling writes `1` to `enable` and sets memory decoding and bus mastering in the command
//!   register through `config`
//! - regions are reserved with an exclusive `flock` on `resourceN`, and refused outright when a
//!   kernel driver is bound
//! - BARs are mapped by `mmap`ing `resourceN`
//! - DMA memory is a single locked page whose physical address is read from
//!   `/proc/self/pagemap`, which needs `CAP_SYS_ADMIN`
//!
//! There is no way to receive MSI-X from sysfs alone, so the interrupt calls fail with
//! [`AtgdError::Msix`].

use crate::config::{PAGEMAP_PATH, PCI_DEVICES_DIR};
use crate::error::AtgdError;
use crate::pci::address::PciAddress;
use crate::pci::backends::ChrdevRegistry;
use crate::pci::backends::memory::{MappedRegion, PinnedPages, page_size};
use crate::pci::host::{
    DevNo, DmaMemory, IrqHandler, MmioRegion, MsixEntry, PciDeviceInfo, PciHost,
};
use crate::system_io::{fs_open, fs_read_hex, fs_read_link, fs_write};
use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PCI_COMMAND: u64 = 0x04;
const PCI_COMMAND_MEMORY: u16 = 0x2;
const PCI_COMMAND_MASTER: u16 = 0x4;

const PAGEMAP_PRESENT: u64 = 1 << 63;
const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;

struct Claim {
    owner: String,
    // the lock is held until this is dropped
    _lock: Flock<File>,
}

pub struct SysfsHost {
    devices_dir: PathBuf,
    pagemap: PathBuf,
    chrdevs: ChrdevRegistry,
    claims: Mutex<HashMap<(PciAddress, u8), Claim>>,
}

impl Default for SysfsHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsHost {
    pub fn new() -> Self {
        Self::with_root(Path::new(PCI_DEVICES_DIR))
    }

    /// A host that looks for devices under `devices_dir` instead of `/sys/bus/pci/devices/`.
    pub fn with_root(devices_dir: &Path) -> Self {
        SysfsHost {
            devices_dir: devices_dir.to_owned(),
            pagemap: PathBuf::from(PAGEMAP_PATH),
            chrdevs: ChrdevRegistry::new(),
            claims: Mutex::new(HashMap::new()),
        }
    }

    fn device_dir(&self, address: &PciAddress) -> PathBuf {
        self.devices_dir.join(address.to_string())
    }

    fn resource_path(&self, address: &PciAddress, bar: u8) -> Result<PathBuf, AtgdError> {
        if bar > 5 {
            return Err(AtgdError::Argument(format!("BAR {bar} does not exist")));
        }
        Ok(self.device_dir(address).join(format!("resource{bar}")))
    }

    fn set_command_bits(&self, address: &PciAddress, bits: u16) -> Result<(), AtgdError> {
        let path = self.device_dir(address).join("config");
        let config = fs_open(&path, true)?;
        let mut command = [0u8; 2];
        config
            .read_exact_at(&mut command, PCI_COMMAND)
            .map_err(|e| AtgdError::IORead {
                file: path.clone(),
                e,
            })?;
        let command = u16::from_le_bytes(command) | bits;
        config
            .write_all_at(&command.to_le_bytes(), PCI_COMMAND)
            .map_err(|e| AtgdError::IOWrite { file: path, e })?;
        trace!("{address}: command register now {command:#06x}");
        Ok(())
    }

    fn claims(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(PciAddress, u8), Claim>>, AtgdError> {
        self.claims
            .lock()
            .map_err(|_| AtgdError::Internal("couldn't lock region claims".into()))
    }
}

impl PciHost for SysfsHost {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn get_device(&self, address: &PciAddress) -> Result<PciDeviceInfo, AtgdError> {
        let dir = self.device_dir(address);
        if !dir.exists() {
            return Err(AtgdError::NotFound(*address));
        }
        let vendor = fs_read_hex(&dir.join("vendor"))? as u16;
        let device = fs_read_hex(&dir.join("device"))? as u16;
        debug!("Found {address} [{vendor:04x}:{device:04x}]");
        Ok(PciDeviceInfo {
            address: *address,
            vendor,
            device,
        })
    }

    fn put_device(&self, address: &PciAddress) {
        trace!("Released reference to {address}");
    }

    fn enable_device(&self, address: &PciAddress) -> Result<(), AtgdError> {
        fs_write(&self.device_dir(address).join("enable"), false, "1")?;
        self.set_command_bits(address, PCI_COMMAND_MEMORY | PCI_COMMAND_MASTER)
    }

    fn disable_device(&self, address: &PciAddress) {
        if let Err(e) = fs_write(&self.device_dir(address).join("enable"), false, "0") {
            warn!("Failed to disable {address}: {e}");
        }
    }

    fn request_region(&self, address: &PciAddress, bar: u8, owner: &str) -> Result<(), AtgdError> {
        let busy = |reason: String| AtgdError::ResourceBusy {
            address: *address,
            bar,
            owner: owner.to_owned(),
            reason,
        };
        if let Ok(driver) = fs_read_link(&self.device_dir(address).join("driver")) {
            let driver = driver
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(busy(format!("bound to kernel driver {driver}")));
        }
        let mut claims = self.claims()?;
        if let Some(claim) = claims.get(&(*address, bar)) {
            return Err(busy(format!("already owned as {}", claim.owner)));
        }
        let path = self.resource_path(address, bar)?;
        let lock = Flock::lock(fs_open(&path, false)?, FlockArg::LockExclusiveNonblock).map_err(
            |(_, errno)| match errno {
                Errno::EWOULDBLOCK => busy("locked by another process".into()),
                _ => AtgdError::Ioctl {
                    request: "flock",
                    e: io::Error::from(errno),
                },
            },
        )?;
        trace!("Locked {path:?} as {owner}");
        claims.insert(
            (*address, bar),
            Claim {
                owner: owner.to_owned(),
                _lock: lock,
            },
        );
        Ok(())
    }

    fn release_region(&self, address: &PciAddress, bar: u8) {
        match self.claims() {
            Ok(mut claims) => {
                if claims.remove(&(*address, bar)).is_none() {
                    warn!("BAR {bar} of {address} was released without being requested");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    fn iomap(&self, address: &PciAddress, bar: u8) -> Result<Box<dyn MmioRegion>, AtgdError> {
        let path = self.resource_path(address, bar)?;
        let file = fs_open(&path, true)?;
        let len = file
            .metadata()
            .map_err(|e| AtgdError::IORead {
                file: path.clone(),
                e,
            })?
            .len() as usize;
        if len == 0 {
            return Err(AtgdError::Argument(format!(
                "BAR {bar} of {address} is not implemented"
            )));
        }
        let region = MappedRegion::map(&file, &path, bar, 0, len)?;
        debug!("Mapped BAR {bar} of {address} ({len:#x} bytes)");
        Ok(Box::new(region))
    }

    fn alloc_dma(&self, address: &PciAddress, size: usize) -> Result<Box<dyn DmaMemory>, AtgdError> {
        let page_size = page_size();
        if size == 0 || size > page_size {
            return Err(AtgdError::AllocationFailure(format!(
                "the sysfs backend pins single pages; {size} bytes were requested for {address}"
            )));
        }
        let pages = PinnedPages::pin(size)?;
        let bus_address = physical_address(&self.pagemap, pages.vaddr(), page_size)?;
        debug!("Pinned DMA page for {address} at {bus_address:#x}");
        Ok(Box::new(PagemapDma { pages, bus_address }))
    }

    fn register_chrdev_region(&self, name: &str, count: u32) -> Result<DevNo, AtgdError> {
        self.chrdevs.register(name, count)
    }

    fn unregister_chrdev_region(&self, first: DevNo, count: u32) {
        self.chrdevs.unregister(first, count)
    }

    fn enable_msix_exact(&self, address: &PciAddress, _entries: &mut [MsixEntry]) -> Result<(), AtgdError> {
        Err(AtgdError::Msix(format!(
            "the sysfs backend cannot deliver MSI-X; bind {address} to vfio-pci and use the vfio backend"
        )))
    }

    fn disable_msix(&self, address: &PciAddress) {
        trace!("disable_msix on {address}: nothing to do");
    }

    fn request_irq(&self, vector: u32, name: &str, _handler: Arc<dyn IrqHandler>) -> Result<(), AtgdError> {
        Err(AtgdError::Msix(format!(
            "{name}: the sysfs backend has no vector {vector}"
        )))
    }

    fn free_irq(&self, vector: u32) {
        trace!("free_irq({vector}): nothing to do");
    }
}

/// Translate a virtual address of this process to a physical one.
fn physical_address(pagemap: &Path, vaddr: u64, page_size: usize) -> Result<u64, AtgdError> {
    let file = fs_open(pagemap, false)?;
    let mut entry = [0u8; 8];
    file.read_exact_at(&mut entry, (vaddr / page_size as u64) * 8)
        .map_err(|e| AtgdError::IORead {
            file: pagemap.into(),
            e,
        })?;
    let entry = u64::from_le_bytes(entry);
    let pfn = entry & PAGEMAP_PFN_MASK;
    if entry & PAGEMAP_PRESENT == 0 || pfn == 0 {
        return Err(AtgdError::AllocationFailure(
            "page frame number hidden or page not present; CAP_SYS_ADMIN is needed".into(),
        ));
    }
    Ok(pfn * page_size as u64 + vaddr % page_size as u64)
}

/// A locked page addressed by its physical address.
pub struct PagemapDma {
    pages: PinnedPages,
    bus_address: u64,
}

impl DmaMemory for PagemapDma {
    fn bus_address(&self) -> u64 {
        self.bus_address
    }

    fn as_slice(&self) -> &[u8] {
        self.pages.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.pages.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TREE_ID: AtomicUsize = AtomicUsize::new(0);

    /// Lay out a fake `/sys/bus/pci/devices/0000:00:0f.0` with a 4 KiB BAR 0.
    fn fake_tree() -> (PathBuf, PciAddress) {
        let address = PciAddress::new(0, 0, 0x0f, 0);
        let root = std::env::temp_dir().join(format!(
            "atgd-sysfs-{}-{}",
            std::process::id(),
            TREE_ID.fetch_add(1, Ordering::SeqCst)
        ));
        let dir = root.join(address.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("vendor"), "0x1d0f\n").unwrap();
        std::fs::write(dir.join("device"), "0xf001\n").unwrap();
        std::fs::write(dir.join("enable"), "0\n").unwrap();
        std::fs::write(dir.join("config"), [0u8; 64]).unwrap();
        std::fs::write(dir.join("resource0"), vec![0u8; 4096]).unwrap();
        (root, address)
    }

    #[gtest]
    fn get_device_reads_ids() {
        let (root, address) = fake_tree();
        let host = SysfsHost::with_root(&root);
        let info = host.get_device(&address).unwrap();
        expect_that!(info.vendor, eq(0x1d0f));
        expect_that!(info.device, eq(0xf001));
    }

    #[gtest]
    fn get_missing_device_is_not_found() {
        let (root, _) = fake_tree();
        let host = SysfsHost::with_root(&root);
        assert_that!(
            host.get_device(&PciAddress::new(0, 0, 0x10, 0)),
            err(displays_as(contains_substring("AtgdError::NotFound")))
        );
    }

    #[gtest]
    fn enable_sets_memory_and_master_bits() {
        let (root, address) = fake_tree();
        let host = SysfsHost::with_root(&root);
        host.enable_device(&address).unwrap();
        let dir = root.join(address.to_string());
        let config = std::fs::read(dir.join("config")).unwrap();
        expect_that!(config[4], eq(0x06));
        expect_that!(std::fs::read_to_string(dir.join("enable")).unwrap(), starts_with("1"));
    }

    #[gtest]
    fn second_request_for_the_same_bar_is_busy() {
        let (root, address) = fake_tree();
        let host = SysfsHost::with_root(&root);
        host.request_region(&address, 0, "OCL Region").unwrap();
        assert_that!(
            host.request_region(&address, 0, "OCL Region"),
            err(displays_as(contains_substring("already owned as OCL Region")))
        );
        host.release_region(&address, 0);
        assert_that!(host.request_region(&address, 0, "OCL Region"), ok(anything()));
    }

    #[gtest]
    fn lock_held_by_another_host_is_busy() {
        let (root, address) = fake_tree();
        let first = SysfsHost::with_root(&root);
        let second = SysfsHost::with_root(&root);
        first.request_region(&address, 0, "OCL Region").unwrap();
        assert_that!(
            second.request_region(&address, 0, "OCL Region"),
            err(displays_as(contains_substring("locked by another process")))
        );
        first.release_region(&address, 0);
        assert_that!(second.request_region(&address, 0, "OCL Region"), ok(anything()));
    }

    #[gtest]
    fn mapped_resource_writes_reach_the_file() {
        let (root, address) = fake_tree();
        let host = SysfsHost::with_root(&root);
        let region = host.iomap(&address, 0).unwrap();
        expect_that!(region.len(), eq(4096));
        region.write32(0x28, 0x4443_4241).unwrap();
        expect_that!(region.read32(0x28), ok(eq(&0x4443_4241_u32)));
        expect_that!(
            region.read32(4096),
            err(displays_as(contains_substring("AtgdError::Mmio")))
        );
        drop(region);
        let contents = std::fs::read(root.join(address.to_string()).join("resource0")).unwrap();
        expect_that!(&contents[0x28..0x2c], eq(&b"ABCD"[..]));
    }

    #[gtest]
    fn msix_is_unsupported() {
        let (root, address) = fake_tree();
        let host = SysfsHost::with_root(&root);
        let mut entries = [MsixEntry::default()];
        assert_that!(
            host.enable_msix_exact(&address, &mut entries),
            err(displays_as(contains_substring("AtgdError::Msix")))
        );
    }

    #[gtest]
    fn oversized_dma_is_refused() {
        let (root, address) = fake_tree();
        let host = SysfsHost::with_root(&root);
        assert_that!(
            host.alloc_dma(&address, page_size() + 1).map(|_| ()),
            err(displays_as(contains_substring("pins single pages")))
        );
    }
}
