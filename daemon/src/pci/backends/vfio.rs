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


//! VFIO backend, built on `pci-driver`.
//!
//! The device has to be bound to `vfio-pci` and its IOMMU group must be viable (every member
//! bound to `vfio-pci` or unbound). [`VfioPciDevice::open`] resolves the group from sysfs, sets up
//! the container and the type 1 IOMMU, and hands back the device; dropping the last reference
//! closes all of it.
//!
//! BARs are mapped through the device's regions. DMA pages are pinned anonymous memory mapped
//! into the IOMMU at an IOVA chosen here; the IOVA is what the device is given.
//!
//! MSI-X vectors are eventfds handed to the device's MSI-X mechanism. Each bound handler gets its
//! own thread blocked in `poll` on the vector's eventfd and on a stop eventfd;
//! [`PciHost::free_irq`] signals the stop eventfd and joins the thread, so no handler is running
//! once it returns.

use crate::config::PCI_DEVICES_DIR;
use crate::error::AtgdError;
use crate::pci::address::PciAddress;
use crate::pci::backends::ChrdevRegistry;
use crate::pci::backends::memory::PinnedPages;
use crate::pci::host::{
    DevNo, DmaMemory, IrqHandler, MmioRegion, MsixEntry, PciDeviceInfo, PciHost,
};
use crate::pci::mmio::check_access;
use crate::system_io::fs_read_hex;
use log::{debug, error, trace, warn};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::eventfd::{EfdFlags, EventFd};
use pci_driver::backends::vfio::VfioPciDevice;
use pci_driver::device::PciDevice;
use pci_driver::regions::{MappedOwningPciRegion, PciRegion, Permissions};
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// First IOVA handed out. Clear of the low 4 GiB so the device has to use both address words.
const FIRST_IOVA: u64 = 0x0000_0010_0000_0000;
/// Host vector numbers start here, to look like Linux IRQ numbers in the logs.
const FIRST_VECTOR: u32 = 200;

fn vfio_error(request: &'static str) -> impl FnOnce(io::Error) -> AtgdError {
    move |e| AtgdError::Ioctl { request, e }
}

fn eventfd() -> Result<EventFd, AtgdError> {
    EventFd::from_flags(EfdFlags::EFD_CLOEXEC)
        .map_err(|e| AtgdError::Msix(format!("eventfd failed: {e}")))
}

struct VfioDevice {
    device: Arc<VfioPciDevice>,
    refs: u32,
}

struct MsixTable {
    // (host vector, eventfd) per table entry
    vectors: Vec<(u32, Arc<EventFd>)>,
}

struct IrqThread {
    stop: Arc<EventFd>,
    join: JoinHandle<()>,
}

pub struct VfioHost {
    devices_dir: PathBuf,
    chrdevs: ChrdevRegistry,
    devices: Mutex<HashMap<PciAddress, VfioDevice>>,
    claims: Mutex<HashMap<(PciAddress, u8), String>>,
    msix: Mutex<HashMap<PciAddress, MsixTable>>,
    irqs: Mutex<HashMap<u32, IrqThread>>,
    next_iova: Mutex<u64>,
    next_vector: Mutex<u32>,
}

impl Default for VfioHost {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, AtgdError> {
    mutex
        .lock()
        .map_err(|_| AtgdError::Internal(format!("couldn't lock {what}")))
}

impl VfioHost {
    pub fn new() -> Self {
        Self::with_devices_dir(Path::new(PCI_DEVICES_DIR))
    }

    pub fn with_devices_dir(devices_dir: &Path) -> Self {
        VfioHost {
            devices_dir: devices_dir.to_owned(),
            chrdevs: ChrdevRegistry::new(),
            devices: Mutex::new(HashMap::new()),
            claims: Mutex::new(HashMap::new()),
            msix: Mutex::new(HashMap::new()),
            irqs: Mutex::new(HashMap::new()),
            next_iova: Mutex::new(FIRST_IOVA),
            next_vector: Mutex::new(FIRST_VECTOR),
        }
    }

    fn device(&self, address: &PciAddress) -> Result<Arc<VfioPciDevice>, AtgdError> {
        locked(&self.devices, "VFIO devices")?
            .get(address)
            .map(|d| d.device.clone())
            .ok_or(AtgdError::NotFound(*address))
    }

    fn set_bus_master(&self, address: &PciAddress, enable: bool) -> Result<(), AtgdError> {
        let device = self.device(address)?;
        let config = device.config();
        if enable {
            config
                .command()
                .memory_space_enable()
                .write(true)
                .map_err(vfio_error("config write"))?;
        }
        config
            .command()
            .bus_master_enable()
            .write(enable)
            .map_err(vfio_error("config write"))?;
        trace!("{address}: bus mastering {}", if enable { "on" } else { "off" });
        Ok(())
    }
}

/// A BAR mapped through the device's region.
struct VfioRegion {
    bar: u8,
    path: PathBuf,
    region: MappedOwningPciRegion,
}

impl MmioRegion for VfioRegion {
    fn bar(&self) -> u8 {
        self.bar
    }

    fn len(&self) -> usize {
        self.region.len() as usize
    }

    fn read32(&self, offset: usize) -> Result<u32, AtgdError> {
        check_access(self.bar, offset, self.len())?;
        self.region
            .read_le_u32(offset as u64)
            .map_err(|e| AtgdError::IORead {
                file: self.path.clone(),
                e,
            })
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), AtgdError> {
        check_access(self.bar, offset, self.len())?;
        self.region
            .write_le_u32(offset as u64, value)
            .map_err(|e| AtgdError::IOWrite {
                file: self.path.clone(),
                e,
            })
    }
}

/// Pages mapped into the IOMMU the device sits behind.
pub struct VfioDma {
    iova: u64,
    device: Arc<VfioPciDevice>,
    pages: PinnedPages,
}

impl DmaMemory for VfioDma {
    fn bus_address(&self) -> u64 {
        self.iova
    }

    fn as_slice(&self) -> &[u8] {
        self.pages.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.pages.as_mut_slice()
    }
}

impl Drop for VfioDma {
    fn drop(&mut self) {
        // SAFETY: the IOVA range is the one alloc_dma mapped, and the pages are still alive.
        let unmapped = unsafe { self.device.iommu().unmap(self.iova, self.pages.mapped_len()) };
        if let Err(e) = unmapped {
            error!("Failed to unmap IOVA {:#x}: {e}", self.iova);
        }
    }
}

fn irq_loop(vector: u32, event: Arc<EventFd>, stop: Arc<EventFd>, handler: Arc<dyn IrqHandler>) {
    loop {
        let mut fds = [
            PollFd::new(event.as_fd(), PollFlags::POLLIN),
            PollFd::new(stop.as_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                error!("poll on vector {vector} failed: {e}");
                return;
            }
        }
        if fds[1].revents().is_some_and(|r| !r.is_empty()) {
            trace!("vector {vector}: stopping");
            return;
        }
        if fds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN))
            && event.read().is_ok()
        {
            handler.handle(vector);
        }
    }
}

impl PciHost for VfioHost {
    fn name(&self) -> &str {
        "vfio"
    }

    fn get_device(&self, address: &PciAddress) -> Result<PciDeviceInfo, AtgdError> {
        let dir = self.devices_dir.join(address.to_string());
        if !dir.exists() {
            return Err(AtgdError::NotFound(*address));
        }
        // identify before taking a reference, so a failed lookup leaves nothing open
        let info = PciDeviceInfo {
            address: *address,
            vendor: fs_read_hex(&dir.join("vendor"))? as u16,
            device: fs_read_hex(&dir.join("device"))? as u16,
        };
        let mut devices = locked(&self.devices, "VFIO devices")?;
        match devices.get_mut(address) {
            Some(device) => device.refs += 1,
            None => {
                let device = VfioPciDevice::open(&dir).map_err(vfio_error("VFIO open"))?;
                debug!("Opened {address} through VFIO");
                devices.insert(
                    *address,
                    VfioDevice {
                        device: Arc::new(device),
                        refs: 1,
                    },
                );
            }
        }
        Ok(info)
    }

    fn put_device(&self, address: &PciAddress) {
        let Ok(mut devices) = locked(&self.devices, "VFIO devices") else {
            return;
        };
        match devices.get_mut(address) {
            Some(device) if device.refs > 1 => device.refs -= 1,
            Some(_) => {
                devices.remove(address);
                debug!("Closed {address}");
            }
            None => warn!("put_device on {address} without a reference"),
        }
    }

    fn enable_device(&self, address: &PciAddress) -> Result<(), AtgdError> {
        self.set_bus_master(address, true)
    }

    fn disable_device(&self, address: &PciAddress) {
        if let Err(e) = self.set_bus_master(address, false) {
            warn!("Failed to disable {address}: {e}");
        }
    }

    fn request_region(&self, address: &PciAddress, bar: u8, owner: &str) -> Result<(), AtgdError> {
        if bar > 5 {
            return Err(AtgdError::Argument(format!("BAR {bar} does not exist")));
        }
        let mut claims = locked(&self.claims, "region claims")?;
        if let Some(holder) = claims.get(&(*address, bar)) {
            return Err(AtgdError::ResourceBusy {
                address: *address,
                bar,
                owner: owner.to_owned(),
                reason: format!("already owned as {holder}"),
            });
        }
        claims.insert((*address, bar), owner.to_owned());
        Ok(())
    }

    fn release_region(&self, address: &PciAddress, bar: u8) {
        if let Ok(mut claims) = locked(&self.claims, "region claims")
            && claims.remove(&(*address, bar)).is_none()
        {
            warn!("BAR {bar} of {address} was released without being requested");
        }
    }

    fn iomap(&self, address: &PciAddress, bar: u8) -> Result<Box<dyn MmioRegion>, AtgdError> {
        let device = self.device(address)?;
        let path = PathBuf::from(format!("vfio:{address}/region{bar}"));
        let region = device
            .bar(bar as usize)
            .filter(|region| region.len() > 0 && region.is_mappable())
            .ok_or_else(|| {
                AtgdError::Argument(format!(
                    "BAR {bar} of {address} is not implemented or cannot be mapped"
                ))
            })?;
        let region = region
            .map(.., Permissions::ReadWrite)
            .map_err(|e| AtgdError::IOMap {
                file: path.clone(),
                e,
            })?;
        debug!("Mapped BAR {bar} of {address} ({:#x} bytes)", region.len());
        Ok(Box::new(VfioRegion { bar, path, region }))
    }

    fn alloc_dma(&self, address: &PciAddress, size: usize) -> Result<Box<dyn DmaMemory>, AtgdError> {
        let device = self.device(address)?;
        let pages = PinnedPages::pin(size)?;
        let mut next_iova = locked(&self.next_iova, "IOVA allocator")?;
        let iova = *next_iova;
        // SAFETY: the pages stay mapped and locked until VfioDma unmaps the IOVA in its Drop.
        unsafe {
            device.iommu().map(
                iova,
                pages.mapped_len(),
                pages.as_slice().as_ptr(),
                Permissions::ReadWrite,
            )
        }
        .map_err(|e| AtgdError::AllocationFailure(format!("IOMMU map at {iova:#x} failed: {e}")))?;
        *next_iova += pages.mapped_len() as u64;
        debug!("Mapped {size} DMA bytes for {address} at IOVA {iova:#x}");
        Ok(Box::new(VfioDma {
            iova,
            device,
            pages,
        }))
    }

    fn register_chrdev_region(&self, name: &str, count: u32) -> Result<DevNo, AtgdError> {
        self.chrdevs.register(name, count)
    }

    fn unregister_chrdev_region(&self, first: DevNo, count: u32) {
        self.chrdevs.unregister(first, count)
    }

    fn enable_msix_exact(&self, address: &PciAddress, entries: &mut [MsixEntry]) -> Result<(), AtgdError> {
        let device = self.device(address)?;
        let mut msix = locked(&self.msix, "MSI-X tables")?;
        if msix.contains_key(address) {
            return Err(AtgdError::Msix(format!("MSI-X is already enabled on {address}")));
        }

        let interrupts = device.interrupts();
        let table_size = interrupts.msi_x().max();
        if table_size < entries.len() {
            return Err(AtgdError::Msix(format!(
                "{address} can provide {table_size} MSI-X vectors, {} were requested",
                entries.len()
            )));
        }
        let span = entries.iter().map(|e| e.entry as usize + 1).max().unwrap_or(0);
        if span > table_size {
            return Err(AtgdError::Msix(format!(
                "MSI-X entries up to {span} do not fit the {table_size}-entry table of {address}"
            )));
        }

        let mut slots: Vec<RawFd> = vec![-1; span];
        let mut vectors = Vec::with_capacity(entries.len());
        let mut next_vector = locked(&self.next_vector, "vector allocator")?;
        for entry in entries.iter_mut() {
            let event = Arc::new(eventfd()?);
            slots[entry.entry as usize] = event.as_raw_fd();
            entry.vector = *next_vector;
            *next_vector += 1;
            vectors.push((entry.vector, event));
        }
        interrupts
            .msi_x()
            .enable(&slots)
            .map_err(vfio_error("MSI-X enable"))?;
        debug!("Enabled {} MSI-X vectors on {address}", entries.len());
        msix.insert(*address, MsixTable { vectors });
        Ok(())
    }

    fn disable_msix(&self, address: &PciAddress) {
        let table = locked(&self.msix, "MSI-X tables").ok().and_then(|mut m| m.remove(address));
        if table.is_none() {
            warn!("disable_msix on {address} without MSI-X enabled");
            return;
        }
        match self.device(address) {
            Ok(device) => {
                if let Err(e) = device.interrupts().msi_x().disable() {
                    error!("Failed to disable MSI-X on {address}: {e}");
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    fn request_irq(&self, vector: u32, name: &str, handler: Arc<dyn IrqHandler>) -> Result<(), AtgdError> {
        let event = locked(&self.msix, "MSI-X tables")?
            .values()
            .flat_map(|table| table.vectors.iter())
            .find(|(v, _)| *v == vector)
            .map(|(_, event)| event.clone())
            .ok_or_else(|| AtgdError::Msix(format!("{name}: vector {vector} was never allocated")))?;
        let mut irqs = locked(&self.irqs, "IRQ threads")?;
        if irqs.contains_key(&vector) {
            return Err(AtgdError::Msix(format!(
                "{name}: vector {vector} already has a handler"
            )));
        }
        let stop = Arc::new(eventfd()?);
        let thread_stop = stop.clone();
        let join = std::thread::Builder::new()
            .name(format!("{name}-{vector}"))
            .spawn(move || irq_loop(vector, event, thread_stop, handler))
            .map_err(|e| AtgdError::Msix(format!("{name}: couldn't start vector {vector}: {e}")))?;
        irqs.insert(vector, IrqThread { stop, join });
        trace!("{name}: bound vector {vector}");
        Ok(())
    }

    fn free_irq(&self, vector: u32) {
        let thread = locked(&self.irqs, "IRQ threads")
            .ok()
            .and_then(|mut irqs| irqs.remove(&vector));
        match thread {
            Some(thread) => {
                if let Err(e) = thread.stop.arm() {
                    error!("couldn't stop vector {vector}: {e}");
                    return;
                }
                if thread.join.join().is_err() {
                    error!("handler thread of vector {vector} panicked");
                }
            }
            None => warn!("free_irq on unbound vector {vector}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::host::IrqReturn;
    use googletest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn scratch_dir(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("atgd-vfio-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    struct Counting {
        calls: AtomicU32,
        seen: Mutex<mpsc::Sender<u32>>,
    }

    impl IrqHandler for Counting {
        fn handle(&self, vector: u32) -> IrqReturn {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.seen.lock().unwrap().send(vector);
            IrqReturn::Handled
        }
    }

    #[gtest]
    fn missing_device_is_not_found() {
        let host = VfioHost::with_devices_dir(&scratch_dir("missing"));
        assert_that!(
            host.get_device(&PciAddress::new(0, 0, 0x0f, 0)),
            err(displays_as(contains_substring("AtgdError::NotFound")))
        );
    }

    #[gtest]
    fn unreadable_identity_leaves_no_device_open() {
        let root = scratch_dir("identity");
        let address = PciAddress::new(0, 0, 0x0f, 0);
        std::fs::create_dir_all(root.join(address.to_string())).unwrap();
        let host = VfioHost::with_devices_dir(&root);

        assert_that!(
            host.get_device(&address),
            err(displays_as(contains_substring("AtgdError::IORead")))
        );
        assert_that!(host.devices.lock().unwrap().len(), eq(0));
        assert_that!(
            host.device(&address).err(),
            some(displays_as(contains_substring("AtgdError::NotFound")))
        );
    }

    #[gtest]
    fn unknown_device_has_no_regions_or_vectors() {
        let host = VfioHost::with_devices_dir(&scratch_dir("unknown"));
        let address = PciAddress::new(0, 0, 0x0f, 0);
        expect_that!(
            host.iomap(&address, 0).err(),
            some(displays_as(contains_substring("AtgdError::NotFound")))
        );
        expect_that!(
            host.alloc_dma(&address, 4096).err(),
            some(displays_as(contains_substring("AtgdError::NotFound")))
        );
        expect_that!(
            host.request_irq(200, "f1_isr", Arc::new(Counting {
                calls: AtomicU32::new(0),
                seen: Mutex::new(mpsc::channel().0),
            })),
            err(displays_as(contains_substring("never allocated")))
        );
    }

    #[gtest]
    fn handler_thread_runs_on_the_vector_eventfd_and_stops_on_request() {
        let (tx, rx) = mpsc::channel();
        let handler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            seen: Mutex::new(tx),
        });
        let event = Arc::new(eventfd().unwrap());
        let stop = Arc::new(eventfd().unwrap());
        let join = {
            let (event, stop, handler) = (event.clone(), stop.clone(), handler.clone());
            std::thread::spawn(move || irq_loop(7, event, stop, handler))
        };

        event.arm().unwrap();
        assert_that!(rx.recv_timeout(Duration::from_secs(5)), ok(eq(7)));

        stop.arm().unwrap();
        assert_that!(join.join().is_ok(), eq(true));
        assert_that!(handler.calls.load(Ordering::SeqCst), eq(1));
    }
}
