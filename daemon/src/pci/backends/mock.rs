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

//! In-memory PCI host.
//!
//! [`MockHost`] behaves like a small PCI bus: devices are declared up front, BARs are backed by
//! register files that survive remapping, DMA pages get made-up bus addresses and MSI-X vectors
//! are plain numbers whose handlers can be invoked with [`MockHost::raise_irq`].
//!
//! Every acquire and release is appended to a ledger ([`MockHost::events`]) and the live
//! resources can be listed with [`MockHost::outstanding`], which is what the teardown and
//! unwind tests assert on. Failures are injected through [`MockFaults`] or by marking a region
//! as owned by someone else with [`MockHost::reserve_foreign`].
//!
//! A register can be turned into an interrupt doorbell with [`MockHost::set_doorbell`]: writing
//! bit `i` raises MSI-X entry `i` and, if the handler claims it, sets acknowledge bit `i + 16`;
//! writing a one to an acknowledge bit clears it.

use crate::error::AtgdError;
use crate::pci::address::PciAddress;
use crate::pci::backends::ChrdevRegistry;
use crate::pci::host::{
    DevNo, DmaMemory, IrqHandler, IrqReturn, MmioRegion, MsixEntry, PciDeviceInfo, PciHost,
};
use crate::pci::mmio::check_access;
use log::{trace, warn};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Amazon's PCI vendor ID.
pub const MOCK_VENDOR_ID: u16 = 0x1d0f;
/// Device ID of the F1 shell's application PF.
pub const MOCK_DEVICE_ID: u16 = 0xf000;

const DEFAULT_BAR_SIZE: usize = 0x1_0000;
const DEFAULT_MSIX_TABLE_SIZE: usize = 32;
const FIRST_VECTOR: u32 = 40;
const FIRST_BUS_ADDRESS: u64 = 0x0000_0004_0010_0000;
const PAGE_SIZE: u64 = 4096;

/// One entry of the mock host's resource ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    GetDevice,
    PutDevice,
    EnableDevice,
    DisableDevice,
    RequestRegion { bar: u8, owner: String },
    ReleaseRegion { bar: u8 },
    Iomap { bar: u8 },
    Iounmap { bar: u8 },
    AllocDma { bus_address: u64 },
    FreeDma { bus_address: u64 },
    RegisterChrdev(DevNo),
    UnregisterChrdev(DevNo),
    EnableMsix { vectors: usize },
    DisableMsix,
    RequestIrq { vector: u32 },
    FreeIrq { vector: u32 },
}

/// Failures to inject into the next matching host call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockFaults {
    pub enable: bool,
    /// BAR whose mapping fails.
    pub iomap: Option<u8>,
    pub dma: bool,
    pub chrdev: bool,
    /// Grant this many MSI-X vectors regardless of how many are requested.
    pub msix_grant: Option<usize>,
    /// `request_irq` fails once this many handlers have been bound.
    pub irq_after: Option<usize>,
}

/// Backing store of one BAR. Shared by every mapping of that BAR.
#[derive(Debug)]
struct RegisterFile {
    words: Mutex<Vec<u32>>,
    writes: Arc<Mutex<Vec<(usize, u32)>>>,
}

impl RegisterFile {
    fn new(len: usize) -> Self {
        RegisterFile {
            words: Mutex::new(vec![0; len / 4]),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn load(&self, offset: usize) -> u32 {
        lock(&self.words).get(offset / 4).copied().unwrap_or(0)
    }

    fn store(&self, offset: usize, value: u32) {
        if let Some(word) = lock(&self.words).get_mut(offset / 4) {
            *word = value;
        }
    }

    fn log_write(&self, offset: usize, value: u32) {
        lock(&self.writes).push((offset, value));
    }
}

#[derive(Debug, Clone)]
struct MockDevice {
    info: PciDeviceInfo,
    bar_sizes: [usize; 6],
    msix_table_size: usize,
}

#[derive(Default)]
struct MockState {
    devices: HashMap<PciAddress, MockDevice>,
    refs: HashMap<PciAddress, u32>,
    enabled: HashSet<PciAddress>,
    claims: HashMap<(PciAddress, u8), String>,
    foreign_claims: HashMap<(PciAddress, u8), String>,
    register_files: HashMap<(PciAddress, u8), Arc<RegisterFile>>,
    doorbells: HashMap<(PciAddress, u8), usize>,
    live_mappings: HashMap<u8, usize>,
    live_dma: HashSet<u64>,
    chrdevs: ChrdevRegistry,
    msix: HashMap<PciAddress, Vec<u32>>,
    irqs: HashMap<u32, Arc<dyn IrqHandler>>,
    irq_requests: usize,
    faults: MockFaults,
    next_vector: u32,
    next_bus_address: u64,
    events: Vec<HostEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockState {
    fn device(&self, address: &PciAddress) -> Result<&MockDevice, AtgdError> {
        self.devices
            .get(address)
            .ok_or(AtgdError::NotFound(*address))
    }

    fn register_file(&mut self, address: &PciAddress, bar: u8) -> Result<Arc<RegisterFile>, AtgdError> {
        let size = self.bar_size(address, bar)?;
        Ok(self
            .register_files
            .entry((*address, bar))
            .or_insert_with(|| Arc::new(RegisterFile::new(size)))
            .clone())
    }

    fn bar_size(&self, address: &PciAddress, bar: u8) -> Result<usize, AtgdError> {
        let size = self
            .device(address)?
            .bar_sizes
            .get(bar as usize)
            .copied()
            .unwrap_or(0);
        if size == 0 {
            return Err(AtgdError::Argument(format!(
                "{address} does not implement BAR {bar}"
            )));
        }
        Ok(size)
    }

    fn handler_for_entry(&self, address: &PciAddress, entry: usize) -> Option<(u32, Arc<dyn IrqHandler>)> {
        let vector = *self.msix.get(address)?.get(entry)?;
        let handler = self.irqs.get(&vector)?.clone();
        Some((vector, handler))
    }
}

/// Call the handler bound to `vector` without holding the host lock, so handlers are free to
/// touch mapped registers.
fn raise_vector(state: &Mutex<MockState>, vector: u32) -> Option<IrqReturn> {
    let handler = lock(state).irqs.get(&vector).cloned()?;
    Some(handler.handle(vector))
}

/// A BAR mapping handed out by [`MockHost`], or a free-standing register file for unit tests.
pub struct MockRegion {
    bar: u8,
    len: usize,
    file: Arc<RegisterFile>,
    owner: Option<(Weak<Mutex<MockState>>, PciAddress)>,
}

impl MockRegion {
    /// A free-standing region that no host knows about.
    pub fn new(bar: u8, len: usize) -> Self {
        MockRegion {
            bar,
            len,
            file: Arc::new(RegisterFile::new(len)),
            owner: None,
        }
    }

    /// Every `(offset, value)` written through this region, in order.
    pub fn write_log(&self) -> Arc<Mutex<Vec<(usize, u32)>>> {
        self.file.writes.clone()
    }

    fn ring_doorbell(&self, state: &Arc<Mutex<MockState>>, address: &PciAddress, offset: usize, value: u32) {
        let acked = self.file.load(offset) & !(value & 0xffff_0000);
        self.file.store(offset, acked);
        for entry in (0..16).filter(|i| value & (1 << i) != 0) {
            let target = lock(state).handler_for_entry(address, entry);
            match target {
                Some((vector, handler)) => {
                    if handler.handle(vector) == IrqReturn::Handled {
                        let current = self.file.load(offset);
                        self.file.store(offset, current | (1 << (entry + 16)));
                    }
                }
                None => trace!("doorbell: MSI-X entry {entry} of {address} has no handler"),
            }
        }
    }
}

impl MmioRegion for MockRegion {
    fn bar(&self) -> u8 {
        self.bar
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: usize) -> Result<u32, AtgdError> {
        check_access(self.bar, offset, self.len)?;
        Ok(self.file.load(offset))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), AtgdError> {
        check_access(self.bar, offset, self.len)?;
        self.file.log_write(offset, value);
        if let Some((state, address)) = &self.owner
            && let Some(state) = state.upgrade()
        {
            let doorbell = lock(&state).doorbells.get(&(*address, self.bar)).copied();
            if doorbell == Some(offset) {
                self.ring_doorbell(&state, address, offset, value);
                return Ok(());
            }
        }
        self.file.store(offset, value);
        Ok(())
    }
}

impl Drop for MockRegion {
    fn drop(&mut self) {
        if let Some((state, _)) = &self.owner
            && let Some(state) = state.upgrade()
        {
            let mut state = lock(&state);
            if let Some(live) = state.live_mappings.get_mut(&self.bar) {
                *live = live.saturating_sub(1);
            }
            state.events.push(HostEvent::Iounmap { bar: self.bar });
        }
    }
}

/// DMA page handed out by [`MockHost`].
pub struct MockDma {
    bus_address: u64,
    data: Vec<u8>,
    owner: Weak<Mutex<MockState>>,
}

impl DmaMemory for MockDma {
    fn bus_address(&self) -> u64 {
        self.bus_address
    }

    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for MockDma {
    fn drop(&mut self) {
        if let Some(state) = self.owner.upgrade() {
            let mut state = lock(&state);
            state.live_dma.remove(&self.bus_address);
            state.events.push(HostEvent::FreeDma {
                bus_address: self.bus_address,
            });
        }
    }
}

/// In-memory PCI host. Clones share the same bus.
#[derive(Clone)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    /// An empty bus.
    pub fn new() -> Self {
        MockHost {
            state: Arc::new(Mutex::new(MockState {
                next_vector: FIRST_VECTOR,
                next_bus_address: FIRST_BUS_ADDRESS,
                ..Default::default()
            })),
        }
    }

    /// A bus with one F1 application function at `0000:00:0f.0` whose BAR 0 register `0xd00`
    /// is wired up as the user interrupt doorbell.
    pub fn f1() -> Self {
        let address = crate::config::DriverParams::default().address();
        let host = Self::new().with_device(address, MOCK_VENDOR_ID, MOCK_DEVICE_ID);
        host.set_doorbell(address, 0, 0xd00);
        host
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Add a function with six 64 KiB BARs and a 32-entry MSI-X table.
    pub fn with_device(self, address: PciAddress, vendor: u16, device: u16) -> Self {
        self.state().devices.insert(
            address,
            MockDevice {
                info: PciDeviceInfo {
                    address,
                    vendor,
                    device,
                },
                bar_sizes: [DEFAULT_BAR_SIZE; 6],
                msix_table_size: DEFAULT_MSIX_TABLE_SIZE,
            },
        );
        self
    }

    pub fn with_bar_size(self, address: PciAddress, bar: u8, size: usize) -> Self {
        if let Some(device) = self.state().devices.get_mut(&address)
            && let Some(slot) = device.bar_sizes.get_mut(bar as usize)
        {
            *slot = size;
        }
        self
    }

    pub fn with_msix_table_size(self, address: PciAddress, size: usize) -> Self {
        if let Some(device) = self.state().devices.get_mut(&address) {
            device.msix_table_size = size;
        }
        self
    }

    /// Mark a region as owned by another driver.
    pub fn reserve_foreign(&self, address: PciAddress, bar: u8, owner: &str) {
        self.state()
            .foreign_claims
            .insert((address, bar), owner.to_owned());
    }

    pub fn set_faults(&self, faults: MockFaults) {
        self.state().faults = faults;
    }

    pub fn set_doorbell(&self, address: PciAddress, bar: u8, offset: usize) {
        self.state().doorbells.insert((address, bar), offset);
    }

    /// Preload a register without recording a write.
    pub fn set_register(&self, address: PciAddress, bar: u8, offset: usize, value: u32) {
        if let Ok(file) = self.state().register_file(&address, bar) {
            file.store(offset, value);
        }
    }

    pub fn register(&self, address: PciAddress, bar: u8, offset: usize) -> u32 {
        self.state()
            .register_file(&address, bar)
            .map(|file| file.load(offset))
            .unwrap_or(0)
    }

    /// Every `(offset, value)` written to a BAR of `address`, across all of its mappings.
    pub fn writes(&self, address: PciAddress, bar: u8) -> Vec<(usize, u32)> {
        self.state()
            .register_file(&address, bar)
            .map(|file| lock(&file.writes).clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Vectors granted to `address` by the last `enable_msix_exact`, in entry order.
    pub fn vectors(&self, address: PciAddress) -> Vec<u32> {
        self.state().msix.get(&address).cloned().unwrap_or_default()
    }

    pub fn bound_irqs(&self) -> usize {
        self.state().irqs.len()
    }

    /// Deliver an interrupt on `vector`. Returns `None` if no handler is bound.
    pub fn raise_irq(&self, vector: u32) -> Option<IrqReturn> {
        raise_vector(&self.state, vector)
    }

    /// Human readable list of everything acquired and not yet released.
    pub fn outstanding(&self) -> Vec<String> {
        let state = self.state();
        let mut left = Vec::new();
        for (address, refs) in state.refs.iter().filter(|(_, refs)| **refs > 0) {
            left.push(format!("{refs} reference(s) to {address}"));
        }
        for address in state.enabled.iter() {
            left.push(format!("{address} still enabled"));
        }
        for ((address, bar), owner) in state.claims.iter() {
            left.push(format!("BAR {bar} of {address} still owned as {owner}"));
        }
        for (bar, live) in state.live_mappings.iter().filter(|(_, live)| **live > 0) {
            left.push(format!("{live} mapping(s) of BAR {bar}"));
        }
        for bus_address in state.live_dma.iter() {
            left.push(format!("DMA page at {bus_address:#x}"));
        }
        if !state.chrdevs.is_empty() {
            left.push(format!("{} device number range(s)", state.chrdevs.len()));
        }
        for address in state.msix.keys() {
            left.push(format!("MSI-X still enabled on {address}"));
        }
        for vector in state.irqs.keys() {
            left.push(format!("handler bound to vector {vector}"));
        }
        left.sort();
        left
    }
}

impl PciHost for MockHost {
    fn name(&self) -> &str {
        "mock"
    }

    fn get_device(&self, address: &PciAddress) -> Result<PciDeviceInfo, AtgdError> {
        let mut state = self.state();
        let info = state.device(address)?.info;
        *state.refs.entry(*address).or_default() += 1;
        state.events.push(HostEvent::GetDevice);
        Ok(info)
    }

    fn put_device(&self, address: &PciAddress) {
        let mut state = self.state();
        match state.refs.get_mut(address) {
            Some(refs) if *refs > 0 => *refs -= 1,
            _ => warn!("put_device on {address} without a reference"),
        }
        state.events.push(HostEvent::PutDevice);
    }

    fn enable_device(&self, address: &PciAddress) -> Result<(), AtgdError> {
        let mut state = self.state();
        state.device(address)?;
        if state.faults.enable {
            return Err(AtgdError::IOWrite {
                file: PathBuf::from(format!("mock:{address}/enable")),
                e: std::io::Error::other("injected enable failure"),
            });
        }
        state.enabled.insert(*address);
        state.events.push(HostEvent::EnableDevice);
        Ok(())
    }

    fn disable_device(&self, address: &PciAddress) {
        let mut state = self.state();
        state.enabled.remove(address);
        state.events.push(HostEvent::DisableDevice);
    }

    fn request_region(&self, address: &PciAddress, bar: u8, owner: &str) -> Result<(), AtgdError> {
        let mut state = self.state();
        state.bar_size(address, bar)?;
        let holder = state
            .foreign_claims
            .get(&(*address, bar))
            .or_else(|| state.claims.get(&(*address, bar)))
            .cloned();
        if let Some(holder) = holder {
            return Err(AtgdError::ResourceBusy {
                address: *address,
                bar,
                owner: owner.to_owned(),
                reason: format!("already owned as {holder}"),
            });
        }
        state.claims.insert((*address, bar), owner.to_owned());
        state.events.push(HostEvent::RequestRegion {
            bar,
            owner: owner.to_owned(),
        });
        Ok(())
    }

    fn release_region(&self, address: &PciAddress, bar: u8) {
        let mut state = self.state();
        if state.claims.remove(&(*address, bar)).is_none() {
            warn!("release_region on unowned BAR {bar} of {address}");
        }
        state.events.push(HostEvent::ReleaseRegion { bar });
    }

    fn iomap(&self, address: &PciAddress, bar: u8) -> Result<Box<dyn MmioRegion>, AtgdError> {
        let mut state = self.state();
        if state.faults.iomap == Some(bar) {
            return Err(AtgdError::IOMap {
                file: PathBuf::from(format!("mock:{address}/resource{bar}")),
                e: std::io::Error::other("injected iomap failure"),
            });
        }
        let len = state.bar_size(address, bar)?;
        let file = state.register_file(address, bar)?;
        *state.live_mappings.entry(bar).or_default() += 1;
        state.events.push(HostEvent::Iomap { bar });
        Ok(Box::new(MockRegion {
            bar,
            len,
            file,
            owner: Some((Arc::downgrade(&self.state), *address)),
        }))
    }

    fn alloc_dma(&self, address: &PciAddress, size: usize) -> Result<Box<dyn DmaMemory>, AtgdError> {
        let mut state = self.state();
        state.device(address)?;
        if state.faults.dma {
            return Err(AtgdError::AllocationFailure(format!(
                "injected failure allocating {size} DMA bytes"
            )));
        }
        let bus_address = state.next_bus_address;
        let pages = (size as u64).div_ceil(PAGE_SIZE).max(1);
        state.next_bus_address += pages * PAGE_SIZE;
        state.live_dma.insert(bus_address);
        state.events.push(HostEvent::AllocDma { bus_address });
        Ok(Box::new(MockDma {
            bus_address,
            data: vec![0; size],
            owner: Arc::downgrade(&self.state),
        }))
    }

    fn register_chrdev_region(&self, name: &str, count: u32) -> Result<DevNo, AtgdError> {
        let mut state = self.state();
        if state.faults.chrdev {
            return Err(AtgdError::AllocationFailure(format!(
                "injected failure registering {name}"
            )));
        }
        let devno = state.chrdevs.register(name, count)?;
        state.events.push(HostEvent::RegisterChrdev(devno));
        Ok(devno)
    }

    fn unregister_chrdev_region(&self, first: DevNo, count: u32) {
        let mut state = self.state();
        state.chrdevs.unregister(first, count);
        state.events.push(HostEvent::UnregisterChrdev(first));
    }

    fn enable_msix_exact(&self, address: &PciAddress, entries: &mut [MsixEntry]) -> Result<(), AtgdError> {
        let mut state = self.state();
        let table_size = state.device(address)?.msix_table_size;
        if state.msix.contains_key(address) {
            return Err(AtgdError::Msix(format!("MSI-X is already enabled on {address}")));
        }
        let granted = state.faults.msix_grant.unwrap_or(table_size);
        if granted < entries.len() {
            return Err(AtgdError::Msix(format!(
                "{address} can provide {granted} MSI-X vectors, {} were requested",
                entries.len()
            )));
        }
        if let Some(entry) = entries.iter().find(|e| e.entry as usize >= table_size) {
            return Err(AtgdError::Msix(format!(
                "MSI-X entry {} is outside the {table_size}-entry table of {address}",
                entry.entry
            )));
        }
        let mut vectors = Vec::with_capacity(entries.len());
        for entry in entries.iter_mut() {
            entry.vector = state.next_vector;
            state.next_vector += 1;
            vectors.push(entry.vector);
        }
        state.msix.insert(*address, vectors);
        state.events.push(HostEvent::EnableMsix {
            vectors: entries.len(),
        });
        Ok(())
    }

    fn disable_msix(&self, address: &PciAddress) {
        let mut state = self.state();
        if let Some(vectors) = state.msix.remove(address) {
            let still_bound = vectors.iter().filter(|v| state.irqs.contains_key(*v)).count();
            if still_bound > 0 {
                warn!("disable_msix on {address} with {still_bound} handler(s) still bound");
            }
        }
        state.events.push(HostEvent::DisableMsix);
    }

    fn request_irq(&self, vector: u32, name: &str, handler: Arc<dyn IrqHandler>) -> Result<(), AtgdError> {
        let mut state = self.state();
        if !state.msix.values().any(|vectors| vectors.contains(&vector)) {
            return Err(AtgdError::Msix(format!(
                "{name}: vector {vector} was never allocated"
            )));
        }
        if state.irqs.contains_key(&vector) {
            return Err(AtgdError::Msix(format!(
                "{name}: vector {vector} already has a handler"
            )));
        }
        if state.faults.irq_after.is_some_and(|limit| state.irq_requests >= limit) {
            return Err(AtgdError::Msix(format!(
                "{name}: injected failure binding vector {vector}"
            )));
        }
        state.irq_requests += 1;
        state.irqs.insert(vector, handler);
        state.events.push(HostEvent::RequestIrq { vector });
        Ok(())
    }

    fn free_irq(&self, vector: u32) {
        let mut state = self.state();
        if state.irqs.remove(&vector).is_none() {
            warn!("free_irq on unbound vector {vector}");
        }
        state.events.push(HostEvent::FreeIrq { vector });
    }
}
