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

//! The host trait through which drivers reach kernel PCI services.
//!
//! # Architecture
//!
//! [`PciHost`] mirrors the small slice of the kernel PCI API the drivers use. Every acquiring
//! call has a matching release call, and the drivers wrap each successful acquisition in a guard
//! (see [`driver::resources`](../../driver/resources/index.html)) so that the release happens
//! exactly once, in reverse order, whether the driver is torn down normally or a probe fails
//! half way.
//!
//! Two resources are objects rather than bookkeeping: mapped BARs ([`MmioRegion`]) and DMA
//! memory ([`DmaMemory`]). Backends unmap or free these when the object is dropped.
//!
//! # Host Registration
//!
//! Backends register a constructor under a name at daemon startup, and the daemon picks one
//! with `--backend`:
//!
//! ```rust,no_run
//! # use atgd::pci::host::{register_host, host_for_name};
//! # use atgd::pci::backends::sysfs::SysfsHost;
//! # use std::sync::Arc;
//! # fn example() -> Result<(), atgd::error::AtgdError> {
//! register_host("sysfs", || Arc::new(SysfsHost::new()));
//! let host = host_for_name("sysfs")?;
//! # Ok(())
//! # }
//! ```

use crate::error::AtgdError;
use crate::pci::address::PciAddress;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

/// Identity read from a device's configuration space on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceInfo {
    pub address: PciAddress,
    pub vendor: u16,
    pub device: u16,
}

/// A character device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevNo {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DevNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// One slot of an MSI-X table request. `entry` is filled in by the caller, `vector` by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsixEntry {
    pub vector: u32,
    pub entry: u16,
}

/// What a handler reports back to the interrupt subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// A handler bound to one interrupt vector.
///
/// Handlers run in the host's interrupt delivery context. They must not block on anything but
/// short critical sections and must not allocate.
pub trait IrqHandler: Send + Sync {
    fn handle(&self, vector: u32) -> IrqReturn;
}

/// A BAR mapped into the daemon's address space.
///
/// Implementations reject accesses that are misaligned or run past [`MmioRegion::len`] with
/// [`AtgdError::Mmio`], using [`check_access`](crate::pci::mmio::check_access).
pub trait MmioRegion: Send + Sync {
    fn bar(&self) -> u8;
    fn len(&self) -> usize;
    fn read32(&self, offset: usize) -> Result<u32, AtgdError>;
    fn write32(&self, offset: usize, value: u32) -> Result<(), AtgdError>;
}

/// Pinned memory the device can address directly.
pub trait DmaMemory: Send {
    /// The address the device must use to reach this memory. For the sysfs backend this is
    /// the physical address; for VFIO it is the IOVA the page is mapped at.
    fn bus_address(&self) -> u64;
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Kernel PCI services used by the drivers.
pub trait PciHost: Send + Sync {
    /// Short backend name, e.g. `"sysfs"`.
    fn name(&self) -> &str;

    /// Look up and take a reference to a PCI function.
    ///
    /// # Returns: `Result<PciDeviceInfo, AtgdError>`
    /// * `Ok(PciDeviceInfo)` - The function exists, a reference is now held
    /// * `Err(AtgdError::NotFound)` - Nothing lives at `address`
    fn get_device(&self, address: &PciAddress) -> Result<PciDeviceInfo, AtgdError>;

    /// Drop the reference taken by [`PciHost::get_device`].
    fn put_device(&self, address: &PciAddress);

    /// Enable memory decoding and bus mastering.
    fn enable_device(&self, address: &PciAddress) -> Result<(), AtgdError>;

    fn disable_device(&self, address: &PciAddress);

    /// Reserve a BAR for this process, tagged with a human readable owner.
    ///
    /// # Returns: `Result<(), AtgdError>`
    /// * `Ok(())` - The region is now owned by the caller
    /// * `Err(AtgdError::ResourceBusy)` - Another driver or process owns the region
    fn request_region(&self, address: &PciAddress, bar: u8, owner: &str)
    -> Result<(), AtgdError>;

    fn release_region(&self, address: &PciAddress, bar: u8);

    /// Map the whole of a reserved BAR. The mapping is removed when the returned object drops.
    fn iomap(&self, address: &PciAddress, bar: u8) -> Result<Box<dyn MmioRegion>, AtgdError>;

    /// Allocate `size` bytes of pinned, device-visible memory.
    ///
    /// # Returns: `Result<Box<dyn DmaMemory>, AtgdError>`
    /// * `Ok(Box<dyn DmaMemory>)` - Memory with a fixed bus address, freed on drop
    /// * `Err(AtgdError::AllocationFailure)` - No memory or no usable bus address
    fn alloc_dma(&self, address: &PciAddress, size: usize)
    -> Result<Box<dyn DmaMemory>, AtgdError>;

    /// Allocate a range of `count` character device numbers under `name`.
    fn register_chrdev_region(&self, name: &str, count: u32) -> Result<DevNo, AtgdError>;

    fn unregister_chrdev_region(&self, first: DevNo, count: u32);

    /// Enable MSI-X with exactly `entries.len()` vectors, filling in each `vector`.
    ///
    /// # Returns: `Result<(), AtgdError>`
    /// * `Ok(())` - Every entry has a vector
    /// * `Err(AtgdError::Msix)` - The device cannot provide exactly that many vectors
    fn enable_msix_exact(
        &self,
        address: &PciAddress,
        entries: &mut [MsixEntry],
    ) -> Result<(), AtgdError>;

    fn disable_msix(&self, address: &PciAddress);

    /// Bind `handler` to an allocated vector.
    fn request_irq(
        &self,
        vector: u32,
        name: &str,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<(), AtgdError>;

    /// Unbind the handler of `vector`. Once this returns the handler is not running and will
    /// not be called again.
    fn free_irq(&self, vector: u32);
}

/// Type alias for host constructor functions stored in the registry.
type HostConstructor = fn() -> Arc<dyn PciHost>;

/// Global registry of host backends, keyed by backend name.
pub static HOST_REGISTRY: OnceLock<Mutex<HashMap<&'static str, HostConstructor>>> =
    OnceLock::new();

/// Initialize the host registry.
pub fn init_host_registry() -> Mutex<HashMap<&'static str, HostConstructor>> {
    Mutex::new(HashMap::new())
}

/// Register a host backend constructor under `name`.
///
/// # Panics
///
/// Panics if the registry lock is poisoned (should never happen in normal operation).
pub fn register_host(name: &'static str, constructor: HostConstructor) {
    let mut registry = HOST_REGISTRY
        .get_or_init(init_host_registry)
        .lock()
        .expect("couldn't get HOST_REGISTRY");

    registry.insert(name, constructor);
}

/// Construct the host backend registered as `name`.
///
/// # Returns: `Result<Arc<dyn PciHost>, AtgdError>`
/// * `Ok(Arc<dyn PciHost>)` - Newly constructed host
/// * `Err(AtgdError::Internal)` - Registry not initialized or lock failure
/// * `Err(AtgdError::Argument)` - No backend registered under that name
pub fn host_for_name(name: &str) -> Result<Arc<dyn PciHost>, AtgdError> {
    let registry = HOST_REGISTRY
        .get()
        .ok_or(AtgdError::Internal(String::from(
            "couldn't get HOST_REGISTRY",
        )))?
        .lock()
        .map_err(|_| AtgdError::Internal(String::from("couldn't lock HOST_REGISTRY")))?;

    match registry.get(name) {
        Some(constructor) => Ok(constructor()),
        None => {
            let mut known: Vec<&str> = registry.keys().copied().collect();
            known.sort_unstable();
            Err(AtgdError::Argument(format!(
                "atgd has no host backend called '{name}'. Known backends: {}",
                known.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::backends::mock::MockHost;
    use googletest::prelude::*;

    fn setup_test_registry() {
        register_host("mock", || Arc::new(MockHost::new()));
    }

    #[gtest]
    fn host_for_registered_name_succeeds() {
        setup_test_registry();
        let host = host_for_name("mock");
        assert_that!(host.is_ok(), eq(true));
        let host = host.unwrap();
        assert_that!(host.name(), eq("mock"));
    }

    #[gtest]
    fn host_for_unknown_name_lists_known_backends() {
        setup_test_registry();
        let result = host_for_name("pcie-over-carrier-pigeon");
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        expect_that!(
            message,
            all!(
                contains_substring("AtgdError::Argument"),
                contains_substring("mock")
            )
        );
    }

    #[gtest]
    fn host_lookup_is_case_sensitive() {
        setup_test_registry();
        assert_that!(host_for_name("MOCK").is_err(), eq(true));
    }

    #[gtest]
    fn each_lookup_builds_a_fresh_host() {
        setup_test_registry();
        let first = host_for_name("mock").unwrap();
        let second = host_for_name("mock").unwrap();
        assert_that!(Arc::ptr_eq(&first, &second), eq(false));
    }

    #[gtest]
    fn devno_displays_major_minor() {
        assert_that!(
            DevNo {
                major: 240,
                minor: 0
            }
            .to_string(),
            eq("240:0")
        );
    }
}
