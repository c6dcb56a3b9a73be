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


//! MSI-X interrupt bridge.
//!
//! [`InterruptBridge::arm`] enables a block of MSI-X vectors and binds one shared handler to
//! each of them, every vector carrying its own [`VectorContext`] with the entry number as its
//! identity. The shared handler serializes on one lock for all vectors, logs the identity and
//! bumps a 32-bit counter at offset 0 of a mapped BAR.
//!
//! Dropping the bridge walks the vectors in order, freeing each handler and then releasing its
//! context, and disables MSI-X last.

use crate::driver::resources::{IrqBinding, MsixTable};
use crate::error::AtgdError;
use crate::pci::address::PciAddress;
use crate::pci::host::{IrqHandler, IrqReturn, PciHost};
use crate::pci::mmio::Bar;
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Offset of the interrupt counter in the counter BAR.
pub const COUNTER_OFFSET: usize = 0;

/// State shared by every vector of one bridge.
struct BridgeShared {
    lock: Mutex<()>,
    counter: Arc<Bar>,
    handled: Vec<AtomicU64>,
}

impl BridgeShared {
    fn service(&self, identity: usize) -> IrqReturn {
        // a poisoned lock only means another handler panicked; the counter is still usable
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        info!("f1_isr: {identity}");
        let bumped = self
            .counter
            .peek(COUNTER_OFFSET)
            .and_then(|count| self.counter.poke(COUNTER_OFFSET, count.wrapping_add(1)));
        if let Err(e) = bumped {
            error!("f1_isr: {e}");
        }
        if let Some(handled) = self.handled.get(identity) {
            handled.fetch_add(1, Ordering::Relaxed);
        }
        IrqReturn::Handled
    }
}

/// Per-vector data handed to the host with the handler.
pub struct VectorContext {
    identity: usize,
    shared: Arc<BridgeShared>,
}

impl VectorContext {
    pub fn identity(&self) -> usize {
        self.identity
    }
}

impl IrqHandler for VectorContext {
    fn handle(&self, _vector: u32) -> IrqReturn {
        self.shared.service(self.identity)
    }
}

/// One bound vector. The handler is freed before its context is released.
struct BoundVector {
    binding: IrqBinding,
    context: Arc<VectorContext>,
}

/// An armed block of vectors. Field order is teardown order.
pub struct InterruptBridge {
    bound: Vec<BoundVector>,
    table: MsixTable,
    shared: Arc<BridgeShared>,
}

impl InterruptBridge {
    /// Enable exactly `count` MSI-X vectors on `address` and bind the shared handler to each,
    /// registered under `name`.
    ///
    /// # Returns: `Result<InterruptBridge, AtgdError>`
    /// * `Ok(InterruptBridge)` - All `count` vectors are live
    /// * `Err(AtgdError::Msix)` - The host did not grant exactly `count` vectors, or binding failed
    /// * `Err(AtgdError::AllocationFailure)` - The context table could not be allocated
    ///
    /// On error, bindings made so far are freed before MSI-X is disabled.
    pub fn arm(
        host: Arc<dyn PciHost>,
        address: PciAddress,
        count: usize,
        name: &str,
        counter: Arc<Bar>,
    ) -> Result<Self, AtgdError> {
        let table = MsixTable::enable_exact(host.clone(), address, count)?;

        let mut handled = Vec::new();
        handled
            .try_reserve_exact(count)
            .map_err(|e| AtgdError::AllocationFailure(format!("interrupt counts: {e}")))?;
        handled.extend((0..count).map(|_| AtomicU64::new(0)));
        let shared = Arc::new(BridgeShared {
            lock: Mutex::new(()),
            counter,
            handled,
        });

        let mut bound = Vec::new();
        bound
            .try_reserve_exact(count)
            .map_err(|e| AtgdError::AllocationFailure(format!("vector contexts: {e}")))?;

        for entry in table.entries() {
            let context = Arc::new(VectorContext {
                identity: entry.entry as usize,
                shared: shared.clone(),
            });
            let binding = IrqBinding::request(host.clone(), entry.vector, name, context.clone())
                .inspect_err(|_| error!("{name}: cannot bind vector {} (entry {})", entry.vector, entry.entry))?;
            debug!("{name}: entry {} -> vector {}", entry.entry, binding.vector());
            bound.push(BoundVector { binding, context });
        }
        info!("{name}: {count} MSI-X vectors armed");

        Ok(InterruptBridge {
            bound,
            table,
            shared,
        })
    }

    pub fn vectors(&self) -> Vec<u32> {
        self.bound.iter().map(|b| b.binding.vector()).collect()
    }

    pub fn identities(&self) -> Vec<usize> {
        self.bound.iter().map(|b| b.context.identity()).collect()
    }

    pub fn len(&self) -> usize {
        self.table.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many interrupts each identity has handled, indexed by identity.
    pub fn handled_counts(&self) -> Vec<u64> {
        self.shared
            .handled
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }
}
