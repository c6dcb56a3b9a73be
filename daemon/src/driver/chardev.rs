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


//! Character device endpoint.
//!
//! A driver publishes a [`FileOperations`] table. The DBus chardev object forwards its methods
//! to that table, with a session id standing in for an open file.
//!
//! Data crosses the endpoint through [`UserSink`] and [`UserSource`], the equivalents of
//! `copy_to_user` and `copy_from_user`. Both can come up short; the driver reports the shortfall
//! as a [`AtgdError::CopyFault`] in the log and returns the bytes that did move.

use crate::error::AtgdError;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub type SessionId = u64;

/// Where read data goes.
pub trait UserSink {
    /// Take as much of `data` as possible and return how many bytes were taken.
    fn accept(&mut self, data: &[u8]) -> usize;
}

/// Where written data comes from.
pub trait UserSource {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Copy up to `dst.len()` bytes into `dst` and return how many were copied.
    fn fill(&self, dst: &mut [u8]) -> usize;
}

impl UserSink for Vec<u8> {
    fn accept(&mut self, data: &[u8]) -> usize {
        self.extend_from_slice(data);
        data.len()
    }
}

impl UserSource for &[u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn fill(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(<[u8]>::len(self));
        dst[..n].copy_from_slice(&self[..n]);
        n
    }
}

impl UserSource for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn fill(&self, dst: &mut [u8]) -> usize {
        UserSource::fill(&self.as_slice(), dst)
    }
}

/// Copy `data` out to `dst`. Returns the number of bytes that could not be copied.
pub fn copy_to_user(dst: &mut dyn UserSink, data: &[u8]) -> usize {
    data.len() - dst.accept(data).min(data.len())
}

/// Copy `src` into `dst`. Returns the number of bytes that could not be copied.
pub fn copy_from_user(dst: &mut [u8], src: &dyn UserSource) -> usize {
    let wanted = dst.len().min(src.len());
    wanted - src.fill(&mut dst[..wanted]).min(wanted)
}

/// Log a partial copy. Partial copies are never escalated.
pub fn report_copy_fault(requested: usize, missed: usize) {
    if missed != 0 {
        warn!("{}", AtgdError::CopyFault { requested, missed });
    }
}

/// The operations a character device endpoint supports.
pub trait FileOperations: Send + Sync {
    fn open(&self) -> SessionId;

    fn release(&self, session: SessionId);

    /// Copy up to `count` bytes to `dst`.
    ///
    /// # Returns: `Result<usize, AtgdError>`
    /// * `Ok(usize)` - Bytes actually delivered
    /// * `Err(AtgdError::Argument)` - `session` is not open
    fn read(&self, session: SessionId, dst: &mut dyn UserSink, count: usize) -> Result<usize, AtgdError>;

    /// Accept the bytes of `src`.
    ///
    /// # Returns: `Result<usize, AtgdError>`
    /// * `Ok(usize)` - Bytes actually taken
    /// * `Err(AtgdError::Argument)` - `session` is not open
    fn write(&self, session: SessionId, src: &dyn UserSource) -> Result<usize, AtgdError>;
}

/// Open sessions and their file positions.
#[derive(Debug)]
pub struct SessionTable {
    name: &'static str,
    next: AtomicU64,
    positions: Mutex<HashMap<SessionId, u64>>,
}

impl SessionTable {
    pub fn new(name: &'static str) -> Self {
        SessionTable {
            name,
            next: AtomicU64::new(1),
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(&self) -> SessionId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut positions) = self.positions.lock() {
            positions.insert(id, 0);
        }
        info!("{} opened", self.name);
        id
    }

    pub fn release(&self, session: SessionId) {
        let known = self
            .positions
            .lock()
            .map(|mut positions| positions.remove(&session).is_some())
            .unwrap_or(false);
        if !known {
            warn!("{}: release of unknown session {session}", self.name);
        }
        info!("{} closed", self.name);
    }

    /// Move the file position of `session` forward by `by` bytes.
    pub fn advance(&self, session: SessionId, by: usize) -> Result<u64, AtgdError> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| AtgdError::Internal("couldn't lock sessions".into()))?;
        let position = positions.get_mut(&session).ok_or_else(|| {
            AtgdError::Argument(format!("{}: session {session} is not open", self.name))
        })?;
        *position += by as u64;
        Ok(*position)
    }

    pub fn check(&self, session: SessionId) -> Result<(), AtgdError> {
        self.advance(session, 0).map(|_| ())
    }

    pub fn position(&self, session: SessionId) -> Option<u64> {
        self.positions.lock().ok()?.get(&session).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
