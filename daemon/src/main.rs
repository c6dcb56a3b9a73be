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


//! atgd - DBus service driving a PCIe FPGA traffic generator or its user interrupts.
//!
//! The daemon probes one PCI function with one of two drivers and serves it on DBus until it
//! receives `SIGINT` or `SIGTERM`, then tears the driver down in reverse order of setup.
//!
//! # Usage
//!
//! ```bash
//! # traffic generator on the default slot (0x0f) through sysfs
//! atgd atg
//!
//! # interrupt driver on slot 15, bound to vfio-pci
//! atgd interrupts --slot 15 --backend vfio
//!
//! # try it out without hardware on the session bus
//! RUST_LOG=debug atgd --session atg --backend mock
//! ```
//!
//! # DBus Service
//!
//! - **Service Name**: `io.atgd`
//! - **Character Device**: `/io/atgd/chardev` - Open, Release, Read and Write (atg only)
//! - **Status Interface**: `/io/atgd/status` - Read-only queries
//! - **Control Interface**: `/io/atgd/control` - Self-test and interrupt trigger
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
//!   or `off`). Defaults to `info`

use atgd::comm::dbus::{serve, withdraw};
use atgd::config::{DriverParams, parse_slot};
use atgd::driver::{LoadedDriver, Personality};
use atgd::pci::host::host_for_name;
use clap::{Args, Parser, Subcommand};
use log::{debug, error, info, warn};
use std::error::Error;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};

#[derive(Parser, Debug)]
#[command(name = "atgd", version, about = "User-space PCIe FPGA driver daemon")]
struct Cli {
    /// Serve on the session bus instead of the system bus.
    #[arg(long, global = true)]
    session: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Traffic generator driver (atg_driver).
    Atg(DriverArgs),
    /// MSI-X interrupt driver (f1_driver).
    Interrupts(DriverArgs),
}

#[derive(Args, Debug)]
struct DriverArgs {
    /// Slot index of the PCI function, in decimal or 0x hex.
    #[arg(long, default_value = "0x0f", value_parser = parse_slot)]
    slot: u8,
    /// Host backend: sysfs, vfio or mock. Defaults to sysfs for atg and vfio for interrupts.
    #[arg(long)]
    backend: Option<String>,
}

impl Commands {
    fn split(self) -> (Personality, DriverArgs) {
        match self {
            Commands::Atg(args) => (Personality::Atg, args),
            Commands::Interrupts(args) => (Personality::Interrupts, args),
        }
    }
}

async fn shutdown_signal() -> Result<(), Box<dyn Error>> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

/// Main entry point for the atgd daemon.
///
/// 1. Sets up logging via `env_logger` (defaults to "info" level)
/// 2. Registers the host backends
/// 3. Probes the selected driver, failing the process if any resource cannot be acquired
/// 4. Serves the driver on DBus until a termination signal arrives
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    atgd::register_hosts();

    let (personality, args) = cli.command.split();
    let backend = args
        .backend
        .unwrap_or_else(|| personality.default_backend().to_owned());
    let params = DriverParams::with_slot(args.slot);
    info!(
        "Probing {personality} at {} using the {backend} backend",
        params.address()
    );
    let host = host_for_name(&backend)?;
    let driver = Arc::new(
        LoadedDriver::probe(personality, host, &params)
            .inspect_err(|e| error!("{personality}: probe failed: {e}"))?,
    );

    let conn = serve(driver.clone(), cli.session).await?;
    shutdown_signal().await?;
    info!("Shutting down");
    withdraw(&conn, personality).await?;
    match Arc::try_unwrap(driver) {
        Ok(driver) => drop(driver),
        Err(_) => warn!("{personality}: driver still referenced at shutdown"),
    }
    Ok(())
}
