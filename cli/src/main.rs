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


//! Command-line client for the atgd daemon.
//!
//! Every command is a handful of DBus calls against `io.atgd`. The endpoint commands (`read`,
//! `write`, `demo`) open a session on `/io/atgd/chardev` for the duration of the command and
//! release it afterwards, the way a program opens and closes `/dev/atg_driver`.
//!
//! # Usage
//!
//! ```bash
//! atgd_cli write --nul "0 This is a test."
//! atgd_cli read 18
//! atgd_cli selftest
//! atgd_cli --session status
//! ```
//!
//! # Error Handling
//!
//! Daemon errors arrive as DBus errors whose message starts with `AtgdError::<Variant>:`.
//! They are printed as-is and the CLI exits non-zero.

mod control;
mod demo;
mod endpoint;
mod proxies;
mod status;

use clap::{Parser, Subcommand};
use log::{debug, error};
use zbus::Connection;

#[derive(Parser, Debug)]
#[command(name = "atgd_cli")]
#[command(bin_name = "atgd_cli")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus.
    #[arg(long, global = true)]
    session: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read up to COUNT bytes of the staging buffer.
    Read { count: u32 },
    /// Write TEXT to the staging buffer. Runs the self-test unless TEXT starts with '0'.
    Write {
        text: String,
        /// Append a NUL byte, as a C string would carry.
        #[arg(long)]
        nul: bool,
    },
    /// Show the device and driver counters.
    Status,
    /// Run the traffic generator self-test.
    Selftest,
    /// Fire all user interrupts from the card.
    Trigger,
    /// Write and read back the two standard test messages.
    Demo,
}

async fn connect(session: bool) -> Result<Connection, zbus::Error> {
    if session {
        Connection::session().await
    } else {
        Connection::system().await
    }
}

async fn run(cli: &Cli) -> Result<String, zbus::Error> {
    let connection = connect(cli.session).await?;
    match &cli.command {
        Commands::Read { count } => endpoint::read_handler(&connection, *count).await,
        Commands::Write { text, nul } => endpoint::write_handler(&connection, text, *nul).await,
        Commands::Status => status::status_handler(&connection).await,
        Commands::Selftest => control::selftest_handler(&connection).await,
        Commands::Trigger => control::trigger_handler(&connection).await,
        Commands::Demo => demo::demo_handler(&connection).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    match run(&cli).await {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(e) => {
            error!("{:?} failed", cli.command);
            Err(e.into())
        }
    }
}
