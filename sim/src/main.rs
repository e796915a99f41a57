// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standalone Semi-Vibe device simulator process.
//!
//! Runs one simulated device until interrupted. Logging goes through
//! `env_logger`; set `RUST_LOG=debug` to watch the frame traffic.

use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use drv_semivibe_server::{Device, DeviceConfig, DEFAULT_PORT};
use log::info;

/// Serves a simulated Semi-Vibe device over TCP.
#[derive(Debug, Parser)]
#[clap(max_term_width = 80)]
struct Args {
    /// TCP port to listen on.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seed for the sensor dynamics; runs are reproducible given a seed.
    #[clap(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let device = Arc::new(Device::new(DeviceConfig {
        port: args.port,
        seed: args.seed,
    }));
    let addr = device.start().context("failed to start device")?;
    info!("semivibe device serving on {addr}");

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install signal handler")?;
    let _ = stop_rx.recv();

    device.stop();
    Ok(())
}
