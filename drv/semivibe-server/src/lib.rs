// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Semi-Vibe device simulator.
//!
//! The device owns a flat register file (4-bit base, 8-bit offset; see
//! `semivibe_protocol::map`), serves a single TCP client at a time with
//! fixed six-character frames, and advances a simulated climate on every
//! processed command.
//!
//! [`Device`] is the whole surface. `new` initializes the register file,
//! [`Device::start`]/[`Device::stop`] run the accept/serve thread, and
//! [`Device::process_command`] is the same entry point the TCP session
//! uses, exposed so harnesses can drive the state machine without a
//! socket. The register file persists across client sessions and across
//! `stop`/`start`; only construction initializes it.
//!
//! All of a command's effects — dispatch, side effects, and the climate
//! step — happen under one lock, so no caller observes intermediate
//! state.

mod registers;
mod sensors;
mod server;

pub use registers::RegisterFile;

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use semivibe_protocol::{ErrorCode, Frame};

use sensors::Climate;

/// Port the device listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8989;

/// Device configuration.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// TCP port to listen on. Port 0 binds an ephemeral port; `start`
    /// returns the bound address either way.
    pub port: u16,
    /// Seed for the climate RNG. Seeded devices are fully deterministic;
    /// unseeded devices draw entropy.
    pub seed: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            port: DEFAULT_PORT,
            seed: None,
        }
    }
}

struct State {
    regs: RegisterFile,
    climate: Climate,
}

/// A simulated Semi-Vibe device.
pub struct Device {
    state: Mutex<State>,
    running: AtomicBool,
    serve_thread: Mutex<Option<JoinHandle<()>>>,
    // Kept so `stop` can unblock a session mid-recv.
    active_client: Mutex<Option<TcpStream>>,
    config: DeviceConfig,
}

impl Device {
    /// Creates a device with a freshly initialized register file: every
    /// component connected and powered, no errors, actuators at rest,
    /// sensor samples drawn from the RNG.
    pub fn new(config: DeviceConfig) -> Device {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut climate = Climate::new(rng);
        let mut regs = RegisterFile::power_on_reset();
        regs.temp_value = climate.initial_sample();
        regs.humid_value = climate.initial_sample();
        info!("device initialized");
        Device {
            state: Mutex::new(State { regs, climate }),
            running: AtomicBool::new(false),
            serve_thread: Mutex::new(None),
            active_client: Mutex::new(None),
            config,
        }
    }

    /// Processes one command, returning the six-character response.
    /// Errors travel in-band as `EFFFFF` frames, never out-of-band. The
    /// climate advances exactly once per call, whatever the outcome,
    /// under the same lock as the dispatch.
    pub fn process_command(&self, command: &str) -> String {
        let mut state = lock(&self.state);
        let response = match Frame::parse(command) {
            Ok(frame) => match state.regs.execute(&frame) {
                // Reads echo base/offset/rw with the cell value; writes
                // echo the request verbatim.
                Ok(data) => Frame { data, ..frame }.render(),
                Err(code) => code.render(),
            },
            Err(_) => ErrorCode::Forbidden.render(),
        };
        let State { regs, climate } = &mut *state;
        climate.step(regs);
        response
    }

    /// Copies the register file, for harnesses and tests.
    pub fn snapshot(&self) -> RegisterFile {
        lock(&self.state).regs
    }

    /// Binds the listener and spawns the accept/serve thread, returning
    /// the bound address. Fails if the device is already running or the
    /// port cannot be bound.
    pub fn start(self: &Arc<Self>) -> io::Result<SocketAddr> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "device is already running",
            ));
        }
        let result = (|| -> io::Result<SocketAddr> {
            let listener = TcpListener::bind(("0.0.0.0", self.config.port))?;
            let addr = listener.local_addr()?;
            // The accept loop polls so it can notice `stop`.
            listener.set_nonblocking(true)?;
            let device = Arc::clone(self);
            let handle = thread::Builder::new()
                .name("semivibe-serve".to_string())
                .spawn(move || server::serve(device, listener))?;
            *lock(&self.serve_thread) = Some(handle);
            info!("device listening on {addr}");
            Ok(addr)
        })();
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Stops serving: unblocks the accept loop and any live session,
    /// then joins the serve thread. Safe to call when not running. The
    /// register file is left as-is; a later `start` serves the same
    /// state.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(client) = lock(&self.active_client).take() {
            let _ = client.shutdown(std::net::Shutdown::Both);
        }
        if let Some(handle) = lock(&self.serve_thread).take() {
            let _ = handle.join();
        }
        info!("device stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();
    }
}

// A poisoned lock means another thread panicked mid-command; the state is
// a plain value, so keep serving rather than propagating the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
