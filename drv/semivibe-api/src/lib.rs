// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client driver for the Semi-Vibe device.
//!
//! A [`Driver`] owns one TCP session to a device plus the configuration
//! and last-error slot that go with it. All public operations are methods
//! on the handle; there is no global state. Distinct instances are fully
//! independent; within one instance an internal mutex serializes every
//! operation, so callers on multiple threads see a sequentially
//! consistent view of the device and at most one request/response
//! exchange is in flight on the wire.
//!
//! Operations that touch registers with shared bits — doors and the
//! power controls — are read-modify-write: the driver fetches the
//! current value, edits only the requested component's bit, and writes
//! the masked result back, so stale state can never silently flip a
//! sibling. Reset is the exception by design: a reset is a one-shot
//! pulse, not a persistent state, so only the requested component's bit
//! is written and nothing is preserved.
//!
//! Every write is verified against its echo; the device repeats a
//! successful write back verbatim, and any divergence surfaces as
//! [`Error::Verification`]. Failures are recorded on the instance (see
//! [`Driver::last_error`]) and logged before they are returned.
//!
//! Dropping the driver tears the session down: a best-effort `exit`
//! sentinel, then socket shutdown either way.

mod error;
mod session;

pub use error::{Error, LastError, Result};
pub use semivibe_protocol::{Actuator, Door, ErrorCode, Sensor};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use semivibe_protocol::map::{actuator, base, control, main, sensor};
use semivibe_protocol::{bitmask, Frame};

use session::{Fault, Session};

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8989;
/// Send/receive deadline used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Callback invoked with each log line, in addition to the `log` facade.
pub type LogSink = Box<dyn Fn(&str) + Send + Sync>;

/// Driver configuration. Everything is optional:
///
/// ```
/// use drv_semivibe_api::Config;
/// let config = Config::new().host("10.0.0.7").port(9000);
/// ```
pub struct Config {
    host: String,
    port: u16,
    timeout: Duration,
    log_sink: Option<LogSink>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            log_sink: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target hostname or IPv4 address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Target TCP port. Must be nonzero; `connect` refuses port 0.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Per-operation send/receive deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Callback invoked with each UTF-8 log line.
    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

/// Snapshot of the device's status registers, reduced to the booleans
/// callers act on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub connected: bool,
    pub sensors_powered: bool,
    pub actuators_powered: bool,
    pub has_errors: bool,
}

/// Sensor ids and current samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SensorData {
    pub temperature_id: u8,
    pub temperature_value: u8,
    pub humidity_id: u8,
    pub humidity_value: u8,
}

/// Current actuator values.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ActuatorData {
    pub led: u8,
    pub fan: u8,
    pub heater: u8,
    pub doors: u8,
}

/// Position of one door.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DoorState {
    Closed,
    Open,
}

impl DoorState {
    fn from_bit(set: bool) -> Self {
        if set {
            DoorState::Open
        } else {
            DoorState::Closed
        }
    }

    pub fn is_open(self) -> bool {
        self == DoorState::Open
    }
}

struct Inner {
    session: Option<Session>,
    timeout: Duration,
}

/// Handle to one device session. See the crate docs for the semantics.
pub struct Driver {
    config: Config,
    inner: Mutex<Inner>,
    last_error: Mutex<Option<LastError>>,
}

impl Driver {
    /// Creates a driver. No I/O happens until [`Driver::connect`].
    pub fn new(config: Config) -> Driver {
        let timeout = config.timeout;
        Driver {
            config,
            inner: Mutex::new(Inner {
                session: None,
                timeout,
            }),
            last_error: Mutex::new(None),
        }
    }

    /// Connects to the configured device and consumes its `ACK`
    /// greeting. Connecting while already connected is a no-op.
    pub fn connect(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.session.is_some() {
            self.log("already connected");
            return Ok(());
        }
        if self.config.port == 0 {
            return Err(self.fail(
                Error::InvalidParameter,
                "configured port must be nonzero".to_string(),
            ));
        }
        let session = Session::connect(&self.config.host, self.config.port, inner.timeout)
            .map_err(|f| self.fault(f))?;
        inner.session = Some(session);
        self.log(&format!(
            "connected to device at {}:{}",
            self.config.host, self.config.port
        ));
        Ok(())
    }

    /// Tears the session down: best-effort `exit` sentinel, then socket
    /// shutdown regardless. Disconnecting while not connected is a
    /// no-op.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.session.take().is_some() {
            self.log("disconnected from device");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner).session.is_some()
    }

    /// Changes the send/receive deadline, applying it to the live
    /// session if there is one. Zero is refused; use `disconnect` to
    /// abandon a session instead.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(self.fail(
                Error::InvalidParameter,
                "timeout must be nonzero".to_string(),
            ));
        }
        let mut inner = lock(&self.inner);
        inner.timeout = timeout;
        if let Some(session) = inner.session.as_ref() {
            session.set_timeout(timeout).map_err(|f| self.fault(f))?;
        }
        Ok(())
    }

    /// The most recent failure recorded on this instance, if any.
    pub fn last_error(&self) -> Option<LastError> {
        lock(&self.last_error).clone()
    }

    /// Reads the status registers and derives the summary booleans.
    pub fn status(&self) -> Result<Status> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let connected_device = self.read_register(s, base::MAIN, main::CONNECTED_DEVICE)?;
        let power_state = self.read_register(s, base::MAIN, main::POWER_STATE)?;
        let error_state = self.read_register(s, base::MAIN, main::ERROR_STATE)?;
        Ok(Status {
            connected: connected_device != 0,
            sensors_powered: power_state & control::SENSOR_MASK != 0,
            actuators_powered: power_state & control::ACTUATOR_MASK != 0,
            has_errors: error_state != 0,
        })
    }

    /// Current temperature sample (0-255).
    pub fn temperature(&self) -> Result<u8> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.read_register(s, base::SENSOR, sensor::TEMP_VALUE)
    }

    /// Current humidity sample (0-255).
    pub fn humidity(&self) -> Result<u8> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.read_register(s, base::SENSOR, sensor::HUMID_VALUE)
    }

    /// Reads both sensor ids and samples in one sequence.
    pub fn sensors(&self) -> Result<SensorData> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        Ok(SensorData {
            temperature_id: self.read_register(s, base::SENSOR, sensor::TEMP_ID)?,
            temperature_value: self.read_register(s, base::SENSOR, sensor::TEMP_VALUE)?,
            humidity_id: self.read_register(s, base::SENSOR, sensor::HUMID_ID)?,
            humidity_value: self.read_register(s, base::SENSOR, sensor::HUMID_VALUE)?,
        })
    }

    /// Reads all four actuator cells in one sequence.
    pub fn actuators(&self) -> Result<ActuatorData> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        Ok(ActuatorData {
            led: self.read_register(s, base::ACTUATOR, actuator::LED)?,
            fan: self.read_register(s, base::ACTUATOR, actuator::FAN)?,
            heater: self.read_register(s, base::ACTUATOR, actuator::HEATER)?,
            doors: self.read_register(s, base::ACTUATOR, actuator::DOORS)?,
        })
    }

    /// LED brightness.
    pub fn led(&self) -> Result<u8> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.read_register(s, base::ACTUATOR, actuator::LED)
    }

    pub fn set_led(&self, value: u8) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(s, base::ACTUATOR, actuator::LED, value)
    }

    /// Fan speed.
    pub fn fan(&self) -> Result<u8> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.read_register(s, base::ACTUATOR, actuator::FAN)
    }

    pub fn set_fan(&self, value: u8) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(s, base::ACTUATOR, actuator::FAN, value)
    }

    /// Heater level (0-15).
    pub fn heater(&self) -> Result<u8> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        Ok(self.read_register(s, base::ACTUATOR, actuator::HEATER)? & actuator::HEATER_MASK)
    }

    /// Sets the heater level. Only the low 4 bits are meaningful; the
    /// value is masked before it goes on the wire, so the echo check
    /// cannot trip over bits the device would drop.
    pub fn set_heater(&self, value: u8) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(
            s,
            base::ACTUATOR,
            actuator::HEATER,
            value & actuator::HEATER_MASK,
        )
    }

    /// Position of one door.
    pub fn door(&self, door: Door) -> Result<DoorState> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let doors = self.read_register(s, base::ACTUATOR, actuator::DOORS)?;
        Ok(DoorState::from_bit(doors & door.mask() != 0))
    }

    /// Moves one door, preserving the others.
    ///
    /// Doors share a register, so this is read-modify-write on the
    /// latest observed value, and the result is read back to confirm
    /// the requested door actually landed.
    pub fn set_door(&self, door: Door, state: DoorState) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let current = self.read_register(s, base::ACTUATOR, actuator::DOORS)?;
        let requested = match state {
            DoorState::Open => current | door.mask(),
            DoorState::Closed => current & !door.mask(),
        } & actuator::DOORS_MASK;
        self.write_register(s, base::ACTUATOR, actuator::DOORS, requested)?;
        let observed = self.read_register(s, base::ACTUATOR, actuator::DOORS)?;
        if observed & door.mask() != requested & door.mask() {
            return Err(self.fail(
                Error::Verification,
                format!("door {door:?} did not land: doors register reads {observed:#04x}"),
            ));
        }
        Ok(())
    }

    /// Powers one sensor on or off, preserving the other's bit.
    pub fn set_sensor_power(&self, which: Sensor, on: bool) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let current = self.read_register(s, base::CONTROL, control::POWER_SENSORS)?;
        let value = apply_bit(current, which.mask(), on) & control::SENSOR_MASK;
        self.write_register(s, base::CONTROL, control::POWER_SENSORS, value)
    }

    /// Powers one actuator on or off, preserving its siblings' bits.
    pub fn set_actuator_power(&self, which: Actuator, on: bool) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let current = self.read_register(s, base::CONTROL, control::POWER_ACTUATORS)?;
        let value = apply_bit(current, which.mask(), on) & control::ACTUATOR_MASK;
        self.write_register(s, base::CONTROL, control::POWER_ACTUATORS, value)
    }

    /// Sets both sensors' power in one write.
    pub fn power_sensors(&self, temperature_on: bool, humidity_on: bool) -> Result<()> {
        let value = bitmask(&[
            (temperature_on, Sensor::Temperature.bit()),
            (humidity_on, Sensor::Humidity.bit()),
        ]);
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(s, base::CONTROL, control::POWER_SENSORS, value)
    }

    /// Sets all four actuators' power in one write.
    pub fn power_actuators(
        &self,
        led_on: bool,
        fan_on: bool,
        heater_on: bool,
        doors_on: bool,
    ) -> Result<()> {
        let value = bitmask(&[
            (led_on, Actuator::Led.bit()),
            (fan_on, Actuator::Fan.bit()),
            (heater_on, Actuator::Heater.bit()),
            (doors_on, Actuator::Doors.bit()),
        ]);
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(s, base::CONTROL, control::POWER_ACTUATORS, value)
    }

    /// Pulses one sensor's reset line. Reset is an event, not a state:
    /// only the requested bit is written, and the register self-clears
    /// device-side once acted on.
    pub fn reset_sensor(&self, which: Sensor) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let _ = self.read_register(s, base::CONTROL, control::RESET_SENSORS)?;
        self.write_register(s, base::CONTROL, control::RESET_SENSORS, which.mask())
    }

    /// Pulses one actuator's reset line, clearing its error bit and
    /// zeroing its value cell device-side.
    pub fn reset_actuator(&self, which: Actuator) -> Result<()> {
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let _ = self.read_register(s, base::CONTROL, control::RESET_ACTUATORS)?;
        self.write_register(s, base::CONTROL, control::RESET_ACTUATORS, which.mask())
    }

    /// Pulses both sensors' reset lines in one write.
    pub fn reset_sensors(&self, temperature: bool, humidity: bool) -> Result<()> {
        let value = bitmask(&[
            (temperature, Sensor::Temperature.bit()),
            (humidity, Sensor::Humidity.bit()),
        ]);
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(s, base::CONTROL, control::RESET_SENSORS, value)
    }

    /// Pulses any combination of actuator reset lines in one write.
    pub fn reset_actuators(
        &self,
        led: bool,
        fan: bool,
        heater: bool,
        doors: bool,
    ) -> Result<()> {
        let value = bitmask(&[
            (led, Actuator::Led.bit()),
            (fan, Actuator::Fan.bit()),
            (heater, Actuator::Heater.bit()),
            (doors, Actuator::Doors.bit()),
        ]);
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        self.write_register(s, base::CONTROL, control::RESET_ACTUATORS, value)
    }

    /// Sends a raw six-character command and returns the raw response.
    /// Test rigs only; absent from release builds.
    #[cfg(any(test, feature = "raw-cmd"))]
    pub fn send_raw(&self, command: &str) -> Result<String> {
        Frame::parse(command).map_err(|e| {
            self.fail(
                Error::InvalidParameter,
                format!("malformed raw command {command:?}: {e}"),
            )
        })?;
        let mut inner = lock(&self.inner);
        let s = self.session_mut(&mut inner)?;
        let raw = s.exchange(command).map_err(|f| self.fault(f))?;
        if Frame::parse(&raw).is_err() {
            return Err(self.fail(
                Error::Protocol,
                format!("unparseable response {raw:?} to raw command"),
            ));
        }
        Ok(raw)
    }

    fn session_mut<'a>(&self, inner: &'a mut Inner) -> Result<&'a mut Session> {
        match inner.session.as_mut() {
            Some(s) => Ok(s),
            None => Err(self.fail(
                Error::NotConnected,
                "operation requires a connected session".to_string(),
            )),
        }
    }

    /// Sends a read command and returns the echoed data byte.
    fn read_register(&self, session: &mut Session, base: u8, offset: u8) -> Result<u8> {
        let reply = self.exchange(session, &Frame::read(base, offset))?;
        Ok(reply.data)
    }

    /// Sends a write command and verifies the echo matches the request
    /// byte-for-byte. The echo is the only commit point: a verified
    /// write is the only way this driver changes the device.
    fn write_register(
        &self,
        session: &mut Session,
        base: u8,
        offset: u8,
        value: u8,
    ) -> Result<()> {
        let request = Frame::write(base, offset, value);
        let reply = self.exchange(session, &request)?;
        if reply != request {
            return Err(self.fail(
                Error::Verification,
                format!(
                    "write echo {} does not match request {}",
                    reply.render(),
                    request.render()
                ),
            ));
        }
        Ok(())
    }

    fn exchange(&self, session: &mut Session, request: &Frame) -> Result<Frame> {
        let rendered = request.render();
        self.log(&format!("sending command: {rendered}"));
        let raw = session.exchange(&rendered).map_err(|f| self.fault(f))?;
        self.log(&format!("received response: {raw}"));
        let reply = Frame::parse(&raw).map_err(|_| {
            self.fail(
                Error::Protocol,
                format!("unparseable response {raw:?} to {rendered}"),
            )
        })?;
        if let Some(code) = reply.error_code() {
            return Err(self.fail(
                Error::Device(code),
                format!("device answered {raw} to {rendered}"),
            ));
        }
        Ok(reply)
    }

    fn fault(&self, fault: Fault) -> Error {
        self.fail(fault.kind, fault.detail)
    }

    /// Records the failure on the instance, logs it, and hands the
    /// taxonomy entry back for returning.
    fn fail(&self, error: Error, message: String) -> Error {
        self.log(&message);
        *lock(&self.last_error) = Some(LastError { error, message });
        error
    }

    fn log(&self, line: &str) {
        debug!("{line}");
        if let Some(sink) = &self.config.log_sink {
            sink(line);
        }
    }
}

fn apply_bit(current: u8, mask: u8, on: bool) -> u8 {
    if on {
        current | mask
    } else {
        current & !mask
    }
}

// Lock discipline: a poisoned mutex means a caller thread panicked while
// holding it; the session is torn down rather than left half-used.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
