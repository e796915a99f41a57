// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The register file and its access matrix.
//!
//! Bases 0x1 (main) and 0x2 (sensor) are read-only, 0x3 (actuator) and
//! 0x4 (control) read/write with per-cell write masks, and base 0x0
//! refuses everything. Control-register writes are not pure stores:
//! power writes propagate into the shared status bitmaps, reset writes
//! clear error bits, zero actuator cells, and self-clear.

use semivibe_protocol::map::{actuator, base, control, main, sensor};
use semivibe_protocol::{Actuator, ErrorCode, Frame, Sensor, RW_READ, RW_WRITE};

/// The device's observable state: one byte per defined cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterFile {
    pub connected_device: u8,
    pub reserved_main: u8,
    pub power_state: u8,
    pub error_state: u8,
    pub temp_id: u8,
    pub temp_value: u8,
    pub humid_id: u8,
    pub humid_value: u8,
    pub led: u8,
    pub fan: u8,
    pub heater: u8,
    pub doors: u8,
    pub power_sensors: u8,
    pub power_actuators: u8,
    pub reset_sensors: u8,
    pub reset_actuators: u8,
}

impl RegisterFile {
    /// Initial state: every component connected and powered, no errors,
    /// actuators at rest. Sensor samples are filled in by the caller
    /// from the device RNG.
    pub(crate) fn power_on_reset() -> Self {
        RegisterFile {
            connected_device: 0xFF,
            reserved_main: 0x00,
            power_state: 0xFF,
            error_state: 0x00,
            temp_id: sensor::TEMP_ID_VALUE,
            temp_value: 0,
            humid_id: sensor::HUMID_ID_VALUE,
            humid_value: 0,
            led: 0,
            fan: 0,
            heater: 0,
            doors: 0,
            power_sensors: control::SENSOR_MASK,
            power_actuators: control::ACTUATOR_MASK,
            reset_sensors: 0,
            reset_actuators: 0,
        }
    }

    /// Applies one parsed command, returning the data byte for the
    /// response: the cell's current value for a read, the *requested*
    /// byte for a write. The latter means a masked write echoes more
    /// bits than it stored; that is the device's observed behavior and
    /// is pinned by tests.
    pub(crate) fn execute(&mut self, frame: &Frame) -> Result<u8, ErrorCode> {
        let write = match frame.rw {
            RW_READ => false,
            RW_WRITE => true,
            _ => return Err(ErrorCode::Invalid),
        };

        match frame.base {
            base::RESERVED => Err(ErrorCode::Forbidden),
            base::MAIN => {
                if write {
                    return Err(ErrorCode::Forbidden);
                }
                match frame.offset {
                    main::CONNECTED_DEVICE => Ok(self.connected_device),
                    main::RESERVED => Ok(self.reserved_main),
                    main::POWER_STATE => Ok(self.power_state),
                    main::ERROR_STATE => Ok(self.error_state),
                    _ => Err(ErrorCode::Invalid),
                }
            }
            base::SENSOR => {
                if write {
                    return Err(ErrorCode::Forbidden);
                }
                match frame.offset {
                    sensor::TEMP_ID => Ok(self.temp_id),
                    sensor::TEMP_VALUE => Ok(self.temp_value),
                    sensor::HUMID_ID => Ok(self.humid_id),
                    sensor::HUMID_VALUE => Ok(self.humid_value),
                    _ => Err(ErrorCode::Invalid),
                }
            }
            base::ACTUATOR => {
                let which = Actuator::ALL
                    .into_iter()
                    .find(|a| a.offset() == frame.offset)
                    .ok_or(ErrorCode::Invalid)?;
                if write {
                    let mask = match which {
                        Actuator::Heater => actuator::HEATER_MASK,
                        Actuator::Doors => actuator::DOORS_MASK,
                        _ => 0xFF,
                    };
                    *self.actuator_cell_mut(which) = frame.data & mask;
                    Ok(frame.data)
                } else {
                    Ok(*self.actuator_cell_mut(which))
                }
            }
            base::CONTROL => match frame.offset {
                control::POWER_SENSORS => {
                    if write {
                        self.write_power_sensors(frame.data);
                        Ok(frame.data)
                    } else {
                        Ok(self.power_sensors)
                    }
                }
                control::POWER_ACTUATORS => {
                    if write {
                        self.write_power_actuators(frame.data);
                        Ok(frame.data)
                    } else {
                        Ok(self.power_actuators)
                    }
                }
                control::RESET_SENSORS => {
                    if write {
                        self.write_reset_sensors(frame.data);
                        Ok(frame.data)
                    } else {
                        Ok(self.reset_sensors)
                    }
                }
                control::RESET_ACTUATORS => {
                    if write {
                        self.write_reset_actuators(frame.data);
                        Ok(frame.data)
                    } else {
                        Ok(self.reset_actuators)
                    }
                }
                _ => Err(ErrorCode::Invalid),
            },
            _ => Err(ErrorCode::Invalid),
        }
    }

    fn write_power_sensors(&mut self, requested: u8) {
        self.power_sensors = requested & control::SENSOR_MASK;
        for s in Sensor::ALL {
            self.couple_power(s.mask(), requested & s.mask() != 0);
        }
    }

    fn write_power_actuators(&mut self, requested: u8) {
        self.power_actuators = requested & control::ACTUATOR_MASK;
        for a in Actuator::ALL {
            self.couple_power(a.mask(), requested & a.mask() != 0);
        }
    }

    // Power bits propagate into both status bitmaps atomically with the
    // store; readers never observe the halves out of sync.
    fn couple_power(&mut self, mask: u8, on: bool) {
        if on {
            self.connected_device |= mask;
            self.power_state |= mask;
        } else {
            self.connected_device &= !mask;
            self.power_state &= !mask;
        }
    }

    fn write_reset_sensors(&mut self, requested: u8) {
        self.reset_sensors = requested & control::SENSOR_MASK;
        for s in Sensor::ALL {
            if requested & s.mask() != 0 {
                self.error_state &= !s.mask();
                // Self-clear: the bit reads back 0 once acted on.
                self.reset_sensors &= !s.mask();
            }
        }
    }

    fn write_reset_actuators(&mut self, requested: u8) {
        self.reset_actuators = requested & control::ACTUATOR_MASK;
        for a in Actuator::ALL {
            if requested & a.mask() != 0 {
                self.error_state &= !a.mask();
                *self.actuator_cell_mut(a) = 0;
                self.reset_actuators &= !a.mask();
            }
        }
    }

    fn actuator_cell_mut(&mut self, a: Actuator) -> &mut u8 {
        match a {
            Actuator::Led => &mut self.led,
            Actuator::Fan => &mut self.fan,
            Actuator::Heater => &mut self.heater,
            Actuator::Doors => &mut self.doors,
        }
    }
}
