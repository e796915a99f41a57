// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated climate behind the sensor cells.
//!
//! Each sensor tracks a persistent baseline that drifts by a small random
//! amount per step, nudged by the heater and fan when those are running
//! and powered. The published sample is the baseline plus a little jitter.
//! Baselines wrap modulo 256 (8-bit arithmetic), which consumers rely on.
//!
//! Powered sensors also fault spontaneously: each step has a 1-in-100
//! chance of latching the sensor's error bit. The reset path exists to
//! clear exactly these.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::registers::RegisterFile;

// Status-bitmap positions the dynamics keys on. The humidity sensor's
// slot in the shared power/error bitmaps is bit 2 (colliding with the
// fan), even though the control registers address it at bit 4.
const TEMP_POWER: u8 = 0x01;
const HUMID_POWER: u8 = 0x04;
const FAN_POWER: u8 = 0x04;
const HEATER_POWER: u8 = 0x10;

/// Fan speeds above this move the climate.
const FAN_EFFECT_THRESHOLD: u8 = 128;

/// Denominator of the per-step fault probability.
const ERROR_INJECTION_ODDS: u32 = 100;

pub(crate) struct Climate {
    rng: ChaCha8Rng,
    temp_base: u8,
    humid_base: u8,
}

impl Climate {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Climate {
            rng,
            temp_base: 128,
            humid_base: 128,
        }
    }

    /// Draws an initial sensor sample.
    pub fn initial_sample(&mut self) -> u8 {
        self.rng.gen()
    }

    /// Advances the climate by one step, updating the sensor cells and
    /// possibly latching error bits. Unpowered sensors hold still.
    pub fn step(&mut self, regs: &mut RegisterFile) {
        if regs.power_state & TEMP_POWER != 0 {
            let mut delta: i16 = self.rng.gen_range(-2..=2);
            if regs.heater > 0 && regs.power_state & HEATER_POWER != 0 {
                delta += i16::from(regs.heater / 2);
            }
            if regs.fan > FAN_EFFECT_THRESHOLD && regs.power_state & FAN_POWER != 0 {
                delta -= 1;
            }
            self.temp_base = self.temp_base.wrapping_add(delta as u8);
            regs.temp_value = self.temp_base.wrapping_add(self.rng.gen_range(0..3));
            if self.rng.gen_range(0..ERROR_INJECTION_ODDS) == 0 {
                regs.error_state |= TEMP_POWER;
            }
        }

        if regs.power_state & HUMID_POWER != 0 {
            let mut delta: i16 = self.rng.gen_range(-2..=2);
            if regs.fan > FAN_EFFECT_THRESHOLD && regs.power_state & FAN_POWER != 0 {
                delta -= 1;
            }
            if regs.heater > 0 && regs.power_state & HEATER_POWER != 0 {
                delta -= i16::from(regs.heater / 3);
            }
            self.humid_base = self.humid_base.wrapping_add(delta as u8);
            regs.humid_value = self.humid_base.wrapping_add(self.rng.gen_range(0..3));
            if self.rng.gen_range(0..ERROR_INJECTION_ODDS) == 0 {
                regs.error_state |= HUMID_POWER;
            }
        }
    }
}
