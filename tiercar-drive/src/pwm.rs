/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! PWM driver boundary.
//!
//! The physical PCA9685 / I2C stack is an external collaborator: actuators
//! only talk to it through [`PwmDriver`].  [`SimulatedPwm`] stands in for the
//! board on machines without one and records every register write so tests
//! can inspect them.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use tiercar_core::part::PartError;

/// Lowest output frequency a PCA9685 can generate.
pub const MIN_FREQUENCY_HZ: u32 = 24;

/// Highest output frequency a PCA9685 can generate.
pub const MAX_FREQUENCY_HZ: u32 = 1526;

/// Largest 12-bit on/off tick count.
pub const MAX_TICKS: u16 = 4095;

#[derive(Debug, Error, PartialEq)]
pub enum ActuatorError {
    #[error("pulse {pulse} scales to {ticks} ticks, outside 0..={max}", max = MAX_TICKS)]
    PulseOutOfRange { pulse: i64, ticks: i64 },

    #[error("PWM frequency {0}Hz outside {min}..={max}Hz", min = MIN_FREQUENCY_HZ, max = MAX_FREQUENCY_HZ)]
    InvalidFrequency(u32),

    #[error("channel {0} does not exist on a 16-channel board")]
    InvalidChannel(u8),

    #[error("I2C device {address:#04x}: {message}")]
    Bus { address: u16, message: String },
}

impl From<ActuatorError> for PartError {
    fn from(e: ActuatorError) -> Self {
        PartError::Other(e.into())
    }
}

/// Register-level access to one PWM board.
pub trait PwmDriver: Send {
    fn set_frequency(&mut self, hz: u32) -> Result<(), ActuatorError>;

    /// Sets the on/off tick counts of one channel.
    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), ActuatorError>;
}

/// One recorded register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmWrite {
    Frequency(u32),
    Channel { channel: u8, on: u16, off: u16 },
}

/// In-memory stand-in for a PCA9685 board.
#[derive(Debug, Clone)]
pub struct SimulatedPwm {
    address: u16,
    busnum: Option<u8>,
    writes: Arc<Mutex<Vec<PwmWrite>>>,
}

impl SimulatedPwm {
    /// Opens the board at `address`, on `busnum` when given, else on the
    /// platform's default bus.
    pub fn open(address: u16, busnum: Option<u8>) -> Result<Self, ActuatorError> {
        if address > 0x7F {
            return Err(ActuatorError::Bus {
                address,
                message: "not a 7-bit I2C address".into(),
            });
        }
        debug!(address = address, bus = ?busnum, "opened simulated PWM board");
        Ok(Self {
            address,
            busnum,
            writes: Arc::default(),
        })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn busnum(&self) -> Option<u8> {
        self.busnum
    }

    /// Shared view of every write made through this board (and its clones).
    pub fn writes(&self) -> Arc<Mutex<Vec<PwmWrite>>> {
        Arc::clone(&self.writes)
    }

    fn record(&self, write: PwmWrite) {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(write);
    }
}

impl PwmDriver for SimulatedPwm {
    fn set_frequency(&mut self, hz: u32) -> Result<(), ActuatorError> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
            return Err(ActuatorError::InvalidFrequency(hz));
        }
        debug!(address = self.address, hz, "set PWM frequency");
        self.record(PwmWrite::Frequency(hz));
        Ok(())
    }

    fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<(), ActuatorError> {
        if channel >= 16 {
            return Err(ActuatorError::InvalidChannel(channel));
        }
        debug!(address = self.address, channel, on, off, "set PWM");
        self.record(PwmWrite::Channel { channel, on, off });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_writes_in_order() {
        let mut pwm = SimulatedPwm::open(0x40, Some(1)).unwrap();
        pwm.set_frequency(60).unwrap();
        pwm.set_pwm(3, 0, 455).unwrap();
        assert_eq!(
            *pwm.writes().lock().unwrap(),
            vec![
                PwmWrite::Frequency(60),
                PwmWrite::Channel {
                    channel: 3,
                    on: 0,
                    off: 455
                }
            ]
        );
        assert_eq!(pwm.busnum(), Some(1));
    }

    #[test]
    fn rejects_unsupported_frequency_and_channel() {
        let mut pwm = SimulatedPwm::open(0x40, None).unwrap();
        assert_eq!(pwm.set_frequency(10), Err(ActuatorError::InvalidFrequency(10)));
        assert_eq!(pwm.set_pwm(16, 0, 1), Err(ActuatorError::InvalidChannel(16)));
        assert!(pwm.writes().lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_addresses_wider_than_seven_bits() {
        assert!(matches!(
            SimulatedPwm::open(0x80, None),
            Err(ActuatorError::Bus { address: 0x80, .. })
        ));
    }

    #[test]
    fn actuator_errors_convert_into_part_errors() {
        let e: PartError = ActuatorError::InvalidChannel(20).into();
        assert!(e.to_string().contains("channel 20"));
    }
}
