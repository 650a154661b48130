/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! PCA9685-driven actuators: the motor controller / servo part and the
//! gripper.
//!
//! Pulse values are expressed at the 60 Hz reference frequency.  A board
//! running at another frequency scales them by `frequency / 60` before they
//! hit the register, so the same pulse means the same duty cycle everywhere.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use tiercar_core::config::{ActuatorConfig, DEFAULT_PWM_FREQUENCY};
use tiercar_core::part::{arg, Outputs, PartError, Runnable};
use tiercar_core::store::Value;

use crate::pwm::{ActuatorError, PwmDriver, MAX_TICKS};

/// First and second pulse of a gripper pick.
pub const PICK_PULSES: [i64; 2] = [200, 300];

/// Time the gripper holds the first pick pulse.
pub const DEFAULT_PICK_HOLD: Duration = Duration::from_millis(500);

/// One PWM channel driving an ESC or servo.
pub struct Pca9685<D: PwmDriver> {
    driver: D,
    channel: u8,
    pwm_scale: f64,
}

impl<D: PwmDriver> Pca9685<D> {
    /// Sets the board frequency, then waits the configured settle delay so
    /// the first pulse does not make the ESC jump.
    pub fn new(mut driver: D, config: &ActuatorConfig) -> Result<Self, ActuatorError> {
        driver.set_frequency(config.frequency)?;
        if !config.init_delay.is_zero() {
            thread::sleep(config.init_delay);
        }
        info!(
            channel = config.channel,
            address = config.address,
            frequency = config.frequency,
            "PCA9685 channel ready"
        );
        Ok(Self {
            driver,
            channel: config.channel,
            pwm_scale: config.frequency as f64 / DEFAULT_PWM_FREQUENCY as f64,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn pwm_scale(&self) -> f64 {
        self.pwm_scale
    }

    /// Writes `pulse` (reference-frequency units) to the channel.
    pub fn set_pulse(&mut self, pulse: i64) -> Result<(), ActuatorError> {
        // Truncates toward zero.
        let ticks = (pulse as f64 * self.pwm_scale) as i64;
        let off = u16::try_from(ticks)
            .ok()
            .filter(|t| *t <= MAX_TICKS)
            .ok_or(ActuatorError::PulseOutOfRange { pulse, ticks })?;
        debug!(channel = self.channel, pulse, off, "set pulse");
        self.driver.set_pwm(self.channel, 0, off)
    }

    pub fn run(&mut self, pulse: i64) -> Result<(), ActuatorError> {
        self.set_pulse(pulse)
    }
}

/// Reads an optional pulse command; `Null` means nothing commanded yet.
fn pulse_input(inputs: &[Value]) -> Result<Option<i64>, PartError> {
    let v = arg(inputs, 0)?;
    if v.is_null() {
        return Ok(None);
    }
    v.as_i64().map(Some).ok_or(PartError::InputType {
        index: 0,
        expected: "int",
        actual: v.type_name(),
    })
}

impl<D: PwmDriver + 'static> Runnable for Pca9685<D> {
    /// Input: `[pulse]`.  No outputs.
    fn run(&mut self, inputs: &[Value]) -> Result<Outputs, PartError> {
        if let Some(pulse) = pulse_input(inputs)? {
            Pca9685::run(self, pulse)?;
        }
        Ok(None)
    }
}

/// Gripper servo on a PCA9685 channel.
pub struct Gripper<D: PwmDriver> {
    servo: Pca9685<D>,
    hold: Duration,
}

impl<D: PwmDriver> Gripper<D> {
    pub fn new(driver: D, config: &ActuatorConfig) -> Result<Self, ActuatorError> {
        Ok(Self {
            servo: Pca9685::new(driver, config)?,
            hold: DEFAULT_PICK_HOLD,
        })
    }

    /// Changes how long [`pick`](Self::pick) holds the first pulse.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn set_pulse(&mut self, pulse: i64) -> Result<(), ActuatorError> {
        self.servo.set_pulse(pulse)
    }

    /// Closes on an object and returns to the rest position.
    pub fn pick(&mut self) -> Result<(), ActuatorError> {
        info!(channel = self.servo.channel(), "gripper pick");
        self.set_pulse(PICK_PULSES[0])?;
        thread::sleep(self.hold);
        self.set_pulse(PICK_PULSES[1])
    }

    pub fn run(&mut self, pulse: i64) -> Result<(), ActuatorError> {
        self.set_pulse(pulse)
    }
}

impl<D: PwmDriver + 'static> Runnable for Gripper<D> {
    fn run(&mut self, inputs: &[Value]) -> Result<Outputs, PartError> {
        if let Some(pulse) = pulse_input(inputs)? {
            Gripper::run(self, pulse)?;
        }
        Ok(None)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwm::{PwmWrite, SimulatedPwm};
    use std::time::Instant;

    fn config(channel: u8, frequency: u32) -> ActuatorConfig {
        ActuatorConfig {
            frequency,
            init_delay: Duration::ZERO,
            ..ActuatorConfig::on_channel(channel)
        }
    }

    fn channel_writes(pwm: &SimulatedPwm) -> Vec<u16> {
        pwm.writes()
            .lock()
            .unwrap()
            .iter()
            .filter_map(|w| match w {
                PwmWrite::Channel { off, .. } => Some(*off),
                PwmWrite::Frequency(_) => None,
            })
            .collect()
    }

    #[test]
    fn new_sets_frequency_before_any_pulse() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let mut esc = Pca9685::new(pwm.clone(), &config(0, 60)).unwrap();
        esc.set_pulse(455).unwrap();
        assert_eq!(
            *pwm.writes().lock().unwrap(),
            vec![
                PwmWrite::Frequency(60),
                PwmWrite::Channel {
                    channel: 0,
                    on: 0,
                    off: 455
                }
            ]
        );
    }

    #[test]
    fn pulse_is_scaled_by_frequency_ratio() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let mut servo = Pca9685::new(pwm.clone(), &config(1, 90)).unwrap();
        assert_eq!(servo.pwm_scale(), 1.5);
        servo.set_pulse(410).unwrap();
        servo.set_pulse(3).unwrap(); // 4.5 truncates to 4
        assert_eq!(channel_writes(&pwm), vec![615, 4]);
    }

    #[test]
    fn out_of_range_pulses_are_rejected() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let mut esc = Pca9685::new(pwm.clone(), &config(0, 60)).unwrap();
        assert_eq!(
            esc.set_pulse(5000),
            Err(ActuatorError::PulseOutOfRange {
                pulse: 5000,
                ticks: 5000
            })
        );
        assert!(esc.set_pulse(-1).is_err());
        assert!(channel_writes(&pwm).is_empty());
    }

    #[test]
    fn init_waits_for_settle_delay() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let cfg = ActuatorConfig {
            init_delay: Duration::from_millis(30),
            ..ActuatorConfig::on_channel(0)
        };
        let start = Instant::now();
        Pca9685::new(pwm, &cfg).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn unsupported_frequency_fails_construction() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        assert!(matches!(
            Pca9685::new(pwm, &config(0, 5000)),
            Err(ActuatorError::InvalidFrequency(5000))
        ));
    }

    #[test]
    fn runnable_ignores_null_and_rejects_text() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let mut esc = Pca9685::new(pwm.clone(), &config(0, 60)).unwrap();
        assert!(Runnable::run(&mut esc, &[Value::Null]).unwrap().is_none());
        assert!(Runnable::run(&mut esc, &[Value::from("fast")]).is_err());
        Runnable::run(&mut esc, &[Value::Int(400)]).unwrap();
        assert_eq!(channel_writes(&pwm), vec![400]);
    }

    #[test]
    fn gripper_pick_sends_both_pulses_with_hold() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let mut gripper = Gripper::new(pwm.clone(), &config(2, 60))
            .unwrap()
            .with_hold(Duration::from_millis(20));
        let start = Instant::now();
        gripper.pick().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(channel_writes(&pwm), vec![200, 300]);
    }

    #[test]
    fn gripper_run_forwards_pulse() {
        let pwm = SimulatedPwm::open(0x40, None).unwrap();
        let mut gripper = Gripper::new(pwm.clone(), &config(2, 120)).unwrap();
        Runnable::run(&mut gripper, &[Value::Int(250)]).unwrap();
        assert_eq!(channel_writes(&pwm), vec![500]);
    }
}
