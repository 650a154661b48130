/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scripted maneuvers.
//!
//! A [`Maneuver`] is a list of throttle/steering commands keyed by tick.
//! [`ManeuverPilot`] replays it inside the drive loop; [`drive_direct`]
//! plays the same commands straight to the actuators with wall-clock waits.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use tiercar_core::config::VehicleConfig;
use tiercar_core::part::{Outputs, PartError, Runnable};
use tiercar_core::runtime::error::RegistrationError;
use tiercar_core::signal::StopHandle;
use tiercar_core::store::Value;
use tiercar_core::{Part, Vehicle};

use crate::pca9685::Pca9685;
use crate::pwm::{ActuatorError, PwmDriver};

pub const FORWARD_THROTTLE: i64 = 455;
pub const FORWARD_STEERING: i64 = 410;

/// Delay between the throttle and steering commands of "move forward".
pub const FORWARD_STEER_AFTER: Duration = Duration::from_secs(1);

/// Store keys the pilot writes and the actuators read.
pub const THROTTLE_KEY: &str = "pilot/throttle";
pub const STEERING_KEY: &str = "pilot/steering";

/// Commands issued at one tick.  `None` leaves that channel as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub at_tick: u64,
    pub throttle: Option<i64>,
    pub steering: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maneuver {
    steps: Vec<Step>,
    /// Ticks the last command is held before the maneuver counts as done.
    hold_ticks: u64,
}

impl Maneuver {
    pub fn new(mut steps: Vec<Step>, hold_ticks: u64) -> Self {
        steps.sort_by_key(|s| s.at_tick);
        Self { steps, hold_ticks }
    }

    /// Throttle forward, then steer once [`FORWARD_STEER_AFTER`] has
    /// elapsed at `rate_hz`.
    pub fn move_forward(rate_hz: f64) -> Self {
        let steer_tick = (FORWARD_STEER_AFTER.as_secs_f64() * rate_hz).round() as u64;
        Self::new(
            vec![
                Step {
                    at_tick: 0,
                    throttle: Some(FORWARD_THROTTLE),
                    steering: None,
                },
                Step {
                    at_tick: steer_tick,
                    throttle: None,
                    steering: Some(FORWARD_STEERING),
                },
            ],
            1,
        )
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Tick at which every step has run and the hold has elapsed.
    pub fn end_tick(&self) -> u64 {
        self.steps.last().map_or(0, |s| s.at_tick) + self.hold_ticks
    }
}

/// Replays a [`Maneuver`], one call per tick.
///
/// Outputs `[throttle, steering]`; a channel not commanded yet is `Null`.
/// With a stop handle attached, asks the vehicle to stop once the maneuver
/// ends.
pub struct ManeuverPilot {
    maneuver: Maneuver,
    tick: u64,
    next_step: usize,
    throttle: Option<i64>,
    steering: Option<i64>,
    on_finish: Option<StopHandle>,
}

impl ManeuverPilot {
    pub fn new(maneuver: Maneuver) -> Self {
        Self {
            maneuver,
            tick: 0,
            next_step: 0,
            throttle: None,
            steering: None,
            on_finish: None,
        }
    }

    pub fn stop_when_done(mut self, handle: StopHandle) -> Self {
        self.on_finish = Some(handle);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.tick > self.maneuver.end_tick()
    }
}

impl Runnable for ManeuverPilot {
    fn run(&mut self, _inputs: &[Value]) -> Result<Outputs, PartError> {
        while let Some(step) = self.maneuver.steps.get(self.next_step) {
            if step.at_tick > self.tick {
                break;
            }
            if step.throttle.is_some() {
                self.throttle = step.throttle;
            }
            if step.steering.is_some() {
                self.steering = step.steering;
            }
            debug!(tick = self.tick, ?step, "maneuver step");
            self.next_step += 1;
        }

        if self.tick == self.maneuver.end_tick() {
            info!(tick = self.tick, "maneuver complete");
            if let Some(handle) = &self.on_finish {
                handle.request_stop();
            }
        }
        self.tick += 1;

        Ok(Some(vec![self.throttle.into(), self.steering.into()]))
    }
}

/// Builds a vehicle that flies `maneuver` through throttle and steering
/// actuators opened with `open`.
///
/// Actuators named `throttle` and `steering` in `config` are used, falling
/// back to channels 0 and 1.
pub fn build_vehicle<D, F>(
    config: &VehicleConfig,
    maneuver: Maneuver,
    mut open: F,
) -> anyhow::Result<Vehicle>
where
    D: PwmDriver + 'static,
    F: FnMut(u16, Option<u8>) -> Result<D, ActuatorError>,
{
    let mut vehicle = Vehicle::from_config(&config.drive_loop);
    let pilot = ManeuverPilot::new(maneuver).stop_when_done(vehicle.stop_handle());
    vehicle.add(
        Part::inline(pilot),
        &[],
        &[THROTTLE_KEY, STEERING_KEY],
        false,
        None,
    )?;

    for (name, channel, key) in [("throttle", 0, THROTTLE_KEY), ("steering", 1, STEERING_KEY)] {
        let wiring = config.actuator_or_default(name, channel);
        let driver = open(wiring.address, wiring.busnum)?;
        let actuator = Pca9685::new(driver, &wiring)?;
        add_actuator(&mut vehicle, name, actuator, key)?;
    }
    Ok(vehicle)
}

fn add_actuator<D: PwmDriver + 'static>(
    vehicle: &mut Vehicle,
    name: &str,
    actuator: Pca9685<D>,
    key: &str,
) -> Result<(), RegistrationError> {
    vehicle.add(Part::inline(actuator).named(name), &[key], &[], false, None)
}

/// The literal "move forward" sequence: throttle, wait, steer.
pub fn drive_direct<D: PwmDriver>(
    throttle: &mut Pca9685<D>,
    steering: &mut Pca9685<D>,
    steer_after: Duration,
) -> Result<(), ActuatorError> {
    info!(pulse = FORWARD_THROTTLE, "throttle forward");
    throttle.run(FORWARD_THROTTLE)?;
    thread::sleep(steer_after);
    info!(pulse = FORWARD_STEERING, "steering");
    steering.run(FORWARD_STEERING)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
