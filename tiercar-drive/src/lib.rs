/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! TierCar drive – PWM actuator parts and scripted maneuvers
//!
//! ```text
//! lib.rs
//! ├── pwm        – PwmDriver trait, ActuatorError, simulated board
//! ├── pca9685    – PCA9685 channel part and gripper
//! └── maneuver   – ManeuverPilot part, vehicle wiring, direct sequence
//! ```

pub mod maneuver;
pub mod pca9685;
pub mod pwm;

pub use maneuver::{Maneuver, ManeuverPilot};
pub use pca9685::{Gripper, Pca9685};
pub use pwm::{ActuatorError, PwmDriver, SimulatedPwm};
