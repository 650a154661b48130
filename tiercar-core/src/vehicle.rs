/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Top-level lifecycle controller.
//!
//! [`Vehicle`] is the only surface applications need: register parts with
//! [`add`](Vehicle::add), then [`start`](Vehicle::start) the loop.  `start`
//! blocks until the loop ends (loop count, interrupt, stop request or fault)
//! and always finishes with the single shutdown pass, so callers get a
//! [`RunSummary`] rather than a half-stopped vehicle.
//!
//! ```rust,no_run
//! use tiercar_core::part::{Outputs, Part, PartError, Runnable};
//! use tiercar_core::store::Value;
//! use tiercar_core::vehicle::Vehicle;
//!
//! struct Pilot;
//! impl Runnable for Pilot {
//!     fn run(&mut self, _inputs: &[Value]) -> Result<Outputs, PartError> {
//!         Ok(Some(vec![Value::Int(455)]))
//!     }
//! }
//!
//! let mut vehicle = Vehicle::new();
//! vehicle.add(Part::inline(Pilot), &[], &["throttle"], false, None).unwrap();
//! let summary = vehicle.start(20.0, Some(100), false).unwrap();
//! assert_eq!(summary.ticks, 100);
//! ```

use tracing::{info, warn};

use crate::config::DriveLoopConfig;
use crate::part::Part;
use crate::runtime::{
    LoopOptions, RegistrationError, Runtime, RuntimeState, ShutdownReport, TickError,
    TickReport, VehicleError,
};
use crate::signal::{StopHandle, StopReason};
use crate::store::Store;

/// Outcome of [`Vehicle::start`].
#[derive(Debug)]
pub struct RunSummary {
    pub ticks: u64,
    pub jitter_reports: u64,
    pub exit: StopReason,
    pub shutdown: ShutdownReport,
}

/// Registration-time validation plus start / stop.
pub struct Vehicle {
    runtime: Runtime,
}

impl Default for Vehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl Vehicle {
    /// A vehicle with an empty, lenient store.
    pub fn new() -> Self {
        Self::with_store(Store::new())
    }

    pub fn with_store(store: Store) -> Self {
        Self {
            runtime: Runtime::new(store),
        }
    }

    /// A vehicle whose store mode and shutdown timeout come from `config`.
    pub fn from_config(config: &DriveLoopConfig) -> Self {
        Self {
            runtime: Runtime::new(Store::with_mode(config.read_mode()))
                .with_shutdown_timeout(config.shutdown_timeout),
        }
    }

    pub fn store(&self) -> &Store {
        self.runtime.store()
    }

    pub fn state(&self) -> RuntimeState {
        self.runtime.state()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Handle for interrupting the loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.runtime.stop_handle()
    }

    /// Registers `part`.
    ///
    /// `inputs` are read from the store in order and passed positionally;
    /// `outputs` receive the part's results in order.  With `run_condition`
    /// set, the part only runs on ticks where that key holds a truthy value.
    ///
    /// # Errors
    /// Fails fast, registering nothing, when `threaded` disagrees with the
    /// part's capability, a key is empty, an output key repeats, or the
    /// vehicle has already started.
    pub fn add(
        &mut self,
        part: Part,
        inputs: &[&str],
        outputs: &[&str],
        threaded: bool,
        run_condition: Option<&str>,
    ) -> Result<(), RegistrationError> {
        let name = part.name().to_string();

        if self.runtime.state() != RuntimeState::Idle {
            return Err(RegistrationError::AlreadyStarted { part: name });
        }
        if part.is_threaded() != threaded {
            return Err(RegistrationError::ThreadedMismatch {
                part: name,
                requested: threaded,
                actual: if part.is_threaded() {
                    "threaded"
                } else {
                    "inline"
                },
            });
        }
        for (role, keys) in [("input", inputs), ("output", outputs)] {
            if let Some(index) = keys.iter().position(|k| k.trim().is_empty()) {
                return Err(RegistrationError::EmptyKey {
                    part: name,
                    role,
                    index,
                });
            }
        }
        for (i, key) in outputs.iter().enumerate() {
            if outputs[..i].contains(key) {
                return Err(RegistrationError::DuplicateOutput {
                    part: name,
                    key: key.to_string(),
                });
            }
        }
        if run_condition.is_some_and(|k| k.trim().is_empty()) {
            return Err(RegistrationError::EmptyRunCondition { part: name });
        }

        info!("Adding part {}.", name);
        self.runtime.register(
            part,
            inputs.iter().map(|k| k.to_string()).collect(),
            outputs.iter().map(|k| k.to_string()).collect(),
            run_condition.map(str::to_string),
        );
        Ok(())
    }

    /// Runs one tick without starting the loop.  Threaded parts only
    /// contribute once the vehicle has started.  Refused once the vehicle
    /// has been stopped, so no part runs after its shutdown.
    pub fn update(&mut self) -> Result<TickReport, TickError> {
        self.runtime.update()
    }

    /// Runs the loop at `rate_hz` until `max_loop_count` ticks, an interrupt
    /// or a stop request, then shuts every part down.
    pub fn start(
        &mut self,
        rate_hz: f64,
        max_loop_count: Option<u64>,
        verbose: bool,
    ) -> Result<RunSummary, VehicleError> {
        self.start_with(LoopOptions {
            rate_hz,
            max_loop_count,
            verbose,
        })
    }

    /// Same as [`start`](Self::start) with the loop settings of a config file.
    pub fn start_from_config(
        &mut self,
        config: &DriveLoopConfig,
    ) -> Result<RunSummary, VehicleError> {
        self.start_with(config.loop_options())
    }

    pub fn start_with(&mut self, opts: LoopOptions) -> Result<RunSummary, VehicleError> {
        if opts.period().is_none() {
            return Err(VehicleError::InvalidRate(opts.rate_hz));
        }
        match self.runtime.state() {
            RuntimeState::Idle => {}
            RuntimeState::Stopped => return Err(VehicleError::AlreadyStopped),
            RuntimeState::Running | RuntimeState::Stopping => {
                return Err(VehicleError::AlreadyStarted)
            }
        }

        let summary = self.runtime.run(&opts);
        // The loop has ended one way or another; teardown always follows.
        let shutdown = self.runtime.shutdown().unwrap_or_default();

        Ok(RunSummary {
            ticks: summary.ticks,
            jitter_reports: summary.jitter_reports,
            exit: summary.exit,
            shutdown,
        })
    }

    /// Shuts every part down.  Idempotent: only the first call (or the one
    /// performed by `start`) does any work; later calls return `None`.
    pub fn stop(&mut self) -> Option<ShutdownReport> {
        let report = self.runtime.shutdown();
        if report.is_none() {
            warn!("vehicle already stopped");
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
