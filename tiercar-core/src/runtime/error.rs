/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the part runtime.
//!
//! The layers fail differently and are recovered differently:
//!
//! | Type | Raised by | Recovery |
//! |---|---|---|
//! | [`RegistrationError`] | `Vehicle::add` | none: surfaced at the call site, loop never starts |
//! | [`PartExecutionError`] | one part in one tick | logged, the tick continues with the next part |
//! | [`TickError`] | a whole tick | ends the loop with a fault, or refused before any part runs |
//! | [`ShutdownError`] | one part during teardown | collected in [`ShutdownReport`], never re-raised |
//! | [`VehicleError`] | `Vehicle::start` | returned to the caller |
//!
//! Jitter is deliberately absent: overruns are reported as `warn!` events in
//! verbose mode and never fail anything.

use thiserror::Error;

use super::RuntimeState;
use crate::part::PartError;
use crate::store::StoreError;

/// Malformed `add()` arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("part '{part}': threaded = {requested} but the part is {actual}")]
    ThreadedMismatch {
        part: String,
        requested: bool,
        actual: &'static str,
    },

    #[error("part '{part}': {role} key at position {index} is empty")]
    EmptyKey {
        part: String,
        role: &'static str,
        index: usize,
    },

    #[error("part '{part}': output key '{key}' is listed more than once")]
    DuplicateOutput { part: String, key: String },

    #[error("part '{part}': run condition key is empty")]
    EmptyRunCondition { part: String },

    #[error("part '{part}' cannot be added after the vehicle has started")]
    AlreadyStarted { part: String },
}

/// Why one part failed during one tick.
#[derive(Debug, Error)]
pub enum PartExecutionError {
    #[error("part '{part}' failed: {source}")]
    Failed {
        part: String,
        #[source]
        source: PartError,
    },

    #[error("part '{part}' panicked: {message}")]
    Panicked { part: String, message: String },

    #[error("part '{part}' returned {actual} output(s) for {expected} output key(s)")]
    OutputArity {
        part: String,
        expected: usize,
        actual: usize,
    },

    #[error("part '{part}': store access failed: {source}")]
    Store {
        part: String,
        #[source]
        source: StoreError,
    },

    #[error("background worker of part '{part}' has stopped, no output delivered")]
    WorkerStopped { part: String },

    #[error("part '{part}' has not produced a result for {age_ms}ms, stale output withheld")]
    Stale { part: String, age_ms: u64 },
}

impl PartExecutionError {
    /// Name of the part that failed.
    pub fn part(&self) -> &str {
        match self {
            PartExecutionError::Failed { part, .. }
            | PartExecutionError::Panicked { part, .. }
            | PartExecutionError::OutputArity { part, .. }
            | PartExecutionError::Store { part, .. }
            | PartExecutionError::WorkerStopped { part }
            | PartExecutionError::Stale { part, .. } => part,
        }
    }
}

/// Why a whole tick could not run.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("cannot run a tick while the vehicle is {0:?}")]
    NotRunnable(RuntimeState),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why one part's teardown did not complete cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("part '{part}' shutdown failed: {source}")]
    Failed {
        part: String,
        #[source]
        source: PartError,
    },

    #[error("part '{part}' panicked during shutdown: {message}")]
    Panicked { part: String, message: String },

    #[error("background worker of part '{part}' did not stop within {timeout_ms}ms")]
    WorkerTimedOut { part: String, timeout_ms: u64 },

    #[error("background worker of part '{part}' panicked")]
    WorkerPanicked { part: String },
}

impl ShutdownError {
    pub fn part(&self) -> &str {
        match self {
            ShutdownError::Failed { part, .. }
            | ShutdownError::Panicked { part, .. }
            | ShutdownError::WorkerTimedOut { part, .. }
            | ShutdownError::WorkerPanicked { part } => part,
        }
    }
}

/// Outcome of the single shutdown pass.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Every part, in registration order, whose teardown was attempted.
    pub attempted: Vec<String>,
    /// Parts that did not shut down cleanly.
    pub failures: Vec<ShutdownError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Errors surfaced by `Vehicle::start`.
#[derive(Debug, Error, PartialEq)]
pub enum VehicleError {
    #[error("rate_hz must be a positive, finite number (got {0})")]
    InvalidRate(f64),

    #[error("vehicle was already started")]
    AlreadyStarted,

    #[error("vehicle was already stopped")]
    AlreadyStopped,
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_accessor_covers_every_variant() {
        let errs = vec![
            PartExecutionError::Failed {
                part: "a".into(),
                source: PartError::failed("x"),
            },
            PartExecutionError::Panicked {
                part: "a".into(),
                message: "boom".into(),
            },
            PartExecutionError::OutputArity {
                part: "a".into(),
                expected: 1,
                actual: 2,
            },
            PartExecutionError::Store {
                part: "a".into(),
                source: StoreError::Poisoned,
            },
            PartExecutionError::WorkerStopped { part: "a".into() },
            PartExecutionError::Stale {
                part: "a".into(),
                age_ms: 600,
            },
        ];
        assert!(errs.iter().all(|e| e.part() == "a"));
    }

    #[test]
    fn registration_error_messages_name_the_part() {
        let e = RegistrationError::DuplicateOutput {
            part: "Pilot".into(),
            key: "throttle".into(),
        };
        assert_eq!(
            e.to_string(),
            "part 'Pilot': output key 'throttle' is listed more than once"
        );
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(p.as_ref()), "non-string panic payload");
    }

    #[test]
    fn empty_report_is_clean() {
        assert!(ShutdownReport::default().is_clean());
    }
}
