/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Part capability contract and adapter.
//!
//! A part is any component that contributes computation to a tick: a sensor
//! read, a pilot, an actuator write.  The scheduler does not probe parts for
//! methods; instead each part implements one of two execution capabilities and
//! may advertise a third:
//!
//! | Trait | Executed by | When |
//! |---|---|---|
//! | [`Runnable`] | the tick, inline | every eligible tick |
//! | [`ThreadedRunnable`] | a dedicated [`BackgroundWorker`] | its own cadence |
//! | [`Shutdownable`] | the runtime | once, during shutdown |
//!
//! [`Part`] is the closed set the runtime dispatches on.

pub mod worker;

pub use worker::{BackgroundWorker, JoinOutcome, Published, WorkerError, WorkerFault};

use std::time::Duration;

use thiserror::Error;

use crate::store::Value;

/// Values produced by one invocation.  `None` means "nothing to write this
/// tick"; the Store keeps its previous values.
pub type Outputs = Option<Vec<Value>>;

/// Errors a part reports back to the runtime.
#[derive(Debug, Error)]
pub enum PartError {
    #[error("expected {expected} input(s), got {actual}")]
    InputArity { expected: usize, actual: usize },

    #[error("input {index} must be {expected}, got {actual}")]
    InputType {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PartError {
    pub fn failed(msg: impl Into<String>) -> Self {
        PartError::Failed(msg.into())
    }
}

/// Optional teardown capability.
pub trait Shutdownable {
    fn shutdown(&mut self) -> Result<(), PartError>;
}

/// A part executed inline on the tick thread.
///
/// Its latency is paid directly out of the tick budget.
pub trait Runnable: Send {
    fn run(&mut self, inputs: &[Value]) -> Result<Outputs, PartError>;

    /// Returns the shutdown capability, if the part has one.
    fn as_shutdownable(&mut self) -> Option<&mut dyn Shutdownable> {
        None
    }
}

/// A part whose compute runs in a persistent background worker.
///
/// The worker calls [`update`](Self::update) every [`period`](Self::period)
/// with the most recent inputs the tick handed over; whatever it returns is
/// published and picked up by the next tick without waiting.
pub trait ThreadedRunnable: Send + 'static {
    fn update(&mut self, inputs: &[Value]) -> Result<Outputs, PartError>;

    /// Pause between two `update` calls.
    fn period(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn as_shutdownable(&mut self) -> Option<&mut dyn Shutdownable> {
        None
    }
}

/// Execution capability of a registered part.
pub enum PartKind {
    Inline(Box<dyn Runnable>),
    Threaded(Box<dyn ThreadedRunnable>),
}

/// A named part ready to be registered with a vehicle.
pub struct Part {
    pub(crate) name: String,
    pub(crate) kind: PartKind,
}

impl Part {
    /// Wraps a part that runs inline on the tick.
    pub fn inline<P: Runnable + 'static>(part: P) -> Self {
        Self {
            name: short_type_name::<P>().to_string(),
            kind: PartKind::Inline(Box::new(part)),
        }
    }

    /// Wraps a part that runs in its own background worker.
    pub fn threaded<P: ThreadedRunnable>(part: P) -> Self {
        Self {
            name: short_type_name::<P>().to_string(),
            kind: PartKind::Threaded(Box::new(part)),
        }
    }

    /// Overrides the type-derived name used in logs and reports.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.kind, PartKind::Threaded(_))
    }
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.name)
            .field("threaded", &self.is_threaded())
            .finish()
    }
}

/// `tiercar_drive::pca9685::Pca9685` → `Pca9685`.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ── Input helpers ─────────────────────────────────────────────────────────────

/// Fails unless exactly `expected` inputs were supplied.
pub fn expect_arity(inputs: &[Value], expected: usize) -> Result<(), PartError> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(PartError::InputArity {
            expected,
            actual: inputs.len(),
        })
    }
}

/// Returns input `index` or an arity error.
pub fn arg(inputs: &[Value], index: usize) -> Result<&Value, PartError> {
    inputs.get(index).ok_or(PartError::InputArity {
        expected: index + 1,
        actual: inputs.len(),
    })
}

/// Returns input `index` as an integer or a type error.
pub fn arg_i64(inputs: &[Value], index: usize) -> Result<i64, PartError> {
    let v = arg(inputs, index)?;
    v.as_i64().ok_or(PartError::InputType {
        index,
        expected: "int",
        actual: v.type_name(),
    })
}

/// Returns input `index` as a float or a type error.
pub fn arg_f64(inputs: &[Value], index: usize) -> Result<f64, PartError> {
    let v = arg(inputs, index)?;
    v.as_f64().ok_or(PartError::InputType {
        index,
        expected: "float",
        actual: v.type_name(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Runnable for Echo {
        fn run(&mut self, inputs: &[Value]) -> Result<Outputs, PartError> {
            Ok(Some(inputs.to_vec()))
        }
    }

    struct Ticker;

    impl ThreadedRunnable for Ticker {
        fn update(&mut self, _inputs: &[Value]) -> Result<Outputs, PartError> {
            Ok(None)
        }
    }

    #[test]
    fn part_name_defaults_to_short_type_name() {
        assert_eq!(Part::inline(Echo).name(), "Echo");
        assert_eq!(Part::threaded(Ticker).name(), "Ticker");
    }

    #[test]
    fn named_overrides_type_name() {
        assert_eq!(Part::inline(Echo).named("throttle").name(), "throttle");
    }

    #[test]
    fn part_kind_reports_threading() {
        assert!(!Part::inline(Echo).is_threaded());
        assert!(Part::threaded(Ticker).is_threaded());
    }

    #[test]
    fn missing_shutdown_capability_is_none() {
        let mut echo = Echo;
        assert!(echo.as_shutdownable().is_none());
    }

    #[test]
    fn short_type_name_strips_paths_and_generics() {
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
        assert_eq!(short_type_name::<Echo>(), "Echo");
    }

    #[test]
    fn arg_helpers_report_arity_and_type() {
        let inputs = vec![Value::Int(455), Value::from("left")];
        assert_eq!(arg_i64(&inputs, 0).unwrap(), 455);
        assert!(matches!(
            arg_i64(&inputs, 1),
            Err(PartError::InputType { index: 1, expected: "int", actual: "text" })
        ));
        assert!(matches!(
            arg(&inputs, 2),
            Err(PartError::InputArity { expected: 3, actual: 2 })
        ));
        assert!(expect_arity(&inputs, 2).is_ok());
        assert!(expect_arity(&inputs, 1).is_err());
        assert_eq!(arg_f64(&inputs, 0).unwrap(), 455.0);
    }
}
