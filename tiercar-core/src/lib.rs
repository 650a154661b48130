/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! TierCar core – fixed-rate part scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── store/          – shared key/value data plane + dynamic Value
//! ├── part/           – capability traits, Part, background workers
//! ├── runtime/        – tick, drive loop, profiler, shutdown, error types
//! ├── signal          – stop latch and external StopHandle
//! ├── vehicle         – add / start / stop lifecycle controller
//! └── config/         – YAML vehicle configuration
//! ```

pub mod config;
pub mod part;
pub mod runtime;
pub mod signal;
pub mod store;
pub mod vehicle;

pub use part::{Part, Runnable, Shutdownable, ThreadedRunnable};
pub use store::{Store, Value};
pub use vehicle::{RunSummary, Vehicle};
