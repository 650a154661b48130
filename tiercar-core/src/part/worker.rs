/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Background worker owning one threaded part.
//!
//! The worker moves the part onto a dedicated OS thread and drives
//! [`ThreadedRunnable::update`] at the part's own period.  The tick talks to
//! it through two lock-free cells:
//!
//! ```text
//!  tick ──(latest inputs)──►  inputs cell  ──►  worker loop: update()
//!  tick ◄──(Published)─────── latest cell  ◄──  worker loop: publish
//! ```
//!
//! Both cells are `ArcSwap` snapshots, so neither side ever blocks the other
//! and a slow part can make its results stale but can never stall the tick.
//!
//! # Staleness
//! A publication older than the part's period plus [`STALENESS_SLACK`] is
//! never delivered.  If the worker has also stopped completing `update`
//! calls within that bound the tick gets [`WorkerFault::Stale`]; a worker
//! thread that has exited gets [`WorkerFault::Stopped`].
//!
//! # Lifecycle
//! `start()` exactly once → `request_stop()` → `join(timeout)`.  The thread
//! hands the part back when it exits so the runtime can still call its
//! shutdown capability.  A thread that does not exit within the timeout is
//! abandoned (detached) and reported as [`JoinOutcome::TimedOut`].

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::ThreadedRunnable;
use crate::signal::{StopReason, StopSignal};
use crate::store::Value;

/// Poll step used while waiting for a worker thread to finish.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Scheduling and compute allowance on top of a part's own period.
pub const STALENESS_SLACK: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("background worker '{0}' was already started")]
    AlreadyStarted(String),

    #[error("failed to spawn background worker '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a running worker had nothing deliverable for the tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerFault {
    /// The worker thread exited (its part panicked).
    Stopped,
    /// No `update` has completed within the staleness bound.
    Stale { age: Duration },
}

/// One result published by a background worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub values: Vec<Value>,
    /// Monotonic counter, starting at 1 for the first publication.
    pub sequence: u64,
    pub produced_at: Instant,
}

impl Published {
    /// Time since the worker produced this result.
    pub fn age(&self) -> Duration {
        self.produced_at.elapsed()
    }
}

/// Result of [`BackgroundWorker::join`].
pub enum JoinOutcome {
    /// The thread exited and returned the part.
    Joined(Box<dyn ThreadedRunnable>),
    /// `start()` was never called; the part is returned untouched.
    NeverStarted(Box<dyn ThreadedRunnable>),
    /// The thread did not exit within the timeout and was abandoned.
    TimedOut,
    /// The part panicked inside the worker; it is returned for shutdown.
    Panicked(Box<dyn ThreadedRunnable>),
    /// The thread itself unwound; the part is lost.
    Lost,
    /// `join` was already called.
    AlreadyJoined,
}

impl std::fmt::Debug for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JoinOutcome::Joined(_) => "Joined",
            JoinOutcome::NeverStarted(_) => "NeverStarted",
            JoinOutcome::TimedOut => "TimedOut",
            JoinOutcome::Panicked(_) => "Panicked",
            JoinOutcome::Lost => "Lost",
            JoinOutcome::AlreadyJoined => "AlreadyJoined",
        };
        f.write_str(label)
    }
}

struct Mailbox {
    inputs: ArcSwap<Vec<Value>>,
    latest: ArcSwapOption<Published>,
    sequence: AtomicU64,
    failures: AtomicU64,
    panicked: AtomicBool,
    epoch: Instant,
    /// Nanoseconds after `epoch` at which the last `update` completed.
    heartbeat: AtomicU64,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            inputs: ArcSwap::from_pointee(Vec::new()),
            latest: ArcSwapOption::empty(),
            sequence: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            panicked: AtomicBool::new(false),
            epoch: Instant::now(),
            heartbeat: AtomicU64::new(0),
        }
    }

    fn beat(&self) {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.heartbeat.store(nanos, Ordering::Release);
    }

    fn since_heartbeat(&self) -> Duration {
        let beat = Duration::from_nanos(self.heartbeat.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(beat)
    }

    fn publish(&self, values: Vec<Value>) {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.latest.store(Some(Arc::new(Published {
            values,
            sequence,
            produced_at: Instant::now(),
        })));
    }
}

enum WorkerState {
    Idle(Box<dyn ThreadedRunnable>),
    Running(JoinHandle<Box<dyn ThreadedRunnable>>),
    Finished,
}

/// Owns a threaded part and the thread that drives it.
pub struct BackgroundWorker {
    name: String,
    period: Duration,
    stop: StopSignal,
    mailbox: Arc<Mailbox>,
    state: WorkerState,
}

impl BackgroundWorker {
    pub fn new(name: impl Into<String>, part: Box<dyn ThreadedRunnable>) -> Self {
        Self {
            name: name.into(),
            period: part.period(),
            stop: StopSignal::new(),
            mailbox: Arc::new(Mailbox::new()),
            state: WorkerState::Idle(part),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.state, WorkerState::Running(h) if !h.is_finished())
    }

    /// Number of `update` calls that returned an error so far.
    pub fn failure_count(&self) -> u64 {
        self.mailbox.failures.load(Ordering::Acquire)
    }

    /// Age beyond which a publication is no longer delivered.
    pub fn stale_after(&self) -> Duration {
        self.period + STALENESS_SLACK
    }

    /// Spawns the worker thread.  Must be called at most once.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        let part = match mem::replace(&mut self.state, WorkerState::Finished) {
            WorkerState::Idle(part) => part,
            other => {
                self.state = other;
                return Err(WorkerError::AlreadyStarted(self.name.clone()));
            }
        };

        // The thread owns the part until it exits and hands it back.
        let name = self.name.clone();
        let stop = self.stop.clone();
        let mailbox = Arc::clone(&self.mailbox);
        mailbox.beat();
        let spawned = thread::Builder::new()
            .name(format!("part-{}", self.name))
            .spawn(move || worker_loop(name, part, stop, mailbox));

        match spawned {
            Ok(handle) => {
                debug!(part = %self.name, "background worker started");
                self.state = WorkerState::Running(handle);
                Ok(())
            }
            Err(source) => Err(WorkerError::Spawn {
                name: self.name.clone(),
                source,
            }),
        }
    }

    /// Hands `inputs` to the worker and returns its latest fresh
    /// publication, `None` when there is nothing new to deliver.
    ///
    /// Never waits for the part to compute.
    pub fn run_threaded(
        &self,
        inputs: Vec<Value>,
    ) -> Result<Option<Arc<Published>>, WorkerFault> {
        self.mailbox.inputs.store(Arc::new(inputs));

        let WorkerState::Running(handle) = &self.state else {
            return Ok(None);
        };
        if handle.is_finished() {
            return Err(WorkerFault::Stopped);
        }

        let bound = self.stale_after();
        if let Some(published) = self.latest() {
            if published.age() <= bound {
                return Ok(Some(published));
            }
        }
        let since = self.mailbox.since_heartbeat();
        if since > bound {
            Err(WorkerFault::Stale { age: since })
        } else {
            Ok(None)
        }
    }

    /// Latest publication, however old, without handing over new inputs.
    pub fn latest(&self) -> Option<Arc<Published>> {
        self.mailbox.latest.load_full()
    }

    /// Signals the worker loop to exit after its current iteration.
    pub fn request_stop(&self) {
        self.stop.request(StopReason::Requested);
    }

    /// Stops the worker (if not already asked) and waits up to `timeout`.
    pub fn join(&mut self, timeout: Duration) -> JoinOutcome {
        self.request_stop();
        match mem::replace(&mut self.state, WorkerState::Finished) {
            WorkerState::Idle(part) => JoinOutcome::NeverStarted(part),
            WorkerState::Finished => JoinOutcome::AlreadyJoined,
            WorkerState::Running(handle) => {
                let deadline = Instant::now() + timeout;
                while !handle.is_finished() {
                    if Instant::now() >= deadline {
                        warn!(
                            part = %self.name,
                            timeout_ms = timeout.as_millis() as u64,
                            "background worker did not stop in time, abandoning it"
                        );
                        return JoinOutcome::TimedOut;
                    }
                    thread::sleep(JOIN_POLL_INTERVAL);
                }
                match handle.join() {
                    Ok(part) if self.mailbox.panicked.load(Ordering::Acquire) => {
                        JoinOutcome::Panicked(part)
                    }
                    Ok(part) => JoinOutcome::Joined(part),
                    Err(_) => JoinOutcome::Lost,
                }
            }
        }
    }
}

fn worker_loop(
    name: String,
    mut part: Box<dyn ThreadedRunnable>,
    stop: StopSignal,
    mailbox: Arc<Mailbox>,
) -> Box<dyn ThreadedRunnable> {
    let period = part.period();

    while !stop.is_requested() {
        let inputs = mailbox.inputs.load_full();

        match catch_unwind(AssertUnwindSafe(|| part.update(&inputs))) {
            Ok(Ok(Some(values))) => {
                mailbox.publish(values);
                mailbox.beat();
            }
            Ok(Ok(None)) => mailbox.beat(),
            Ok(Err(e)) => {
                mailbox.failures.fetch_add(1, Ordering::AcqRel);
                warn!(part = %name, error = %e, "background update failed");
            }
            Err(_) => {
                error!(part = %name, "background update panicked, stopping worker");
                mailbox.panicked.store(true, Ordering::Release);
                break;
            }
        }

        if stop.wait_timeout(period) {
            break;
        }
    }

    debug!(
        part = %name,
        published = mailbox.sequence.load(Ordering::Acquire),
        "background worker exiting"
    );
    part
}

// ── Tests ─────────────────────────────────────────────────────────────────────
