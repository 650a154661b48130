//! Fixed-rate part scheduler.
//!
//! [`Runtime`] owns the ordered list of registered parts, the shared
//! [`Store`] they communicate through and one [`BackgroundWorker`] per
//! threaded part.  It drives the state machine
//!
//! ```text
//! Idle ──run()──► Running ──(loop count | interrupt | stop | fault)──► Stopping ──shutdown()──► Stopped
//! ```
//!
//! # Tick
//! For every registration, in registration order:
//! 1. evaluate the run condition (falsy ⇒ skip, no Store writes);
//! 2. read the input keys;
//! 3. call `run` inline, or hand the inputs to the background worker and take
//!    its latest publication (threaded parts are never run on the tick);
//! 4. write the outputs, which later parts in the same tick then see.
//!
//! A failure in one part (error, panic, wrong output count, a dead or stale
//! background worker) is logged and the tick moves on to the next part.
//! Only a poisoned Store is fatal.  Once shutdown has begun no further tick
//! runs.
//!
//! # Design notes
//!
//! | Concern | Approach |
//! |---|---|
//! | Loop control | [`RuntimeState`] owned by the runtime + [`StopSignal`] latch, no shared `on` flag |
//! | Capabilities | `Runnable` / `ThreadedRunnable` / `Shutdownable` traits, no attribute probing |
//! | Threads | one [`BackgroundWorker`] per threaded part, bounded join |
//! | Shutdown errors | collected in [`ShutdownReport`] |
//! | Inter-tick sleep | condvar wait, woken early by stop requests |

pub mod error;
pub mod profiler;

pub use error::{
    PartExecutionError, RegistrationError, ShutdownError, ShutdownReport, TickError,
    VehicleError,
};
pub use profiler::{PartTiming, Profiler};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::part::{
    BackgroundWorker, JoinOutcome, Part, PartKind, Runnable, Shutdownable, WorkerError,
    WorkerFault,
};
use crate::signal::{StopHandle, StopReason, StopSignal};
use crate::store::{Store, StoreError};

use error::panic_message;
use profiler::REPORT_EVERY_LOOPS;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default loop rate when none is given.
pub const DEFAULT_RATE_HZ: f64 = 10.0;

/// Default bound on how long shutdown waits for each background worker.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

// ── Public types ──────────────────────────────────────────────────────────────

/// Lifecycle state of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Loop parameters for [`Runtime::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    /// Target tick rate.
    pub rate_hz: f64,
    /// Stop after this many ticks.  `None` runs until interrupted.
    pub max_loop_count: Option<u64>,
    /// Emit jitter warnings and periodic profiler reports.
    pub verbose: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            rate_hz: DEFAULT_RATE_HZ,
            max_loop_count: None,
            verbose: false,
        }
    }
}

impl LoopOptions {
    /// Tick period, `None` for a non-positive or non-finite rate, or one so
    /// small that its period does not fit in a `Duration`.
    pub fn period(&self) -> Option<Duration> {
        if self.rate_hz.is_finite() && self.rate_hz > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.rate_hz).ok()
        } else {
            None
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Parts that ran, in execution order.
    pub executed: Vec<String>,
    /// Parts whose run condition was falsy.
    pub skipped: Vec<String>,
    /// Parts that failed; the tick continued past each of them.
    pub failures: Vec<PartExecutionError>,
    pub elapsed: Duration,
}

/// Result of one [`Runtime::run`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    pub ticks: u64,
    /// Jitter warnings emitted (verbose mode only).
    pub jitter_reports: u64,
    pub exit: StopReason,
}

// ── Registration ──────────────────────────────────────────────────────────────

enum Executor {
    Inline(Box<dyn Runnable>),
    Threaded(BackgroundWorker),
}

/// One registered part and its wiring.
struct Registration {
    name: String,
    executor: Executor,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
    run_condition: Option<String>,
    profile_index: usize,
}

enum PartRun {
    Executed,
    Skipped,
}

impl Registration {
    fn execute(
        &mut self,
        store: &Store,
        profiler: &mut Profiler,
    ) -> Result<PartRun, PartExecutionError> {
        let Registration {
            name,
            executor,
            input_keys,
            output_keys,
            run_condition,
            profile_index,
        } = self;

        let store_err = |source: StoreError| PartExecutionError::Store {
            part: name.clone(),
            source,
        };

        if let Some(key) = run_condition {
            if !store.get_one(key.as_str()).map_err(store_err)?.is_truthy() {
                return Ok(PartRun::Skipped);
            }
        }

        let inputs = store.get(input_keys.as_slice()).map_err(store_err)?;

        let started = Instant::now();
        let outputs = match executor {
            Executor::Inline(part) => {
                let result = catch_unwind(AssertUnwindSafe(|| part.run(&inputs)));
                profiler.record(*profile_index, started.elapsed());
                match result {
                    Ok(Ok(outputs)) => outputs,
                    Ok(Err(source)) => {
                        return Err(PartExecutionError::Failed {
                            part: name.clone(),
                            source,
                        })
                    }
                    Err(payload) => {
                        return Err(PartExecutionError::Panicked {
                            part: name.clone(),
                            message: panic_message(payload.as_ref()),
                        })
                    }
                }
            }
            Executor::Threaded(worker) => {
                let delivered = worker.run_threaded(inputs);
                profiler.record(*profile_index, started.elapsed());
                match delivered {
                    Ok(latest) => latest.map(|published| published.values.clone()),
                    Err(WorkerFault::Stopped) => {
                        return Err(PartExecutionError::WorkerStopped { part: name.clone() })
                    }
                    Err(WorkerFault::Stale { age }) => {
                        return Err(PartExecutionError::Stale {
                            part: name.clone(),
                            age_ms: age.as_millis() as u64,
                        })
                    }
                }
            }
        };

        if let Some(values) = outputs {
            if values.len() != output_keys.len() {
                return Err(PartExecutionError::OutputArity {
                    part: name.clone(),
                    expected: output_keys.len(),
                    actual: values.len(),
                });
            }
            store.put(output_keys.as_slice(), values).map_err(store_err)?;
        }

        Ok(PartRun::Executed)
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

/// The part scheduler.  Single owner of every registration and worker.
pub struct Runtime {
    store: Store,
    parts: Vec<Registration>,
    state: RuntimeState,
    signal: StopSignal,
    profiler: Profiler,
    shutdown_timeout: Duration,
    loop_count: u64,
}

impl Runtime {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            parts: Vec::new(),
            state: RuntimeState::Idle,
            signal: StopSignal::new(),
            profiler: Profiler::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            loop_count: 0,
        }
    }

    /// Bound on the per-worker join during shutdown.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Ticks executed by [`run`](Self::run) so far.
    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Registered part names in execution order.
    pub fn part_names(&self) -> Vec<&str> {
        self.parts.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.signal.clone())
    }

    /// Appends a part.  Callers validate the wiring beforehand.
    pub(crate) fn register(
        &mut self,
        part: Part,
        input_keys: Vec<String>,
        output_keys: Vec<String>,
        run_condition: Option<String>,
    ) {
        let Part { name, kind } = part;
        let executor = match kind {
            PartKind::Inline(p) => Executor::Inline(p),
            PartKind::Threaded(p) => Executor::Threaded(BackgroundWorker::new(name.clone(), p)),
        };
        let profile_index = self.profiler.profile_part(&name);
        self.parts.push(Registration {
            name,
            executor,
            input_keys,
            output_keys,
            run_condition,
            profile_index,
        });
    }

    /// `Idle → Running`: starts every background worker once, in registration
    /// order.  A worker that cannot be spawned moves the runtime straight to
    /// `Stopping`.
    pub fn start_workers(&mut self) -> Result<(), WorkerError> {
        if self.state != RuntimeState::Idle {
            return Ok(());
        }
        self.state = RuntimeState::Running;
        for reg in &mut self.parts {
            if let Executor::Threaded(worker) = &mut reg.executor {
                if let Err(e) = worker.start() {
                    error!(part = %reg.name, error = %e, "cannot start background worker");
                    self.signal.request(StopReason::Fault(e.to_string()));
                    self.state = RuntimeState::Stopping;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Runs a single tick over every part.
    ///
    /// Per-part failures are collected in the report.  The tick is refused
    /// once shutdown has begun; otherwise the only error is a poisoned Store,
    /// which no later tick could recover from.
    pub fn update(&mut self) -> Result<TickReport, TickError> {
        if !matches!(self.state, RuntimeState::Idle | RuntimeState::Running) {
            return Err(TickError::NotRunnable(self.state));
        }
        let started = Instant::now();
        let mut report = TickReport::default();

        for reg in &mut self.parts {
            match reg.execute(&self.store, &mut self.profiler) {
                Ok(PartRun::Executed) => report.executed.push(reg.name.clone()),
                Ok(PartRun::Skipped) => report.skipped.push(reg.name.clone()),
                Err(PartExecutionError::Store {
                    source: StoreError::Poisoned,
                    ..
                }) => return Err(StoreError::Poisoned.into()),
                Err(e) => {
                    warn!(part = %reg.name, error = %e, "part execution failed");
                    report.failures.push(e);
                }
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Drives the fixed-rate loop until a stop condition, then leaves the
    /// runtime in `Stopping`.  Call [`shutdown`](Self::shutdown) afterwards.
    ///
    /// Stop requests are honoured at tick boundaries only.
    pub fn run(&mut self, opts: &LoopOptions) -> LoopSummary {
        let mut ticks = 0u64;
        let mut jitter_reports = 0u64;

        let Some(period) = opts.period() else {
            let reason = StopReason::Fault(format!("invalid loop rate {}Hz", opts.rate_hz));
            self.signal.request(reason);
            return self.leave_running(ticks, jitter_reports);
        };

        if self.state == RuntimeState::Idle {
            // Failure is already latched on the stop signal.
            let _ = self.start_workers();
        }
        if self.state != RuntimeState::Running {
            return self.leave_running(ticks, jitter_reports);
        }

        info!(
            rate_hz = opts.rate_hz,
            max_loop_count = ?opts.max_loop_count,
            parts = self.parts.len(),
            "Starting vehicle..."
        );

        loop {
            if opts.max_loop_count.is_some_and(|max| ticks >= max) {
                self.signal.request(StopReason::LoopCountReached);
            }
            if self.signal.is_requested() {
                break;
            }

            let tick_start = Instant::now();
            if let Err(e) = self.update() {
                error!(error = %e, "unrecoverable tick failure");
                self.signal.request(StopReason::Fault(e.to_string()));
            }
            ticks += 1;
            self.loop_count += 1;

            if opts.verbose && ticks % REPORT_EVERY_LOOPS == 0 {
                self.profiler.report();
            }

            if opts.max_loop_count.is_some_and(|max| ticks >= max) {
                continue;
            }

            let elapsed = tick_start.elapsed();
            match period.checked_sub(elapsed) {
                Some(sleep) if !sleep.is_zero() => {
                    self.signal.wait_timeout(sleep);
                }
                _ => {
                    if opts.verbose {
                        let overrun = elapsed - period;
                        warn!(
                            overrun_ms = overrun.as_secs_f64() * 1_000.0,
                            "jitter violation in vehicle loop"
                        );
                        jitter_reports += 1;
                    }
                }
            }
        }

        if opts.verbose {
            self.profiler.report();
        }
        self.leave_running(ticks, jitter_reports)
    }

    fn leave_running(&mut self, ticks: u64, jitter_reports: u64) -> LoopSummary {
        let exit = self.signal.reason().unwrap_or(StopReason::Requested);
        match &exit {
            StopReason::Interrupted => info!("interrupt received, stopping vehicle"),
            StopReason::Fault(msg) => error!(reason = %msg, "vehicle loop aborted"),
            other => info!(reason = %other, ticks, "vehicle loop finished"),
        }
        if self.state != RuntimeState::Stopped {
            self.state = RuntimeState::Stopping;
        }
        LoopSummary {
            ticks,
            jitter_reports,
            exit,
        }
    }

    /// `→ Stopping → Stopped`: the single shutdown pass.
    ///
    /// Every worker is signalled first so they wind down concurrently; then,
    /// in registration order, each worker is joined (bounded wait) and each
    /// part's shutdown capability is invoked.  Returns `None` when the pass
    /// already happened.
    pub fn shutdown(&mut self) -> Option<ShutdownReport> {
        if self.state == RuntimeState::Stopped {
            return None;
        }
        self.state = RuntimeState::Stopping;
        self.signal.request(StopReason::Requested);
        info!("Shutting down vehicle and its parts...");

        for reg in &self.parts {
            if let Executor::Threaded(worker) = &reg.executor {
                worker.request_stop();
            }
        }

        // Every worker join draws from this single deadline.
        let timeout = self.shutdown_timeout;
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        for reg in &mut self.parts {
            report.attempted.push(reg.name.clone());
            match &mut reg.executor {
                Executor::Inline(part) => {
                    shutdown_part(&reg.name, part.as_shutdownable(), &mut report);
                }
                Executor::Threaded(worker) => match worker
                    .join(deadline.saturating_duration_since(Instant::now()))
                {
                    JoinOutcome::Joined(mut part) | JoinOutcome::NeverStarted(mut part) => {
                        shutdown_part(&reg.name, part.as_shutdownable(), &mut report);
                    }
                    JoinOutcome::Panicked(mut part) => {
                        report.failures.push(ShutdownError::WorkerPanicked {
                            part: reg.name.clone(),
                        });
                        shutdown_part(&reg.name, part.as_shutdownable(), &mut report);
                    }
                    JoinOutcome::TimedOut => report.failures.push(ShutdownError::WorkerTimedOut {
                        part: reg.name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                    JoinOutcome::Lost => report.failures.push(ShutdownError::WorkerPanicked {
                        part: reg.name.clone(),
                    }),
                    JoinOutcome::AlreadyJoined => {}
                },
            }
        }

        self.state = RuntimeState::Stopped;

        if report.is_clean() {
            info!(parts = report.attempted.len(), "all parts shut down");
        } else {
            for failure in &report.failures {
                warn!(part = %failure.part(), error = %failure, "part did not shut down cleanly");
            }
        }
        Some(report)
    }
}

fn shutdown_part(
    name: &str,
    capability: Option<&mut dyn Shutdownable>,
    report: &mut ShutdownReport,
) {
    let Some(part) = capability else {
        debug!(part = %name, "no shutdown capability");
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| part.shutdown())) {
        Ok(Ok(())) => debug!(part = %name, "part shut down"),
        Ok(Err(source)) => report.failures.push(ShutdownError::Failed {
            part: name.to_string(),
            source,
        }),
        Err(payload) => report.failures.push(ShutdownError::Panicked {
            part: name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

impl Drop for Runtime {
    /// A runtime dropped mid-run still tears its parts down.
    fn drop(&mut self) {
        if matches!(self.state, RuntimeState::Running | RuntimeState::Stopping) {
            self.shutdown();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
