//! Cross-thread stop signalling.
//!
//! A [`StopSignal`] is a latch: the first request wins and records its
//! [`StopReason`]; later requests are ignored.  Sleepers park on a condition
//! variable so a request wakes them immediately instead of waiting out the
//! rest of a tick period.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Why the drive loop left the `Running` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `max_loop_count` ticks have been executed.
    LoopCountReached,
    /// External interrupt (Ctrl-C / SIGINT routed through a [`StopHandle`]).
    Interrupted,
    /// Explicit stop request through a [`StopHandle`].
    Requested,
    /// Unrecoverable internal error.
    Fault(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::LoopCountReached => write!(f, "loop count reached"),
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::Fault(msg) => write!(f, "fault: {msg}"),
        }
    }
}

#[derive(Debug, Default)]
struct SignalState {
    reason: Mutex<Option<StopReason>>,
    cond: Condvar,
}

/// Shared stop latch.  Clones observe the same request.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    state: Arc<SignalState>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches `reason` unless a stop was already requested.  Returns `true`
    /// if this call set the reason.
    pub fn request(&self, reason: StopReason) -> bool {
        let mut slot = self
            .state
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let first = slot.is_none();
        if first {
            *slot = Some(reason);
        }
        self.state.cond.notify_all();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.state
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sleeps for up to `timeout`.  Returns `true` as soon as a stop is
    /// requested, `false` if the full timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self
            .state
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Loop guards against spurious wake-ups.
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = match self.state.cond.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Externally held handle used to end a running vehicle.
///
/// Requests are honoured at the next loop boundary, never mid-tick.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: StopSignal,
}

impl StopHandle {
    pub(crate) fn new(signal: StopSignal) -> Self {
        Self { signal }
    }

    /// Routes an external interrupt (e.g. Ctrl-C) into the shutdown path.
    pub fn interrupt(&self) {
        self.signal.request(StopReason::Interrupted);
    }

    /// Asks the loop to stop after the current tick.
    pub fn request_stop(&self) {
        self.signal.request(StopReason::Requested);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.signal.is_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_request_wins() {
        let signal = StopSignal::new();
        assert!(signal.request(StopReason::Interrupted));
        assert!(!signal.request(StopReason::LoopCountReached));
        assert_eq!(signal.reason(), Some(StopReason::Interrupted));
    }

    #[test]
    fn wait_times_out_without_request() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn request_wakes_a_sleeper_early() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.request(StopReason::Requested);
        });
        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
        waker.join().unwrap();
    }

    #[test]
    fn handle_interrupt_is_visible_to_signal() {
        let signal = StopSignal::new();
        let handle = StopHandle::new(signal.clone());
        handle.interrupt();
        assert!(handle.is_stop_requested());
        assert_eq!(signal.reason(), Some(StopReason::Interrupted));
    }
}
