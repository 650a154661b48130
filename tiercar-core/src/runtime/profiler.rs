//! Per-part execution timing.
//!
//! The runtime records how long each part's invocation took on the tick
//! thread.  In verbose mode the aggregated table is logged every
//! [`REPORT_EVERY_LOOPS`] ticks and once more when the loop ends.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::info;

/// Ticks between two verbose profiler reports.
pub const REPORT_EVERY_LOOPS: u64 = 200;

/// Recent samples kept per part for the percentile column.
const WINDOW: usize = 200;

/// Timing statistics for one registered part.
#[derive(Debug, Clone)]
pub struct PartTiming {
    pub name: String,
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    recent: VecDeque<Duration>,
}

impl PartTiming {
    fn new(name: String) -> Self {
        Self {
            name,
            count: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            recent: VecDeque::with_capacity(WINDOW),
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
        if self.recent.len() == WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(elapsed);
    }

    /// Mean duration, `None` before the first sample.
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0)
            .then(|| Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64))
    }

    /// Nearest-rank percentile over the recent window (`q` in `0.0..=1.0`).
    pub fn percentile(&self, q: f64) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.recent.iter().copied().collect();
        sorted.sort();
        let rank = ((q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize).max(1);
        sorted.get(rank - 1).copied()
    }
}

/// Timing table indexed by registration order.
#[derive(Debug, Default)]
pub struct Profiler {
    parts: Vec<PartTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row for a newly registered part; returns its index.
    pub fn profile_part(&mut self, name: &str) -> usize {
        self.parts.push(PartTiming::new(name.to_string()));
        self.parts.len() - 1
    }

    pub fn record(&mut self, index: usize, elapsed: Duration) {
        if let Some(row) = self.parts.get_mut(index) {
            row.record(elapsed);
        }
    }

    pub fn timings(&self) -> &[PartTiming] {
        &self.parts
    }

    /// Logs one line per part that has run at least once.
    pub fn report(&self) {
        info!("part timings (ms): count / mean / min / max / p50 / p99");
        for row in self.parts.iter().filter(|r| r.count > 0) {
            info!(
                "  {name:<24} {count:>7} {mean:>8.3} {min:>8.3} {max:>8.3} {p50:>8.3} {p99:>8.3}",
                name = row.name,
                count = row.count,
                mean = ms(row.mean()),
                min = ms(Some(row.min)),
                max = ms(Some(row.max)),
                p50 = ms(row.percentile(0.5)),
                p99 = ms(row.percentile(0.99)),
            );
        }
    }
}

fn ms(d: Option<Duration>) -> f64 {
    d.map(|d| d.as_secs_f64() * 1_000.0).unwrap_or(0.0)
}
