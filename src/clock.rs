use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the `source_timestamp_ns` stamped on every written sample.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
    /// Nanoseconds since the UNIX epoch.
    fn now_ns(&self) -> u64;
}

/// Wall-clock timestamps from `SystemTime`. Subject to NTP steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        wall_clock_ns()
    }
}

/// TSC-backed timestamps anchored to the wall clock once at construction.
///
/// Cheaper per call than `SystemClock` and never steps backwards, which keeps
/// source timestamps monotonic within one writer.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    anchor_wall_ns: u64,
    anchor: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let anchor = clock.now();
        Self {
            clock,
            anchor_wall_ns: wall_clock_ns(),
            anchor,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now_ns(&self) -> u64 {
        let elapsed = self.clock.now().duration_since(self.anchor);
        self.anchor_wall_ns
            .saturating_add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
