//! Interval-based progress reporting helpers.

use std::fmt;

/// Signals when a monotonically growing counter has advanced by at least
/// `interval` since the last report.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: u64,
    last_reported: u64,
}

impl Throttle {
    /// Create a throttle. An interval of zero is treated as one.
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            last_reported: 0,
        }
    }

    /// Returns `true` (and records the report) once `current` has moved
    /// `interval` past the previous report.
    pub fn due(&mut self, current: u64) -> bool {
        if current.saturating_sub(self.last_reported) >= self.interval {
            self.last_reported = current;
            true
        } else {
            false
        }
    }
}

/// Byte count rendered with a binary unit suffix, e.g. `1.5 GiB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanBytes(pub u64);

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

        let mut value = self.0 as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        if unit == 0 {
            write!(f, "{} B", self.0)
        } else {
            write!(f, "{:.1} {}", value, UNITS[unit])
        }
    }
}
