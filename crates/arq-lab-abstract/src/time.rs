//! Virtual simulation time.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A point on the emulator's virtual clock, in simulator time units.
///
/// Ordering is total (`f64::total_cmp`) so times can key heaps and ordered
/// sets directly.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimTime(pub f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    /// The time `delay` units after `self`.
    pub fn after(self, delay: f64) -> SimTime {
        SimTime(self.0 + delay)
    }

    /// Units from `self` until `later`, clamped at zero.
    pub fn until(self, later: SimTime) -> f64 {
        (later.0 - self.0).max(0.0)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}
