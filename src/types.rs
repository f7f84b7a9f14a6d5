//! Newtype wrappers and type aliases for domain concepts.
//!
//! Identifiers are indices into the arenas owned by a single
//! [`World`](crate::engine::World). They are only meaningful within the run
//! that created them, which keeps every counter scoped to one simulation.

use std::fmt;

/// Simulated time, in processor cycles.
pub type Cycles = u64;

/// Task identifier (index into the task arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TaskId(pub u32);

/// Job identifier (index into the job arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct JobId(pub u32);

/// Internal processor identifier, distinct from the user-facing id in
/// [`ProcessorDef`](crate::scenario::ProcessorDef).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProcId(pub u32);

/// Cache identifier (index into the cache arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CacheId(pub u32);

/// Timer identifier (index into the timer table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TimerId(pub u32);

macro_rules! impl_index {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

impl_index!(TaskId, JobId, ProcId, CacheId, TimerId);

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Convert a duration in milliseconds into cycles, truncating like the
/// configuration layer does for every millisecond quantity.
pub fn ms_to_cycles(ms: f64, cycles_per_ms: u64) -> Cycles {
    let cycles = ms * cycles_per_ms as f64;
    if cycles <= 0.0 {
        0
    } else {
        cycles as Cycles
    }
}

/// Convert a fractional cycle estimate into whole cycles.
///
/// Values within `1e-6` of an integer snap to it so that accumulated
/// floating-point error does not add a spurious extra cycle; anything else
/// rounds up. Negative estimates become zero.
pub fn whole_cycles(estimate: f64) -> Cycles {
    if estimate <= 0.0 || !estimate.is_finite() {
        return 0;
    }
    let nearest = estimate.round();
    if (estimate - nearest).abs() < 1e-6 {
        nearest as Cycles
    } else {
        estimate.ceil() as Cycles
    }
}
