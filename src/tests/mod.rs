//! Cross-module test scenarios, run on the host scheduler.

pub(crate) mod helpers;


/// Threads contending in the stress scenarios.
pub(crate) const STRESS_THREADS: usize = 4;

/// Critical sections each stress thread executes.
pub(crate) const STRESS_ITERATIONS: usize = 1000;
