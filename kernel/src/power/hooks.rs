//! Suspend/resume capabilities.
//!
//! Each build target has exactly one architecture implementation and one
//! platform implementation, so the power path only needs the two calls.

/// State that does not survive hardware sleep.
///
/// `suspend` runs with interrupts masked immediately before sleep entry and
/// captures what the hardware loses (caches, MSRs, platform timers).
/// `resume` runs with interrupts still masked right after wake and puts it
/// back.
pub trait SuspendHooks: Send + Sync {
    fn suspend(&self);
    fn resume(&self);
}

/// Per-CPU timers are frozen for the sleep duration.
pub trait TimerThaw: Send + Sync {
    /// Re-arm the executing processor's timers after wake.
    fn thaw_percpu(&self);
}
