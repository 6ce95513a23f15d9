//! # Kernel Worker Threads
//!
//! The power path hands S1-S4 transitions to a dedicated kernel thread so
//! the ordinary context switch saves everything the calling thread owns.
//! Thread creation itself belongs to the scheduler; this module defines
//! the narrow create/start/join contract the power path relies on.

/// Scheduling class determines base priority and behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulingClass {
    /// Real-time class: guaranteed maximum latency
    Realtime,
    /// Interactive class: low latency for responsive processes
    Interactive,
    /// Background class: best-effort scheduling
    Background,
}

/// Highest priority within a class.
pub const HIGHEST_PRIORITY: u8 = 31;

/// Default kernel thread stack size.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Parameters for a kernel worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadParams {
    /// Thread name (for diagnostics)
    pub name: &'static str,
    /// Scheduling class
    pub class: SchedulingClass,
    /// Priority within the class
    pub priority: u8,
    /// Stack size in bytes
    pub stack_size: usize,
}

/// Errors from the worker thread primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread could not be created (out of memory or thread slots)
    CreateFailed,
    /// Created thread could not be made runnable
    StartFailed,
    /// Waiting for the thread failed
    JoinFailed,
}

impl core::fmt::Display for ThreadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ThreadError::CreateFailed => write!(f, "thread creation failed"),
            ThreadError::StartFailed => write!(f, "thread start failed"),
            ThreadError::JoinFailed => write!(f, "thread join failed"),
        }
    }
}

/// Create, start and join a kernel thread.
///
/// The caller blocks until `body` has run to completion on the new thread,
/// which is why `body` may borrow from the caller's stack. Results travel
/// back through whatever `body` captures.
pub trait ThreadSpawner: Send + Sync {
    fn run_joined(
        &self,
        params: &ThreadParams,
        body: &mut (dyn FnMut() + Send),
    ) -> Result<(), ThreadError>;
}
