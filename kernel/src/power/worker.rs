//! S1-S4 suspend worker.
//!
//! Runs one sleep/wake attempt on the dedicated suspend thread:
//!
//! ```text
//! Idle -> ResourcesAcquired -> InterruptsMasked -> StateSaved
//!      -> TransitionRequested -> Woken -> StateRestored
//!      -> InterruptsUnmasked -> Done
//! ```
//!
//! Any phase may end in `Failed`. Once interrupts are masked the executing
//! processor runs nothing else until they are unmasked again.

use crate::acpi::{SleepState, SleepTypes};
use crate::arch::x86_64::ResumeRegisters;

use super::resume::ResumeVectorManager;
use super::{PowerError, PowerPlatform};

/// Phase of a suspend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPhase {
    Idle,
    ResourcesAcquired,
    InterruptsMasked,
    StateSaved,
    TransitionRequested,
    Woken,
    StateRestored,
    InterruptsUnmasked,
    Done,
    Failed,
}

/// Longest possible trail: every phase of a successful attempt.
const MAX_PHASES: usize = 9;

/// Phases an attempt went through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTrail {
    phases: [SuspendPhase; MAX_PHASES],
    len: usize,
}

impl PhaseTrail {
    const fn new() -> Self {
        Self {
            phases: [SuspendPhase::Idle; MAX_PHASES],
            len: 1,
        }
    }

    fn push(&mut self, phase: SuspendPhase) {
        if self.len < MAX_PHASES {
            self.phases[self.len] = phase;
            self.len += 1;
        }
    }

    pub fn as_slice(&self) -> &[SuspendPhase] {
        &self.phases[..self.len]
    }
}

/// One S1-S4 attempt.
pub struct SuspendWorker<'a> {
    platform: PowerPlatform<'a>,
    resume_entry: u64,
    target: SleepState,
    types: SleepTypes,
    phase: SuspendPhase,
    trail: PhaseTrail,
}

impl<'a> SuspendWorker<'a> {
    pub fn new(
        platform: PowerPlatform<'a>,
        resume_entry: u64,
        target: SleepState,
        types: SleepTypes,
    ) -> Self {
        Self {
            platform,
            resume_entry,
            target,
            types,
            phase: SuspendPhase::Idle,
            trail: PhaseTrail::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SuspendPhase {
        self.phase
    }

    /// Phases visited so far.
    pub fn trail(&self) -> &[SuspendPhase] {
        self.trail.as_slice()
    }

    /// Run the attempt. Returns after wake, or with the reason it failed.
    pub fn run(&mut self) -> Result<(), PowerError> {
        let result = self.suspend_resume();
        if let Err(e) = result {
            log::warn!("power: {} failed in {:?}: {}", self.target, self.phase, e);
            self.advance(SuspendPhase::Failed);
        }
        result
    }

    fn advance(&mut self, next: SuspendPhase) {
        log::trace!("power: {:?} -> {:?}", self.phase, next);
        self.phase = next;
        self.trail.push(next);
    }

    fn suspend_resume(&mut self) -> Result<(), PowerError> {
        debug_assert!(!self.target.is_shutdown());
        let platform = self.platform;
        let irq = platform.interrupts;

        // Dropped on every return below, which clears the waking vector and
        // frees the environment
        let manager = ResumeVectorManager::new(platform.bootstrap, platform.wake_vector);
        let mut bootstrap = manager.acquire(self.resume_entry)?;
        bootstrap.install_wake_vector()?;
        self.advance(SuspendPhase::ResourcesAcquired);

        let mut regs = ResumeRegisters::default();
        bootstrap.set_registers(&mut regs);

        irq.disable();
        self.advance(SuspendPhase::InterruptsMasked);

        platform.platform_hooks.suspend();
        platform.arch_hooks.suspend();
        self.advance(SuspendPhase::StateSaved);

        log::info!(
            "power: Entering {} (SLP_TYP {:#x}/{:#x})",
            self.target,
            self.types.a,
            self.types.b
        );
        self.advance(SuspendPhase::TransitionRequested);
        if let Err(e) = platform.engine.transition_s_state(&mut regs, self.target, self.types) {
            irq.enable();
            log::error!("power: {} transition failed: {}", self.target, e);
            return Err(PowerError::Internal(e));
        }

        // Back from sleep through the trampoline
        assert!(irq.are_disabled(), "power: interrupts enabled after resume");
        self.advance(SuspendPhase::Woken);
        log::info!("power: Left {}", self.target);

        platform.arch_hooks.resume();
        platform.platform_hooks.resume();
        platform.timers.thaw_percpu();
        self.advance(SuspendPhase::StateRestored);

        assert!(irq.are_disabled(), "power: interrupts enabled during restore");
        irq.enable();
        self.advance(SuspendPhase::InterruptsUnmasked);

        bootstrap.release();
        self.advance(SuspendPhase::Done);
        Ok(())
    }
}
