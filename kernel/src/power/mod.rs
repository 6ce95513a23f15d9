//! # System Power Control
//!
//! Entry point for ACPI S-state transitions.
//!
//! ## Transition Paths
//!
//! - **S1-S4**: every secondary processor must already be parked. A
//!   dedicated highest-priority kernel thread leases the low-memory resume
//!   environment, installs the firmware waking vector, masks interrupts,
//!   saves platform and architecture state and enters sleep. After wake it
//!   restores state in reverse order and releases the resume environment.
//!   The caller blocks until that thread is joined.
//! - **S5**: runs inline on the calling thread with interrupts masked. No
//!   resume environment is prepared since soft-off does not come back.
//!
//! Running S1-S4 on a separate thread lets the ordinary context switch
//! persist the caller's user-mode state, which a plain mode switch does
//! not save.
//!
//! ## Example
//!
//! ```ignore
//! let control = PowerControl::new(PowerConfig::new(resume_entry), platform);
//! control.operation(
//!     PowerCommand::AcpiTransitionSState,
//!     &PowerControlRequest::new(3, slp_typ_a, slp_typ_b),
//! )?;
//! ```

pub mod hooks;
pub mod quiesce;
pub mod resume;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use spin::Mutex;

pub use crate::acpi::{AcpiError, SleepState, SleepTypes};
use crate::acpi::{TransitionEngine, WakeVectorAccess};
use crate::arch::x86_64::bootstrap16::{Bootstrap16Error, ResumeEnvironmentAllocator};
use crate::arch::x86_64::ResumeRegisters;
use crate::arch::InterruptControl;
use crate::sched::{
    SchedulingClass, ThreadError, ThreadParams, ThreadSpawner, DEFAULT_STACK_SIZE, HIGHEST_PRIORITY,
};
use crate::smp::{CpuId, OnlineCpus};

use self::hooks::{SuspendHooks, TimerThaw};
use self::worker::SuspendWorker;

/// Raw power control command numbers (syscall ABI).
pub mod powerctl {
    pub const ENABLE_ALL_CPUS: u32 = 1;
    pub const DISABLE_ALL_CPUS_BUT_PRIMARY: u32 = 2;
    pub const ACPI_TRANSITION_S_STATE: u32 = 3;
    pub const REBOOT: u32 = 4;
    pub const SHUTDOWN: u32 = 5;
}

/// Power control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCommand {
    /// Enter an ACPI S-state
    AcpiTransitionSState,
    /// Any other command; not served by this path
    Other(u32),
}

impl PowerCommand {
    /// Decode a raw command number.
    pub const fn from_raw(cmd: u32) -> Self {
        match cmd {
            powerctl::ACPI_TRANSITION_S_STATE => PowerCommand::AcpiTransitionSState,
            other => PowerCommand::Other(other),
        }
    }
}

/// Arguments of an S-state transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerControlRequest {
    /// Requested S-state, valid range 1..=5
    pub target_s_state: u8,
    /// SLP_TYPa for the state, from the `\_Sx` object
    pub sleep_type_a: u8,
    /// SLP_TYPb for the state, from the `\_Sx` object
    pub sleep_type_b: u8,
}

impl PowerControlRequest {
    pub const fn new(target_s_state: u8, sleep_type_a: u8, sleep_type_b: u8) -> Self {
        Self {
            target_s_state,
            sleep_type_a,
            sleep_type_b,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Status taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStatus {
    Ok,
    NotSupported,
    InvalidArgs,
    BadState,
    ResourceUnavailable,
    InternalError,
}

impl PowerStatus {
    /// Syscall return code.
    pub const fn as_raw(&self) -> i32 {
        match self {
            PowerStatus::Ok => 0,
            PowerStatus::InternalError => -1,
            PowerStatus::NotSupported => -2,
            PowerStatus::ResourceUnavailable => -4,
            PowerStatus::InvalidArgs => -10,
            PowerStatus::BadState => -20,
        }
    }
}

/// Why a transition found the system in the wrong state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadStateReason {
    /// Processors other than the driving one are online
    CpusOnline(u32),
    /// The firmware waking vector could not be installed
    WakeVector(AcpiError),
    /// Another transition is in flight
    Busy,
}

/// Resource a transition could not obtain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Low-memory resume environment
    ResumeEnvironment(Bootstrap16Error),
    /// Suspend worker thread
    WorkerThread,
}

/// Power control errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerError {
    /// Command is not an S-state transition
    NotSupported,
    /// Requested S-state is out of range
    InvalidArgs(u8),
    /// System not in a state that allows the transition
    BadState(BadStateReason),
    /// A transition resource is unavailable
    ResourceUnavailable(ResourceKind),
    /// Transition engine rejected or failed the request
    Internal(AcpiError),
}

impl PowerError {
    /// Status reported for this error.
    pub const fn status(&self) -> PowerStatus {
        match self {
            PowerError::NotSupported => PowerStatus::NotSupported,
            PowerError::InvalidArgs(_) => PowerStatus::InvalidArgs,
            PowerError::BadState(_) => PowerStatus::BadState,
            PowerError::ResourceUnavailable(_) => PowerStatus::ResourceUnavailable,
            PowerError::Internal(_) => PowerStatus::InternalError,
        }
    }
}

impl core::fmt::Display for PowerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PowerError::NotSupported => write!(f, "Command not supported"),
            PowerError::InvalidArgs(s) => write!(f, "Bad S-state: S{}", s),
            PowerError::BadState(BadStateReason::CpusOnline(n)) => {
                write!(f, "Too many CPUs running ({} online)", n)
            }
            PowerError::BadState(BadStateReason::WakeVector(e)) => {
                write!(f, "Cannot install waking vector: {}", e)
            }
            PowerError::BadState(BadStateReason::Busy) => {
                write!(f, "Transition already in progress")
            }
            PowerError::ResourceUnavailable(ResourceKind::ResumeEnvironment(e)) => {
                write!(f, "Resume environment unavailable: {}", e)
            }
            PowerError::ResourceUnavailable(ResourceKind::WorkerThread) => {
                write!(f, "Cannot create suspend thread")
            }
            PowerError::Internal(e) => write!(f, "S-state transition failed: {}", e),
        }
    }
}

impl From<Bootstrap16Error> for PowerError {
    fn from(e: Bootstrap16Error) -> Self {
        PowerError::ResourceUnavailable(ResourceKind::ResumeEnvironment(e))
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Power control configuration.
#[derive(Debug, Clone, Copy)]
pub struct PowerConfig {
    /// Kernel address the resume trampoline jumps to in long mode
    pub resume_entry: u64,
    /// Processor that drives S1-S4 transitions
    pub driving_cpu: CpuId,
    /// Suspend worker thread parameters
    pub worker: ThreadParams,
}

impl PowerConfig {
    /// Default configuration resuming at `resume_entry`.
    pub fn new(resume_entry: u64) -> Self {
        Self {
            resume_entry,
            ..Self::default()
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            resume_entry: 0,
            driving_cpu: CpuId::BSP,
            worker: ThreadParams {
                name: "suspend-thread",
                class: SchedulingClass::Realtime,
                priority: HIGHEST_PRIORITY,
                stack_size: DEFAULT_STACK_SIZE,
            },
        }
    }
}

/// Collaborators a transition runs against.
#[derive(Clone, Copy)]
pub struct PowerPlatform<'a> {
    pub cpus: &'a dyn OnlineCpus,
    pub interrupts: &'a dyn InterruptControl,
    pub wake_vector: &'a dyn WakeVectorAccess,
    pub bootstrap: &'a dyn ResumeEnvironmentAllocator,
    pub engine: &'a dyn TransitionEngine,
    pub arch_hooks: &'a dyn SuspendHooks,
    pub platform_hooks: &'a dyn SuspendHooks,
    pub timers: &'a dyn TimerThaw,
    pub threads: &'a dyn ThreadSpawner,
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// System power controller.
pub struct PowerControl<'a> {
    config: PowerConfig,
    platform: PowerPlatform<'a>,
    in_flight: Mutex<()>,
}

impl<'a> PowerControl<'a> {
    pub fn new(config: PowerConfig, platform: PowerPlatform<'a>) -> Self {
        Self {
            config,
            platform,
            in_flight: Mutex::new(()),
        }
    }

    /// Performs a power control operation.
    ///
    /// Returns once the system has resumed from S1-S4. A real S5 does not
    /// return.
    pub fn operation(
        &self,
        command: PowerCommand,
        request: &PowerControlRequest,
    ) -> Result<(), PowerError> {
        if command != PowerCommand::AcpiTransitionSState {
            log::warn!("power: unsupported command {:?}", command);
            return Err(PowerError::NotSupported);
        }

        let target = match SleepState::from_u8(request.target_s_state) {
            Some(target) => target,
            None => {
                log::warn!("power: Bad S-state: S{}", request.target_s_state);
                return Err(PowerError::InvalidArgs(request.target_s_state));
            }
        };
        let types = SleepTypes::new(request.sleep_type_a, request.sleep_type_b);

        let _in_flight = self
            .in_flight
            .try_lock()
            .ok_or(PowerError::BadState(BadStateReason::Busy))?;

        if target.is_shutdown() {
            return self.shutdown(types);
        }

        debug_assert!(!self.platform.interrupts.are_disabled());
        quiesce::check_quiesced(self.platform.cpus, self.config.driving_cpu, target)?;

        self.suspend_on_worker(target, types)
    }

    /// S1-S4: run the worker on its own thread and wait for it.
    fn suspend_on_worker(&self, target: SleepState, types: SleepTypes) -> Result<(), PowerError> {
        let worker = SuspendWorker::new(self.platform, self.config.resume_entry, target, types);
        let mut worker = Some(worker);
        let mut outcome = None;

        let spawned = {
            let mut body = || {
                if let Some(mut worker) = worker.take() {
                    outcome = Some(worker.run());
                }
            };
            self.platform.threads.run_joined(&self.config.worker, &mut body)
        };

        match spawned {
            Ok(()) => {}
            Err(ThreadError::CreateFailed) => {
                log::warn!("power: cannot create {}", self.config.worker.name);
                return Err(PowerError::ResourceUnavailable(ResourceKind::WorkerThread));
            }
            Err(e) => panic!("power: {} {}", self.config.worker.name, e),
        }

        match outcome {
            Some(outcome) => outcome,
            None => panic!("power: {} exited without running", self.config.worker.name),
        }
    }

    /// S5: inline, interrupts masked around the engine call.
    fn shutdown(&self, types: SleepTypes) -> Result<(), PowerError> {
        let mut regs = ResumeRegisters::default();

        log::info!("power: entering {}", SleepState::S5);
        self.platform.interrupts.disable();
        let status = self.platform.engine.transition_s_state(&mut regs, SleepState::S5, types);
        self.platform.interrupts.enable();

        status.map_err(|e| {
            log::error!("power: {} transition failed: {}", SleepState::S5, e);
            PowerError::Internal(e)
        })
    }
}

/// Syscall entry: decode `cmd`, run the operation and return the ABI code.
pub fn system_powerctl(control: &PowerControl<'_>, cmd: u32, arg: &PowerControlRequest) -> i32 {
    match control.operation(PowerCommand::from_raw(cmd), arg) {
        Ok(()) => PowerStatus::Ok.as_raw(),
        Err(e) => e.status().as_raw(),
    }
}
