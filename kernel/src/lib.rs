//! # S-POWER: System Sleep States for Splax OS
//!
//! The kernel path that takes the machine into an ACPI sleep state and back,
//! or into soft-off.
//!
//! ## Subsystems
//!
//! 1. **Power control** (`power`): request validation, the suspend worker
//!    and its resume environment
//! 2. **ACPI** (`acpi`): S-states, the FACS waking vector, the transition
//!    engine interface
//! 3. **Architecture** (`arch`): interrupt masking and the x86_64 low-memory
//!    resume trampoline region
//! 4. **SMP** (`smp`): the set of online processors
//! 5. **Scheduling** (`sched`): the worker thread contract
//!
//! ## Ownership
//!
//! Hardware state is never ambient. Every collaborator is passed in through
//! `power::PowerPlatform`, and the resume environment plus waking vector are
//! a single handle owned by the one in-flight suspend attempt.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod acpi;
pub mod arch;
pub mod power;
pub mod sched;
pub mod smp;

pub use power::{
    system_powerctl, PowerCommand, PowerConfig, PowerControl, PowerControlRequest, PowerError,
    PowerPlatform, PowerStatus,
};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "S-POWER";
