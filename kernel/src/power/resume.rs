//! Resume environment and firmware waking vector.
//!
//! Both are machine-wide singletons. They are modelled as one handle,
//! `ResumeBootstrap`, owned by the suspend worker for a single attempt:
//! acquiring it leases the low-memory environment, installing the waking
//! vector points the firmware at it, and dropping it undoes both. Every exit
//! path of the worker therefore releases exactly once.
//!
//! Once a vector write has been attempted the field is cleared on release,
//! even if the write reported failure, since the firmware may have taken
//! part of it.

use crate::acpi::WakeVectorAccess;
use crate::arch::x86_64::bootstrap16::{ResumeEnvironment, ResumeEnvironmentAllocator};
use crate::arch::x86_64::ResumeRegisters;

use super::{BadStateReason, PowerError};

/// Acquires resume environments and wires them to the firmware.
#[derive(Clone, Copy)]
pub struct ResumeVectorManager<'a> {
    allocator: &'a dyn ResumeEnvironmentAllocator,
    wake: &'a dyn WakeVectorAccess,
}

impl<'a> ResumeVectorManager<'a> {
    pub fn new(
        allocator: &'a dyn ResumeEnvironmentAllocator,
        wake: &'a dyn WakeVectorAccess,
    ) -> Self {
        Self { allocator, wake }
    }

    /// Lease a resume environment that continues at `resume_entry`.
    ///
    /// Nothing else happens if the lease cannot be obtained.
    pub fn acquire(&self, resume_entry: u64) -> Result<ResumeBootstrap<'a>, PowerError> {
        let env = self.allocator.acquire(resume_entry).map_err(|e| {
            log::warn!("power: resume environment unavailable: {}", e);
            PowerError::from(e)
        })?;

        Ok(ResumeBootstrap {
            env: Some(env),
            allocator: self.allocator,
            wake: self.wake,
            vector_written: false,
            vector_installed: false,
        })
    }
}

/// A leased resume environment, released on drop.
pub struct ResumeBootstrap<'a> {
    env: Option<ResumeEnvironment>,
    allocator: &'a dyn ResumeEnvironmentAllocator,
    wake: &'a dyn WakeVectorAccess,
    vector_written: bool,
    vector_installed: bool,
}

impl ResumeBootstrap<'_> {
    /// Physical entry point of the environment.
    pub fn entry_ip(&self) -> u64 {
        self.env.as_ref().map_or(0, |env| env.entry_ip())
    }

    /// Returns true once the firmware points at this environment.
    pub fn wake_vector_installed(&self) -> bool {
        self.vector_installed
    }

    /// Point the firmware waking vector at the environment.
    ///
    /// On failure the interrupt mask and hardware must be left alone; the
    /// environment is still released when this handle drops.
    pub fn install_wake_vector(&mut self) -> Result<(), PowerError> {
        let entry_ip = self.entry_ip();
        self.vector_written = true;
        self.wake.set_waking_vector(entry_ip, 0).map_err(|e| {
            log::warn!("power: cannot set waking vector: {}", e);
            PowerError::BadState(BadStateReason::WakeVector(e))
        })?;

        self.vector_installed = true;
        Ok(())
    }

    /// Hand `regs` to the trampoline as the block to reload on wake.
    pub fn set_registers(&mut self, regs: &mut ResumeRegisters) {
        if let Some(env) = self.env.as_mut() {
            env.set_registers(regs);
        }
    }

    /// Release now instead of at scope exit.
    pub fn release(self) {}
}

impl Drop for ResumeBootstrap<'_> {
    fn drop(&mut self) {
        if self.vector_written {
            if let Err(e) = self.wake.set_waking_vector(0, 0) {
                log::error!("power: cannot clear waking vector: {}", e);
            }
            self.vector_written = false;
            self.vector_installed = false;
        }
        if let Some(env) = self.env.take() {
            self.allocator.release(env);
        }
    }
}
