//! Single-processor precondition for sleep transitions.
//!
//! Most firmware sleep mechanisms cannot tolerate other processors
//! running during the transition, so S1-S4 require every processor except
//! the driving one to be parked beforehand. Parking is the caller's job.

use crate::acpi::SleepState;
use crate::smp::{CpuId, CpuMask, OnlineCpus};

use super::{BadStateReason, PowerError};

/// Passes only if `driver` is the one and only processor online.
///
/// Has no side effects. Evaluated with interrupts enabled and before any
/// transition resource is acquired.
pub fn check_quiesced(
    cpus: &dyn OnlineCpus,
    driver: CpuId,
    target: SleepState,
) -> Result<(), PowerError> {
    let online = cpus.online_mask();
    if online == CpuMask::single(driver) {
        return Ok(());
    }

    log::warn!(
        "power: Too many CPUs running for state {} ({} online, driver {})",
        target,
        online.count(),
        driver
    );
    Err(PowerError::BadState(BadStateReason::CpusOnline(online.count())))
}
