//! # Architecture Abstraction Layer
//!
//! Interrupt masking on the executing processor and the x86_64 resume
//! environment used when the machine comes back from a sleep state.

pub mod x86_64;

/// Interrupt delivery control for the executing processor.
///
/// The power path masks interrupts around the sleep entry and checks the
/// mask state after wake, so both directions and the query are needed.
pub trait InterruptControl: Send + Sync {
    /// Disable interrupt delivery on this processor.
    fn disable(&self);

    /// Enable interrupt delivery on this processor.
    fn enable(&self);

    /// Returns `true` if interrupt delivery is currently masked.
    fn are_disabled(&self) -> bool;
}

/// The executing processor's own interrupt flag.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalInterrupts;

impl InterruptControl for LocalInterrupts {
    #[inline(always)]
    fn disable(&self) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: CLI only affects interrupt delivery on this CPU
        unsafe {
            core::arch::asm!("cli", options(nomem, nostack));
        }

        #[cfg(target_arch = "aarch64")]
        // SAFETY: Masking DAIF is safe in kernel mode
        unsafe {
            core::arch::asm!("msr daifset, #0xf", options(nomem, nostack));
        }
    }

    #[inline(always)]
    fn enable(&self) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: STI only affects interrupt delivery on this CPU
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack));
        }

        #[cfg(target_arch = "aarch64")]
        // SAFETY: Clearing DAIF is safe in kernel mode
        unsafe {
            core::arch::asm!("msr daifclr, #0xf", options(nomem, nostack));
        }
    }

    #[inline(always)]
    fn are_disabled(&self) -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            let flags: u64;
            // SAFETY: Reading RFLAGS has no side effects
            unsafe {
                core::arch::asm!("pushfq", "pop {0}", out(reg) flags, options(nomem));
            }
            (flags & (1 << 9)) == 0
        }

        #[cfg(target_arch = "aarch64")]
        {
            let daif: u64;
            // SAFETY: Reading DAIF has no side effects
            unsafe {
                core::arch::asm!("mrs {0}, daif", out(reg) daif, options(nomem, nostack));
            }
            (daif & 0x3C0) != 0
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        true
    }
}
