//! # x86_64 Resume Support
//!
//! Data shared between the kernel and the 16-bit resume trampoline.
//!
//! ## Features
//! - Register handoff block filled before sleep entry
//! - Real-mode entry data consumed by the trampoline
//! - Low-memory bootstrap region allocator (`bootstrap16`)

pub mod bootstrap16;

/// Size of a page (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Highest physical address reachable from real mode (1 MB).
pub const REAL_MODE_LIMIT: u64 = 0x10_0000;

/// A physical frame number (PFN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysFrame(u64);

impl PhysFrame {
    /// Creates a new physical frame from an address.
    /// The address must be page-aligned.
    pub const fn from_address(addr: u64) -> Option<Self> {
        if addr % PAGE_SIZE as u64 == 0 {
            Some(Self(addr / PAGE_SIZE as u64))
        } else {
            None
        }
    }

    /// Returns the physical address of this frame.
    pub const fn address(&self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }
}

/// Register state handed from the suspend path to the resume trampoline.
///
/// The transition engine stores the callee context here right before the
/// sleep instruction; after wake the trampoline reloads it and execution
/// continues as if the engine call had returned.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeRegisters {
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rsp: u64,
    pub rip: u64,
}

/// Header of the trampoline data page.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bootstrap16Header {
    /// Physical address of the temporary PML4 (must be below 4 GB)
    pub bootstrap_pml4: u32,
    /// Physical address of the kernel PML4 loaded once in long mode
    pub kernel_pml4: u32,
    /// Kernel virtual address jumped to after the mode switch
    pub long_mode_entry: u64,
    /// Code segment selector used for the far jump into long mode
    pub long_mode_cs: u32,
}

/// Contents of the trampoline data page for a resume.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmodeEntryData {
    pub header: Bootstrap16Header,
    /// Kernel virtual address of the `ResumeRegisters` block to reload
    pub registers_ptr: u64,
}

/// Kernel code segment selector.
pub const KERNEL_CODE_SELECTOR: u32 = 0x08;
