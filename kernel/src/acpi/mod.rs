//! # ACPI Sleep Support
//!
//! The parts of ACPI the power path touches directly.
//!
//! ## Features
//!
//! - System sleep states (S1-S5) and SLP_TYP codes
//! - Firmware ACPI Control Structure (FACS) and its waking vector
//! - Locating the FACS through the FADT
//! - The sleep transition engine interface
//!
//! Table discovery (RSDP/XSDT walking) and the SLP_EN register sequence
//! live outside this crate and are reached through `AcpiTables` and
//! `TransitionEngine`.

use core::ptr::{self, NonNull};

use bitflags::bitflags;

use crate::arch::x86_64::ResumeRegisters;

/// ACPI signature for FADT.
pub const FADT_SIGNATURE: [u8; 4] = *b"FACP";

/// ACPI signature for FACS.
pub const FACS_SIGNATURE: [u8; 4] = *b"FACS";

/// Required FACS alignment.
pub const FACS_ALIGNMENT: usize = 64;

/// FACS length up to and including the 32-bit waking vector fields.
const FACS_V0_LENGTH: u32 = 32;

/// First FACS version carrying the OSPM-enabled feature flags.
const FACS_OSPM_FLAGS_VERSION: u8 = 2;

/// ACPI errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiError {
    /// Table not present
    NotFound,
    /// Table signature mismatch
    BadSignature,
    /// Table is misaligned or truncated
    BadAddress,
    /// Value cannot be encoded in the target field
    BadParameter,
    /// Hardware refused the request
    HardwareError,
}

impl core::fmt::Display for AcpiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AcpiError::NotFound => write!(f, "table not found"),
            AcpiError::BadSignature => write!(f, "bad table signature"),
            AcpiError::BadAddress => write!(f, "bad table address"),
            AcpiError::BadParameter => write!(f, "bad parameter"),
            AcpiError::HardwareError => write!(f, "hardware error"),
        }
    }
}

// =============================================================================
// Sleep states
// =============================================================================

/// System sleep state a transition targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SleepState {
    /// Power on suspend, caches flushed
    S1 = 1,
    /// CPU powered off, caches lost
    S2 = 2,
    /// Suspend to RAM
    S3 = 3,
    /// Suspend to disk
    S4 = 4,
    /// Soft off
    S5 = 5,
}

impl SleepState {
    /// Decodes an S-state number; only 1 through 5 are transition targets.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SleepState::S1),
            2 => Some(SleepState::S2),
            3 => Some(SleepState::S3),
            4 => Some(SleepState::S4),
            5 => Some(SleepState::S5),
            _ => None,
        }
    }

    /// Raw S-state number.
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// S5 does not come back through the resume path.
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, SleepState::S5)
    }
}

impl core::fmt::Display for SleepState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "S{}", self.as_u8())
    }
}

/// SLP_TYPa/SLP_TYPb values from the `\_Sx` package, passed through unchecked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SleepTypes {
    pub a: u8,
    pub b: u8,
}

impl SleepTypes {
    pub const fn new(a: u8, b: u8) -> Self {
        Self { a, b }
    }
}

/// Performs the hardware sleep entry.
///
/// `Ok` means the machine went to sleep and has woken up again: the
/// registers were saved into `regs`, the resume trampoline reloaded them,
/// and execution continued here with interrupts still disabled. An `Err`
/// is returned before anything hardware-visible happened. A real S5
/// never returns.
pub trait TransitionEngine: Send + Sync {
    fn transition_s_state(
        &self,
        regs: &mut ResumeRegisters,
        target: SleepState,
        types: SleepTypes,
    ) -> Result<(), AcpiError>;
}

// =============================================================================
// FADT
// =============================================================================

/// Common ACPI table header.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct AcpiHeader {
    /// Signature (4 bytes)
    pub signature: [u8; 4],
    /// Length of table including header
    pub length: u32,
    /// Revision
    pub revision: u8,
    /// Checksum
    pub checksum: u8,
    /// OEM ID
    pub oem_id: [u8; 6],
    /// OEM table ID
    pub oem_table_id: [u8; 8],
    /// OEM revision
    pub oem_revision: u32,
    /// Creator ID
    pub creator_id: u32,
    /// Creator revision
    pub creator_revision: u32,
}

/// Generic Address Structure.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct GenericAddress {
    pub address_space_id: u8,
    pub register_bit_width: u8,
    pub register_bit_offset: u8,
    pub access_size: u8,
    pub address: u64,
}

/// Fixed ACPI Description Table, through the 64-bit control pointers.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Fadt {
    /// Header
    pub header: AcpiHeader,
    /// Physical address of FACS
    pub facs_address: u32,
    /// Physical address of DSDT
    pub dsdt_address: u32,
    pub reserved1: u8,
    pub preferred_pm_profile: u8,
    pub sci_interrupt: u16,
    pub smi_command: u32,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub s4bios_req: u8,
    pub pstate_control: u8,
    pub pm1a_event_block: u32,
    pub pm1b_event_block: u32,
    pub pm1a_control_block: u32,
    pub pm1b_control_block: u32,
    pub pm2_control_block: u32,
    pub pm_timer_block: u32,
    pub gpe0_block: u32,
    pub gpe1_block: u32,
    pub pm1_event_length: u8,
    pub pm1_control_length: u8,
    pub pm2_control_length: u8,
    pub pm_timer_length: u8,
    pub gpe0_length: u8,
    pub gpe1_length: u8,
    pub gpe1_base: u8,
    pub cstate_control: u8,
    pub worst_c2_latency: u16,
    pub worst_c3_latency: u16,
    pub flush_size: u16,
    pub flush_stride: u16,
    pub duty_offset: u8,
    pub duty_width: u8,
    pub day_alarm: u8,
    pub month_alarm: u8,
    pub century: u8,
    pub boot_architecture_flags: u16,
    pub reserved2: u8,
    pub flags: u32,
    pub reset_register: GenericAddress,
    pub reset_value: u8,
    pub arm_boot_flags: u16,
    pub minor_revision: u8,
    /// 64-bit physical address of FACS (ACPI 2.0+)
    pub x_facs_address: u64,
    /// 64-bit physical address of DSDT (ACPI 2.0+)
    pub x_dsdt_address: u64,
}

impl Fadt {
    /// Offset just past `facs_address`.
    const FACS_END: u32 = 40;
    /// Offset just past `x_facs_address`.
    const X_FACS_END: u32 = 140;

    /// Physical address of the FACS in the FADT at `fadt`, preferring the
    /// 64-bit field.
    ///
    /// Only fields inside the table's own length are read, so older and
    /// shorter FADT revisions are handled.
    ///
    /// # Safety
    ///
    /// `fadt` must point to at least `header.length` readable bytes.
    pub unsafe fn facs_address(fadt: NonNull<Fadt>) -> Option<u64> {
        let p = fadt.as_ptr();
        // SAFETY: Every table is at least a header long
        let header = unsafe { ptr::read_unaligned(ptr::addr_of!((*p).header)) };
        if header.signature != FADT_SIGNATURE {
            log::warn!("acpi: FADT signature mismatch");
            return None;
        }

        let length = header.length;
        if length < Self::FACS_END {
            return None;
        }
        // SAFETY: Both reads stay inside `length`
        let facs = unsafe { ptr::read_unaligned(ptr::addr_of!((*p).facs_address)) };
        let x_facs = if length >= Self::X_FACS_END {
            unsafe { ptr::read_unaligned(ptr::addr_of!((*p).x_facs_address)) }
        } else {
            0
        };

        if x_facs != 0 {
            Some(x_facs)
        } else if facs != 0 {
            Some(facs as u64)
        } else {
            None
        }
    }
}

// =============================================================================
// FACS
// =============================================================================

bitflags! {
    /// FACS feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FacsFlags: u32 {
        /// Platform supports S4BIOS_REQ
        const S4BIOS = 1 << 0;
        /// Firmware can wake into a 64-bit environment
        const BIT64_WAKE_SUPPORTED = 1 << 1;
    }

    /// OSPM-enabled FACS feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OspmFlags: u32 {
        /// OSPM requests a 64-bit wake environment
        const BIT64_WAKE = 1 << 0;
    }
}

/// Firmware ACPI Control Structure.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Facs {
    pub signature: [u8; 4],
    pub length: u32,
    pub hardware_signature: u32,
    /// Real-mode address jumped to on wake (ACPI 1.0)
    pub firmware_waking_vector: u32,
    pub global_lock: u32,
    pub flags: u32,
    /// Wake address used when non-zero (ACPI 2.0+)
    pub x_firmware_waking_vector: u64,
    pub version: u8,
    pub reserved: [u8; 3],
    pub ospm_flags: u32,
    pub reserved2: [u8; 24],
}

/// Firmware table lookup.
pub trait AcpiTables: Send + Sync {
    /// Kernel-visible pointer to the FACS, if the platform has one.
    fn facs(&self) -> Option<NonNull<Facs>>;
}

/// Locates the FACS through a mapped FADT.
pub struct FadtTables {
    fadt: Option<NonNull<Fadt>>,
    phys_to_virt: fn(u64) -> *mut u8,
}

// SAFETY: The FADT and FACS are firmware memory mapped for the lifetime of
// the kernel; only the waking vector fields are ever written
unsafe impl Send for FadtTables {}
unsafe impl Sync for FadtTables {}

impl FadtTables {
    /// Wrap the FADT found during table discovery.
    ///
    /// # Safety
    ///
    /// `fadt` must stay mapped and `phys_to_virt` must translate any
    /// physical address the FADT names.
    pub unsafe fn new(fadt: Option<NonNull<Fadt>>, phys_to_virt: fn(u64) -> *mut u8) -> Self {
        Self { fadt, phys_to_virt }
    }
}

impl AcpiTables for FadtTables {
    fn facs(&self) -> Option<NonNull<Facs>> {
        // SAFETY: Guaranteed mapped by the constructor contract
        let phys = unsafe { Fadt::facs_address(self.fadt?) }?;
        NonNull::new((self.phys_to_virt)(phys).cast::<Facs>())
    }
}

/// Writes the firmware waking vector.
pub trait WakeVectorAccess: Send + Sync {
    /// Set the real-mode waking vector and the 64-bit one. Zero disables.
    ///
    /// A non-zero `vector64` asks the firmware to wake into a 64-bit
    /// environment, which it must advertise.
    fn set_waking_vector(&self, vector: u64, vector64: u64) -> Result<(), AcpiError>;
}

/// Waking vector stored in the platform FACS.
pub struct FacsWakeVector<T: AcpiTables> {
    tables: T,
}

impl<T: AcpiTables> FacsWakeVector<T> {
    pub fn new(tables: T) -> Self {
        Self { tables }
    }

    fn locate(&self) -> Result<NonNull<Facs>, AcpiError> {
        let facs = self.tables.facs().ok_or(AcpiError::NotFound)?;
        if facs.as_ptr() as usize % FACS_ALIGNMENT != 0 {
            return Err(AcpiError::BadAddress);
        }
        // SAFETY: Aligned pointer handed out by the table lookup
        let (signature, length) = unsafe {
            let p = facs.as_ptr();
            (
                ptr::read_volatile(ptr::addr_of!((*p).signature)),
                ptr::read_volatile(ptr::addr_of!((*p).length)),
            )
        };
        if signature != FACS_SIGNATURE {
            return Err(AcpiError::BadSignature);
        }
        if length < FACS_V0_LENGTH {
            return Err(AcpiError::BadAddress);
        }
        Ok(facs)
    }
}

impl<T: AcpiTables> WakeVectorAccess for FacsWakeVector<T> {
    fn set_waking_vector(&self, vector: u64, vector64: u64) -> Result<(), AcpiError> {
        let vector = u32::try_from(vector).map_err(|_| AcpiError::BadParameter)?;
        let facs = self.locate()?;

        let p = facs.as_ptr();

        // SAFETY: The FACS is 64-byte aligned, so every field touched here
        // is naturally aligned
        unsafe {
            let length = ptr::read_volatile(ptr::addr_of!((*p).length));
            let version = ptr::read_volatile(ptr::addr_of!((*p).version));
            let flags = ptr::read_volatile(ptr::addr_of!((*p).flags));
            let has_x_vector = length > FACS_V0_LENGTH && version >= 1;
            let wake64 = has_x_vector
                && FacsFlags::from_bits_truncate(flags).contains(FacsFlags::BIT64_WAKE_SUPPORTED);

            if vector64 != 0 && !wake64 {
                return Err(AcpiError::BadParameter);
            }

            ptr::write_volatile(ptr::addr_of_mut!((*p).firmware_waking_vector), vector);
            if has_x_vector {
                ptr::write_volatile(ptr::addr_of_mut!((*p).x_firmware_waking_vector), vector64);
            }
            if has_x_vector && version >= FACS_OSPM_FLAGS_VERSION {
                let slot = ptr::addr_of_mut!((*p).ospm_flags);
                let mut ospm = OspmFlags::from_bits_retain(ptr::read_volatile(slot));
                ospm.set(OspmFlags::BIT64_WAKE, vector64 != 0);
                ptr::write_volatile(slot, ospm.bits());
            }
        }

        log::debug!("acpi: waking vector {:#x} (x {:#x})", vector, vector64);
        Ok(())
    }
}
