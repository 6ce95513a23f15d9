//! # Processor Online Set
//!
//! Tracks which processors are currently running so the power path can
//! verify that every secondary processor has been parked before it takes
//! the machine into a sleep state.
//!
//! ## Design
//!
//! Bring-up and parking are owned by the SMP boot code. This module only
//! records the result: a processor is marked online once it reaches the
//! scheduler and offline once it has been parked.

use spin::Mutex;

/// Maximum number of supported CPUs.
pub const MAX_CPUS: usize = 256;

/// CPU identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CpuId(pub u32);

impl CpuId {
    /// Bootstrap processor (CPU 0).
    pub const BSP: Self = Self(0);

    /// Creates a new CPU ID.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns this CPU's index in per-CPU arrays.
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for CpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Set of processors, one bit per CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMask {
    bits: [u64; 4], // Support up to 256 CPUs
}

impl CpuMask {
    /// Creates an empty mask.
    pub const fn none() -> Self {
        Self { bits: [0; 4] }
    }

    /// Creates a mask with a single CPU.
    pub fn single(cpu: CpuId) -> Self {
        let mut mask = Self::none();
        mask.set(cpu);
        mask
    }

    /// Sets a CPU in the mask.
    pub fn set(&mut self, cpu: CpuId) {
        let idx = cpu.as_index();
        if idx < MAX_CPUS {
            self.bits[idx / 64] |= 1 << (idx % 64);
        }
    }

    /// Clears a CPU from the mask.
    pub fn clear(&mut self, cpu: CpuId) {
        let idx = cpu.as_index();
        if idx < MAX_CPUS {
            self.bits[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Checks if a CPU is in the mask.
    pub fn contains(&self, cpu: CpuId) -> bool {
        let idx = cpu.as_index();
        if idx < MAX_CPUS {
            (self.bits[idx / 64] & (1 << (idx % 64))) != 0
        } else {
            false
        }
    }

    /// Returns the number of CPUs in the mask.
    pub fn count(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }
}

/// Query for the set of running processors.
pub trait OnlineCpus: Send + Sync {
    /// Snapshot of the processors currently online.
    fn online_mask(&self) -> CpuMask;
}

/// Online-set bookkeeping, fed by the SMP boot and parking code.
pub struct SmpState {
    online: Mutex<CpuMask>,
}

impl SmpState {
    /// Creates a state with no processor online.
    pub const fn new() -> Self {
        Self {
            online: Mutex::new(CpuMask::none()),
        }
    }

    /// Marks a CPU as online.
    pub fn cpu_online(&self, id: CpuId) {
        if id.as_index() >= MAX_CPUS {
            return;
        }
        let mut online = self.online.lock();
        if !online.contains(id) {
            online.set(id);
            log::debug!("smp: {} online", id);
        }
    }

    /// Marks a CPU as parked.
    pub fn cpu_offline(&self, id: CpuId) {
        let mut online = self.online.lock();
        if online.contains(id) {
            online.clear(id);
            log::debug!("smp: {} offline", id);
        }
    }
}

impl Default for SmpState {
    fn default() -> Self {
        Self::new()
    }
}

impl OnlineCpus for SmpState {
    fn online_mask(&self) -> CpuMask {
        *self.online.lock()
    }
}
