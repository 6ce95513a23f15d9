//! # Low-Memory Bootstrap Region
//!
//! After an S1-S4 wake the firmware jumps to the waking vector in real
//! mode. That vector must point at code below 1 MB, so a fixed two-page
//! region is reserved at boot:
//!
//! ```text
//! base + 0x0000 : trampoline code (16-bit entry, mode switch)
//! base + 0x1000 : RealmodeEntryData (page tables, long mode target, registers)
//! ```
//!
//! The region has a single owner at a time. Leasing it builds a temporary
//! address space that identity-maps the region next to the kernel half, so
//! the trampoline can turn paging on before jumping back into the kernel.

use core::ptr::{self, NonNull};

use spin::Mutex;

use super::{
    Bootstrap16Header, PhysFrame, RealmodeEntryData, ResumeRegisters, KERNEL_CODE_SELECTOR,
    PAGE_SIZE, REAL_MODE_LIMIT,
};

/// Number of pages in the bootstrap region.
pub const BOOTSTRAP16_PAGES: usize = 2;

/// Length of the bootstrap region in bytes.
pub const BOOTSTRAP16_LEN: usize = BOOTSTRAP16_PAGES * PAGE_SIZE;

/// Temporary address space backing a leased region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempAspace {
    /// Physical address of the top-level page table
    pub root: u64,
}

/// Page table services the bootstrap region needs.
pub trait LowMemoryMapper: Send + Sync {
    /// Build an address space identity-mapping `len` bytes at `base`.
    fn create_aspace(&self, base: u64, len: usize) -> Option<TempAspace>;

    /// Tear down an address space built by `create_aspace`.
    fn destroy_aspace(&self, aspace: TempAspace);

    /// Physical address of the kernel's top-level page table.
    fn kernel_root(&self) -> u64;

    /// Kernel-visible pointer to the physical address `addr`.
    fn phys_to_virt(&self, addr: u64) -> *mut u8;
}

/// Errors from the bootstrap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap16Error {
    /// Region is unaligned or not reachable from real mode
    InvalidRegion,
    /// Trampoline does not fit in the code page
    TrampolineTooLarge,
    /// Region is leased by another transition
    Busy,
    /// Temporary address space could not be built
    MapFailed,
    /// A page table lies above 4 GB
    TableOutOfRange,
}

impl core::fmt::Display for Bootstrap16Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Bootstrap16Error::InvalidRegion => write!(f, "bootstrap region invalid"),
            Bootstrap16Error::TrampolineTooLarge => write!(f, "trampoline larger than a page"),
            Bootstrap16Error::Busy => write!(f, "bootstrap region in use"),
            Bootstrap16Error::MapFailed => write!(f, "temporary address space unavailable"),
            Bootstrap16Error::TableOutOfRange => write!(f, "page table above 4 GB"),
        }
    }
}

/// A leased resume environment.
///
/// Valid until handed back to the allocator that produced it.
#[derive(Debug)]
pub struct ResumeEnvironment {
    entry_ip: u64,
    data: NonNull<RealmodeEntryData>,
    aspace: TempAspace,
}

impl ResumeEnvironment {
    /// Assemble a lease.
    ///
    /// # Safety
    ///
    /// `data` must point to a writable, aligned `RealmodeEntryData` that
    /// stays mapped until the lease is released.
    pub unsafe fn from_raw_parts(
        entry_ip: u64,
        data: NonNull<RealmodeEntryData>,
        aspace: TempAspace,
    ) -> Self {
        Self {
            entry_ip,
            data,
            aspace,
        }
    }

    /// Physical address the firmware should jump to on wake.
    pub fn entry_ip(&self) -> u64 {
        self.entry_ip
    }

    /// Point the trampoline at the register block to reload on wake.
    pub fn set_registers(&mut self, regs: &mut ResumeRegisters) {
        // SAFETY: The data page is owned by this lease
        unsafe {
            let slot = ptr::addr_of_mut!((*self.data.as_ptr()).registers_ptr);
            ptr::write_volatile(slot, regs as *mut ResumeRegisters as u64);
        }
    }

    /// Current contents of the data page.
    pub fn entry_data(&self) -> RealmodeEntryData {
        // SAFETY: The data page is owned by this lease
        unsafe { ptr::read_volatile(self.data.as_ptr()) }
    }
}

/// Source of resume environments.
pub trait ResumeEnvironmentAllocator: Send + Sync {
    /// Lease an environment that continues at `entry` once in long mode.
    fn acquire(&self, entry: u64) -> Result<ResumeEnvironment, Bootstrap16Error>;

    /// Return a lease obtained from `acquire`.
    fn release(&self, env: ResumeEnvironment);
}

/// The fixed low-memory bootstrap region.
pub struct Bootstrap16<M: LowMemoryMapper> {
    base: PhysFrame,
    trampoline: &'static [u8],
    mapper: M,
    leased: Mutex<bool>,
}

impl<M: LowMemoryMapper> Bootstrap16<M> {
    /// Reserve the region at `base` for `trampoline`.
    pub fn new(
        base: u64,
        trampoline: &'static [u8],
        mapper: M,
    ) -> Result<Self, Bootstrap16Error> {
        let frame = PhysFrame::from_address(base).ok_or(Bootstrap16Error::InvalidRegion)?;
        let end = base
            .checked_add(BOOTSTRAP16_LEN as u64)
            .ok_or(Bootstrap16Error::InvalidRegion)?;
        if base == 0 || end > REAL_MODE_LIMIT {
            return Err(Bootstrap16Error::InvalidRegion);
        }
        if trampoline.len() > PAGE_SIZE {
            return Err(Bootstrap16Error::TrampolineTooLarge);
        }

        Ok(Self {
            base: frame,
            trampoline,
            mapper,
            leased: Mutex::new(false),
        })
    }

    /// Returns true while an environment is leased.
    pub fn is_leased(&self) -> bool {
        *self.leased.lock()
    }

    fn data_page(&self) -> u64 {
        self.base.address() + PAGE_SIZE as u64
    }
}

impl<M: LowMemoryMapper> ResumeEnvironmentAllocator for Bootstrap16<M> {
    fn acquire(&self, entry: u64) -> Result<ResumeEnvironment, Bootstrap16Error> {
        let mut leased = self.leased.lock();
        if *leased {
            return Err(Bootstrap16Error::Busy);
        }

        let kernel_root = self.mapper.kernel_root();
        if kernel_root > u32::MAX as u64 {
            return Err(Bootstrap16Error::TableOutOfRange);
        }

        let aspace = self
            .mapper
            .create_aspace(self.base.address(), BOOTSTRAP16_LEN)
            .ok_or(Bootstrap16Error::MapFailed)?;
        if aspace.root > u32::MAX as u64 {
            self.mapper.destroy_aspace(aspace);
            return Err(Bootstrap16Error::TableOutOfRange);
        }

        let code = self.mapper.phys_to_virt(self.base.address());
        let data = self.mapper.phys_to_virt(self.data_page()).cast::<RealmodeEntryData>();
        let data = match NonNull::new(data) {
            Some(data) if !code.is_null() => data,
            _ => {
                self.mapper.destroy_aspace(aspace);
                return Err(Bootstrap16Error::MapFailed);
            }
        };

        // SAFETY: Both pages belong to the reserved region and nobody else
        // holds a lease on it
        unsafe {
            ptr::copy_nonoverlapping(self.trampoline.as_ptr(), code, self.trampoline.len());
            ptr::write_volatile(
                data.as_ptr(),
                RealmodeEntryData {
                    header: Bootstrap16Header {
                        bootstrap_pml4: aspace.root as u32,
                        kernel_pml4: kernel_root as u32,
                        long_mode_entry: entry,
                        long_mode_cs: KERNEL_CODE_SELECTOR,
                    },
                    registers_ptr: 0,
                },
            );
        }

        *leased = true;
        log::debug!(
            "bootstrap16: leased {:#x} (entry {:#x}, pml4 {:#x})",
            self.base.address(),
            entry,
            aspace.root
        );

        // SAFETY: `data` is the region's data page, mapped until release
        Ok(unsafe { ResumeEnvironment::from_raw_parts(self.base.address(), data, aspace) })
    }

    fn release(&self, env: ResumeEnvironment) {
        let mut leased = self.leased.lock();
        debug_assert!(*leased, "bootstrap16 released without a lease");

        // SAFETY: The lease still owns the data page
        unsafe { ptr::write_volatile(env.data.as_ptr(), RealmodeEntryData::default()) };
        self.mapper.destroy_aspace(env.aspace);

        *leased = false;
        log::debug!("bootstrap16: released {:#x}", self.base.address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: u64 = 0x9000;
    static TRAMPOLINE: [u8; 4] = [0xFA, 0xFC, 0xEB, 0xFE];

    struct FakeMapper {
        pages: *mut u64,
        created: AtomicUsize,
        destroyed: AtomicUsize,
        fail: bool,
    }

    // SAFETY: The backing pages are only touched through the allocator
    // under test, which serialises access with its lease lock
    unsafe impl Send for FakeMapper {}
    unsafe impl Sync for FakeMapper {}

    impl FakeMapper {
        fn new(fail: bool) -> Self {
            let pages = vec![0u64; BOOTSTRAP16_LEN / 8].into_boxed_slice();
            Self {
                pages: Box::into_raw(pages) as *mut u64,
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl Drop for FakeMapper {
        fn drop(&mut self) {
            let pages = ptr::slice_from_raw_parts_mut(self.pages, BOOTSTRAP16_LEN / 8);
            drop(unsafe { Box::from_raw(pages) });
        }
    }

    impl LowMemoryMapper for FakeMapper {
        fn create_aspace(&self, base: u64, len: usize) -> Option<TempAspace> {
            assert_eq!(base, BASE);
            assert_eq!(len, BOOTSTRAP16_LEN);
            if self.fail {
                return None;
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Some(TempAspace { root: 0x7000 })
        }

        fn destroy_aspace(&self, aspace: TempAspace) {
            assert_eq!(aspace.root, 0x7000);
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn kernel_root(&self) -> u64 {
            0x20_0000
        }

        fn phys_to_virt(&self, addr: u64) -> *mut u8 {
            unsafe { self.pages.cast::<u8>().add((addr - BASE) as usize) }
        }
    }

    #[test]
    fn test_region_must_be_real_mode_reachable() {
        assert_eq!(
            Bootstrap16::new(0x9001, &TRAMPOLINE, FakeMapper::new(false)).err(),
            Some(Bootstrap16Error::InvalidRegion)
        );
        assert_eq!(
            Bootstrap16::new(0xFF000, &TRAMPOLINE, FakeMapper::new(false)).err(),
            Some(Bootstrap16Error::InvalidRegion)
        );
        assert_eq!(
            Bootstrap16::new(0xFFFF_FFFF_FFFF_F000, &TRAMPOLINE, FakeMapper::new(false)).err(),
            Some(Bootstrap16Error::InvalidRegion)
        );
        static BIG: [u8; PAGE_SIZE + 1] = [0; PAGE_SIZE + 1];
        assert_eq!(
            Bootstrap16::new(BASE, &BIG, FakeMapper::new(false)).err(),
            Some(Bootstrap16Error::TrampolineTooLarge)
        );
    }

    #[test]
    fn test_acquire_fills_region() {
        let region = Bootstrap16::new(BASE, &TRAMPOLINE, FakeMapper::new(false)).unwrap();
        let env = region.acquire(0xFFFF_FFFF_8010_0000).unwrap();

        assert_eq!(env.entry_ip(), BASE);
        let data = env.entry_data();
        assert_eq!(data.header.bootstrap_pml4, 0x7000);
        assert_eq!(data.header.kernel_pml4, 0x20_0000);
        assert_eq!(data.header.long_mode_entry, 0xFFFF_FFFF_8010_0000);
        assert_eq!(data.header.long_mode_cs, KERNEL_CODE_SELECTOR);
        assert_eq!(data.registers_ptr, 0);

        let code = region.mapper.phys_to_virt(BASE);
        let copied = unsafe { core::slice::from_raw_parts(code, TRAMPOLINE.len()) };
        assert_eq!(copied, &TRAMPOLINE);

        region.release(env);
    }

    #[test]
    fn test_single_owner() {
        let region = Bootstrap16::new(BASE, &TRAMPOLINE, FakeMapper::new(false)).unwrap();
        let env = region.acquire(0x1000).unwrap();
        assert!(region.is_leased());
        assert_eq!(region.acquire(0x1000).err(), Some(Bootstrap16Error::Busy));

        region.release(env);
        assert!(!region.is_leased());
        assert_eq!(region.mapper.destroyed.load(Ordering::SeqCst), 1);

        let env = region.acquire(0x1000).unwrap();
        region.release(env);
        assert_eq!(region.mapper.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registers_pointer_round_trip() {
        let region = Bootstrap16::new(BASE, &TRAMPOLINE, FakeMapper::new(false)).unwrap();
        let mut env = region.acquire(0x1000).unwrap();
        let mut regs = ResumeRegisters::default();
        env.set_registers(&mut regs);
        assert_eq!(env.entry_data().registers_ptr, &mut regs as *mut _ as u64);

        region.release(env);
        let page = region.mapper.phys_to_virt(BASE + PAGE_SIZE as u64);
        let data = unsafe { ptr::read(page.cast::<RealmodeEntryData>()) };
        assert_eq!(data, RealmodeEntryData::default());
    }

    #[test]
    fn test_map_failure_leaves_region_free() {
        let region = Bootstrap16::new(BASE, &TRAMPOLINE, FakeMapper::new(true)).unwrap();
        assert_eq!(region.acquire(0x1000).err(), Some(Bootstrap16Error::MapFailed));
        assert!(!region.is_leased());
    }
}
