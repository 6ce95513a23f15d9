//! Recording fakes for the power path collaborators.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::boxed::Box;
use std::sync::Arc;
use std::vec::Vec;

use spin::Mutex;

use crate::acpi::{AcpiError, SleepState, SleepTypes, TransitionEngine, WakeVectorAccess};
use crate::arch::x86_64::bootstrap16::{
    Bootstrap16Error, ResumeEnvironment, ResumeEnvironmentAllocator, TempAspace,
};
use crate::arch::x86_64::{RealmodeEntryData, ResumeRegisters};
use crate::arch::InterruptControl;
use crate::sched::{ThreadError, ThreadParams, ThreadSpawner};
use crate::smp::{CpuId, CpuMask, OnlineCpus};

use super::hooks::{SuspendHooks, TimerThaw};
use super::PowerPlatform;

/// Physical entry point of the fake resume environment.
pub const FAKE_ENTRY_IP: u64 = 0x9000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Arch,
    Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Spawn,
    Acquire,
    Release,
    InstallVector(u64),
    ClearVector,
    IrqDisable,
    IrqEnable,
    Suspend(HookKind),
    Resume(HookKind),
    Transition { target: SleepState, irq_disabled: bool },
    ThawTimers,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

pub struct FakeHooks {
    kind: HookKind,
    log: EventLog,
}

impl SuspendHooks for FakeHooks {
    fn suspend(&self) {
        self.log.lock().push(Event::Suspend(self.kind));
    }

    fn resume(&self) {
        self.log.lock().push(Event::Resume(self.kind));
    }
}

/// A single-socket machine whose every collaborator records into one log.
pub struct FakeMachine {
    log: EventLog,
    arch: FakeHooks,
    platform_hooks: FakeHooks,
    online: Mutex<CpuMask>,
    irq_disabled: AtomicBool,
    fail_allocator: AtomicBool,
    fail_wake_vector: AtomicBool,
    fail_wake_vector_after_write: AtomicBool,
    wake_vector: AtomicU64,
    spawn_error: Mutex<Option<ThreadError>>,
    engine_result: Mutex<Result<(), AcpiError>>,
    engine_enables_interrupts: AtomicBool,
    last_types: Mutex<Option<SleepTypes>>,
    last_entry: Mutex<Option<u64>>,
    last_params: Mutex<Option<ThreadParams>>,
    engine_saw_registers: AtomicBool,
    env_page: *mut RealmodeEntryData,
}

// SAFETY: `env_page` is only written through the leased environment, and
// the lease is never shared between threads at the same time
unsafe impl Send for FakeMachine {}
unsafe impl Sync for FakeMachine {}

impl FakeMachine {
    pub fn new() -> Self {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            arch: FakeHooks {
                kind: HookKind::Arch,
                log: log.clone(),
            },
            platform_hooks: FakeHooks {
                kind: HookKind::Platform,
                log: log.clone(),
            },
            log,
            online: Mutex::new(CpuMask::single(CpuId::BSP)),
            irq_disabled: AtomicBool::new(false),
            fail_allocator: AtomicBool::new(false),
            fail_wake_vector: AtomicBool::new(false),
            fail_wake_vector_after_write: AtomicBool::new(false),
            wake_vector: AtomicU64::new(0),
            spawn_error: Mutex::new(None),
            engine_result: Mutex::new(Ok(())),
            engine_enables_interrupts: AtomicBool::new(false),
            last_types: Mutex::new(None),
            last_entry: Mutex::new(None),
            last_params: Mutex::new(None),
            engine_saw_registers: AtomicBool::new(false),
            env_page: Box::into_raw(Box::new(RealmodeEntryData::default())),
        }
    }

    pub fn platform(&self) -> PowerPlatform<'_> {
        PowerPlatform {
            cpus: self,
            interrupts: self,
            wake_vector: self,
            bootstrap: self,
            engine: self,
            arch_hooks: &self.arch,
            platform_hooks: &self.platform_hooks,
            timers: self,
            threads: self,
        }
    }

    pub fn set_online(&self, cpus: &[u32]) {
        let mut mask = CpuMask::none();
        for &cpu in cpus {
            mask.set(CpuId::new(cpu));
        }
        *self.online.lock() = mask;
    }

    pub fn fail_allocator(&self, fail: bool) {
        self.fail_allocator.store(fail, Ordering::SeqCst);
    }

    pub fn fail_wake_vector(&self, fail: bool) {
        self.fail_wake_vector.store(fail, Ordering::SeqCst);
    }

    /// The vector write lands in the FACS, then the accessor reports failure.
    pub fn fail_wake_vector_after_write(&self, fail: bool) {
        self.fail_wake_vector_after_write.store(fail, Ordering::SeqCst);
    }

    pub fn set_spawn_error(&self, error: Option<ThreadError>) {
        *self.spawn_error.lock() = error;
    }

    pub fn set_engine_result(&self, result: Result<(), AcpiError>) {
        *self.engine_result.lock() = result;
    }

    /// Wake up from the engine call with interrupts unmasked.
    pub fn engine_enables_interrupts(&self, enable: bool) {
        self.engine_enables_interrupts.store(enable, Ordering::SeqCst);
    }

    /// Current firmware waking vector.
    pub fn wake_vector(&self) -> u64 {
        self.wake_vector.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    pub fn count(&self, event: Event) -> usize {
        self.log.lock().iter().filter(|&&e| e == event).count()
    }

    pub fn interrupts_disabled(&self) -> bool {
        self.irq_disabled.load(Ordering::SeqCst)
    }

    pub fn last_sleep_types(&self) -> Option<SleepTypes> {
        *self.last_types.lock()
    }

    pub fn last_resume_entry(&self) -> Option<u64> {
        *self.last_entry.lock()
    }

    pub fn last_thread_params(&self) -> Option<ThreadParams> {
        *self.last_params.lock()
    }

    pub fn engine_saw_registers(&self) -> bool {
        self.engine_saw_registers.load(Ordering::SeqCst)
    }

    pub fn entry_data(&self) -> RealmodeEntryData {
        unsafe { core::ptr::read_volatile(self.env_page) }
    }

    fn record(&self, event: Event) {
        self.log.lock().push(event);
    }
}

impl Drop for FakeMachine {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.env_page) });
    }
}

impl OnlineCpus for FakeMachine {
    fn online_mask(&self) -> CpuMask {
        *self.online.lock()
    }
}

impl InterruptControl for FakeMachine {
    fn disable(&self) {
        self.irq_disabled.store(true, Ordering::SeqCst);
        self.record(Event::IrqDisable);
    }

    fn enable(&self) {
        self.irq_disabled.store(false, Ordering::SeqCst);
        self.record(Event::IrqEnable);
    }

    fn are_disabled(&self) -> bool {
        self.interrupts_disabled()
    }
}

impl WakeVectorAccess for FakeMachine {
    fn set_waking_vector(&self, vector: u64, _vector64: u64) -> Result<(), AcpiError> {
        if vector == 0 {
            self.wake_vector.store(0, Ordering::SeqCst);
            self.record(Event::ClearVector);
            return Ok(());
        }
        if self.fail_wake_vector.load(Ordering::SeqCst) {
            return Err(AcpiError::NotFound);
        }
        self.wake_vector.store(vector, Ordering::SeqCst);
        if self.fail_wake_vector_after_write.load(Ordering::SeqCst) {
            return Err(AcpiError::HardwareError);
        }
        self.record(Event::InstallVector(vector));
        Ok(())
    }
}

impl ResumeEnvironmentAllocator for FakeMachine {
    fn acquire(&self, entry: u64) -> Result<ResumeEnvironment, Bootstrap16Error> {
        if self.fail_allocator.load(Ordering::SeqCst) {
            return Err(Bootstrap16Error::MapFailed);
        }
        *self.last_entry.lock() = Some(entry);
        self.record(Event::Acquire);

        let data = NonNull::new(self.env_page).ok_or(Bootstrap16Error::MapFailed)?;
        // SAFETY: `env_page` lives as long as the machine
        let aspace = TempAspace { root: 0x7000 };
        Ok(unsafe { ResumeEnvironment::from_raw_parts(FAKE_ENTRY_IP, data, aspace) })
    }

    fn release(&self, _env: ResumeEnvironment) {
        self.record(Event::Release);
    }
}

impl TransitionEngine for FakeMachine {
    fn transition_s_state(
        &self,
        regs: &mut ResumeRegisters,
        target: SleepState,
        types: SleepTypes,
    ) -> Result<(), AcpiError> {
        self.record(Event::Transition {
            target,
            irq_disabled: self.interrupts_disabled(),
        });
        *self.last_types.lock() = Some(types);

        let handoff = regs as *mut ResumeRegisters as u64;
        if self.entry_data().registers_ptr == handoff {
            self.engine_saw_registers.store(true, Ordering::SeqCst);
        }
        if self.engine_enables_interrupts.load(Ordering::SeqCst) {
            self.irq_disabled.store(false, Ordering::SeqCst);
        }
        *self.engine_result.lock()
    }
}

impl TimerThaw for FakeMachine {
    fn thaw_percpu(&self) {
        self.record(Event::ThawTimers);
    }
}

impl ThreadSpawner for FakeMachine {
    fn run_joined(
        &self,
        params: &ThreadParams,
        body: &mut (dyn FnMut() + Send),
    ) -> Result<(), ThreadError> {
        if let Some(error) = *self.spawn_error.lock() {
            return Err(error);
        }
        *self.last_params.lock() = Some(*params);
        self.record(Event::Spawn);

        std::thread::scope(|s| {
            std::thread::Builder::new()
                .name(params.name.into())
                .spawn_scoped(s, move || body())
                .map_err(|_| ThreadError::CreateFailed)?
                .join()
                .map_err(|_| ThreadError::JoinFailed)
        })
    }
}
