//! # Cortex-M core
//!
//! [`CortexM`] ties the architectural state to its two collaborators: the
//! memory system ([`MemoryBus`]) and the priority logic
//! ([`ExceptionController`]). The exception engines in
//! [`crate::exception`] and the special-register dispatch in
//! [`crate::sysreg`] are `impl` blocks on this type.
//!
//! The controller sits behind `Arc<Mutex<_>>` so that an interrupt source
//! running on another thread can pend exceptions while the core is
//! stopped between instructions. The lock is only held for the duration
//! of a single controller call.

use std::sync::{Arc, Mutex};

use macros::acquire_lock;
use tracing::{debug, error, warn};
use vecfixed::VecFixed;

use crate::bus::{FlatMemory, MemoryBus, MmuIndex};
use crate::cpu::config::CpuFeatures;
use crate::cpu::cpu_modes::{Banked, SecurityState};
use crate::cpu::fault_status::{Aircr, Hfsr};
use crate::cpu::state::ProcessorState;
use crate::exception::ExceptionError;
use crate::nvic::{ExceptionController, MaskState, Nvic, NvicConfig, PendOutcome};
use crate::trace::{Transition, TransitionKind};

/// Number of transitions kept in [`CortexM::history`].
pub const HISTORY_LEN: usize = 32;

pub struct CortexM<B: MemoryBus = FlatMemory, N: ExceptionController = Nvic> {
    pub state: ProcessorState,
    pub bus: B,
    nvic: Arc<Mutex<N>>,
    history: VecFixed<HISTORY_LEN, Transition>,
}

impl<B: MemoryBus> CortexM<B, Nvic> {
    /// Core wired to a fresh [`Nvic`] sized by `config`.
    #[must_use]
    pub fn with_nvic_config(features: CpuFeatures, bus: B, config: NvicConfig) -> Self {
        let nvic = Nvic::new(config, &features);
        Self::new(features, bus, Arc::new(Mutex::new(nvic)))
    }

    /// Core and controller reset. The initial MSP and PC come from the
    /// first two words of the vector table of the reset security state.
    pub fn reset(&mut self) {
        self.state.reset();
        acquire_lock!(self.nvic, nvic => nvic.reset());
        self.history.clear();

        let secure = self.state.secure();
        let vtor = self.state.bank().vtor;
        let sp = self.bus.load_word_physical(vtor, secure).unwrap_or_else(|_| {
            warn!("reset: can't read initial SP at 0x{vtor:08X}");
            0
        });
        let pc = self.bus.load_word_physical(vtor + 4, secure).unwrap_or_else(|_| {
            warn!("reset: can't read reset vector at 0x{:08X}", vtor + 4);
            0
        });
        self.state.registers.set_stack_pointer(sp & !3);
        self.state.registers.set_program_counter(pc & !1);
        debug!("reset: sp=0x{sp:08X} pc=0x{pc:08X}");
    }
}

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    pub fn new(features: CpuFeatures, bus: B, nvic: Arc<Mutex<N>>) -> Self {
        Self {
            state: ProcessorState::new(features),
            bus,
            nvic,
            history: VecFixed::new(),
        }
    }

    /// Shared handle on the exception controller.
    #[must_use]
    pub fn nvic(&self) -> Arc<Mutex<N>> {
        Arc::clone(&self.nvic)
    }

    /// Most recent mode and security transitions, oldest first.
    #[must_use]
    pub const fn history(&self) -> &VecFixed<HISTORY_LEN, Transition> {
        &self.history
    }

    #[must_use]
    pub const fn is_locked_up(&self) -> bool {
        self.state.locked_up
    }

    pub(crate) fn record(&mut self, kind: TransitionKind) {
        let transition = Transition {
            kind,
            exception: self.state.exception,
            secure: self.state.secure(),
            lr: self.state.registers.link_register(),
        };
        debug!("{transition}");
        self.history.push(transition);
    }

    /// Snapshot of the registers feeding the execution priority.
    #[must_use]
    pub fn masks(&self) -> MaskState {
        let banks = &self.state.banks;
        MaskState {
            primask: Banked {
                non_secure: banks.non_secure.primask,
                secure: banks.secure.primask,
            },
            basepri: Banked {
                non_secure: banks.non_secure.basepri,
                secure: banks.secure.basepri,
            },
            faultmask: Banked {
                non_secure: banks.non_secure.faultmask,
                secure: banks.secure.faultmask,
            },
            aircr: self.state.aircr,
        }
    }

    pub(crate) fn with_nvic<R>(&self, f: impl FnOnce(&mut N, &MaskState) -> R) -> R {
        let masks = self.masks();
        acquire_lock!(self.nvic, nvic => f(&mut *nvic, &masks))
    }

    /// Pends `exc` as the CPU would for a synchronous fault or an
    /// exception instruction.
    pub fn pend(&mut self, exc: u32, secure: bool) -> Result<(), ExceptionError> {
        let outcome = self.with_nvic(|nvic, masks| nvic.set_pending(exc, secure, masks));
        self.note_pend(outcome)
    }

    pub(crate) fn pend_derived(&mut self, exc: u32, secure: bool) -> Result<(), ExceptionError> {
        let outcome = self.with_nvic(|nvic, masks| nvic.set_pending_derived(exc, secure, masks));
        self.note_pend(outcome)
    }

    pub(crate) fn pend_lazyfp(&mut self, exc: u32, secure: bool) -> Result<(), ExceptionError> {
        let fpccr_s = self.state.fp_owner().fpccr;
        let fpccr = self.state.banks[SecurityState::from(secure)].fpccr;
        let outcome = self.with_nvic(|nvic, masks| {
            nvic.set_pending_lazyfp(exc, secure, masks, fpccr_s, fpccr)
        });
        self.note_pend(outcome)
    }

    fn note_pend(
        &mut self,
        outcome: Result<PendOutcome, ExceptionError>,
    ) -> Result<(), ExceptionError> {
        match outcome {
            Ok(PendOutcome::Escalated) => {
                self.state.hfsr.insert(Hfsr::FORCED);
                Ok(())
            }
            Ok(PendOutcome::Pended | PendOutcome::Ignored) => Ok(()),
            Err(err) => Err(self.lockup(err)),
        }
    }

    /// Latches the locked-up state when `err` is a lockup.
    pub(crate) fn lockup(&mut self, err: ExceptionError) -> ExceptionError {
        if matches!(err, ExceptionError::Lockup { .. }) && !self.state.locked_up {
            error!("{err}");
            self.state.locked_up = true;
            self.record(TransitionKind::Lockup);
        }
        err
    }

    /// Refuses to do anything once the core has locked up.
    pub(crate) fn check_locked_up(&self) -> Result<(), ExceptionError> {
        if self.state.locked_up {
            let priority = self.with_nvic(|nvic, masks| nvic.raw_execution_priority(masks));
            return Err(ExceptionError::Lockup {
                exception: crate::exception::HARD_FAULT,
                priority,
            });
        }
        Ok(())
    }

    pub fn mmu_index_for(&self, secure: bool, privileged: bool) -> MmuIndex {
        let negative_priority =
            self.with_nvic(|nvic, masks| nvic.neg_prio_requested(secure, masks));
        MmuIndex {
            secure,
            privileged,
            negative_priority,
        }
    }

    /// Translation regime `secstate` would use in the current mode.
    pub fn mmu_index_for_secstate(&self, secstate: SecurityState) -> MmuIndex {
        self.mmu_index_for(secstate.is_secure(), self.state.is_privileged_in(secstate))
    }

    pub fn current_mmu_index(&self) -> MmuIndex {
        self.mmu_index_for(self.state.secure(), self.state.is_privileged())
    }

    /// AIRCR write. BFHFNMINS and PRIS only exist with the Security
    /// Extension.
    pub fn set_aircr(&mut self, aircr: Aircr) {
        let aircr = if self.state.features.has_security() {
            aircr
        } else {
            Aircr::default()
        };
        self.state.aircr = aircr;
        acquire_lock!(self.nvic, nvic => nvic.aircr_changed(aircr));
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Machines with a populated vector table and stacks, shared by the
    //! engine tests.

    use super::*;

    pub const SECURE_RAM: u32 = 0x1000_0000;
    pub const NS_RAM: u32 = 0x2000_0000;
    pub const RAM_SIZE: u32 = 0x1_0000;
    /// Secure, Non-secure callable gateway veneers.
    pub const NSC_BASE: u32 = SECURE_RAM + 0xF000;

    pub const SECURE_VTOR: u32 = SECURE_RAM;
    pub const NS_VTOR: u32 = NS_RAM;

    pub const SECURE_MSP: u32 = SECURE_RAM + 0x8000;
    pub const SECURE_PSP: u32 = SECURE_RAM + 0x7000;
    pub const NS_MSP: u32 = NS_RAM + 0x8000;
    pub const NS_PSP: u32 = NS_RAM + 0x7000;

    /// Handler address, with the Thumb bit, that the vector table holds.
    pub const fn handler(secure: bool, exc: u32) -> u32 {
        let base = if secure { SECURE_RAM } else { NS_RAM };
        (base + 0x4000 + exc * 0x10) | 1
    }

    fn memory(features: &CpuFeatures) -> FlatMemory {
        let mut mem = FlatMemory::new(features.has_security())
            .with_ram(SECURE_RAM, RAM_SIZE)
            .with_ram(NS_RAM, RAM_SIZE)
            .with_sau_region(NS_RAM, NS_RAM + RAM_SIZE - 1, false)
            .with_sau_region(NSC_BASE, SECURE_RAM + RAM_SIZE - 1, true);

        for exc in 1..48 {
            mem.write_word(SECURE_VTOR + exc * 4, handler(true, exc));
            mem.write_word(NS_VTOR + exc * 4, handler(false, exc));
        }
        mem
    }

    /// Thread mode, privileged, on MSP. Secure when the core has the
    /// Security Extension.
    pub fn machine(features: CpuFeatures) -> CortexM {
        let bus = memory(&features);
        let mut cpu = CortexM::with_nvic_config(features, bus, NvicConfig::default());

        cpu.state.banks.secure.vtor = SECURE_VTOR;
        cpu.state.banks.non_secure.vtor = NS_VTOR;

        if features.has_security() {
            cpu.state.registers.set_stack_pointer(SECURE_MSP);
            cpu.state.other_sp = SECURE_PSP;
            cpu.state.other_ss_msp = NS_MSP;
            cpu.state.other_ss_psp = NS_PSP;
        } else {
            cpu.state.registers.set_stack_pointer(NS_MSP);
            cpu.state.other_sp = NS_PSP;
        }

        cpu.state.registers.set_program_counter(0x0000_1000);
        cpu
    }

    pub fn set_priority(cpu: &CortexM, exc: u32, secure: bool, prio: u8) {
        let nvic = cpu.nvic();
        acquire_lock!(nvic, nvic => nvic.set_priority(exc, secure, prio));
    }

    pub fn set_enabled(cpu: &CortexM, exc: u32, secure: bool) {
        let nvic = cpu.nvic();
        acquire_lock!(nvic, nvic => nvic.set_enabled(exc, secure, true));
    }

    pub fn is_active(cpu: &CortexM, exc: u32, secure: bool) -> bool {
        let nvic = cpu.nvic();
        acquire_lock!(nvic, nvic => nvic.is_active(exc, secure))
    }

    pub fn is_pending(cpu: &CortexM, exc: u32, secure: bool) -> bool {
        let nvic = cpu.nvic();
        acquire_lock!(nvic, nvic => nvic.is_pending(exc, secure))
    }

    /// Pends an interrupt the way a peripheral would.
    pub fn pend_irq(cpu: &CortexM, irq: u32) {
        let nvic = cpu.nvic();
        let masks = cpu.masks();
        acquire_lock!(nvic, nvic => nvic.pend(irq, false, &masks))
            .expect("interrupt pend can't lock up");
    }

    pub fn route_non_secure(cpu: &CortexM, irq: u32) {
        let nvic = cpu.nvic();
        acquire_lock!(nvic, nvic => nvic.set_target_non_secure(irq, true));
    }
}
