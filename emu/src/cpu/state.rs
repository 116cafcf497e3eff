//! # Processor state
//!
//! Everything the exception model reads or writes, owned by one
//! [`ProcessorState`] and mutated only through `&mut self`.
//!
//! ## Stack pointer banking
//!
//! There are up to four stack pointers (MSP/PSP for each security state)
//! but only one of them is live in `r13`. The others are parked:
//!
//! ```text
//!             current security state          other security state
//!          ┌───────────────────────────┐   ┌──────────────────────────┐
//!  in use  │ r13                       │   │ other_ss_msp             │
//!  idle    │ other_sp                  │   │ other_ss_psp             │
//!          └───────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! They only move on a CONTROL.SPSEL write, an IPSR change or a security
//! state switch. [`SpSlot`] names where a given stack pointer currently is.

use serde::{Deserialize, Serialize};

use crate::cpu::config::CpuFeatures;
use crate::cpu::cpu_modes::{Banked, ProcessorMode, SecurityState};
use crate::cpu::fault_status::{Aircr, Ccr, Hfsr, Sfsr};
use crate::cpu::fpccr::{FPCCR_ASPEN, FPCCR_LSPEN, FPCCR_S, Fpccr};
use crate::cpu::psr::{XPSR_EXCP, XPSR_T, Xpsr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::Registers;

/// FP register file as seen by the exception model: contents are opaque.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpContext {
    /// D0-D15, i.e. S0-S31 in pairs.
    pub d: [u64; 16],
    pub fpscr: u32,
    /// MVE predication register.
    pub vpr: u32,
}

impl FpContext {
    /// Zeroes S0..S(2*dregs-1) together with FPSCR and, with MVE, VPR.
    pub fn clear(&mut self, dregs: usize, mve: bool) {
        self.d.iter_mut().take(dregs).for_each(|d| *d = 0);
        self.fpscr = 0;
        if mve {
            self.vpr = 0;
        }
    }
}

/// Where a stack pointer is stored right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpSlot {
    /// The live `r13`.
    Current,
    /// The idle stack pointer of the current security state.
    Other,
    /// Main stack pointer of the other security state.
    OtherSecurityMain,
    /// Process stack pointer of the other security state.
    OtherSecurityProcess,
}

/// Per-core state of the exception model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorState {
    pub features: CpuFeatures,
    pub registers: Registers,
    pub xpsr: Xpsr,
    /// IPSR, the active exception number; 0 in Thread mode.
    pub exception: u32,
    pub security: SecurityState,
    pub banks: Banked<RegisterBank>,
    pub other_sp: u32,
    pub other_ss_msp: u32,
    pub other_ss_psp: u32,
    pub sfsr: Sfsr,
    pub sfar: u32,
    pub hfsr: Hfsr,
    pub bfar: u32,
    pub nsacr: u32,
    pub aircr: Aircr,
    pub fp: FpContext,
    /// Address tagged by the local exclusive monitor.
    pub exclusive_addr: Option<u32>,
    pub locked_up: bool,
}

impl ProcessorState {
    #[must_use]
    pub fn new(features: CpuFeatures) -> Self {
        let mut banks = Banked::splat(RegisterBank {
            ccr: Ccr::new(Ccr::STKALIGN),
            fpccr: Fpccr::new(FPCCR_ASPEN | FPCCR_LSPEN),
            ..RegisterBank::default()
        });
        banks.non_secure.vtor = features.init_nsvtor;

        let security = match features.security {
            Some(ext) => {
                banks.secure.vtor = ext.init_svtor;
                banks.secure.fpccr = Fpccr::new(FPCCR_ASPEN | FPCCR_LSPEN | FPCCR_S);
                SecurityState::Secure
            }
            None => SecurityState::NonSecure,
        };

        let mut xpsr = Xpsr::default();
        xpsr.write(XPSR_T, XPSR_T);

        Self {
            features,
            registers: Registers::default(),
            xpsr,
            exception: 0,
            security,
            banks,
            other_sp: 0,
            other_ss_msp: 0,
            other_ss_psp: 0,
            sfsr: Sfsr::default(),
            sfar: 0,
            hfsr: Hfsr::default(),
            bfar: 0,
            nsacr: 0,
            aircr: Aircr::default(),
            fp: FpContext::default(),
            exclusive_addr: None,
            locked_up: false,
        }
    }

    /// Back to the power-on values for the same configuration.
    pub fn reset(&mut self) {
        *self = Self::new(self.features);
    }

    #[must_use]
    pub const fn secure(&self) -> bool {
        self.security.is_secure()
    }

    #[must_use]
    pub const fn is_handler_mode(&self) -> bool {
        self.exception != 0
    }

    #[must_use]
    pub const fn mode(&self) -> ProcessorMode {
        ProcessorMode::from_ipsr(self.exception)
    }

    /// The bank of the current security state.
    #[must_use]
    pub fn bank(&self) -> &RegisterBank {
        &self.banks[self.security]
    }

    pub fn bank_mut(&mut self) -> &mut RegisterBank {
        &mut self.banks[self.security]
    }

    /// The Secure bank holds FPCA and SFPA, and the unbanked FPCCR bits.
    /// Without the Security Extension it is still the copy they live in.
    #[must_use]
    pub const fn fp_owner(&self) -> &RegisterBank {
        &self.banks.secure
    }

    pub const fn fp_owner_mut(&mut self) -> &mut RegisterBank {
        &mut self.banks.secure
    }

    /// Handler mode always runs on MSP; Thread mode follows CONTROL.SPSEL.
    #[must_use]
    pub fn using_psp(&self) -> bool {
        !self.is_handler_mode() && self.bank().control.spsel()
    }

    /// Limit register guarding the live stack pointer.
    #[must_use]
    pub fn sp_limit(&self) -> u32 {
        if self.using_psp() {
            self.bank().psplim
        } else {
            self.bank().msplim
        }
    }

    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.is_handler_mode() || !self.bank().control.npriv()
    }

    /// Privilege that `secstate` would execute with in the current mode.
    #[must_use]
    pub fn is_privileged_in(&self, secstate: SecurityState) -> bool {
        self.is_handler_mode() || !self.banks[secstate].control.npriv()
    }

    /// NSACR.CP10: Non-secure code may use the FPU.
    #[must_use]
    pub const fn nsacr_cp10(&self) -> bool {
        self.nsacr & (1 << 10) != 0
    }

    #[must_use]
    pub fn cpacr_pass(&self, secstate: SecurityState, privileged: bool) -> bool {
        self.banks[secstate].cpacr_pass(privileged)
    }

    /// Writes CONTROL.SPSEL of `secstate`, swapping the live stack pointer
    /// when that changes which one is in use.
    pub fn write_control_spsel_for_secstate(&mut self, spsel: bool, secstate: SecurityState) {
        let old_is_psp = self.using_psp();

        self.banks[secstate].control.set_spsel_raw(spsel);

        if secstate == self.security && old_is_psp != self.using_psp() {
            self.swap_other_sp();
        }
    }

    pub fn write_control_spsel(&mut self, spsel: bool) {
        self.write_control_spsel_for_secstate(spsel, self.security);
    }

    /// Writes IPSR, entering or leaving Handler mode.
    pub fn write_exception(&mut self, new_exc: u32) {
        let old_is_psp = self.using_psp();

        self.exception = new_exc;

        if old_is_psp != self.using_psp() {
            self.swap_other_sp();
        }
    }

    fn swap_other_sp(&mut self) {
        let parked = self.other_sp;
        self.other_sp = self.registers.stack_pointer();
        self.registers.set_stack_pointer(parked);
    }

    /// Moves the banked stack pointers around when changing security state.
    pub fn switch_security_state(&mut self, new_secstate: SecurityState) {
        if self.security == new_secstate {
            return;
        }

        let new_ss_msp = self.other_ss_msp;
        let new_ss_psp = self.other_ss_psp;

        if self.using_psp() {
            self.other_ss_psp = self.registers.stack_pointer();
            self.other_ss_msp = self.other_sp;
        } else {
            self.other_ss_msp = self.registers.stack_pointer();
            self.other_ss_psp = self.other_sp;
        }

        self.security = new_secstate;

        if self.using_psp() {
            self.registers.set_stack_pointer(new_ss_psp);
            self.other_sp = new_ss_msp;
        } else {
            self.registers.set_stack_pointer(new_ss_msp);
            self.other_sp = new_ss_psp;
        }
    }

    /// Locates the stack pointer for a security state and mode. `spsel` is
    /// passed in because the tail-chain path takes it from EXC_RETURN.
    #[must_use]
    pub fn sp_slot(&self, secstate: SecurityState, thread_mode: bool, spsel: bool) -> SpSlot {
        let want_psp = thread_mode && spsel;

        if secstate == self.security {
            if want_psp == self.using_psp() {
                SpSlot::Current
            } else {
                SpSlot::Other
            }
        } else if want_psp {
            SpSlot::OtherSecurityProcess
        } else {
            SpSlot::OtherSecurityMain
        }
    }

    #[must_use]
    pub const fn sp(&self, slot: SpSlot) -> u32 {
        match slot {
            SpSlot::Current => self.registers.stack_pointer(),
            SpSlot::Other => self.other_sp,
            SpSlot::OtherSecurityMain => self.other_ss_msp,
            SpSlot::OtherSecurityProcess => self.other_ss_psp,
        }
    }

    pub const fn set_sp(&mut self, slot: SpSlot, value: u32) {
        match slot {
            SpSlot::Current => self.registers.set_stack_pointer(value),
            SpSlot::Other => self.other_sp = value,
            SpSlot::OtherSecurityMain => self.other_ss_msp = value,
            SpSlot::OtherSecurityProcess => self.other_ss_psp = value,
        }
    }

    /// Main stack pointer of the current security state.
    #[must_use]
    pub fn msp(&self) -> u32 {
        if self.using_psp() {
            self.other_sp
        } else {
            self.registers.stack_pointer()
        }
    }

    /// Process stack pointer of the current security state.
    #[must_use]
    pub fn psp(&self) -> u32 {
        if self.using_psp() {
            self.registers.stack_pointer()
        } else {
            self.other_sp
        }
    }

    pub fn set_msp(&mut self, value: u32) {
        if self.using_psp() {
            self.other_sp = value;
        } else {
            self.registers.set_stack_pointer(value);
        }
    }

    pub fn set_psp(&mut self, value: u32) {
        if self.using_psp() {
            self.registers.set_stack_pointer(value);
        } else {
            self.other_sp = value;
        }
    }

    /// Full xPSR, including IPSR.
    #[must_use]
    pub const fn xpsr_read(&self) -> u32 {
        self.xpsr.bits() | self.exception
    }

    /// Masked xPSR write. An IPSR write goes through [`Self::write_exception`].
    pub fn xpsr_write(&mut self, value: u32, mask: u32) {
        self.xpsr.write(value, mask);
        if mask & XPSR_EXCP != 0 {
            self.write_exception(value & XPSR_EXCP);
        }
    }

    pub const fn clear_exclusive(&mut self) {
        self.exclusive_addr = None;
    }

    /// Zeroes S0-S15 (or S0-S31), FPSCR and VPR.
    pub fn clear_fp_regs(&mut self, all_32: bool) {
        let mve = self.features.has_mve();
        self.fp.clear(if all_32 { 16 } else { 8 }, mve);
    }
}
