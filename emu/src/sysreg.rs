//! # Special registers (MRS/MSR)
//!
//! Registers are addressed by their SYSm encoding. Every register has an
//! [`AccessPolicy`] in a fixed table; accesses the policy forbids read as
//! zero and ignore writes instead of faulting, so unprivileged code can't
//! probe for them.
//!
//! The `_NS` registers are the Non-secure copies as seen from Secure
//! state. From Non-secure state they are RAZ/WI.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::MemoryBus;
use crate::cortex_m::CortexM;
use crate::cpu::control::{CONTROL_FPCA, CONTROL_NPRIV, CONTROL_SFPA, CONTROL_SPSEL};
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::psr::{XPSR_EXCP, XPSR_GE, XPSR_NZCV, XPSR_Q};
use crate::cpu::state::ProcessorState;
use crate::exception::{CpuException, ExceptionError};
use crate::nvic::ExceptionController;

/// MSR mask bit: write N, Z, C, V and Q.
pub const MSR_MASK_NZCVQ: u8 = 1 << 3;
/// MSR mask bit: write GE[3:0].
pub const MSR_MASK_G: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SpecialRegister {
    Apsr = 0,
    Iapsr = 1,
    Eapsr = 2,
    Xpsr = 3,
    Ipsr = 5,
    Epsr = 6,
    Iepsr = 7,
    Msp = 8,
    Psp = 9,
    Msplim = 10,
    Psplim = 11,
    Primask = 16,
    Basepri = 17,
    BasepriMax = 18,
    Faultmask = 19,
    Control = 20,
    MspNs = 0x88,
    PspNs = 0x89,
    MsplimNs = 0x8A,
    PsplimNs = 0x8B,
    PrimaskNs = 0x90,
    BasepriNs = 0x91,
    FaultmaskNs = 0x93,
    ControlNs = 0x94,
    SpNs = 0x98,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub unprivileged_read: bool,
    pub unprivileged_write: bool,
    /// Non-secure register accessed from Secure state.
    pub ns_alias: bool,
    pub needs_main: bool,
    pub needs_v8: bool,
}

impl AccessPolicy {
    const PRIVILEGED: Self = Self {
        unprivileged_read: false,
        unprivileged_write: false,
        ns_alias: false,
        needs_main: false,
        needs_v8: false,
    };

    const UNPRIVILEGED: Self = Self {
        unprivileged_read: true,
        unprivileged_write: true,
        ..Self::PRIVILEGED
    };

    const MAIN: Self = Self {
        needs_main: true,
        ..Self::PRIVILEGED
    };

    const V8: Self = Self {
        needs_v8: true,
        ..Self::PRIVILEGED
    };

    const NS_ALIAS: Self = Self {
        ns_alias: true,
        ..Self::PRIVILEGED
    };

    const NS_ALIAS_MAIN: Self = Self {
        needs_main: true,
        ..Self::NS_ALIAS
    };
}

const POLICIES: [(SpecialRegister, AccessPolicy); 25] = {
    use SpecialRegister as R;

    [
        (R::Apsr, AccessPolicy::UNPRIVILEGED),
        (R::Iapsr, AccessPolicy::UNPRIVILEGED),
        (R::Eapsr, AccessPolicy::UNPRIVILEGED),
        (R::Xpsr, AccessPolicy::UNPRIVILEGED),
        (R::Ipsr, AccessPolicy::UNPRIVILEGED),
        (R::Epsr, AccessPolicy::UNPRIVILEGED),
        (R::Iepsr, AccessPolicy::UNPRIVILEGED),
        (R::Msp, AccessPolicy::PRIVILEGED),
        (R::Psp, AccessPolicy::PRIVILEGED),
        (R::Msplim, AccessPolicy::V8),
        (R::Psplim, AccessPolicy::V8),
        (R::Primask, AccessPolicy::PRIVILEGED),
        (R::Basepri, AccessPolicy::MAIN),
        (R::BasepriMax, AccessPolicy::MAIN),
        (R::Faultmask, AccessPolicy::MAIN),
        // Unprivileged writes only reach SFPA.
        (R::Control, AccessPolicy::UNPRIVILEGED),
        (R::MspNs, AccessPolicy::NS_ALIAS),
        (R::PspNs, AccessPolicy::NS_ALIAS),
        (R::MsplimNs, AccessPolicy::NS_ALIAS),
        (R::PsplimNs, AccessPolicy::NS_ALIAS),
        (R::PrimaskNs, AccessPolicy::NS_ALIAS),
        (R::BasepriNs, AccessPolicy::NS_ALIAS_MAIN),
        (R::FaultmaskNs, AccessPolicy::NS_ALIAS_MAIN),
        (
            R::ControlNs,
            AccessPolicy {
                unprivileged_read: true,
                ..AccessPolicy::NS_ALIAS
            },
        ),
        (R::SpNs, AccessPolicy::NS_ALIAS),
    ]
};

impl SpecialRegister {
    #[must_use]
    pub fn from_sysm(sysm: u8) -> Option<Self> {
        POLICIES
            .iter()
            .map(|(reg, _)| *reg)
            .find(|reg| reg.sysm() == sysm)
    }

    #[must_use]
    pub const fn sysm(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn policy(self) -> AccessPolicy {
        POLICIES
            .iter()
            .find(|(reg, _)| *reg == self)
            .map_or(AccessPolicy::PRIVILEGED, |(_, policy)| *policy)
    }

    /// Every register in SYSm order.
    pub fn all() -> impl Iterator<Item = Self> {
        POLICIES.iter().map(|(reg, _)| *reg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysRegError {
    /// A stack pointer write went below its limit register.
    StackOverflow,
}

impl Display for SysRegError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "stack pointer write below its limit"),
        }
    }
}

impl std::error::Error for SysRegError {}

impl ProcessorState {
    fn implements(&self, policy: AccessPolicy) -> bool {
        (!policy.needs_main || self.features.main_extension)
            && (!policy.needs_v8 || self.features.is_v8())
            && (!policy.ns_alias || self.features.has_security())
    }

    /// Looks `sysm` up and applies the visibility rules. `None` when the
    /// access reads as zero or is ignored.
    fn accessible(&self, sysm: u8, write: bool) -> Option<SpecialRegister> {
        let reg = SpecialRegister::from_sysm(sysm);
        let Some((reg, policy)) = reg
            .map(|reg| (reg, reg.policy()))
            .filter(|(_, policy)| self.implements(*policy))
        else {
            let access = if write { "write to" } else { "read of" };
            warn!("{access} unknown special register {sysm}");
            return None;
        };

        let unprivileged_ok = if write {
            policy.unprivileged_write
        } else {
            policy.unprivileged_read
        };
        if !self.is_privileged() && !unprivileged_ok {
            return None;
        }
        if policy.ns_alias && !self.secure() {
            return None;
        }
        Some(reg)
    }

    /// CONTROL as read from `secstate`. FPCA lives in the Secure bank and
    /// is visible from both states, SFPA only from Secure.
    fn control_read(&self, secstate: SecurityState) -> u32 {
        let value = self.banks[secstate].control.bits();
        if secstate.is_secure() {
            value
        } else {
            value | (self.fp_owner().control.bits() & CONTROL_FPCA)
        }
    }

    fn xpsr_sub_read(&self, sysm: u8) -> u32 {
        let mut mask = 0;
        if sysm & 1 != 0 && self.is_privileged() {
            mask |= XPSR_EXCP;
        }
        if sysm & 4 == 0 {
            mask |= XPSR_NZCV | XPSR_Q;
            if self.features.thumb_dsp {
                mask |= XPSR_GE;
            }
        }
        // EPSR reads as zero.
        self.xpsr_read() & mask
    }

    /// Only the APSR part is writable.
    fn xpsr_sub_write(&mut self, sysm: u8, mask: u8, value: u32) {
        if sysm & 4 != 0 {
            return;
        }
        let mut apsr_mask = 0;
        if mask & MSR_MASK_NZCVQ != 0 {
            apsr_mask |= XPSR_NZCV | XPSR_Q;
        }
        if mask & MSR_MASK_G != 0 && self.features.thumb_dsp {
            apsr_mask |= XPSR_GE;
        }
        self.xpsr.write(value, apsr_mask);
    }

    /// Non-secure stack pointer the current mode would use.
    fn sp_ns_is_psp(&self) -> bool {
        !self.is_handler_mode() && self.banks.non_secure.control.spsel()
    }

    /// MRS.
    #[must_use]
    pub fn read_special(&self, sysm: u8) -> u32 {
        use SpecialRegister as R;

        let Some(reg) = self.accessible(sysm, false) else {
            return 0;
        };
        let ns = &self.banks.non_secure;

        match reg {
            R::Apsr | R::Iapsr | R::Eapsr | R::Xpsr | R::Ipsr | R::Epsr | R::Iepsr => {
                self.xpsr_sub_read(sysm)
            }
            R::Msp => self.msp(),
            R::Psp => self.psp(),
            R::Msplim => self.bank().msplim,
            R::Psplim => self.bank().psplim,
            R::Primask => self.bank().primask,
            R::Basepri | R::BasepriMax => self.bank().basepri,
            R::Faultmask => self.bank().faultmask,
            R::Control => self.control_read(self.security),
            R::MspNs => self.other_ss_msp,
            R::PspNs => self.other_ss_psp,
            R::MsplimNs => ns.msplim,
            R::PsplimNs => ns.psplim,
            R::PrimaskNs => ns.primask,
            R::BasepriNs => ns.basepri,
            R::FaultmaskNs => ns.faultmask,
            R::ControlNs => self.control_read(SecurityState::NonSecure),
            R::SpNs => {
                if self.sp_ns_is_psp() {
                    self.other_ss_psp
                } else {
                    self.other_ss_msp
                }
            }
        }
    }

    /// MSR. `mask` is the 4-bit mask field of the instruction; only the
    /// APSR writes look at it.
    ///
    /// A stack pointer write below its limit leaves the register alone
    /// and fails with [`SysRegError::StackOverflow`].
    pub fn write_special(&mut self, sysm: u8, mask: u8, value: u32) -> Result<(), SysRegError> {
        use SpecialRegister as R;

        let Some(reg) = self.accessible(sysm, true) else {
            return Ok(());
        };
        let cur = self.security;

        match reg {
            R::Apsr | R::Iapsr | R::Eapsr | R::Xpsr | R::Ipsr | R::Epsr | R::Iepsr => {
                self.xpsr_sub_write(sysm, mask, value);
            }
            R::Msp => {
                let value = value & !3;
                self.check_sp_limit(value, self.banks[cur].msplim)?;
                self.set_msp(value);
            }
            R::Psp => {
                let value = value & !3;
                self.check_sp_limit(value, self.banks[cur].psplim)?;
                self.set_psp(value);
            }
            R::Msplim => self.banks[cur].msplim = value & !7,
            R::Psplim => self.banks[cur].psplim = value & !7,
            R::Primask => self.banks[cur].primask = value & 1,
            R::Basepri => self.banks[cur].basepri = value & 0xFF,
            R::BasepriMax => {
                // Can only raise the priority mask.
                let value = value & 0xFF;
                let basepri = &mut self.banks[cur].basepri;
                if value != 0 && (value < *basepri || *basepri == 0) {
                    *basepri = value;
                }
            }
            R::Faultmask => self.banks[cur].faultmask = value & 1,
            R::Control => self.control_write(value),
            R::MspNs => self.other_ss_msp = value & !3,
            R::PspNs => self.other_ss_psp = value & !3,
            R::MsplimNs => self.banks.non_secure.msplim = value & !7,
            R::PsplimNs => self.banks.non_secure.psplim = value & !7,
            R::PrimaskNs => self.banks.non_secure.primask = value & 1,
            R::BasepriNs => self.banks.non_secure.basepri = value & 0xFF,
            R::FaultmaskNs => self.banks.non_secure.faultmask = value & 1,
            R::ControlNs => self.control_ns_write(value),
            R::SpNs => {
                let value = value & !3;
                let ns = &self.banks.non_secure;
                if self.sp_ns_is_psp() {
                    self.check_sp_limit(value, ns.psplim)?;
                    self.other_ss_psp = value;
                } else {
                    self.check_sp_limit(value, ns.msplim)?;
                    self.other_ss_msp = value;
                }
            }
        }
        Ok(())
    }

    fn check_sp_limit(&self, value: u32, limit: u32) -> Result<(), SysRegError> {
        if self.features.is_v8() && value < limit {
            Err(SysRegError::StackOverflow)
        } else {
            Ok(())
        }
    }

    fn control_write(&mut self, value: u32) {
        let privileged = self.is_privileged();
        let cur = self.security;

        // v7-M ignores SPSEL writes in Handler mode; on v8-M they land
        // but don't swap anything until Thread mode.
        if privileged && (self.features.is_v8() || !self.is_handler_mode()) {
            self.write_control_spsel(value & CONTROL_SPSEL != 0);
        }
        if privileged && self.features.main_extension {
            self.banks[cur]
                .control
                .set_npriv(value & CONTROL_NPRIV != 0);
        }
        if self.features.has_fpu() {
            if cur.is_secure() {
                self.fp_owner_mut()
                    .control
                    .set_sfpa(value & CONTROL_SFPA != 0);
            }
            if privileged
                && (cur.is_secure() || !self.features.has_security() || self.nsacr_cp10())
            {
                self.fp_owner_mut()
                    .control
                    .set_fpca(value & CONTROL_FPCA != 0);
            }
        }
    }

    fn control_ns_write(&mut self, value: u32) {
        self.write_control_spsel_for_secstate(
            value & CONTROL_SPSEL != 0,
            SecurityState::NonSecure,
        );
        if self.features.main_extension {
            self.banks
                .non_secure
                .control
                .set_npriv(value & CONTROL_NPRIV != 0);
        }
        if self.features.has_fpu() && self.nsacr_cp10() {
            self.fp_owner_mut()
                .control
                .set_fpca(value & CONTROL_FPCA != 0);
        }
    }
}

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    #[must_use]
    pub fn on_special_register_read(&self, sysm: u8) -> u32 {
        self.state.read_special(sysm)
    }

    /// MSR from the instruction driver. A stack limit violation is raised
    /// as a UsageFault right away.
    pub fn on_special_register_write(
        &mut self,
        sysm: u8,
        mask: u8,
        value: u32,
    ) -> Result<(), ExceptionError> {
        self.check_locked_up()?;
        match self.state.write_special(sysm, mask, value) {
            Ok(()) => Ok(()),
            Err(SysRegError::StackOverflow) => self.raise(CpuException::StackOverflow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cortex_m::fixtures::*;
    use crate::cpu::config::CpuFeatures;
    use crate::cpu::fault_status::Cfsr;
    use crate::exception::HARD_FAULT;
    use pretty_assertions::assert_eq;

    fn sysm(reg: SpecialRegister) -> u8 {
        reg.sysm()
    }

    fn secure_state() -> ProcessorState {
        machine(CpuFeatures::cortex_m33()).state
    }

    #[test]
    fn check_from_sysm() {
        assert_eq!(SpecialRegister::from_sysm(20), Some(SpecialRegister::Control));
        assert_eq!(SpecialRegister::from_sysm(0x98), Some(SpecialRegister::SpNs));
        assert_eq!(SpecialRegister::from_sysm(4), None);
        assert_eq!(SpecialRegister::from_sysm(0x92), None);
        assert!(SpecialRegister::all().all(|reg| SpecialRegister::from_sysm(reg.sysm()) == Some(reg)));
    }

    #[test]
    fn check_unknown_register() {
        let mut state = secure_state();
        let before = state.clone();
        assert_eq!(state.read_special(0x92), 0);
        assert_eq!(state.write_special(0x92, 0, 0xFFFF_FFFF), Ok(()));
        assert_eq!(state, before);
    }

    #[test]
    fn check_xpsr_reads() {
        let mut state = secure_state();
        state.xpsr.write(0xF80F_0000, XPSR_NZCV | XPSR_Q | XPSR_GE);
        state.exception = 11;

        assert_eq!(state.read_special(sysm(SpecialRegister::Apsr)), 0xF80F_0000);
        assert_eq!(state.read_special(sysm(SpecialRegister::Ipsr)), 11);
        assert_eq!(state.read_special(sysm(SpecialRegister::Xpsr)), 0xF80F_000B);
        // EPSR, including the T bit, reads as zero.
        assert_eq!(state.read_special(sysm(SpecialRegister::Epsr)), 0);

        let mut state = ProcessorState::new(CpuFeatures::cortex_m3());
        state.xpsr.write(0xF80F_0000, XPSR_NZCV | XPSR_Q | XPSR_GE);
        assert_eq!(state.read_special(sysm(SpecialRegister::Apsr)), 0xF800_0000);
    }

    #[test]
    fn check_unprivileged_ipsr_reads_zero() {
        let mut state = secure_state();
        state.banks.secure.control.set_npriv(true);
        state.xpsr.write(0x8000_0000, XPSR_NZCV);

        assert_eq!(state.read_special(sysm(SpecialRegister::Iapsr)), 0x8000_0000);
        assert_eq!(state.read_special(sysm(SpecialRegister::Ipsr)), 0);
    }

    #[test]
    fn check_apsr_write_mask() {
        let mut state = secure_state();

        state
            .write_special(sysm(SpecialRegister::Apsr), MSR_MASK_NZCVQ, 0xFFFF_FFFF)
            .unwrap();
        assert_eq!(state.xpsr.ge(), 0);
        assert!(state.xpsr.sign_flag());
        assert!(state.xpsr.sticky_overflow());

        state
            .write_special(sysm(SpecialRegister::Apsr), MSR_MASK_G, 0x000A_0000)
            .unwrap();
        assert_eq!(state.xpsr.ge(), 0xA);

        // Writes through EPSR aliases are ignored.
        state
            .write_special(sysm(SpecialRegister::Epsr), MSR_MASK_NZCVQ, 0)
            .unwrap();
        assert!(state.xpsr.sign_flag());
        assert!(state.xpsr.thumb());
    }

    #[test]
    fn check_stack_pointers() {
        let mut state = secure_state();

        assert_eq!(state.read_special(sysm(SpecialRegister::Msp)), SECURE_MSP);
        assert_eq!(state.read_special(sysm(SpecialRegister::Psp)), SECURE_PSP);

        state.write_control_spsel(true);
        assert_eq!(state.registers.stack_pointer(), SECURE_PSP);
        assert_eq!(state.read_special(sysm(SpecialRegister::Msp)), SECURE_MSP);

        state
            .write_special(sysm(SpecialRegister::Msp), 0, SECURE_MSP - 0x11)
            .unwrap();
        assert_eq!(state.other_sp, SECURE_MSP - 0x14);
        state
            .write_special(sysm(SpecialRegister::Psp), 0, SECURE_PSP - 0x22)
            .unwrap();
        assert_eq!(state.registers.stack_pointer(), SECURE_PSP - 0x24);
    }

    #[test]
    fn check_limit_alignment() {
        let mut state = secure_state();
        state
            .write_special(sysm(SpecialRegister::Msplim), 0, SECURE_RAM + 0x10F)
            .unwrap();
        assert_eq!(state.banks.secure.msplim, SECURE_RAM + 0x108);

        // No stack limits before v8-M.
        let mut state = ProcessorState::new(CpuFeatures::cortex_m3());
        state
            .write_special(sysm(SpecialRegister::Psplim), 0, 0x100)
            .unwrap();
        assert_eq!(state.banks.non_secure.psplim, 0);
        assert_eq!(state.read_special(sysm(SpecialRegister::Psplim)), 0);
    }

    #[test]
    fn check_msp_write_below_limit() {
        let mut state = secure_state();
        state.banks.secure.msplim = SECURE_RAM + 0x1000;

        assert_eq!(
            state.write_special(sysm(SpecialRegister::Msp), 0, SECURE_RAM + 0x800),
            Err(SysRegError::StackOverflow)
        );
        assert_eq!(state.registers.stack_pointer(), SECURE_MSP);

        // The limit itself is fine.
        state
            .write_special(sysm(SpecialRegister::Msp), 0, SECURE_RAM + 0x1000)
            .unwrap();
        assert_eq!(state.registers.stack_pointer(), SECURE_RAM + 0x1000);
    }

    #[test]
    fn check_basepri_max() {
        let mut state = secure_state();
        let basepri_max = sysm(SpecialRegister::BasepriMax);

        state.write_special(basepri_max, 0, 0x180).unwrap();
        assert_eq!(state.banks.secure.basepri, 0x80);

        // Lower priority (higher value) doesn't stick.
        state.write_special(basepri_max, 0, 0xC0).unwrap();
        assert_eq!(state.banks.secure.basepri, 0x80);

        state.write_special(basepri_max, 0, 0x40).unwrap();
        assert_eq!(state.banks.secure.basepri, 0x40);

        // Zero never disables the mask through BASEPRI_MAX.
        state.write_special(basepri_max, 0, 0).unwrap();
        assert_eq!(state.banks.secure.basepri, 0x40);

        state
            .write_special(sysm(SpecialRegister::Basepri), 0, 0)
            .unwrap();
        assert_eq!(state.read_special(basepri_max), 0);
    }

    #[test]
    fn check_masks_need_main_extension() {
        let mut state = ProcessorState::new(CpuFeatures::cortex_m23());
        state
            .write_special(sysm(SpecialRegister::Faultmask), 0, 1)
            .unwrap();
        state
            .write_special(sysm(SpecialRegister::Primask), 0, 3)
            .unwrap();

        assert_eq!(state.banks.secure.faultmask, 0);
        assert_eq!(state.banks.secure.primask, 1);
    }

    #[test]
    fn check_unprivileged_access_is_silent() {
        let mut state = secure_state();
        state.banks.secure.primask = 1;
        state.banks.secure.control.set_npriv(true);
        let before = state.clone();

        for reg in [
            SpecialRegister::Msp,
            SpecialRegister::Primask,
            SpecialRegister::Msplim,
            SpecialRegister::MspNs,
        ] {
            assert_eq!(state.read_special(sysm(reg)), 0, "{reg:?}");
            state.write_special(sysm(reg), 0, 0).unwrap();
        }
        assert_eq!(state, before);

        // CONTROL_NS stays readable.
        state.banks.non_secure.control.set_npriv(true);
        assert_eq!(
            state.read_special(sysm(SpecialRegister::ControlNs)),
            CONTROL_NPRIV
        );
    }

    #[test]
    fn check_control_spsel_in_thread_swaps() {
        let mut state = secure_state();

        state
            .write_special(sysm(SpecialRegister::Control), 0, CONTROL_SPSEL)
            .unwrap();

        assert!(state.banks.secure.control.spsel());
        assert_eq!(state.registers.stack_pointer(), SECURE_PSP);
        assert_eq!(state.other_sp, SECURE_MSP);
    }

    #[test]
    fn check_control_spsel_in_handler() {
        let mut state = secure_state();
        state.write_exception(11);

        state
            .write_special(sysm(SpecialRegister::Control), 0, CONTROL_SPSEL)
            .unwrap();
        assert!(state.banks.secure.control.spsel());
        assert_eq!(state.registers.stack_pointer(), SECURE_MSP);

        let mut state = ProcessorState::new(CpuFeatures::cortex_m3());
        state.write_exception(11);
        state
            .write_special(sysm(SpecialRegister::Control), 0, CONTROL_SPSEL)
            .unwrap();
        assert!(!state.banks.non_secure.control.spsel());
    }

    #[test]
    fn check_control_fp_bits() {
        let mut state = secure_state();
        let control = sysm(SpecialRegister::Control);

        state
            .write_special(control, 0, CONTROL_SFPA | CONTROL_FPCA | CONTROL_NPRIV)
            .unwrap();
        assert_eq!(
            state.read_special(control),
            CONTROL_SFPA | CONTROL_FPCA | CONTROL_NPRIV
        );

        // Unprivileged now, only SFPA still moves.
        state.write_special(control, 0, 0).unwrap();
        assert_eq!(state.read_special(control), CONTROL_FPCA | CONTROL_NPRIV);

        let mut state = secure_state();
        state.switch_security_state(SecurityState::NonSecure);
        state.write_special(control, 0, CONTROL_FPCA | CONTROL_SFPA).unwrap();
        assert!(!state.banks.secure.control.fpca());
        assert!(!state.banks.secure.control.sfpa());

        state.nsacr = 1 << 10;
        state.write_special(control, 0, CONTROL_FPCA | CONTROL_SFPA).unwrap();
        assert!(state.banks.secure.control.fpca());
        assert!(!state.banks.secure.control.sfpa());
        // FPCA shows through in the Non-secure view.
        assert_eq!(state.read_special(control), CONTROL_FPCA);
    }

    #[test]
    fn check_unprivileged_control_write_without_fpu() {
        let mut state = ProcessorState::new(CpuFeatures::cortex_m23());
        state.banks.secure.control.set_npriv(true);
        let before = state.clone();

        state
            .write_special(sysm(SpecialRegister::Control), 0, 0xFFFF_FFFF)
            .unwrap();

        assert_eq!(state, before);
    }

    #[test]
    fn check_control_ns_from_secure() {
        let mut state = secure_state();
        state.nsacr = 1 << 10;

        state
            .write_special(
                sysm(SpecialRegister::ControlNs),
                0,
                CONTROL_SPSEL | CONTROL_NPRIV | CONTROL_FPCA | CONTROL_SFPA,
            )
            .unwrap();

        assert_eq!(
            state.banks.non_secure.control.bits(),
            CONTROL_SPSEL | CONTROL_NPRIV
        );
        assert!(state.banks.secure.control.fpca());
        assert!(!state.banks.secure.control.sfpa());
        // The Secure stack pointers don't move.
        assert_eq!(state.registers.stack_pointer(), SECURE_MSP);
        assert_eq!(
            state.read_special(sysm(SpecialRegister::SpNs)),
            NS_PSP
        );
    }

    #[test]
    fn check_ns_aliases_from_secure() {
        let mut state = secure_state();

        state
            .write_special(sysm(SpecialRegister::MspNs), 0, NS_MSP - 0x101)
            .unwrap();
        state
            .write_special(sysm(SpecialRegister::PsplimNs), 0, NS_RAM + 0x7)
            .unwrap();
        state
            .write_special(sysm(SpecialRegister::BasepriNs), 0, 0x1A0)
            .unwrap();

        assert_eq!(state.other_ss_msp, NS_MSP - 0x104);
        assert_eq!(state.banks.non_secure.psplim, NS_RAM);
        assert_eq!(state.read_special(sysm(SpecialRegister::BasepriNs)), 0xA0);
        assert_eq!(state.read_special(sysm(SpecialRegister::SpNs)), NS_MSP - 0x104);
    }

    #[test]
    fn check_ns_aliases_from_non_secure() {
        let mut state = secure_state();
        state.switch_security_state(SecurityState::NonSecure);
        state.banks.non_secure.primask = 1;
        let before = state.clone();

        for reg in SpecialRegister::all().filter(|reg| reg.policy().ns_alias) {
            assert_eq!(state.read_special(sysm(reg)), 0, "{reg:?}");
            state.write_special(sysm(reg), 0, 0xFFFF_FFFF).unwrap();
        }

        assert_eq!(state, before);
    }

    #[test]
    fn check_sp_ns_limit() {
        let mut state = secure_state();
        state.banks.non_secure.msplim = NS_MSP - 0x100;
        let sp_ns = sysm(SpecialRegister::SpNs);

        assert_eq!(
            state.write_special(sp_ns, 0, NS_MSP - 0x200),
            Err(SysRegError::StackOverflow)
        );
        assert_eq!(state.other_ss_msp, NS_MSP);

        state.write_special(sp_ns, 0, NS_MSP - 0x80).unwrap();
        assert_eq!(state.other_ss_msp, NS_MSP - 0x80);
    }

    #[test]
    fn check_stack_overflow_is_raised() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.banks.secure.psplim = SECURE_PSP - 0x100;

        cpu.on_special_register_write(sysm(SpecialRegister::Psp), 0, SECURE_PSP - 0x200)
            .unwrap();

        assert!(cpu.state.banks.secure.cfsr.contains(Cfsr::STKOF));
        assert_eq!(cpu.state.exception, HARD_FAULT);
        assert_eq!(cpu.state.psp(), SECURE_PSP);
    }

    #[test]
    fn check_special_register_read_wrapper() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.on_special_register_write(sysm(SpecialRegister::Primask), 0, 1)
            .unwrap();
        assert_eq!(cpu.on_special_register_read(sysm(SpecialRegister::Primask)), 1);
        assert_eq!(cpu.masks().primask.secure, 1);
    }
}
