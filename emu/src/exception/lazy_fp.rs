//! # Lazy floating-point stacking
//!
//! With FPCCR.LSPEN set, exception entry only reserves room for the FP
//! registers and records where (FPCAR) and with which privilege and
//! fault readiness (FPCCR) they would have been saved. The first FP
//! instruction in the handler calls [`CortexM::preserve_fp_state`] to do
//! the actual stores. VLSTM/VLLDM let Secure code save and restore the FP
//! context around calls into Non-secure state in the same lazy way.

use tracing::{debug, warn};

use crate::bus::{MemoryBus, MmuIndex};
use crate::cortex_m::CortexM;
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::fault_status::Cfsr;
use crate::exception::stacking::{FpArea, StackingMode};
use crate::exception::{
    BUS_FAULT, CpuException, DEBUG_MONITOR, ExceptionError, HARD_FAULT, MEM_MANAGE, SECURE_FAULT,
    USAGE_FAULT,
};
use crate::nvic::ExceptionController;

/// Fault readiness sampled when a lazy context is created.
struct Readiness {
    hard: bool,
    bus: bool,
    mem: bool,
    usage_ns: bool,
    usage_s: bool,
    monitor: bool,
    secure: bool,
}

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    /// Records a lazily stacked FP context whose save area starts at
    /// `frameptr`.
    pub(crate) fn update_fpccr(&mut self, frameptr: u32, apply_splim: bool) {
        let cur = self.state.security;
        let is_secure = cur.is_secure();

        self.state.banks[cur].fpcar = frameptr & !7;

        if apply_splim && self.state.features.is_v8() {
            let ign = self.with_nvic(|nvic, masks| nvic.neg_prio_requested(is_secure, masks))
                && self.state.banks[cur].ccr.stkofhfnmign();
            let splimviol = !ign && frameptr < self.state.sp_limit();
            self.state.banks[cur].fpccr.set_splimviol(splimviol);
        }

        let ready = self.with_nvic(|nvic, masks| Readiness {
            hard: nvic.ready_status(HARD_FAULT, false, masks),
            bus: nvic.ready_status(BUS_FAULT, false, masks),
            mem: nvic.ready_status(MEM_MANAGE, is_secure, masks),
            usage_ns: nvic.ready_status(USAGE_FAULT, false, masks),
            usage_s: nvic.ready_status(USAGE_FAULT, true, masks),
            monitor: nvic.ready_status(DEBUG_MONITOR, false, masks),
            secure: nvic.ready_status(SECURE_FAULT, false, masks),
        });
        let user = !self.state.is_privileged();
        let thread = !self.state.is_handler_mode();

        let fpccr = &mut self.state.banks[cur].fpccr;
        fpccr.set_lspact(true);
        fpccr.set_user(user);
        fpccr.set_thread(thread);
        fpccr.set_mmrdy(ready.mem);

        let fpccr_s = &mut self.state.banks.secure.fpccr;
        fpccr_s.set_s(is_secure);
        fpccr_s.set_hfrdy(ready.hard);
        fpccr_s.set_bfrdy(ready.bus);
        fpccr_s.set_monrdy(ready.monitor);

        self.state.banks.non_secure.fpccr.set_ufrdy(ready.usage_ns);

        if self.state.features.has_security() {
            let fpccr_s = &mut self.state.banks.secure.fpccr;
            fpccr_s.set_ufrdy(ready.usage_s);
            fpccr_s.set_sfrdy(ready.secure);
        }

        debug!("lazy FP context at 0x{:08X}", frameptr & !7);
    }

    /// Saves a lazily stacked FP context to the space reserved at FPCAR.
    ///
    /// Returns `Ok(true)` when a fault raised by the stores was taken
    /// instead, in which case the FP instruction that triggered the
    /// preservation must not execute.
    pub fn preserve_fp_state(&mut self) -> Result<bool, ExceptionError> {
        let fpccr_s = self.state.banks.secure.fpccr;
        let is_secure = fpccr_s.s();
        let secstate = SecurityState::from(is_secure);
        let fpccr = self.state.banks[secstate].fpccr;
        let is_priv = !fpccr.user();
        let negpri = !fpccr_s.hfrdy();
        let fpcar = self.state.banks[secstate].fpcar;
        let ts = is_secure && fpccr_s.ts();

        let mut stacked_ok = true;

        if !self.state.cpacr_pass(secstate, is_priv) {
            debug!("CPACR denies lazy FP preservation");
            self.state.banks[secstate].cfsr.insert(Cfsr::NOCP);
            self.pend_lazyfp(USAGE_FAULT, is_secure)?;
            stacked_ok = false;
        } else if !is_secure && !self.state.nsacr_cp10() {
            debug!("NSACR denies lazy FP preservation");
            self.state.banks.secure.cfsr.insert(Cfsr::NOCP);
            self.pend_lazyfp(USAGE_FAULT, true)?;
            stacked_ok = false;
        }

        if !fpccr.splimviol() && stacked_ok {
            let mmu = MmuIndex {
                secure: is_secure,
                privileged: is_priv,
                negative_priority: negpri,
            };
            stacked_ok = self.write_fp_area(fpcar, ts, mmu, StackingMode::LazyFp)?;
        }

        if !stacked_ok && self.with_nvic(|nvic, masks| nvic.can_take_pending(masks)) {
            debug!("taking fault raised by lazy FP preservation");
            self.raise(CpuException::LazyFp)?;
            return Ok(true);
        }

        self.state.banks[secstate].fpccr.set_lspact(false);
        if ts {
            self.state.clear_fp_regs(true);
        }
        Ok(false)
    }

    /// VLSTM: Secure code saves the FP context to `fptr` before calling
    /// Non-secure code.
    pub fn vlstm(&mut self, fptr: u32) -> Result<(), ExceptionError> {
        if !self.state.secure() {
            warn!("VLSTM outside Secure state");
            return self.raise(CpuException::Undefined);
        }
        if !self.state.fp_owner().control.sfpa() {
            return Ok(());
        }

        let fpccr_s = self.state.banks.secure.fpccr;
        if !self
            .state
            .cpacr_pass(SecurityState::Secure, self.state.is_privileged())
        {
            return self.raise(CpuException::NoCoprocessor {
                target_secure: false,
            });
        }
        if self.state.banks[SecurityState::from(fpccr_s.s())]
            .fpccr
            .lspact()
        {
            return self.raise(CpuException::LazyStateError);
        }
        if fptr & 7 != 0 {
            return self.raise(CpuException::Unaligned);
        }

        if fpccr_s.lspen() {
            self.update_fpccr(fptr, false);
        } else {
            let ts = fpccr_s.ts();
            let mmu = self.current_mmu_index();
            let area = FpArea::new(ts, self.state.features.has_mve());
            for (offset, value) in area.words(&self.state.fp) {
                let address = fptr.wrapping_add(offset);
                if let Err(fault) = self.bus.store_word(address, value, mmu) {
                    return self.raise(CpuException::DataAbort {
                        address,
                        kind: fault.into(),
                    });
                }
            }
            if ts {
                self.state.clear_fp_regs(true);
            }
        }

        self.state.fp_owner_mut().control.set_fpca(false);
        Ok(())
    }

    /// VLLDM: restores what VLSTM saved, or drops the lazy context if it
    /// was never saved.
    pub fn vlldm(&mut self, fptr: u32) -> Result<(), ExceptionError> {
        if !self.state.secure() {
            warn!("VLLDM outside Secure state");
            return self.raise(CpuException::Undefined);
        }
        if !self.state.fp_owner().control.sfpa() {
            return Ok(());
        }
        if !self
            .state
            .cpacr_pass(SecurityState::Secure, self.state.is_privileged())
        {
            return self.raise(CpuException::NoCoprocessor {
                target_secure: false,
            });
        }

        let fpccr_s = self.state.banks.secure.fpccr;
        if fpccr_s.lspact() {
            self.state.banks.secure.fpccr.set_lspact(false);
        } else {
            if fptr & 7 != 0 {
                return self.raise(CpuException::Unaligned);
            }

            let mmu = self.current_mmu_index();
            let area = FpArea::new(fpccr_s.ts(), self.state.features.has_mve());
            let mut words = Vec::new();
            for offset in area.offsets() {
                let address = fptr.wrapping_add(offset);
                match self.bus.load_word(address, mmu) {
                    Ok(value) => words.push(value),
                    Err(fault) => {
                        return self.raise(CpuException::DataAbort {
                            address,
                            kind: fault.into(),
                        });
                    }
                }
            }
            area.load_into(&mut self.state.fp, &words);
        }

        self.state.fp_owner_mut().control.set_fpca(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MpuRegion;
    use crate::cortex_m::fixtures::*;
    use crate::cpu::config::CpuFeatures;
    use crate::cpu::fault_status::Sfsr;
    use crate::cpu::state::FpContext;
    use crate::exception::SVCALL;
    use pretty_assertions::assert_eq;

    /// Secure Thread with an active lazy FP context, inside an SVCall.
    fn lazy_context() -> CortexM {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.banks.secure.cpacr = 0xF << 20;
        cpu.state.fp_owner_mut().control.set_fpca(true);
        cpu.state.fp.d[0] = 0xAAAA_BBBB_CCCC_DDDD;
        cpu.state.fp.fpscr = 0x1234;

        cpu.pend(SVCALL, true).unwrap();
        cpu.raise(CpuException::SupervisorCall).unwrap();
        cpu
    }

    #[test]
    fn check_update_fpccr_records_context() {
        let cpu = lazy_context();
        let fpccr = cpu.state.banks.secure.fpccr;

        assert!(fpccr.lspact());
        assert!(fpccr.s());
        assert!(!fpccr.user());
        assert!(fpccr.thread());
        assert!(fpccr.hfrdy());
        assert!(!fpccr.splimviol());
        assert_eq!(cpu.state.banks.secure.fpcar, SECURE_MSP - 0x68 + 0x20);
        // Registers are untouched until preservation.
        assert_eq!(cpu.state.fp.d[0], 0xAAAA_BBBB_CCCC_DDDD);
    }

    #[test]
    fn check_preserve_fp_state() {
        let mut cpu = lazy_context();
        let fpcar = cpu.state.banks.secure.fpcar;

        assert_eq!(cpu.preserve_fp_state(), Ok(false));

        assert!(!cpu.state.banks.secure.fpccr.lspact());
        assert_eq!(cpu.bus.read_word(fpcar), Some(0xCCCC_DDDD));
        assert_eq!(cpu.bus.read_word(fpcar + 4), Some(0xAAAA_BBBB));
        assert_eq!(cpu.bus.read_word(fpcar + 0x40), Some(0x1234));
    }

    #[test]
    fn check_preserve_fp_state_nocp() {
        let mut cpu = lazy_context();
        cpu.state.banks.secure.cpacr = 0;

        // The SVCall handler is running, so the UsageFault escalates and
        // the HardFault preempts it.
        assert_eq!(cpu.preserve_fp_state(), Ok(true));
        assert!(cpu.state.banks.secure.cfsr.contains(Cfsr::NOCP));
        assert_eq!(cpu.state.exception, HARD_FAULT);
    }

    #[test]
    fn check_preserve_fp_state_bus_error() {
        let mut cpu = lazy_context();
        let fpcar = cpu.state.banks.secure.fpcar;
        cpu.bus = std::mem::take(&mut cpu.bus).with_mpu_region(MpuRegion {
            base: fpcar,
            limit: fpcar + 0x47,
            secure: true,
            privileged_only: false,
            read_only: true,
        });

        assert_eq!(cpu.preserve_fp_state(), Ok(true));
        assert!(cpu.state.banks.secure.cfsr.contains(Cfsr::MLSPERR));
    }

    #[test]
    fn check_vlstm_vlldm_round_trip() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.banks.secure.cpacr = 0xF << 20;
        cpu.state.banks.secure.fpccr.set_lspen(false);
        cpu.state.fp_owner_mut().control.set_sfpa(true);
        cpu.state.fp_owner_mut().control.set_fpca(true);
        cpu.state.fp.d[5] = 55;
        cpu.state.fp.fpscr = 0x0400_0000;
        let saved = cpu.state.fp;
        let fptr = SECURE_RAM + 0x2000;

        cpu.vlstm(fptr).unwrap();
        assert!(!cpu.state.fp_owner().control.fpca());
        assert_eq!(cpu.bus.read_word(fptr + 0x28), Some(55));

        cpu.state.fp = FpContext::default();
        cpu.vlldm(fptr).unwrap();
        assert!(cpu.state.fp_owner().control.fpca());
        assert_eq!(cpu.state.fp, saved);
    }

    #[test]
    fn check_vlstm_without_sfpa_is_nop() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.fp_owner_mut().control.set_fpca(true);

        cpu.vlstm(0x1234_5671).unwrap();
        assert!(cpu.state.fp_owner().control.fpca());
        assert_eq!(cpu.state.exception, 0);
    }

    #[test]
    fn check_vlstm_lazy_state_error() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.banks.secure.cpacr = 0xF << 20;
        cpu.state.fp_owner_mut().control.set_sfpa(true);
        cpu.state.banks.secure.fpccr.set_lspact(true);

        cpu.vlstm(SECURE_RAM + 0x2000).unwrap();
        assert!(cpu.state.sfsr.contains(Sfsr::LSERR));
        // SecureFault is disabled out of reset and escalates.
        assert_eq!(cpu.state.exception, HARD_FAULT);
    }

    #[test]
    fn check_vlstm_lazy() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.banks.secure.cpacr = 0xF << 20;
        cpu.state.fp_owner_mut().control.set_sfpa(true);
        cpu.state.fp_owner_mut().control.set_fpca(true);
        let fptr = SECURE_RAM + 0x2000;

        cpu.vlstm(fptr).unwrap();
        assert!(cpu.state.banks.secure.fpccr.lspact());
        assert_eq!(cpu.state.banks.secure.fpcar, fptr);

        // Nothing was saved, so VLLDM just drops the lazy context.
        cpu.vlldm(fptr).unwrap();
        assert!(!cpu.state.banks.secure.fpccr.lspact());
        assert!(cpu.state.fp_owner().control.fpca());
    }

    #[test]
    fn check_vlstm_from_non_secure_is_undefined() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.switch_security_state(SecurityState::NonSecure);

        cpu.vlstm(NS_RAM).unwrap();
        assert!(cpu.state.banks.non_secure.cfsr.contains(Cfsr::UNDEFINSTR));
    }
}
