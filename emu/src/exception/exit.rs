//! # Exception return
//!
//! A branch to an EXC_RETURN value in Handler mode deactivates the
//! current exception. Unless EXC_RETURN fails its integrity checks or a
//! pending exception can preempt the context being returned to, the
//! frame EXC_RETURN describes is then popped.
//!
//! Every failure before the frame is committed is taken as a tail-chain
//! on the frame that is still on the stack.

use tracing::{debug, warn};

use crate::bus::MemoryBus;
use crate::cortex_m::CortexM;
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::excret::{EXC_RETURN_MIN_MAGIC, ExcReturn, FNC_RETURN_MIN_MAGIC};
use crate::cpu::fault_status::{Cfsr, Sfsr};
use crate::cpu::psr::{XPSR_EXCP, XPSR_GE, XPSR_SFPA, XPSR_SPREALIGN};
use crate::exception::stacking::{BASIC_FRAME_SIZE, CALLEE_FRAME_SIZE};
use crate::exception::{ExceptionError, NMI, SECURE_FAULT, USAGE_FAULT};
use crate::nvic::{CompletionResult, ExceptionController};
use crate::trace::TransitionKind;

/// Size of the FP area of an extended frame, without S16-S31.
const FP_AREA_SIZE: u32 = 0x48;
/// Extra space taken by S16-S31.
const FP_HIGH_AREA_SIZE: u32 = 0x40;

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    /// The PC was loaded with a value in the magic range. Values at or
    /// above [`EXC_RETURN_MIN_MAGIC`] are exception returns, the two
    /// values below it are Secure function returns.
    pub fn on_exception_return_magic_pc_write(
        &mut self,
        pc: u32,
        thumb: bool,
    ) -> Result<(), ExceptionError> {
        self.check_locked_up()?;

        let value = pc | u32::from(thumb);
        if value >= EXC_RETURN_MIN_MAGIC {
            self.exception_return(ExcReturn::new(value))
        } else if self.state.features.has_security() && value >= FNC_RETURN_MIN_MAGIC {
            self.function_return()
        } else {
            warn!("branch to 0x{value:08X} is not a return");
            Ok(())
        }
    }

    /// Takes whatever is now pending on the frame still on the stack.
    fn tail_chain(&mut self, excret: ExcReturn) -> Result<(), ExceptionError> {
        self.take_exception(excret, true, false)
    }

    fn exception_return(&mut self, mut excret: ExcReturn) -> Result<(), ExceptionError> {
        if !self.state.is_handler_mode() {
            debug!("EXC_RETURN 0x{:08X} in Thread mode is a plain branch", excret.bits());
            return Ok(());
        }

        let features = self.state.features;
        let security = features.has_security();
        let exception = self.state.exception;

        debug!(
            "exception return with EXC_RETURN 0x{:08X} from {exception}",
            excret.bits()
        );

        if !excret.has_res1() {
            warn!("EXC_RETURN 0x{:08X} has RES1 bits clear", excret.bits());
        }

        let mut ftype = excret.ftype();
        if !ftype && !features.has_fpu() {
            warn!("EXC_RETURN 0x{:08X} has FTYPE clear without an FPU", excret.bits());
            ftype = true;
        }

        let mut sfault = false;
        let mut exc_secure = false;
        if security {
            if !self.state.secure() && (excret.es() || !excret.dcrs()) {
                sfault = true;
                excret.set_es(false);
            }
            exc_secure = excret.es();
        }

        if exception != NMI {
            if security {
                let raw = self.with_nvic(|nvic, masks| nvic.raw_execution_priority(masks));
                if raw >= 0 {
                    self.state.banks[SecurityState::from(exc_secure)].faultmask = 0;
                }
            } else {
                self.state.banks.non_secure.faultmask = 0;
            }
        }

        let mut ufault = false;
        let mut rettobase = false;
        match self.with_nvic(|nvic, masks| nvic.complete(exception, exc_secure, masks)) {
            CompletionResult::NotActive => ufault = true,
            CompletionResult::StillNested => {}
            CompletionResult::ReturnedToBase => rettobase = true,
        }

        let return_to_handler = !excret.mode();
        let return_to_sp_process = excret.spsel();
        let return_to_secure = security && excret.s();

        if features.is_v8() {
            if !security && (excret.s() || excret.es() || !excret.dcrs()) {
                ufault = true;
            }
            if excret.res0() {
                ufault = true;
            }
        } else {
            match excret.low_bits() {
                1 => {}
                9 | 13 => {
                    if !rettobase && !self.state.bank().ccr.nonbasethrdena() {
                        ufault = true;
                    }
                }
                _ => ufault = true,
            }
        }

        // Still in Handler mode, so this never moves the live SP.
        self.state.write_control_spsel_for_secstate(
            return_to_sp_process,
            SecurityState::from(exc_secure),
        );

        let fp_owner = self.state.fp_owner();
        if fp_owner.fpccr.clronret() && fp_owner.control.fpca() {
            if fp_owner.fpccr.lspact() {
                debug!("SecureFault on return: lazy state still active");
                self.state.sfsr.insert(Sfsr::LSERR);
                self.pend(SECURE_FAULT, false)?;
                return self.tail_chain(excret);
            }
            if features.is_v8_1() {
                let target = SecurityState::from(exc_secure);
                if !(exc_secure || self.state.nsacr_cp10()) {
                    debug!("UsageFault on return: NSACR prevents clearing FP registers");
                    self.state.banks.secure.cfsr.insert(Cfsr::NOCP);
                    self.pend(USAGE_FAULT, true)?;
                    return self.tail_chain(excret);
                } else if !self.state.cpacr_pass(target, true) {
                    debug!("UsageFault on return: CPACR prevents clearing FP registers");
                    self.state.banks[target].cfsr.insert(Cfsr::NOCP);
                    self.pend(USAGE_FAULT, exc_secure)?;
                    return self.tail_chain(excret);
                }
            }
            self.state.clear_fp_regs(false);
        }

        if sfault {
            debug!("SecureFault on return: EXC_RETURN.ES validity check");
            self.state.sfsr.insert(Sfsr::INVER);
            self.pend(SECURE_FAULT, false)?;
            return self.tail_chain(excret);
        }

        if ufault {
            debug!("UsageFault on return: EXC_RETURN integrity check");
            let cur = self.state.security;
            self.state.banks[cur].cfsr.insert(Cfsr::INVPC);
            self.pend(USAGE_FAULT, cur.is_secure())?;
            return self.tail_chain(excret);
        }

        if self.with_nvic(|nvic, masks| nvic.can_take_pending(masks)) {
            debug!("tail-chaining to pending exception");
            return self.tail_chain(excret);
        }

        let rs = SecurityState::from(return_to_secure);
        self.state.switch_security_state(rs);

        let slot = self.state.sp_slot(
            rs,
            !return_to_handler,
            self.state.banks[rs].control.spsel(),
        );
        let mut frameptr = self.state.sp(slot);
        let return_to_priv = return_to_handler || !self.state.banks[rs].control.npriv();
        let mmu = self.mmu_index_for(return_to_secure, return_to_priv);

        if frameptr % 8 != 0 && features.is_v8() {
            warn!("exception return with SP 0x{frameptr:08X} not 8-byte aligned");
        }

        if return_to_secure && (!excret.es() || !excret.dcrs()) {
            let Some(signature) = self.stack_read(frameptr, mmu)? else {
                debug!("derived exception on unstacking");
                return self.tail_chain(excret);
            };
            if signature != self.integrity_signature(excret) {
                debug!("SecureFault on return: integrity signature 0x{signature:08X}");
                self.state.sfsr.insert(Sfsr::INVIS);
                self.pend(SECURE_FAULT, false)?;
                return self.tail_chain(excret);
            }
            let Some(callee) = self.read_words::<8>(frameptr.wrapping_add(8), mmu)? else {
                debug!("derived exception on unstacking");
                return self.tail_chain(excret);
            };
            for (i, value) in callee.into_iter().enumerate() {
                self.state.registers.set_register_at(4 + i, value);
            }
            frameptr = frameptr.wrapping_add(CALLEE_FRAME_SIZE);
        }

        let Some(frame) = self.read_words::<8>(frameptr, mmu)? else {
            debug!("derived exception on unstacking");
            return self.tail_chain(excret);
        };
        let [r0, r1, r2, r3, r12, lr, mut pc, xpsr] = frame;

        let regs = &mut self.state.registers;
        for (i, value) in [r0, r1, r2, r3].into_iter().enumerate() {
            regs.set_register_at(i, value);
        }
        regs.set_register_at(12, r12);
        regs.set_link_register(lr);

        if pc & 1 != 0 {
            pc &= !1;
            if !features.is_v8() {
                warn!("return to odd PC 0x{:08X}", pc | 1);
            }
        }
        self.state.registers.set_program_counter(pc);

        if features.is_v8() && (xpsr & XPSR_EXCP != 0) != return_to_handler {
            debug!(
                "UsageFault on return: IPSR {} does not match EXC_RETURN.MODE",
                xpsr & XPSR_EXCP
            );
            let cur = self.state.security;
            self.state.banks[cur].cfsr.insert(Cfsr::INVPC);
            self.pend(USAGE_FAULT, cur.is_secure())?;
            return self.tail_chain(excret);
        }

        let mut restore_s16_s31 = false;
        if !ftype {
            let fpccr_s = self.state.fp_owner().fpccr;
            if !return_to_secure && fpccr_s.lspact() {
                debug!("SecureFault on return: Secure LSPACT set returning to Non-secure");
                self.state.sfsr.insert(Sfsr::LSERR);
                self.pend(SECURE_FAULT, false)?;
                return self.tail_chain(excret);
            }

            restore_s16_s31 = return_to_secure && fpccr_s.ts();

            if self.state.banks[rs].fpccr.lspact() {
                // The FP registers were never stacked.
                self.state.banks[rs].fpccr.set_lspact(false);
            } else if !self.state.cpacr_pass(rs, return_to_priv) {
                debug!("UsageFault on return: CPACR prevents unstacking FP registers");
                self.state.banks[rs].cfsr.insert(Cfsr::NOCP);
                self.pend(USAGE_FAULT, return_to_secure)?;
                return self.tail_chain(excret);
            } else if !(return_to_secure || self.state.nsacr_cp10()) {
                debug!("UsageFault on return: NSACR prevents unstacking FP registers");
                self.state.banks.secure.cfsr.insert(Cfsr::INVPC);
                self.pend(USAGE_FAULT, true)?;
                return self.tail_chain(excret);
            } else {
                self.read_fp_area(
                    frameptr.wrapping_add(BASIC_FRAME_SIZE),
                    restore_s16_s31,
                    mmu,
                )?;
            }
        }

        self.state.fp_owner_mut().control.set_fpca(!ftype);

        frameptr = frameptr.wrapping_add(BASIC_FRAME_SIZE);
        if !ftype {
            frameptr = frameptr.wrapping_add(FP_AREA_SIZE);
            if restore_s16_s31 {
                frameptr = frameptr.wrapping_add(FP_HIGH_AREA_SIZE);
            }
        }
        if xpsr & XPSR_SPREALIGN != 0 {
            frameptr |= 4;
        }
        self.state.set_sp(slot, frameptr);

        let mut xpsr_mask = !(XPSR_SPREALIGN | XPSR_SFPA);
        if !features.thumb_dsp {
            xpsr_mask &= !XPSR_GE;
        }
        self.state.xpsr_write(xpsr, xpsr_mask);

        if self.state.secure() {
            self.state
                .fp_owner_mut()
                .control
                .set_sfpa(xpsr & XPSR_SFPA != 0);
        }

        if return_to_handler != self.state.is_handler_mode() {
            // Only reachable on v7-M, which has no Secure UsageFault.
            debug!("UsageFault on new frame: IPSR does not match EXC_RETURN.MODE");
            let cur = self.state.security;
            self.state.banks[cur].cfsr.insert(Cfsr::INVPC);
            self.pend(USAGE_FAULT, false)?;
            let ignore_stack_faults = self.push_stack()?;
            return self.take_exception(excret, false, ignore_stack_faults);
        }

        self.state.clear_exclusive();
        debug!("exception return to 0x{pc:08X}");
        self.record(TransitionKind::Return);
        Ok(())
    }
}
