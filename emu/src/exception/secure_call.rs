//! # Calls between security states
//!
//! Secure code calls Non-secure code with BLXNS, which parks the return
//! address and partial xPSR on the Secure stack and leaves FNC_RETURN in
//! LR. Non-secure code enters Secure code only through an SG instruction
//! placed in Secure, Non-secure callable memory.

use tracing::{debug, warn};

use crate::bus::{AccessFault, AccessType, MemoryBus, MmuIndex, SecurityAttributes};
use crate::cortex_m::CortexM;
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::excret::{FNC_RETURN, FNC_RETURN_MIN_MAGIC};
use crate::cpu::fault_status::{Cfsr, Sfsr};
use crate::cpu::psr::{XPSR_EXCP, XPSR_SFPA};
use crate::exception::stacking::INTEGRITY_SIGNATURE;
use crate::exception::{
    BUS_FAULT, CpuException, ExceptionError, MEM_MANAGE, SECURE_FAULT, USAGE_FAULT,
};
use crate::nvic::ExceptionController;
use crate::trace::TransitionKind;

/// Each half of the 32-bit SG encoding.
pub const SG_HALFWORD: u16 = 0xE97F;

/// TT operand bits.
pub const TT_FORCE_UNPRIVILEGED: u32 = 1 << 0;
pub const TT_ALTERNATE_DOMAIN: u32 = 1 << 1;

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    /// BXNS. Bit 0 of `dest` selects the target security state; magic
    /// values are handed to the exception and function return logic.
    pub fn bxns(&mut self, dest: u32) -> Result<(), ExceptionError> {
        if !self.state.secure() {
            return self.raise(CpuException::Undefined);
        }

        if dest >= FNC_RETURN_MIN_MAGIC {
            return self.on_exception_return_magic_pc_write(dest & !1, dest & 1 != 0);
        }

        let to_secure = dest & 1 != 0;
        if !to_secure {
            self.state.fp_owner_mut().control.set_sfpa(false);
        }
        self.state.switch_security_state(SecurityState::from(to_secure));
        self.state.xpsr.set_thumb(true);
        self.state.registers.set_program_counter(dest & !1);
        Ok(())
    }

    /// BLXNS. `dest` with bit 0 clear is a call into Non-secure state.
    ///
    /// The PC must already point at the instruction after the BLXNS.
    pub fn blxns(&mut self, dest: u32) -> Result<(), ExceptionError> {
        if !self.state.secure() {
            return self.raise(CpuException::Undefined);
        }

        let nextinst = self.state.registers.program_counter() | 1;

        if dest & 1 != 0 {
            self.state.registers.set_link_register(nextinst);
            self.state.xpsr.set_thumb(true);
            self.state.registers.set_program_counter(dest & !1);
            return Ok(());
        }

        let sp = self.state.registers.stack_pointer().wrapping_sub(8);
        if sp % 8 != 0 {
            warn!("BLXNS with SP 0x{sp:08X} not doubleword aligned");
        }
        if sp < self.state.sp_limit() {
            return self.raise(CpuException::StackOverflow);
        }

        let mut saved_psr = self.state.exception;
        if self.state.fp_owner().control.sfpa() {
            saved_psr |= XPSR_SFPA;
        }

        let mmu = self.current_mmu_index();
        for (address, value) in [(sp, nextinst), (sp.wrapping_add(4), saved_psr)] {
            if let Err(fault) = self.bus.store_word(address, value, mmu) {
                return self.raise(CpuException::DataAbort {
                    address,
                    kind: fault.into(),
                });
            }
        }

        self.state.registers.set_stack_pointer(sp);
        self.state.registers.set_link_register(FNC_RETURN);
        if self.state.is_handler_mode() {
            // Hides the Secure exception number from the callee.
            self.state.write_exception(1);
        }
        self.state.fp_owner_mut().control.set_sfpa(false);
        self.state.switch_security_state(SecurityState::NonSecure);
        self.state.xpsr.set_thumb(true);
        self.state.registers.set_program_counter(dest);
        self.record(TransitionKind::FunctionCall);
        Ok(())
    }

    /// Branch to FNC_RETURN: pops the frame BLXNS left on the Secure stack.
    pub(crate) fn function_return(&mut self) -> Result<(), ExceptionError> {
        let slot = self.state.sp_slot(
            SecurityState::Secure,
            !self.state.is_handler_mode(),
            self.state.banks.secure.control.spsel(),
        );
        let frameptr = self.state.sp(slot);
        let mmu = self.mmu_index_for_secstate(SecurityState::Secure);
        debug!("function return, frame at 0x{frameptr:08X}");

        let mut frame = [0; 2];
        for (i, word) in frame.iter_mut().enumerate() {
            let address = frameptr.wrapping_add(4 * i as u32);
            match self.bus.load_word(address, mmu) {
                Ok(value) => *word = value,
                Err(fault) => {
                    return self.raise(CpuException::DataAbort {
                        address,
                        kind: fault.into(),
                    });
                }
            }
        }
        let [newpc, newpsr] = frame;

        let newpsr_exc = newpsr & XPSR_EXCP;
        let consistent = (self.state.exception == 0 && newpsr_exc == 0)
            || (self.state.exception == 1 && newpsr_exc != 0);
        if !consistent {
            debug!(
                "function return: IPSR {} doesn't match stacked {newpsr_exc}",
                self.state.exception
            );
            let cur = self.state.security;
            self.state.banks[cur].cfsr.insert(Cfsr::INVPC);
            self.pend(USAGE_FAULT, cur.is_secure())?;
            return self.enter_exception();
        }

        self.state.set_sp(slot, frameptr.wrapping_add(8));
        self.state.switch_security_state(SecurityState::Secure);
        self.state.write_exception(newpsr_exc);
        self.state
            .fp_owner_mut()
            .control
            .set_sfpa(newpsr & XPSR_SFPA != 0);
        self.state.xpsr.clear_it();
        self.state.xpsr.set_thumb(newpc & 1 != 0);
        self.state.registers.set_program_counter(newpc & !1);
        self.record(TransitionKind::FunctionReturn);
        Ok(())
    }

    fn invalid_entry_point(&mut self) -> Result<(), ExceptionError> {
        debug!("SecureFault: invalid entry point");
        self.state.sfsr.insert(Sfsr::INVEP);
        self.pend(SECURE_FAULT, false)
    }

    /// Fetches half of a candidate SG instruction. `None` when a fault
    /// was pended instead.
    fn read_half_insn(&mut self, mmu: MmuIndex, addr: u32) -> Result<Option<u16>, ExceptionError> {
        let sattrs = self.bus.classify(addr, true, AccessType::Execute);
        if !sattrs.nsc || sattrs.ns {
            self.invalid_entry_point()?;
            return Ok(None);
        }

        match self.bus.fetch_halfword(addr, mmu) {
            Ok(half) => Ok(Some(half)),
            Err(AccessFault::Permission) => {
                let cur = self.state.security;
                self.state.banks[cur].cfsr.insert(Cfsr::IACCVIOL);
                self.pend(MEM_MANAGE, cur.is_secure())?;
                Ok(None)
            }
            Err(AccessFault::Bus) => {
                self.state.banks.non_secure.cfsr.insert(Cfsr::IBUSERR);
                self.pend(BUS_FAULT, false)?;
                Ok(None)
            }
            Err(AccessFault::Security) => {
                self.invalid_entry_point()?;
                Ok(None)
            }
        }
    }

    /// Reads the top of the Secure thread stack for the reentrancy check.
    fn read_sg_stack_word(&mut self, mmu: MmuIndex, addr: u32) -> Result<Option<u32>, ExceptionError> {
        match self.bus.load_word(addr, mmu) {
            Ok(word) => return Ok(Some(word)),
            Err(AccessFault::Security) => {
                self.state.sfsr.insert(Sfsr::AUVIOL | Sfsr::SFARVALID);
                self.state.sfar = addr;
                self.pend(SECURE_FAULT, false)?;
            }
            Err(AccessFault::Permission) => {
                let bank = &mut self.state.banks.secure;
                bank.cfsr.insert(Cfsr::DACCVIOL | Cfsr::MMARVALID);
                bank.mmfar = addr;
                self.pend(MEM_MANAGE, true)?;
            }
            Err(AccessFault::Bus) => {
                self.state
                    .banks
                    .non_secure
                    .cfsr
                    .insert(Cfsr::PRECISERR | Cfsr::BFARVALID);
                self.state.bfar = addr;
                self.pend(BUS_FAULT, false)?;
            }
        }
        Ok(None)
    }

    /// Non-secure code fetched from Secure, Non-secure callable memory.
    /// Executes the SG instruction there and returns `Ok(true)`, or pends
    /// the fault that fetch deserves and returns `Ok(false)`.
    pub(crate) fn execute_secure_gateway(&mut self) -> Result<bool, ExceptionError> {
        if !self.state.features.has_security() || self.state.secure() {
            self.invalid_entry_point()?;
            return Ok(false);
        }

        let mmu = self.mmu_index_for_secstate(SecurityState::Secure);
        let pc = self.state.registers.program_counter();

        let Some(first) = self.read_half_insn(mmu, pc)? else {
            return Ok(false);
        };
        if !self.state.xpsr.thumb() || first != SG_HALFWORD {
            self.invalid_entry_point()?;
            return Ok(false);
        }
        let Some(second) = self.read_half_insn(mmu, pc.wrapping_add(2))? else {
            return Ok(false);
        };
        if second != SG_HALFWORD {
            self.invalid_entry_point()?;
            return Ok(false);
        }

        if self.state.features.has_sec_state_check() && !self.state.is_handler_mode() {
            let sp = if self.state.using_psp() {
                self.state.other_ss_psp
            } else {
                self.state.other_ss_msp
            };
            let Some(word) = self.read_sg_stack_word(mmu, sp)? else {
                return Ok(false);
            };
            let secure = &self.state.banks.secure;
            if secure.ccr.trd()
                && ((word & !1) == INTEGRITY_SIGNATURE || !secure.control.npriv())
            {
                debug!("SG: Secure thread reentry refused");
                self.invalid_entry_point()?;
                return Ok(false);
            }
        }

        debug!("SG at 0x{pc:08X}");
        let lr = self.state.registers.link_register();
        self.state.registers.set_link_register(lr & !1);
        self.state.fp_owner_mut().control.set_sfpa(false);
        self.state.switch_security_state(SecurityState::Secure);
        self.state.xpsr.clear_it();
        self.state.registers.set_program_counter(pc.wrapping_add(4));
        self.record(TransitionKind::SecureGateway);
        Ok(true)
    }

    /// TT, TTT, TTA and TTAT. `op` combines [`TT_FORCE_UNPRIVILEGED`] and
    /// [`TT_ALTERNATE_DOMAIN`]. `None` means the variant is undefined in
    /// the current state and the caller should raise
    /// [`CpuException::Undefined`].
    pub fn test_target(&self, addr: u32, op: u32) -> Option<u32> {
        let alternate = op & TT_ALTERNATE_DOMAIN != 0;
        let cur = self.state.security;
        if alternate && !cur.is_secure() {
            return None;
        }

        let target = if alternate { cur.other() } else { cur };
        let target_priv =
            op & TT_FORCE_UNPRIVILEGED == 0 && self.state.is_privileged_in(target);
        let mmu = self.mmu_index_for(target.is_secure(), target_priv);

        // MPU details are hidden from unprivileged TT on the own domain.
        let (mrvalid, mregion, r, rw) = if self.state.is_privileged() || alternate {
            let lookup = self.bus.mpu_lookup(addr, mmu);
            (
                lookup.region.is_some(),
                lookup.region.unwrap_or(0),
                lookup.readable,
                lookup.writable,
            )
        } else {
            (false, 0, false, false)
        };

        let (sattrs, nsr, nsrw) = if cur.is_secure() {
            let sattrs = self.bus.classify(addr, target.is_secure(), AccessType::Read);
            (sattrs, sattrs.ns && r, sattrs.ns && rw)
        } else {
            let sattrs = SecurityAttributes {
                ns: true,
                ..SecurityAttributes::default()
            };
            (sattrs, false, false)
        };

        Some(
            u32::from(sattrs.iregion) << 24
                | u32::from(sattrs.irvalid) << 23
                | u32::from(!sattrs.ns) << 22
                | u32::from(nsrw) << 21
                | u32::from(nsr) << 20
                | u32::from(rw) << 19
                | u32::from(r) << 18
                | u32::from(sattrs.srvalid) << 17
                | u32::from(mrvalid) << 16
                | u32::from(sattrs.sregion) << 8
                | u32::from(mregion),
        )
    }
}
