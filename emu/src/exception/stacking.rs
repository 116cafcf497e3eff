//! # Stack frames
//!
//! Exception frames grow down from the stack pointer of the background
//! context:
//!
//! ```text
//!  +0x00  R0 R1 R2 R3 R12 LR PC xPSR           basic frame (0x20)
//!  +0x20  S0..S15, FPSCR @+0x60, VPR @+0x64      extended frame (0x68)
//!  +0x68  S16..S31                              with FPCCR.TS (0xA8)
//! ```
//!
//! Secure context leaving for a Non-secure handler first gets a callee
//! frame (0x28): integrity signature, a reserved word, then R4..R11.
//!
//! Every word goes through [`CortexM::stack_write`] or
//! [`CortexM::stack_read`], which turn a bus error into the right fault
//! status bits and pend the matching exception.

use tracing::debug;

use crate::bus::{AccessFault, MemoryBus, MmuIndex};
use crate::cortex_m::CortexM;
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::excret::ExcReturn;
use crate::cpu::fault_status::{Cfsr, Sfsr};
use crate::cpu::psr::{XPSR_SFPA, XPSR_SPREALIGN};
use crate::cpu::state::{FpContext, SpSlot};
use crate::exception::{BUS_FAULT, ExceptionError, MEM_MANAGE, SECURE_FAULT, USAGE_FAULT};
use crate::nvic::ExceptionController;

pub const BASIC_FRAME_SIZE: u32 = 0x20;
pub const EXTENDED_FRAME_SIZE: u32 = 0x68;
/// Extended frame that also holds S16-S31.
pub const EXTENDED_TS_FRAME_SIZE: u32 = 0xA8;
pub const CALLEE_FRAME_SIZE: u32 = 0x28;
pub const INTEGRITY_SIGNATURE: u32 = 0xFEFA_125A;

/// How a failed stack write is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackingMode {
    /// Pend a derived exception.
    Normal,
    /// Record status bits only; the caller already takes a derived
    /// exception.
    IgnoreFaults,
    /// Lazy FP preservation: lazy status bits, pended with the readiness
    /// recorded in FPCCR.
    LazyFp,
}

/// Layout of an FP save area: S0-S15 (or S0-S31) in pairs, FPSCR at
/// 0x40, VPR at 0x44, and S16-S31 after those at 0x48.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpArea {
    dregs: usize,
    mve: bool,
}

impl FpArea {
    #[must_use]
    pub const fn new(all_32: bool, mve: bool) -> Self {
        Self {
            dregs: if all_32 { 16 } else { 8 },
            mve,
        }
    }

    const fn dreg_offset(k: usize) -> u32 {
        let offset = 8 * k as u32;
        if k >= 8 { offset + 8 } else { offset }
    }

    /// `(offset, value)` pairs in store order.
    #[must_use]
    pub fn words(self, fp: &FpContext) -> Vec<(u32, u32)> {
        let mut words = Vec::with_capacity(2 * self.dregs + 2);
        for (k, d) in fp.d.iter().take(self.dregs).enumerate() {
            let offset = Self::dreg_offset(k);
            words.push((offset, *d as u32));
            words.push((offset + 4, (*d >> 32) as u32));
        }
        words.push((0x40, fp.fpscr));
        if self.mve {
            words.push((0x44, fp.vpr));
        }
        words
    }

    #[must_use]
    pub fn offsets(self) -> Vec<u32> {
        self.words(&FpContext::default())
            .into_iter()
            .map(|(offset, _)| offset)
            .collect()
    }

    /// Writes back words loaded in [`Self::offsets`] order.
    pub fn load_into(self, fp: &mut FpContext, words: &[u32]) {
        for k in 0..self.dregs {
            fp.d[k] = u64::from(words[2 * k]) | (u64::from(words[2 * k + 1]) << 32);
        }
        fp.fpscr = words[2 * self.dregs];
        if self.mve {
            fp.vpr = words[2 * self.dregs + 1];
        }
    }
}

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    /// First word of a callee frame. Bit 0 is set for a frame without FP
    /// state.
    pub fn integrity_signature(&self, lr: ExcReturn) -> u32 {
        if !self.state.features.has_fpu() || lr.ftype() {
            INTEGRITY_SIGNATURE | 1
        } else {
            INTEGRITY_SIGNATURE
        }
    }

    /// Stores one word of a frame. `Ok(false)` means the store failed
    /// and the fault has been recorded as `mode` asks.
    pub(crate) fn stack_write(
        &mut self,
        addr: u32,
        value: u32,
        mmu: MmuIndex,
        mode: StackingMode,
    ) -> Result<bool, ExceptionError> {
        let Err(fault) = self.bus.store_word(addr, value, mmu) else {
            return Ok(true);
        };

        let lazy = mode == StackingMode::LazyFp;
        let (exc, exc_secure) = match fault {
            AccessFault::Security => {
                debug!("SecureFault on stack write to 0x{addr:08X}");
                let kind = if lazy { Sfsr::LSPERR } else { Sfsr::AUVIOL };
                self.state.sfsr.insert(kind | Sfsr::SFARVALID);
                self.state.sfar = addr;
                (SECURE_FAULT, false)
            }
            AccessFault::Permission => {
                debug!("MemManage fault on stack write to 0x{addr:08X}");
                let kind = if lazy { Cfsr::MLSPERR } else { Cfsr::MSTKERR };
                self.state.banks[SecurityState::from(mmu.secure)]
                    .cfsr
                    .insert(kind);
                (MEM_MANAGE, mmu.secure)
            }
            AccessFault::Bus => {
                debug!("BusFault on stack write to 0x{addr:08X}");
                let kind = if lazy { Cfsr::LSPERR } else { Cfsr::STKERR };
                self.state.banks.non_secure.cfsr.insert(kind);
                (BUS_FAULT, false)
            }
        };

        match mode {
            StackingMode::Normal => self.pend_derived(exc, exc_secure)?,
            StackingMode::LazyFp => self.pend_lazyfp(exc, exc_secure)?,
            StackingMode::IgnoreFaults => {}
        }
        Ok(false)
    }

    /// Loads one word of a frame, pending the matching fault on failure.
    pub(crate) fn stack_read(
        &mut self,
        addr: u32,
        mmu: MmuIndex,
    ) -> Result<Option<u32>, ExceptionError> {
        let fault = match self.bus.load_word(addr, mmu) {
            Ok(value) => return Ok(Some(value)),
            Err(fault) => fault,
        };

        let (exc, exc_secure) = match fault {
            AccessFault::Security => {
                debug!("SecureFault on stack read from 0x{addr:08X}");
                self.state.sfsr.insert(Sfsr::AUVIOL | Sfsr::SFARVALID);
                self.state.sfar = addr;
                (SECURE_FAULT, false)
            }
            AccessFault::Permission => {
                debug!("MemManage fault on stack read from 0x{addr:08X}");
                self.state.banks[SecurityState::from(mmu.secure)]
                    .cfsr
                    .insert(Cfsr::MUNSTKERR);
                (MEM_MANAGE, mmu.secure)
            }
            AccessFault::Bus => {
                debug!("BusFault on stack read from 0x{addr:08X}");
                self.state.banks.non_secure.cfsr.insert(Cfsr::UNSTKERR);
                (BUS_FAULT, false)
            }
        };

        self.pend(exc, exc_secure)?;
        Ok(None)
    }

    /// Stores consecutive words, stopping at the first failure.
    fn write_words(
        &mut self,
        base: u32,
        words: &[u32],
        mmu: MmuIndex,
        mode: StackingMode,
    ) -> Result<bool, ExceptionError> {
        for (i, word) in words.iter().enumerate() {
            let addr = base.wrapping_add(4 * i as u32);
            if !self.stack_write(addr, *word, mmu, mode)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Loads `K` consecutive words, stopping at the first failure.
    pub(crate) fn read_words<const K: usize>(
        &mut self,
        base: u32,
        mmu: MmuIndex,
    ) -> Result<Option<[u32; K]>, ExceptionError> {
        let mut words = [0; K];
        for (i, word) in words.iter_mut().enumerate() {
            match self.stack_read(base.wrapping_add(4 * i as u32), mmu)? {
                Some(value) => *word = value,
                None => return Ok(None),
            }
        }
        Ok(Some(words))
    }

    /// Saves the FP registers into an FP save area at `base`.
    pub(crate) fn write_fp_area(
        &mut self,
        base: u32,
        all_32: bool,
        mmu: MmuIndex,
        mode: StackingMode,
    ) -> Result<bool, ExceptionError> {
        let area = FpArea::new(all_32, self.state.features.has_mve());
        for (offset, value) in area.words(&self.state.fp) {
            if !self.stack_write(base.wrapping_add(offset), value, mmu, mode)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Restores the FP registers from an FP save area at `base`. On a
    /// failed load they are zeroed instead.
    pub(crate) fn read_fp_area(
        &mut self,
        base: u32,
        all_32: bool,
        mmu: MmuIndex,
    ) -> Result<bool, ExceptionError> {
        let area = FpArea::new(all_32, self.state.features.has_mve());
        let mut words = Vec::new();
        for offset in area.offsets() {
            match self.stack_read(base.wrapping_add(offset), mmu)? {
                Some(value) => words.push(value),
                None => {
                    self.state.clear_fp_regs(all_32);
                    return Ok(false);
                }
            }
        }
        area.load_into(&mut self.state.fp, &words);
        Ok(true)
    }

    /// Pushes the exception frame of the current context. `Ok(true)`
    /// means a derived exception is now pending, so later stacking
    /// faults can be ignored.
    pub(crate) fn push_stack(&mut self) -> Result<bool, ExceptionError> {
        let features = self.state.features;
        let cur = self.state.security;
        let secure = cur.is_secure();
        let mmu = self.current_mmu_index();
        let nsacr_cp10 = self.state.nsacr_cp10();
        let fpca = self.state.fp_owner().control.fpca();
        let fpccr_s = self.state.fp_owner().fpccr;

        let mut xpsr = self.state.xpsr_read();
        let mut frameptr = self.state.registers.stack_pointer();

        let framesize = if fpca && (secure || nsacr_cp10) {
            if secure && fpccr_s.ts() {
                EXTENDED_TS_FRAME_SIZE
            } else {
                EXTENDED_FRAME_SIZE
            }
        } else {
            BASIC_FRAME_SIZE
        };

        if frameptr & 4 != 0 && self.state.bank().ccr.stkalign() {
            frameptr -= 4;
            xpsr |= XPSR_SPREALIGN;
        }

        xpsr &= !XPSR_SFPA;
        if secure && self.state.fp_owner().control.sfpa() {
            xpsr |= XPSR_SFPA;
        }

        frameptr = frameptr.wrapping_sub(framesize);

        let mut stacked_ok = true;
        let mut limitviol = false;

        if features.is_v8() {
            let limit = self.state.sp_limit();
            if frameptr < limit {
                debug!("STKOF during stacking, frame at 0x{frameptr:08X} below 0x{limit:08X}");
                self.state.bank_mut().cfsr.insert(Cfsr::STKOF);
                self.pend(USAGE_FAULT, secure)?;
                self.state.registers.set_stack_pointer(limit);
                limitviol = true;
                stacked_ok = false;
            }
        }

        if stacked_ok {
            let r = &self.state.registers;
            let frame = [
                r.register_at(0),
                r.register_at(1),
                r.register_at(2),
                r.register_at(3),
                r.register_at(12),
                r.link_register(),
                r.program_counter(),
                xpsr,
            ];
            stacked_ok = self.write_words(frameptr, &frame, mmu, StackingMode::Normal)?;
        }

        if fpca {
            let lspact = self.state.banks[SecurityState::from(fpccr_s.s())]
                .fpccr
                .lspact();

            if lspact && features.has_security() {
                debug!("LSPACT already set on exception entry");
                self.state.sfsr.insert(Sfsr::LSERR);
                self.pend(SECURE_FAULT, false)?;
            } else if !secure && !nsacr_cp10 {
                debug!("Non-secure FP context with NSACR.CP10 clear");
                self.state.banks.secure.cfsr.insert(Cfsr::NOCP);
                self.pend(USAGE_FAULT, true)?;
            } else if !fpccr_s.lspen() {
                let cpacr_pass = self.state.cpacr_pass(cur, self.state.is_privileged());
                if stacked_ok && !cpacr_pass {
                    debug!("CPACR denies FP stacking");
                    self.state.bank_mut().cfsr.insert(Cfsr::NOCP);
                    self.pend(USAGE_FAULT, secure)?;
                    stacked_ok = false;
                }

                let all_32 = framesize == EXTENDED_TS_FRAME_SIZE;
                stacked_ok = stacked_ok
                    && self.write_fp_area(
                        frameptr.wrapping_add(BASIC_FRAME_SIZE),
                        all_32,
                        mmu,
                        StackingMode::Normal,
                    )?;
                if cpacr_pass {
                    self.state.clear_fp_regs(all_32);
                }
            } else {
                self.update_fpccr(frameptr.wrapping_add(BASIC_FRAME_SIZE), true);
            }
        }

        if !limitviol {
            self.state.registers.set_stack_pointer(frameptr);
        }

        Ok(!stacked_ok)
    }

    /// Pushes the callee frame of a Secure context about to be left for a
    /// Non-secure handler. On a tail-chain the registers belong to the
    /// Secure context named by `lr`, not the current one.
    pub(crate) fn push_callee_stack(
        &mut self,
        lr: ExcReturn,
        tail_chain: bool,
        ignore_faults: bool,
    ) -> Result<bool, ExceptionError> {
        let mode = if ignore_faults {
            StackingMode::IgnoreFaults
        } else {
            StackingMode::Normal
        };

        let (mmu, slot, limit) = if tail_chain {
            let thread = lr.mode();
            let secure_bank = &self.state.banks.secure;
            let privileged = !secure_bank.control.npriv() || !thread;
            let limit = if thread && lr.spsel() {
                secure_bank.psplim
            } else {
                secure_bank.msplim
            };
            (
                self.mmu_index_for(true, privileged),
                self.state.sp_slot(SecurityState::Secure, thread, lr.spsel()),
                limit,
            )
        } else {
            (
                self.current_mmu_index(),
                SpSlot::Current,
                self.state.sp_limit(),
            )
        };

        let frameptr = self.state.sp(slot).wrapping_sub(CALLEE_FRAME_SIZE);
        if frameptr < limit {
            debug!("STKOF during callee-saves register stacking");
            let cur = self.state.security;
            self.state.banks[cur].cfsr.insert(Cfsr::STKOF);
            self.pend(USAGE_FAULT, cur.is_secure())?;
            self.state.set_sp(slot, limit);
            return Ok(true);
        }

        let signature = self.integrity_signature(lr);
        let r = &self.state.registers;
        let callee: [u32; 8] = std::array::from_fn(|i| r.register_at(4 + i));

        let stacked_ok = self.stack_write(frameptr, signature, mmu, mode)?
            && self.write_words(frameptr.wrapping_add(8), &callee, mmu, mode)?;

        self.state.set_sp(slot, frameptr);
        Ok(!stacked_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MpuRegion;
    use crate::cortex_m::fixtures::*;
    use crate::cpu::config::CpuFeatures;
    use crate::cpu::excret::EXCRET_FTYPE;
    use crate::cpu::psr::XPSR_T;
    use pretty_assertions::assert_eq;

    fn numbered(cpu: &mut CortexM) {
        for reg in 0..13 {
            cpu.state.registers.set_register_at(reg, 0x100 + reg as u32);
        }
        cpu.state.registers.set_link_register(0x0000_2001);
        cpu.state.registers.set_program_counter(0x0000_1000);
    }

    #[test]
    fn check_fp_area_layout() {
        let area = FpArea::new(false, false);
        let offsets = area.offsets();
        assert_eq!(offsets.len(), 17);
        assert_eq!(offsets[15], 0x3C);
        assert_eq!(offsets[16], 0x40);

        let area = FpArea::new(true, true);
        let offsets = area.offsets();
        assert_eq!(offsets.len(), 34);
        // S16 comes after FPSCR and VPR.
        assert_eq!(offsets[16], 0x48);
        assert_eq!(offsets[31], 0x84);
        assert_eq!(offsets[32..], [0x40, 0x44]);
    }

    #[test]
    fn check_fp_area_load_into() {
        let area = FpArea::new(false, false);
        let mut words: Vec<u32> = (0..16).collect();
        words.push(0xABCD);

        let mut fp = FpContext::default();
        fp.d[9] = 7;
        area.load_into(&mut fp, &words);

        assert_eq!(fp.d[0], 1 << 32);
        assert_eq!(fp.d[7], (15 << 32) | 14);
        assert_eq!(fp.d[9], 7);
        assert_eq!(fp.fpscr, 0xABCD);
    }

    #[test]
    fn check_integrity_signature() {
        let cpu = machine(CpuFeatures::cortex_m33());
        assert_eq!(cpu.integrity_signature(ExcReturn::new(EXCRET_FTYPE)), 0xFEFA_125B);
        assert_eq!(cpu.integrity_signature(ExcReturn::new(0)), 0xFEFA_125A);

        let cpu = machine(CpuFeatures::cortex_m23());
        assert_eq!(cpu.integrity_signature(ExcReturn::new(0)), 0xFEFA_125B);
    }

    #[test]
    fn check_push_basic_frame() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        numbered(&mut cpu);
        cpu.state.xpsr.write(0xF000_0000, 0xF000_0000);

        assert_eq!(cpu.push_stack(), Ok(false));

        let sp = cpu.state.registers.stack_pointer();
        assert_eq!(sp, SECURE_MSP - BASIC_FRAME_SIZE);
        let frame: Vec<u32> = (0..8)
            .map(|i| cpu.bus.read_word(sp + 4 * i).unwrap_or_default())
            .collect();
        assert_eq!(
            frame,
            vec![
                0x100,
                0x101,
                0x102,
                0x103,
                0x10C,
                0x0000_2001,
                0x0000_1000,
                0xF000_0000 | XPSR_T
            ]
        );
    }

    #[test]
    fn check_push_realigns_stack() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.registers.set_stack_pointer(SECURE_MSP - 4);

        assert_eq!(cpu.push_stack(), Ok(false));

        let sp = cpu.state.registers.stack_pointer();
        assert_eq!(sp, SECURE_MSP - 8 - BASIC_FRAME_SIZE);
        let xpsr = cpu.bus.read_word(sp + 0x1C).unwrap_or_default();
        assert_ne!(xpsr & XPSR_SPREALIGN, 0);
    }

    #[test]
    fn check_push_records_sfpa() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.fp_owner_mut().control.set_sfpa(true);

        assert_eq!(cpu.push_stack(), Ok(false));
        let sp = cpu.state.registers.stack_pointer();
        let xpsr = cpu.bus.read_word(sp + 0x1C).unwrap_or_default();
        assert_ne!(xpsr & XPSR_SFPA, 0);
    }

    #[test]
    fn check_push_stack_limit() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        set_enabled(&cpu, USAGE_FAULT, true);
        cpu.state.banks.secure.msplim = SECURE_MSP - 0x10;

        assert_eq!(cpu.push_stack(), Ok(true));
        assert_eq!(cpu.state.registers.stack_pointer(), SECURE_MSP - 0x10);
        assert!(cpu.state.banks.secure.cfsr.contains(Cfsr::STKOF));
        assert!(is_pending(&cpu, USAGE_FAULT, true));
    }

    #[test]
    fn check_push_extended_frame() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.fp_owner_mut().control.set_fpca(true);
        cpu.state.banks.secure.fpccr.set_lspen(false);
        cpu.state.banks.secure.cpacr = 0xF << 20;
        cpu.state.fp.d[0] = 0x1111_2222_3333_4444;
        cpu.state.fp.fpscr = 0x0300_0000;

        assert_eq!(cpu.push_stack(), Ok(false));

        let sp = cpu.state.registers.stack_pointer();
        assert_eq!(sp, SECURE_MSP - EXTENDED_FRAME_SIZE);
        assert_eq!(cpu.bus.read_word(sp + 0x20), Some(0x3333_4444));
        assert_eq!(cpu.bus.read_word(sp + 0x24), Some(0x1111_2222));
        assert_eq!(cpu.bus.read_word(sp + 0x60), Some(0x0300_0000));
        assert_eq!(cpu.state.fp, FpContext::default());
    }

    #[test]
    fn check_push_lazy_frame_reserves_space() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.state.fp_owner_mut().control.set_fpca(true);
        cpu.state.fp.d[3] = 3;

        assert_eq!(cpu.push_stack(), Ok(false));

        let sp = cpu.state.registers.stack_pointer();
        assert_eq!(sp, SECURE_MSP - EXTENDED_FRAME_SIZE);
        assert!(cpu.state.banks.secure.fpccr.lspact());
        assert_eq!(cpu.state.banks.secure.fpcar, sp + BASIC_FRAME_SIZE);
        assert_eq!(cpu.state.fp.d[3], 3);
    }

    #[test]
    fn check_stack_write_permission_fault() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        cpu.bus = std::mem::take(&mut cpu.bus).with_mpu_region(MpuRegion {
            base: SECURE_RAM,
            limit: SECURE_RAM + 0xFFFF,
            secure: true,
            privileged_only: false,
            read_only: true,
        });
        set_enabled(&cpu, MEM_MANAGE, true);

        let mmu = cpu.current_mmu_index();
        assert_eq!(
            cpu.stack_write(SECURE_MSP - 4, 0, mmu, StackingMode::Normal),
            Ok(false)
        );
        assert!(cpu.state.banks.secure.cfsr.contains(Cfsr::MSTKERR));
        assert!(is_pending(&cpu, MEM_MANAGE, true));
    }

    #[test]
    fn check_stack_write_ignore_faults() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        let mmu = cpu.current_mmu_index();

        assert_eq!(
            cpu.stack_write(0x3000_0000, 0, mmu, StackingMode::IgnoreFaults),
            Ok(false)
        );
        assert!(cpu.state.banks.non_secure.cfsr.contains(Cfsr::STKERR));
        assert!(!is_pending(&cpu, BUS_FAULT, false));
        assert!(!is_pending(&cpu, crate::exception::HARD_FAULT, true));
    }

    #[test]
    fn check_stack_read_security_fault() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        let mmu = cpu.mmu_index_for(false, true);

        assert_eq!(cpu.stack_read(SECURE_MSP, mmu), Ok(None));
        assert!(cpu.state.sfsr.contains(Sfsr::AUVIOL | Sfsr::SFARVALID));
        assert_eq!(cpu.state.sfar, SECURE_MSP);
    }

    #[test]
    fn check_push_callee_stack() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        numbered(&mut cpu);
        let lr = ExcReturn::new(0xFFFF_FFF9 | EXCRET_FTYPE);

        assert_eq!(cpu.push_callee_stack(lr, false, false), Ok(false));

        let sp = cpu.state.registers.stack_pointer();
        assert_eq!(sp, SECURE_MSP - CALLEE_FRAME_SIZE);
        assert_eq!(cpu.bus.read_word(sp), Some(INTEGRITY_SIGNATURE | 1));
        assert_eq!(cpu.bus.read_word(sp + 8), Some(0x104));
        assert_eq!(cpu.bus.read_word(sp + 0x24), Some(0x10B));
    }

    #[test]
    fn check_push_callee_stack_tail_chain_uses_lr_stack() {
        let mut cpu = machine(CpuFeatures::cortex_m33());
        // Handler mode, Non-secure, returning to Secure Thread on PSP.
        cpu.state.switch_security_state(SecurityState::NonSecure);
        cpu.state.write_exception(crate::exception::SVCALL);
        let lr = ExcReturn::new(0xFFFF_FFFD | EXCRET_FTYPE);

        assert_eq!(cpu.push_callee_stack(lr, true, false), Ok(false));
        assert_eq!(cpu.state.other_ss_psp, SECURE_PSP - CALLEE_FRAME_SIZE);
        assert_eq!(cpu.state.other_ss_msp, SECURE_MSP);
    }
}
