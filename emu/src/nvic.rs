//! # Exception controller
//!
//! The exception model only talks to the priority logic through
//! [`ExceptionController`]. [`Nvic`] is the reference implementation used
//! by the tests and the scenario driver: a vector table of
//! enable/pending/active/priority state, plus a Secure copy of the banked
//! system exceptions when the Security Extension is present.
//!
//! The controller does not own any CPU register. Every call receives a
//! [`MaskState`] snapshot of the registers that feed the execution
//! priority (PRIMASK, BASEPRI, FAULTMASK for both security states, and
//! AIRCR), so nothing it computes can go stale behind the CPU's back.
//!
//! Priorities are signed: Reset, NMI and HardFault have the fixed
//! negative priorities -4/-3, -2 and -1 (-3 for a Secure HardFault when
//! AIRCR.BFHFNMINS is set), everything else is configurable in 0..=255.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::cpu::config::CpuFeatures;
use crate::cpu::cpu_modes::{Banked, SecurityState};
use crate::cpu::fault_status::Aircr;
use crate::cpu::fpccr::Fpccr;
use crate::exception::{
    BUS_FAULT, DEBUG_MONITOR, ExceptionError, FIRST_IRQ, HARD_FAULT, MEM_MANAGE, NMI, PENDSV,
    RESET, SECURE_FAULT, SVCALL, SYSTICK, USAGE_FAULT, is_banked,
};

/// Priority of "nothing active" / "nothing pending".
pub const NOEXC_PRIO: i32 = 0x100;
/// Non-secure priorities are squashed above this with AIRCR.PRIS.
pub const NS_PRIO_LIMIT: i32 = 0x80;

/// CPU registers the priority logic reads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaskState {
    pub primask: Banked<u32>,
    pub basepri: Banked<u32>,
    pub faultmask: Banked<u32>,
    pub aircr: Aircr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingException {
    pub number: u32,
    pub targets_secure: bool,
}

/// Outcome of deactivating an exception on return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionResult {
    /// The exception was not active: an illegal exception return.
    NotActive,
    /// Other exceptions are still active.
    StillNested,
    /// This was the only active exception.
    ReturnedToBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendOutcome {
    Pended,
    /// Escalated to HardFault; the caller records HFSR.FORCED.
    Escalated,
    /// Dropped, e.g. a DebugMonitor fault below the current priority.
    Ignored,
}

pub trait ExceptionController {
    /// Highest priority pending exception, whether or not it can
    /// preempt right now.
    fn pending_info(&self, masks: &MaskState) -> Option<PendingException>;

    /// Makes the highest priority pending exception active. The caller
    /// writes IPSR.
    fn acknowledge(&mut self, masks: &MaskState) -> Result<PendingException, ExceptionError>;

    fn complete(&mut self, exc: u32, secure: bool, masks: &MaskState) -> CompletionResult;

    /// The pending exception has higher priority than the current
    /// execution priority.
    fn can_take_pending(&self, masks: &MaskState) -> bool;

    /// Priority of the highest priority active exception, ignoring masks.
    fn raw_execution_priority(&self, masks: &MaskState) -> i32;

    fn set_pending(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
    ) -> Result<PendOutcome, ExceptionError>;

    /// Pends an exception raised while trying to take another one.
    fn set_pending_derived(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
    ) -> Result<PendOutcome, ExceptionError>;

    /// Pends a fault raised by lazy FP stacking. Escalation follows the
    /// readiness recorded in FPCCR when the context was created.
    fn set_pending_lazyfp(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
        fpccr_s: Fpccr,
        fpccr: Fpccr,
    ) -> Result<PendOutcome, ExceptionError>;

    /// The security state has an active NMI or HardFault, or has set
    /// FAULTMASK.
    fn neg_prio_requested(&self, secure: bool, masks: &MaskState) -> bool;

    /// The exception is enabled and could preempt the current priority.
    fn ready_status(&self, exc: u32, secure: bool, masks: &MaskState) -> bool;

    /// AIRCR was written. Controllers that derive vector state from it
    /// (HardFault priority and banking) update it here.
    fn aircr_changed(&mut self, _aircr: Aircr) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VecInfo {
    /// Raw priority: group and subpriority.
    pub prio: i32,
    pub enabled: bool,
    pub pending: bool,
    pub active: bool,
    /// Input line level, external interrupts only.
    pub level: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvicConfig {
    /// Number of external interrupts.
    pub num_irq: u32,
    /// Implemented priority bits, counted from bit 7 down.
    pub prio_bits: u8,
}

impl Default for NvicConfig {
    fn default() -> Self {
        Self {
            num_irq: 32,
            prio_bits: 8,
        }
    }
}

/// Result of a full scan of the vector table.
#[derive(Debug, Clone, Copy)]
struct Scan {
    pend_irq: u32,
    pend_prio: i32,
    pend_is_s_banked: bool,
    active_prio: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nvic {
    config: NvicConfig,
    security: bool,
    v8: bool,
    vectors: Vec<VecInfo>,
    /// Secure instances of the banked exceptions.
    sec_vectors: Vec<VecInfo>,
    prigroup: Banked<u32>,
    /// Interrupt targets Non-secure state, per external interrupt.
    itns: Vec<bool>,
}

impl Nvic {
    #[must_use]
    pub fn new(config: NvicConfig, features: &CpuFeatures) -> Self {
        let mut nvic = Self {
            config,
            security: features.has_security(),
            v8: features.is_v8(),
            vectors: Vec::new(),
            sec_vectors: Vec::new(),
            prigroup: Banked::default(),
            itns: Vec::new(),
        };
        nvic.reset();
        nvic
    }

    pub fn reset(&mut self) {
        let num_vectors = self.num_vectors() as usize;
        self.vectors = vec![VecInfo::default(); num_vectors];
        self.sec_vectors = vec![VecInfo::default(); FIRST_IRQ as usize];
        self.prigroup = Banked::default();

        for exc in [NMI, SVCALL, PENDSV, SYSTICK] {
            self.vectors[exc as usize].enabled = true;
        }

        self.vectors[RESET as usize].prio = if self.v8 { -4 } else { -3 };
        self.vectors[NMI as usize].prio = -2;
        self.vectors[HARD_FAULT as usize].prio = -1;

        if self.security {
            for exc in [HARD_FAULT, SVCALL, PENDSV, SYSTICK] {
                self.sec_vectors[exc as usize].enabled = true;
            }
            self.sec_vectors[HARD_FAULT as usize].prio = -1;
            // Non-secure HardFault is unused until BFHFNMINS is set.
            self.vectors[HARD_FAULT as usize].enabled = false;
        } else {
            self.vectors[HARD_FAULT as usize].enabled = true;
        }

        // Without security every interrupt is, and stays, Non-secure.
        self.itns = vec![!self.security; num_vectors];
    }

    /// Follows an AIRCR.BFHFNMINS change: the Non-secure HardFault comes
    /// into use and the Secure one moves to priority -3.
    pub fn apply_aircr(&mut self, aircr: Aircr) {
        if !self.security {
            return;
        }
        let bfhfnmins = aircr.bfhfnmins();
        self.sec_vectors[HARD_FAULT as usize].prio = if bfhfnmins { -3 } else { -1 };
        self.vectors[HARD_FAULT as usize].enabled = bfhfnmins;
    }

    #[must_use]
    pub const fn num_vectors(&self) -> u32 {
        FIRST_IRQ + self.config.num_irq
    }

    fn in_range(&self, exc: u32) -> bool {
        exc > RESET && exc < self.num_vectors()
    }

    fn vec(&self, exc: u32, secure_bank: bool) -> &VecInfo {
        if secure_bank {
            &self.sec_vectors[exc as usize]
        } else {
            &self.vectors[exc as usize]
        }
    }

    fn vec_mut(&mut self, exc: u32, secure_bank: bool) -> &mut VecInfo {
        if secure_bank {
            &mut self.sec_vectors[exc as usize]
        } else {
            &mut self.vectors[exc as usize]
        }
    }

    /// Vector state, `secure` selecting the bank of a banked exception.
    #[must_use]
    pub fn vector(&self, exc: u32, secure: bool) -> Option<VecInfo> {
        if exc >= self.num_vectors() {
            return None;
        }
        Some(*self.vec(exc, secure && is_banked(exc)))
    }

    #[must_use]
    pub fn is_pending(&self, exc: u32, secure: bool) -> bool {
        self.vector(exc, secure).is_some_and(|v| v.pending)
    }

    #[must_use]
    pub fn is_active(&self, exc: u32, secure: bool) -> bool {
        self.vector(exc, secure).is_some_and(|v| v.active)
    }

    /// SHCSR/ISER style enable. NMI and HardFault are not configurable.
    pub fn set_enabled(&mut self, exc: u32, secure: bool, enabled: bool) {
        if !self.in_range(exc) || exc == NMI || exc == HARD_FAULT {
            warn!("NVIC: exception {exc} enable is not configurable");
            return;
        }
        let secure_bank = self.security && secure && is_banked(exc);
        self.vec_mut(exc, secure_bank).enabled = enabled;
    }

    /// SHPR/IPR style priority write, keeping only the implemented bits.
    pub fn set_priority(&mut self, exc: u32, secure: bool, prio: u8) {
        if !self.in_range(exc) || exc <= HARD_FAULT {
            warn!("NVIC: exception {exc} priority is not configurable");
            return;
        }
        let implemented = 0xFF_u8 << (8 - self.config.prio_bits.clamp(1, 8));
        let secure_bank = self.security && secure && is_banked(exc);
        self.vec_mut(exc, secure_bank).prio = i32::from(prio & implemented);
    }

    pub fn set_prigroup(&mut self, secure: SecurityState, prigroup: u32) {
        self.prigroup[secure] = prigroup & 7;
    }

    /// NVIC_ITNS: routes an external interrupt to Non-secure state.
    pub fn set_target_non_secure(&mut self, irq: u32, non_secure: bool) {
        if !self.security || irq < FIRST_IRQ || irq >= self.num_vectors() {
            return;
        }
        self.itns[irq as usize] = non_secure;
    }

    /// Pends an exception from outside the CPU (ISPR, ICSR, a peripheral).
    pub fn pend(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
    ) -> Result<PendOutcome, ExceptionError> {
        if !self.in_range(exc) {
            warn!("NVIC: ignoring pend of out of range exception {exc}");
            return Ok(PendOutcome::Ignored);
        }
        self.set_pending(exc, secure && is_banked(exc), masks)
    }

    /// External interrupt line: pending is latched on the rising edge.
    pub fn set_irq_level(
        &mut self,
        irq: u32,
        level: bool,
        masks: &MaskState,
    ) -> Result<(), ExceptionError> {
        if irq < FIRST_IRQ || irq >= self.num_vectors() {
            warn!("NVIC: no such interrupt line {irq}");
            return Ok(());
        }
        let vec = &mut self.vectors[irq as usize];
        if vec.level != level {
            vec.level = level;
            if level {
                self.set_pending(irq, false, masks)?;
            }
        }
        Ok(())
    }

    fn exc_targets_secure(&self, exc: u32, aircr: Aircr) -> bool {
        if !self.security {
            return false;
        }

        if exc >= FIRST_IRQ {
            return !self.itns[exc as usize];
        }

        match exc {
            NMI | BUS_FAULT => !aircr.bfhfnmins(),
            SECURE_FAULT => true,
            DEBUG_MONITOR => false,
            _ => true,
        }
    }

    fn gprio_mask(&self, secure: bool) -> u32 {
        !0_u32 << (self.prigroup[SecurityState::from(secure)] + 1)
    }

    /// Group priority of a raw priority value.
    fn group_prio(&self, rawprio: i32, targets_secure: bool, aircr: Aircr) -> i32 {
        if rawprio < 0 {
            return rawprio;
        }
        let mut prio = (rawprio as u32 & self.gprio_mask(targets_secure)) as i32;
        if self.security && !targets_secure && aircr.pris() {
            prio = (prio >> 1) + NS_PRIO_LIMIT;
        }
        prio
    }

    /// Precedence: lowest group priority, then lowest subpriority, then
    /// lowest exception number, then the Secure instance of a banked one.
    fn scan(&self, aircr: Aircr) -> Scan {
        let mut scan = Scan {
            pend_irq: 0,
            pend_prio: NOEXC_PRIO,
            pend_is_s_banked: false,
            active_prio: NOEXC_PRIO,
        };
        let mut pend_subprio = 0;

        for exc in 1..self.num_vectors() {
            for secure_bank in [true, false] {
                if secure_bank && !(self.security && is_banked(exc)) {
                    continue;
                }
                let vec = self.vec(exc, secure_bank);
                let targets_secure =
                    secure_bank || (!is_banked(exc) && self.exc_targets_secure(exc, aircr));

                let prio = self.group_prio(vec.prio, targets_secure, aircr);
                let subprio = if vec.prio < 0 {
                    0
                } else {
                    (vec.prio as u32 & !self.gprio_mask(targets_secure)) as i32
                };

                if vec.enabled
                    && vec.pending
                    && (prio < scan.pend_prio
                        || (prio == scan.pend_prio && prio >= 0 && subprio < pend_subprio))
                {
                    scan.pend_irq = exc;
                    scan.pend_prio = prio;
                    scan.pend_is_s_banked = secure_bank;
                    pend_subprio = subprio;
                }
                if vec.active && prio < scan.active_prio {
                    scan.active_prio = prio;
                }
            }
        }

        scan
    }

    /// Current execution priority: masks and the active exceptions.
    fn exec_prio(&self, masks: &MaskState, scan: &Scan) -> i32 {
        let aircr = masks.aircr;
        let mut running = NOEXC_PRIO;

        if masks.basepri.non_secure > 0 {
            running = self.group_prio(masks.basepri.non_secure as i32, false, aircr);
        }

        if masks.basepri.secure > 0 {
            running = running.min(self.group_prio(masks.basepri.secure as i32, true, aircr));
        }

        if masks.primask.non_secure != 0 {
            if aircr.pris() {
                running = running.min(NS_PRIO_LIMIT);
            } else {
                running = 0;
            }
        }

        if masks.primask.secure != 0 {
            running = 0;
        }

        if masks.faultmask.non_secure != 0 {
            if aircr.bfhfnmins() {
                running = -1;
            } else if aircr.pris() {
                running = running.min(NS_PRIO_LIMIT);
            } else {
                running = 0;
            }
        }

        if masks.faultmask.secure != 0 {
            running = if aircr.bfhfnmins() { -3 } else { -1 };
        }

        running.min(scan.active_prio)
    }

    fn do_set_pending(
        &mut self,
        exc: u32,
        secure: bool,
        derived: bool,
        masks: &MaskState,
    ) -> Result<PendOutcome, ExceptionError> {
        let aircr = masks.aircr;
        let banked = is_banked(exc);
        let secure = secure && banked && self.security;
        let targets_secure = if banked {
            secure
        } else {
            self.exc_targets_secure(exc, aircr)
        };
        let scan = self.scan(aircr);
        let running = self.exec_prio(masks, &scan);

        let (mut exc_slot, mut bank_slot) = (exc, secure);
        let mut outcome = PendOutcome::Pended;

        debug!(
            "NVIC: set pending {exc} (secure bank: {secure}, targets secure: {targets_secure}, derived: {derived})"
        );

        if derived {
            let vec = self.vec(exc, secure);

            if exc == DEBUG_MONITOR && self.group_prio(vec.prio, secure, aircr) >= running {
                debug!("NVIC: ignoring DebugMonitor fault below current priority");
                return Ok(PendOutcome::Ignored);
            }

            // A derived HardFault means the original exception is
            // unreachable; it has to win or the core locks up.
            if exc == HARD_FAULT && vec.prio >= scan.pend_prio {
                error!(
                    "Lockup: can't take terminal derived exception (original exception priority {})",
                    scan.pend_prio
                );
                return Err(ExceptionError::Lockup {
                    exception: exc,
                    priority: scan.pend_prio,
                });
            }
        }

        // Synchronous exceptions that can't be taken now escalate.
        if (HARD_FAULT..PENDSV).contains(&exc) {
            let vec = self.vec(exc, secure);
            let escalate = if self.group_prio(vec.prio, secure, aircr) >= running {
                debug!("NVIC: escalating {exc}: priority {} >= running {running}", vec.prio);
                true
            } else if !vec.enabled {
                debug!("NVIC: escalating {exc}: disabled");
                true
            } else {
                false
            };

            if escalate {
                exc_slot = HARD_FAULT;
                bank_slot = self.security && (targets_secure || !aircr.bfhfnmins());

                if running <= self.vec(HARD_FAULT, bank_slot).prio {
                    error!("Lockup: can't escalate {exc} to HardFault (current priority {running})");
                    return Err(ExceptionError::Lockup {
                        exception: exc,
                        priority: running,
                    });
                }
                outcome = PendOutcome::Escalated;
            }
        }

        self.vec_mut(exc_slot, bank_slot).pending = true;
        Ok(outcome)
    }
}

impl ExceptionController for Nvic {
    fn pending_info(&self, masks: &MaskState) -> Option<PendingException> {
        let scan = self.scan(masks.aircr);
        if scan.pend_irq == 0 {
            return None;
        }

        let targets_secure = scan.pend_is_s_banked
            || (!is_banked(scan.pend_irq) && self.exc_targets_secure(scan.pend_irq, masks.aircr));

        Some(PendingException {
            number: scan.pend_irq,
            targets_secure,
        })
    }

    fn acknowledge(&mut self, masks: &MaskState) -> Result<PendingException, ExceptionError> {
        let pending = self
            .pending_info(masks)
            .ok_or(ExceptionError::NoPendingException)?;
        let scan = self.scan(masks.aircr);
        let running = self.exec_prio(masks, &scan);

        if scan.pend_prio >= running {
            return Err(ExceptionError::NoPendingException);
        }

        debug!("NVIC: acknowledge {} (priority {})", scan.pend_irq, scan.pend_prio);

        let vec = self.vec_mut(scan.pend_irq, scan.pend_is_s_banked);
        vec.active = true;
        vec.pending = false;

        Ok(pending)
    }

    fn complete(&mut self, exc: u32, secure: bool, masks: &MaskState) -> CompletionResult {
        let aircr = masks.aircr;

        // v8-M deactivates the NMI or HardFault owning a negative
        // execution priority whatever IPSR says.
        let forced = if self.v8 {
            match self.raw_execution_priority(masks) {
                -1 => Some((HARD_FAULT, !aircr.bfhfnmins())),
                -2 => Some((NMI, false)),
                -3 => Some((HARD_FAULT, true)),
                _ => None,
            }
        } else {
            None
        };
        let (slot_exc, slot_bank) =
            forced.unwrap_or((exc, secure && is_banked(exc) && self.security));

        if exc >= self.num_vectors() || !self.vec(slot_exc, slot_bank).active {
            return CompletionResult::NotActive;
        }

        let result = if !is_banked(exc) && self.exc_targets_secure(exc, aircr) != secure {
            CompletionResult::NotActive
        } else if self.rettobase() {
            CompletionResult::ReturnedToBase
        } else {
            CompletionResult::StillNested
        };

        debug!("NVIC: complete {exc} (secure: {secure}): {result:?}");

        let vec = self.vec_mut(slot_exc, slot_bank);
        vec.active = false;
        if vec.level {
            vec.pending = true;
        }

        result
    }

    fn can_take_pending(&self, masks: &MaskState) -> bool {
        let scan = self.scan(masks.aircr);
        self.exec_prio(masks, &scan) > scan.pend_prio
    }

    fn raw_execution_priority(&self, masks: &MaskState) -> i32 {
        self.scan(masks.aircr).active_prio
    }

    fn set_pending(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
    ) -> Result<PendOutcome, ExceptionError> {
        self.do_set_pending(exc, secure, false, masks)
    }

    fn set_pending_derived(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
    ) -> Result<PendOutcome, ExceptionError> {
        self.do_set_pending(exc, secure, true, masks)
    }

    fn set_pending_lazyfp(
        &mut self,
        exc: u32,
        secure: bool,
        masks: &MaskState,
        fpccr_s: Fpccr,
        fpccr: Fpccr,
    ) -> Result<PendOutcome, ExceptionError> {
        let aircr = masks.aircr;
        let banked = is_banked(exc);
        let secure = secure && banked && self.security;
        let targets_secure = if banked {
            secure
        } else {
            self.exc_targets_secure(exc, aircr)
        };

        let escalate = match exc {
            DEBUG_MONITOR if !fpccr_s.monrdy() => return Ok(PendOutcome::Ignored),
            MEM_MANAGE => !fpccr.mmrdy(),
            USAGE_FAULT => !fpccr.ufrdy(),
            BUS_FAULT => !fpccr_s.bfrdy(),
            SECURE_FAULT => !fpccr_s.sfrdy(),
            _ => false,
        };

        // Faults that targeted Secure stay Secure once escalated.
        let (slot_exc, slot_bank) = if escalate {
            (
                HARD_FAULT,
                self.security && (targets_secure || !aircr.bfhfnmins()),
            )
        } else {
            (exc, secure)
        };

        let scan = self.scan(aircr);
        let vec = self.vec(slot_exc, slot_bank);
        if (!vec.enabled || self.exec_prio(masks, &scan) <= self.group_prio(vec.prio, secure, aircr))
            && !fpccr_s.hfrdy()
        {
            error!("Lockup: can't escalate to HardFault during lazy FP register stacking");
            return Err(ExceptionError::Lockup {
                exception: exc,
                priority: scan.active_prio,
            });
        }

        self.vec_mut(slot_exc, slot_bank).pending = true;

        Ok(if escalate {
            PendOutcome::Escalated
        } else {
            PendOutcome::Pended
        })
    }

    fn neg_prio_requested(&self, secure: bool, masks: &MaskState) -> bool {
        let secstate = SecurityState::from(secure);
        if masks.faultmask[secstate] != 0 {
            return true;
        }

        if self.vec(HARD_FAULT, secure && self.security).active {
            return true;
        }

        self.vectors[NMI as usize].active && self.exc_targets_secure(NMI, masks.aircr) == secure
    }

    fn ready_status(&self, exc: u32, secure: bool, masks: &MaskState) -> bool {
        let scan = self.scan(masks.aircr);
        let running = self.exec_prio(masks, &scan);

        // Checked against -1 even for a Secure HardFault at -3.
        if exc == HARD_FAULT {
            return running > -1;
        }

        let vec = self.vec(exc, secure && is_banked(exc) && self.security);
        vec.enabled && self.group_prio(vec.prio, secure, masks.aircr) < running
    }

    fn aircr_changed(&mut self, aircr: Aircr) {
        self.apply_aircr(aircr);
    }
}

impl Nvic {
    /// At most one exception is active.
    fn rettobase(&self) -> bool {
        let active = (RESET..self.num_vectors())
            .filter(|&exc| {
                self.vectors[exc as usize].active
                    || (self.security && exc < FIRST_IRQ && self.sec_vectors[exc as usize].active)
            })
            .take(2)
            .count();
        active < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::fpccr::{FPCCR_HFRDY, FPCCR_UFRDY};
    use pretty_assertions::assert_eq;

    fn nvic_v8() -> Nvic {
        Nvic::new(NvicConfig::default(), &CpuFeatures::cortex_m33())
    }

    fn nvic_v7() -> Nvic {
        Nvic::new(NvicConfig::default(), &CpuFeatures::cortex_m3())
    }

    #[test]
    fn check_reset_defaults() {
        let nvic = nvic_v8();
        let nmi = nvic.vector(NMI, false).unwrap();
        assert!(nmi.enabled);
        assert_eq!(nmi.prio, -2);
        assert!(nvic.vector(HARD_FAULT, true).unwrap().enabled);
        assert!(!nvic.vector(HARD_FAULT, false).unwrap().enabled);
        assert_eq!(nvic.vector(RESET, false).unwrap().prio, -4);
        assert!(!nvic.vector(USAGE_FAULT, true).unwrap().enabled);

        let nvic = nvic_v7();
        assert!(nvic.vector(HARD_FAULT, false).unwrap().enabled);
        assert_eq!(nvic.vector(RESET, false).unwrap().prio, -3);
    }

    #[test]
    fn check_pending_precedence() {
        let masks = MaskState::default();
        let mut nvic = nvic_v7();
        nvic.set_enabled(20, false, true);
        nvic.set_enabled(21, false, true);
        nvic.set_priority(20, false, 0x40);
        nvic.set_priority(21, false, 0x20);

        nvic.pend(20, false, &masks).unwrap();
        nvic.pend(21, false, &masks).unwrap();
        assert_eq!(nvic.pending_info(&masks).map(|p| p.number), Some(21));

        // Same group priority: lowest number wins.
        nvic.set_priority(21, false, 0x40);
        assert_eq!(nvic.pending_info(&masks).map(|p| p.number), Some(20));
    }

    #[test]
    fn check_subpriority_ordering() {
        let masks = MaskState::default();
        let mut nvic = nvic_v7();
        // PRIGROUP 5: bits 7:6 group, 5:0 subpriority.
        nvic.set_prigroup(SecurityState::NonSecure, 5);
        nvic.set_enabled(20, false, true);
        nvic.set_enabled(21, false, true);
        nvic.set_priority(20, false, 0x50);
        nvic.set_priority(21, false, 0x48);
        nvic.pend(20, false, &masks).unwrap();
        nvic.pend(21, false, &masks).unwrap();
        assert_eq!(nvic.pending_info(&masks).map(|p| p.number), Some(21));

        let ack = nvic.acknowledge(&masks).unwrap();
        assert_eq!(ack.number, 21);
        // Same group as the active one: can't preempt.
        assert!(!nvic.can_take_pending(&masks));
        assert_eq!(nvic.raw_execution_priority(&masks), 0x40);
    }

    #[test]
    fn check_primask_blocks_pending() {
        let mut masks = MaskState::default();
        let mut nvic = nvic_v7();
        nvic.set_enabled(16, false, true);
        nvic.pend(16, false, &masks).unwrap();
        assert!(nvic.can_take_pending(&masks));

        masks.primask.non_secure = 1;
        assert!(!nvic.can_take_pending(&masks));
        assert_eq!(
            nvic.acknowledge(&masks),
            Err(ExceptionError::NoPendingException)
        );
    }

    #[test]
    fn check_escalation_to_hardfault() {
        let masks = MaskState::default();
        let mut nvic = nvic_v8();

        // UsageFault disabled: escalates to Secure HardFault.
        let outcome = nvic.set_pending(USAGE_FAULT, true, &masks).unwrap();
        assert_eq!(outcome, PendOutcome::Escalated);
        assert!(nvic.is_pending(HARD_FAULT, true));
        assert!(!nvic.is_pending(USAGE_FAULT, true));

        let pending = nvic.pending_info(&masks).unwrap();
        assert_eq!(pending.number, HARD_FAULT);
        assert!(pending.targets_secure);
    }

    #[test]
    fn check_lockup_when_hardfault_active() {
        let masks = MaskState::default();
        let mut nvic = nvic_v7();
        nvic.pend(HARD_FAULT, false, &masks).unwrap();
        nvic.acknowledge(&masks).unwrap();

        let err = nvic.set_pending(USAGE_FAULT, false, &masks).unwrap_err();
        assert_eq!(
            err,
            ExceptionError::Lockup {
                exception: USAGE_FAULT,
                priority: -1
            }
        );
    }

    #[test]
    fn check_derived_hardfault_lockup() {
        let masks = MaskState::default();
        let mut nvic = nvic_v7();
        // Original: NMI at -2. A derived HardFault at -1 can't win.
        nvic.pend(NMI, false, &masks).unwrap();
        assert!(matches!(
            nvic.set_pending_derived(HARD_FAULT, false, &masks),
            Err(ExceptionError::Lockup { .. })
        ));
    }

    #[test]
    fn check_complete_results() {
        let masks = MaskState::default();
        let mut nvic = nvic_v7();
        assert_eq!(
            nvic.complete(SVCALL, false, &masks),
            CompletionResult::NotActive
        );

        nvic.set_enabled(16, false, true);
        nvic.pend(SVCALL, false, &masks).unwrap();
        nvic.acknowledge(&masks).unwrap();
        nvic.pend(NMI, false, &masks).unwrap();
        nvic.acknowledge(&masks).unwrap();

        assert_eq!(nvic.complete(NMI, false, &masks), CompletionResult::StillNested);
        assert_eq!(
            nvic.complete(SVCALL, false, &masks),
            CompletionResult::ReturnedToBase
        );
    }

    #[test]
    fn check_v8_forced_deactivation() {
        let masks = MaskState::default();
        let mut nvic = nvic_v8();
        nvic.set_enabled(SVCALL, true, true);
        nvic.pend(SVCALL, true, &masks).unwrap();
        nvic.acknowledge(&masks).unwrap();
        nvic.pend(HARD_FAULT, true, &masks).unwrap();
        nvic.acknowledge(&masks).unwrap();

        // Returning "from SVCall" at priority -1 deactivates HardFault.
        assert_eq!(
            nvic.complete(SVCALL, true, &masks),
            CompletionResult::StillNested
        );
        assert!(!nvic.is_active(HARD_FAULT, true));
        assert!(nvic.is_active(SVCALL, true));
    }

    #[test]
    fn check_irq_targeting_and_pris() {
        let mut masks = MaskState::default();
        let mut nvic = nvic_v8();
        nvic.set_enabled(16, false, true);
        nvic.set_priority(16, false, 0x00);
        nvic.pend(16, false, &masks).unwrap();
        assert!(nvic.pending_info(&masks).unwrap().targets_secure);

        nvic.set_target_non_secure(16, true);
        assert!(!nvic.pending_info(&masks).unwrap().targets_secure);

        // PRIS squashes NS priority 0 to 0x80: Secure BASEPRI 0x90 lets
        // it through, 0x80 masks it.
        masks.aircr = Aircr::new(Aircr::PRIS);
        masks.basepri.secure = 0x90;
        assert!(nvic.can_take_pending(&masks));
        masks.basepri.secure = 0x80;
        assert!(!nvic.can_take_pending(&masks));
    }

    #[test]
    fn check_ready_status_and_neg_prio() {
        let mut masks = MaskState::default();
        let mut nvic = nvic_v8();
        assert!(nvic.ready_status(HARD_FAULT, true, &masks));
        assert!(nvic.ready_status(SVCALL, true, &masks));
        assert!(!nvic.ready_status(USAGE_FAULT, true, &masks));

        masks.faultmask.secure = 1;
        assert!(!nvic.ready_status(HARD_FAULT, true, &masks));
        assert!(nvic.neg_prio_requested(true, &masks));
        assert!(!nvic.neg_prio_requested(false, &masks));
    }

    #[test]
    fn check_lazyfp_escalation() {
        let masks = MaskState::default();
        let mut nvic = nvic_v8();
        nvic.set_enabled(USAGE_FAULT, true, true);

        let fpccr_s = Fpccr::new(FPCCR_HFRDY);
        let ready = Fpccr::new(FPCCR_HFRDY | FPCCR_UFRDY);
        assert_eq!(
            nvic.set_pending_lazyfp(USAGE_FAULT, true, &masks, fpccr_s, ready),
            Ok(PendOutcome::Pended)
        );
        assert!(nvic.is_pending(USAGE_FAULT, true));

        assert_eq!(
            nvic.set_pending_lazyfp(USAGE_FAULT, true, &masks, fpccr_s, fpccr_s),
            Ok(PendOutcome::Escalated)
        );
        assert!(nvic.is_pending(HARD_FAULT, true));

        // HardFault can't preempt FAULTMASK and the context wasn't ready.
        let masked = MaskState {
            faultmask: Banked::splat(1),
            ..MaskState::default()
        };
        let not_ready = Fpccr::default();
        assert!(
            nvic.set_pending_lazyfp(USAGE_FAULT, true, &masked, not_ready, not_ready)
                .is_err()
        );
    }

    #[test]
    fn check_bfhfnmins_moves_hardfault() {
        let mut nvic = nvic_v8();
        nvic.apply_aircr(Aircr::new(Aircr::BFHFNMINS));
        assert_eq!(nvic.vector(HARD_FAULT, true).unwrap().prio, -3);
        assert!(nvic.vector(HARD_FAULT, false).unwrap().enabled);

        let masks = MaskState {
            aircr: Aircr::new(Aircr::BFHFNMINS),
            ..MaskState::default()
        };
        nvic.pend(BUS_FAULT, false, &masks).unwrap();
        // Disabled BusFault escalates to the Non-secure HardFault.
        assert!(nvic.is_pending(HARD_FAULT, false));
    }

    #[test]
    fn check_irq_level_latch() {
        let masks = MaskState::default();
        let mut nvic = nvic_v7();
        nvic.set_enabled(17, false, true);
        nvic.set_irq_level(17, true, &masks).unwrap();
        assert!(nvic.is_pending(17, false));
        nvic.acknowledge(&masks).unwrap();
        assert_eq!(
            nvic.complete(17, false, &masks),
            CompletionResult::ReturnedToBase
        );
        // Still held high: pending again.
        assert!(nvic.is_pending(17, false));
    }
}
