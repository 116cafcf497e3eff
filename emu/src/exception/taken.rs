//! # Taking the pending exception
//!
//! Once the frame is on the stack (or, on a tail-chain, left where it
//! is) the highest priority pending exception is entered: EXC_RETURN is
//! finalized, the callee registers are pushed or scrubbed when crossing
//! from Secure to Non-secure, the vector is fetched and the exception is
//! acknowledged.
//!
//! A fault while doing so pends a derived exception, which is taken in
//! turn on the same frame. Rather than recursing, entry runs as a loop
//! over at most [`MAX_DERIVATIONS`] attempts.

use tracing::debug;

use crate::bus::{AccessType, MemoryBus};
use crate::cortex_m::CortexM;
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::excret::ExcReturn;
use crate::cpu::fault_status::Hfsr;
use crate::cpu::psr::{XPSR_GE, XPSR_IT, XPSR_NZCV, XPSR_Q};
use crate::exception::{ExceptionError, HARD_FAULT, MAX_DERIVATIONS, name};
use crate::nvic::{ExceptionController, PendingException};
use crate::trace::TransitionKind;

enum Attempt {
    Taken,
    /// A derived exception is pending; take it on the same frame with
    /// this EXC_RETURN.
    Derived(ExcReturn),
}

/// Why a vector could not be fetched.
enum VectorFault {
    /// The table is Secure but the exception targets Non-secure state.
    Security,
    Bus,
}

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    /// Enters the highest priority pending exception. `lr` is the
    /// EXC_RETURN describing the frame already on the stack.
    pub fn take_exception(
        &mut self,
        lr: ExcReturn,
        tail_chain: bool,
        ignore_stack_faults: bool,
    ) -> Result<(), ExceptionError> {
        let mut lr = lr;
        let mut tail_chain = tail_chain;
        let mut ignore = ignore_stack_faults;

        for derivation in 0..=MAX_DERIVATIONS {
            match self.attempt_entry(lr, tail_chain, ignore)? {
                Attempt::Taken => {
                    let kind = if derivation > 0 {
                        TransitionKind::Derived
                    } else if tail_chain {
                        TransitionKind::TailChain
                    } else {
                        TransitionKind::Entry
                    };
                    self.record(kind);
                    return Ok(());
                }
                Attempt::Derived(next) => {
                    debug!("derived exception on entry, retrying");
                    lr = next;
                    tail_chain = true;
                    ignore = true;
                }
            }
        }

        Err(ExceptionError::DerivationOverflow)
    }

    fn attempt_entry(
        &mut self,
        mut lr: ExcReturn,
        tail_chain: bool,
        ignore: bool,
    ) -> Result<Attempt, ExceptionError> {
        let features = self.state.features;
        let PendingException {
            number: exc,
            targets_secure,
        } = self
            .with_nvic(|nvic, masks| nvic.pending_info(masks))
            .ok_or(ExceptionError::NoPendingException)?;

        if tail_chain {
            if !features.has_fpu() {
                lr.set_ftype(true);
            }
            lr.set_prefix();
        }

        let mut push_failed = false;

        if features.is_v8() {
            if features.has_security() && lr.s() {
                if targets_secure {
                    // Secure to Secure: the callee registers stay live
                    // unless they were already stacked.
                    if tail_chain && !lr.es() {
                        lr.set_dcrs(false);
                    }
                } else {
                    if lr.dcrs() && !(tail_chain && !lr.es()) {
                        push_failed = self.push_callee_stack(lr, tail_chain, ignore)?;
                    }
                    lr.set_dcrs(true);
                }
            }

            lr.set_es(targets_secure);
            lr.set_spsel(
                self.state.banks[SecurityState::from(targets_secure)]
                    .control
                    .spsel(),
            );

            if features.has_security() && (!targets_secure || features.is_v8_1()) {
                let callee_saves = !targets_secure && lr.s();
                self.state.registers.scrub(callee_saves);
                self.state
                    .xpsr
                    .write(0, XPSR_NZCV | XPSR_Q | XPSR_GE | XPSR_IT);
            }
        }

        if push_failed && !ignore {
            debug!("derived exception on callee-saves register stacking");
            return Ok(Attempt::Derived(lr));
        }

        let Some(vector) = self.load_vector(exc, targets_secure)? else {
            debug!("derived exception on vector table load");
            return Ok(Attempt::Derived(lr));
        };

        let acked = self.with_nvic(|nvic, masks| nvic.acknowledge(masks))?;
        debug!(
            "taking exception {} ({}) targeting {}",
            name(acked.number),
            acked.number,
            SecurityState::from(targets_secure)
        );

        self.state.write_exception(acked.number);
        self.state
            .switch_security_state(SecurityState::from(targets_secure));
        self.state.write_control_spsel(false);
        self.state.clear_exclusive();

        let control = &mut self.state.fp_owner_mut().control;
        control.set_fpca(false);
        control.set_sfpa(false);

        self.state.xpsr.clear_it();
        self.state.registers.set_link_register(lr.bits());
        self.state.registers.set_program_counter(vector & !1);
        self.state.xpsr.set_thumb(vector & 1 != 0);

        Ok(Attempt::Taken)
    }

    /// Fetches the handler address. On failure a HardFault is pended and
    /// `Ok(None)` returned.
    pub(crate) fn load_vector(
        &mut self,
        exc: u32,
        targets_secure: bool,
    ) -> Result<Option<u32>, ExceptionError> {
        let secstate = SecurityState::from(targets_secure);
        let addr = self.state.banks[secstate].vtor.wrapping_add(exc * 4);
        debug!("loading vector {exc} from {secstate} table at 0x{addr:08X}");

        let bfhfnmins = self.state.aircr.bfhfnmins();
        let exc_secure = match self.fetch_vector(addr, targets_secure) {
            Ok(vector) => {
                debug!("loaded handler address 0x{vector:08X}");
                return Ok(Some(vector));
            }
            Err(VectorFault::Security) => true,
            Err(VectorFault::Bus) => !bfhfnmins,
        };

        debug!("vector table fetch failed at 0x{addr:08X}");
        self.state.hfsr.insert(Hfsr::VECTTBL);
        if !self.state.features.is_v8_1() {
            self.state.hfsr.insert(Hfsr::FORCED);
        }
        self.pend_derived(HARD_FAULT, exc_secure)?;
        Ok(None)
    }

    fn fetch_vector(&mut self, addr: u32, targets_secure: bool) -> Result<u32, VectorFault> {
        let mut attrs_secure = targets_secure;

        if self.state.features.has_security() {
            let sattrs = self.bus.classify(addr, targets_secure, AccessType::Read);
            if sattrs.ns {
                attrs_secure = false;
            } else if !targets_secure {
                // Non-secure vectors must not come from Secure memory.
                return Err(VectorFault::Security);
            }
        }

        self.bus
            .load_word_physical(addr, attrs_secure)
            .map_err(|_| VectorFault::Bus)
    }
}
