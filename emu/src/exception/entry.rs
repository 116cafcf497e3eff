//! Classification of CPU exceptions into pended faults, and exception
//! entry from a running context.

use tracing::debug;

use crate::bus::MemoryBus;
use crate::cortex_m::CortexM;
use crate::cpu::cpu_modes::SecurityState;
use crate::cpu::excret::{EXCRET_DCRS, EXCRET_ES, EXCRET_RES1, EXCRET_S, ExcReturn};
use crate::cpu::fault_status::{Cfsr, Sfsr};
use crate::exception::{
    AbortKind, BUS_FAULT, CpuException, DEBUG_MONITOR, ExceptionError, MEM_MANAGE, SECURE_FAULT,
    SVCALL, USAGE_FAULT,
};
use crate::nvic::ExceptionController;

impl<B: MemoryBus, N: ExceptionController> CortexM<B, N> {
    /// EXC_RETURN for an exception taken from the current context.
    pub(crate) fn entry_exc_return(&self) -> ExcReturn {
        let mut lr = if self.state.features.is_v8() {
            let mut lr = ExcReturn::new(EXCRET_RES1 | EXCRET_DCRS);
            lr.set_s(self.state.secure());
            lr
        } else {
            let mut lr = ExcReturn::new(EXCRET_RES1 | EXCRET_S | EXCRET_DCRS | EXCRET_ES);
            lr.set_spsel(self.state.banks.non_secure.control.spsel());
            lr
        };

        lr.set_ftype(!self.state.fp_owner().control.fpca());
        lr.set_mode(!self.state.is_handler_mode());
        lr
    }

    /// An asynchronous exception became pending. Fails with
    /// [`ExceptionError::NoPendingException`], leaving the state alone,
    /// when nothing pending can preempt the current priority.
    pub fn on_exception_entry_request(&mut self) -> Result<(), ExceptionError> {
        self.check_locked_up()?;

        let eligible = self.with_nvic(|nvic, masks| {
            nvic.pending_info(masks).is_some() && nvic.can_take_pending(masks)
        });
        if !eligible {
            return Err(ExceptionError::NoPendingException);
        }

        self.raise(CpuException::Interrupt)
    }

    /// Reports a synchronous exception: records the fault status, pends
    /// the exception it maps to and enters whatever is now the highest
    /// priority pending exception.
    pub fn raise(&mut self, exception: CpuException) -> Result<(), ExceptionError> {
        self.check_locked_up()?;
        debug!("raise {exception:?} at 0x{:08X}", self.state.registers.program_counter());

        if self.pend_cpu_exception(exception)? {
            self.enter_exception()
        } else {
            Ok(())
        }
    }

    /// Stacks the current context and enters the pending exception.
    pub(crate) fn enter_exception(&mut self) -> Result<(), ExceptionError> {
        let lr = self.entry_exc_return();
        let ignore_stack_faults = self.push_stack()?;
        self.take_exception(lr, false, ignore_stack_faults)
    }

    /// `Ok(false)` when the exception was fully handled and nothing has
    /// to be entered.
    fn pend_cpu_exception(&mut self, exception: CpuException) -> Result<bool, ExceptionError> {
        let cur = self.state.security;

        match exception {
            CpuException::Undefined => self.pend_usage(Cfsr::UNDEFINSTR, cur)?,
            CpuException::NoCoprocessor { target_secure } => {
                let target = if target_secure {
                    SecurityState::Secure
                } else {
                    cur
                };
                self.pend_usage(Cfsr::NOCP, target)?;
            }
            CpuException::InvalidState => self.pend_usage(Cfsr::INVSTATE, cur)?,
            CpuException::StackOverflow => self.pend_usage(Cfsr::STKOF, cur)?,
            CpuException::Unaligned => self.pend_usage(Cfsr::UNALIGNED, cur)?,
            CpuException::DivideByZero => self.pend_usage(Cfsr::DIVBYZERO, cur)?,
            CpuException::LazyStateError => {
                self.state.sfsr.insert(Sfsr::LSERR);
                self.pend(SECURE_FAULT, false)?;
            }
            CpuException::SupervisorCall => self.pend(SVCALL, cur.is_secure())?,
            CpuException::PrefetchAbort { address, kind } => {
                return self.pend_abort(address, kind, true);
            }
            CpuException::DataAbort { address, kind } => {
                return self.pend_abort(address, kind, false);
            }
            CpuException::Breakpoint => self.pend(DEBUG_MONITOR, false)?,
            // Already pended by the interrupt source or the lazy FP code.
            CpuException::Interrupt | CpuException::LazyFp => {}
        }

        Ok(true)
    }

    fn pend_usage(&mut self, bits: u32, target: SecurityState) -> Result<(), ExceptionError> {
        self.state.banks[target].cfsr.insert(bits);
        self.pend(USAGE_FAULT, target.is_secure())
    }

    fn pend_abort(
        &mut self,
        address: u32,
        kind: AbortKind,
        prefetch: bool,
    ) -> Result<bool, ExceptionError> {
        let cur = self.state.security;

        match kind {
            AbortKind::NonSecureCallable if prefetch => {
                // A real SG instruction is executed in place of the fault.
                return Ok(!self.execute_secure_gateway()?);
            }
            AbortKind::NonSecureCallable | AbortKind::SecurityViolation => {
                let bit = if !prefetch {
                    Sfsr::AUVIOL
                } else if cur.is_secure() {
                    Sfsr::INVTRAN
                } else {
                    Sfsr::INVEP
                };
                self.state.sfsr.insert(bit);
                self.pend(SECURE_FAULT, false)?;
            }
            AbortKind::External => {
                let cfsr = &mut self.state.banks.non_secure.cfsr;
                if prefetch {
                    cfsr.insert(Cfsr::IBUSERR);
                } else {
                    cfsr.insert(Cfsr::PRECISERR | Cfsr::BFARVALID);
                    self.state.bfar = address;
                }
                self.pend(BUS_FAULT, false)?;
            }
            AbortKind::Alignment => self.pend_usage(Cfsr::UNALIGNED, cur)?,
            AbortKind::Permission => {
                if prefetch {
                    self.state.banks[cur].cfsr.insert(Cfsr::IACCVIOL);
                } else {
                    let bank = &mut self.state.banks[cur];
                    bank.cfsr.insert(Cfsr::DACCVIOL | Cfsr::MMARVALID);
                    bank.mmfar = address;
                }
                self.pend(MEM_MANAGE, cur.is_secure())?;
            }
        }

        Ok(true)
    }
}
