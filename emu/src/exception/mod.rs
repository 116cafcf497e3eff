//! # Exception entry, return and tail-chaining
//!
//! The engines are split by phase, each adding an `impl` block to
//! [`CortexM`](crate::cortex_m::CortexM):
//!
//! - [`stacking`]: frame push/pop and the fault taxonomy of stack accesses
//! - [`taken`]: vector fetch and handler entry, as a bounded worklist
//! - [`exit`]: EXC_RETURN validation, unstacking and tail-chaining
//! - [`lazy_fp`]: deferred FP stacking, VLSTM/VLLDM
//! - [`entry`]: classification of CPU exceptions into pended faults
//! - [`secure_call`]: BXNS/BLXNS, FNC_RETURN, SG and TT
//!
//! Guest-visible faults never surface as Rust errors: they are pended in
//! the exception controller and entered like any other exception.
//! [`ExceptionError`] is only for conditions the guest cannot recover
//! from (lockup) or broken collaborator contracts.

use std::fmt::{Display, Formatter};

use crate::bus::AccessFault;

pub mod entry;
pub mod exit;
pub mod lazy_fp;
pub mod secure_call;
pub mod stacking;
pub mod taken;

pub const RESET: u32 = 1;
pub const NMI: u32 = 2;
pub const HARD_FAULT: u32 = 3;
pub const MEM_MANAGE: u32 = 4;
pub const BUS_FAULT: u32 = 5;
pub const USAGE_FAULT: u32 = 6;
pub const SECURE_FAULT: u32 = 7;
pub const SVCALL: u32 = 11;
pub const DEBUG_MONITOR: u32 = 12;
pub const PENDSV: u32 = 14;
pub const SYSTICK: u32 = 15;
pub const FIRST_IRQ: u32 = 16;

/// Exceptions with a separate Secure and Non-secure instance.
#[must_use]
pub const fn is_banked(exc: u32) -> bool {
    matches!(
        exc,
        HARD_FAULT | MEM_MANAGE | USAGE_FAULT | SVCALL | PENDSV | SYSTICK
    )
}

#[must_use]
pub const fn name(exc: u32) -> &'static str {
    match exc {
        0 => "Thread",
        RESET => "Reset",
        NMI => "NMI",
        HARD_FAULT => "HardFault",
        MEM_MANAGE => "MemManage",
        BUS_FAULT => "BusFault",
        USAGE_FAULT => "UsageFault",
        SECURE_FAULT => "SecureFault",
        SVCALL => "SVCall",
        DEBUG_MONITOR => "DebugMonitor",
        PENDSV => "PendSV",
        SYSTICK => "SysTick",
        n if n >= FIRST_IRQ => "IRQ",
        _ => "Reserved",
    }
}

/// Maximum number of derived exceptions handled by one entry request.
///
/// Each derivation either succeeds or escalates towards HardFault, and a
/// HardFault that cannot be taken is a lockup, so real chains stop well
/// before this.
pub const MAX_DERIVATIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionError {
    /// A terminal derived exception or an escalation to HardFault
    /// could not preempt the current execution priority.
    Lockup { exception: u32, priority: i32 },
    /// More than [`MAX_DERIVATIONS`] derived exceptions in one entry.
    DerivationOverflow,
    /// An entry was requested but the controller has nothing pending.
    NoPendingException,
}

impl Display for ExceptionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lockup {
                exception,
                priority,
            } => write!(
                f,
                "lockup: can't take {} ({exception}) at execution priority {priority}",
                name(*exception)
            ),
            Self::DerivationOverflow => write!(
                f,
                "more than {MAX_DERIVATIONS} derived exceptions in a single entry"
            ),
            Self::NoPendingException => write!(f, "exception entry requested with nothing pending"),
        }
    }
}

impl std::error::Error for ExceptionError {}

/// Sub-kind of a prefetch or data abort reported by the memory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// Non-secure code fetched from Secure, Non-secure callable memory.
    NonSecureCallable,
    /// Security attribution violation.
    SecurityViolation,
    /// External abort from the bus.
    External,
    /// Alignment fault reported by generic code.
    Alignment,
    /// MPU permission fault.
    Permission,
}

impl From<AccessFault> for AbortKind {
    fn from(fault: AccessFault) -> Self {
        match fault {
            AccessFault::Security => Self::SecurityViolation,
            AccessFault::Permission => Self::Permission,
            AccessFault::Bus => Self::External,
        }
    }
}

/// Exceptions raised synchronously by instruction execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuException {
    Undefined,
    /// Coprocessor access denied. `target_secure` is set when the denial
    /// came from NSACR and must be reported to Secure state.
    NoCoprocessor { target_secure: bool },
    InvalidState,
    StackOverflow,
    /// Lazy FP state error.
    LazyStateError,
    Unaligned,
    DivideByZero,
    SupervisorCall,
    PrefetchAbort { address: u32, kind: AbortKind },
    DataAbort { address: u32, kind: AbortKind },
    Breakpoint,
    /// An interrupt became pending; nothing to classify.
    Interrupt,
    /// The fault was already pended by lazy FP preservation.
    LazyFp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn check_banked_exceptions() {
        let banked: Vec<u32> = (1..FIRST_IRQ).filter(|exc| is_banked(*exc)).collect();
        assert_eq!(
            banked,
            vec![HARD_FAULT, MEM_MANAGE, USAGE_FAULT, SVCALL, PENDSV, SYSTICK]
        );
        assert!(!is_banked(FIRST_IRQ));
    }

    #[test]
    fn check_error_display() {
        let err = ExceptionError::Lockup {
            exception: HARD_FAULT,
            priority: -1,
        };
        assert_eq!(
            err.to_string(),
            "lockup: can't take HardFault (3) at execution priority -1"
        );
        assert_eq!(name(40), "IRQ");
    }
}
