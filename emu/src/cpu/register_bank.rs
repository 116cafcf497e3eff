//! # Banked system registers
//!
//! One [`RegisterBank`] exists per security state. Code always picks the
//! bank through [`Banked`](super::cpu_modes::Banked) with the security
//! state it cares about, which is not necessarily the current one: an
//! exception return to Non-secure state writes `CONTROL_NS.SPSEL` while
//! the core is still Secure.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::control::Control;
use crate::cpu::fault_status::{Ccr, Cfsr};
use crate::cpu::fpccr::Fpccr;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBank {
    pub control: Control,
    /// 1 bit: boosts execution priority to 0.
    pub primask: u32,
    /// 8 bits: 0 disables the mask.
    pub basepri: u32,
    /// 1 bit: boosts execution priority to -1.
    pub faultmask: u32,
    /// Main stack limit, 8-byte aligned.
    pub msplim: u32,
    /// Process stack limit, 8-byte aligned.
    pub psplim: u32,
    pub fpccr: Fpccr,
    /// Address of the unpopulated FP area of a lazily stacked frame.
    pub fpcar: u32,
    pub cpacr: u32,
    pub ccr: Ccr,
    /// Vector table base.
    pub vtor: u32,
    pub cfsr: Cfsr,
    pub mmfar: u32,
}

impl RegisterBank {
    /// CPACR.CP10 allows an access at the given privilege.
    #[must_use]
    pub fn cpacr_pass(&self, privileged: bool) -> bool {
        match self.cpacr.get_bits(20..=21) {
            1 => privileged,
            3 => true,
            // 0b10 is UNPREDICTABLE and treated as "denied".
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_cp10(bits: u32) -> RegisterBank {
        RegisterBank {
            cpacr: bits << 20,
            ..RegisterBank::default()
        }
    }

    #[test]
    fn check_cpacr_pass() {
        assert!(!with_cp10(0b00).cpacr_pass(true));
        assert!(!with_cp10(0b10).cpacr_pass(true));
        assert!(with_cp10(0b01).cpacr_pass(true));
        assert!(!with_cp10(0b01).cpacr_pass(false));
        assert!(with_cp10(0b11).cpacr_pass(false));
    }
}
