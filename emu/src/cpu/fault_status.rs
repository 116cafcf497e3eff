//! # Fault status and system control registers
//!
//! Guest-visible status words populated on every pended fault so a
//! handler can tell what went wrong:
//!
//! - [`Cfsr`]: UsageFault/BusFault/MemManage status, banked (BusFault
//!   bits live in the Non-secure copy)
//! - [`Sfsr`]: SecureFault status
//! - [`Hfsr`]: HardFault status, shared by both HardFault banks
//!
//! plus the [`Ccr`] and [`Aircr`] bits that steer exception handling.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

macro_rules! status_register {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            #[must_use]
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            #[must_use]
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Sets the given status bits, leaving the others alone.
            pub const fn insert(&mut self, bits: u32) {
                self.0 |= bits;
            }

            #[must_use]
            pub const fn contains(self, bits: u32) -> bool {
                self.0 & bits == bits
            }

            /// Write-one-to-clear, like the guest-visible register.
            pub const fn clear(&mut self, bits: u32) {
                self.0 &= !bits;
            }
        }
    };
}

status_register!(
    /// Configurable Fault Status Register.
    Cfsr
);

impl Cfsr {
    // MemManage
    pub const IACCVIOL: u32 = 1 << 0;
    pub const DACCVIOL: u32 = 1 << 1;
    pub const MUNSTKERR: u32 = 1 << 3;
    pub const MSTKERR: u32 = 1 << 4;
    pub const MLSPERR: u32 = 1 << 5;
    pub const MMARVALID: u32 = 1 << 7;
    // BusFault
    pub const IBUSERR: u32 = 1 << 8;
    pub const PRECISERR: u32 = 1 << 9;
    pub const UNSTKERR: u32 = 1 << 11;
    pub const STKERR: u32 = 1 << 12;
    pub const LSPERR: u32 = 1 << 13;
    pub const BFARVALID: u32 = 1 << 15;
    // UsageFault
    pub const UNDEFINSTR: u32 = 1 << 16;
    pub const INVSTATE: u32 = 1 << 17;
    pub const INVPC: u32 = 1 << 18;
    pub const NOCP: u32 = 1 << 19;
    pub const STKOF: u32 = 1 << 20;
    pub const UNALIGNED: u32 = 1 << 24;
    pub const DIVBYZERO: u32 = 1 << 25;
}

status_register!(
    /// Secure Fault Status Register.
    Sfsr
);

impl Sfsr {
    pub const INVEP: u32 = 1 << 0;
    pub const INVIS: u32 = 1 << 1;
    pub const INVER: u32 = 1 << 2;
    pub const AUVIOL: u32 = 1 << 3;
    pub const INVTRAN: u32 = 1 << 4;
    pub const LSPERR: u32 = 1 << 5;
    pub const SFARVALID: u32 = 1 << 6;
    pub const LSERR: u32 = 1 << 7;
}

status_register!(
    /// HardFault Status Register.
    Hfsr
);

impl Hfsr {
    pub const VECTTBL: u32 = 1 << 1;
    pub const FORCED: u32 = 1 << 30;
}

/// Configuration and Control Register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ccr(u32);

impl Ccr {
    pub const NONBASETHRDENA: u32 = 1 << 0;
    pub const STKALIGN: u32 = 1 << 9;
    pub const STKOFHFNMIGN: u32 = 1 << 10;
    pub const TRD: u32 = 1 << 20;

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Thread mode may be entered with exceptions still active (v7-M).
    #[must_use]
    pub fn nonbasethrdena(self) -> bool {
        self.0.get_bit(0)
    }

    /// Exception frames are 8-byte aligned.
    #[must_use]
    pub fn stkalign(self) -> bool {
        self.0.get_bit(9)
    }

    /// Stack limit violations are ignored at negative priority.
    #[must_use]
    pub fn stkofhfnmign(self) -> bool {
        self.0.get_bit(10)
    }

    /// Thread reentrancy disabled: SG checks the Secure stack frame.
    #[must_use]
    pub fn trd(self) -> bool {
        self.0.get_bit(20)
    }
}

/// Application Interrupt and Reset Control Register, the bits the
/// exception model looks at.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aircr(u32);

impl Aircr {
    pub const BFHFNMINS: u32 = 1 << 13;
    pub const PRIS: u32 = 1 << 14;

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value & (Self::BFHFNMINS | Self::PRIS))
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// BusFault, HardFault and NMI target Non-secure state.
    #[must_use]
    pub fn bfhfnmins(self) -> bool {
        self.0.get_bit(13)
    }

    /// Non-secure exceptions are de-prioritized.
    #[must_use]
    pub fn pris(self) -> bool {
        self.0.get_bit(14)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn check_status_insert_clear() {
        let mut cfsr = Cfsr::default();
        cfsr.insert(Cfsr::NOCP);
        cfsr.insert(Cfsr::INVPC);
        assert!(cfsr.contains(Cfsr::NOCP | Cfsr::INVPC));
        assert!(!cfsr.contains(Cfsr::STKOF));

        cfsr.clear(Cfsr::NOCP);
        assert_eq!(cfsr.bits(), Cfsr::INVPC);
    }

    #[test]
    fn check_aircr_masks_unmodelled_bits() {
        let aircr = Aircr::new(0xFFFF_FFFF);
        assert_eq!(aircr.bits(), Aircr::BFHFNMINS | Aircr::PRIS);
        assert!(aircr.bfhfnmins());
        assert!(aircr.pris());
    }

    #[test]
    fn check_ccr() {
        let ccr = Ccr::new(Ccr::STKALIGN | Ccr::TRD);
        assert!(ccr.stkalign());
        assert!(ccr.trd());
        assert!(!ccr.nonbasethrdena());
        assert!(!ccr.stkofhfnmign());
    }
}
