//! # CONTROL register
//!
//! ```text
//!  31            4   3      2      1      0
//! ┌───────────────┬──────┬──────┬───────┬───────┐
//! │   reserved    │ SFPA │ FPCA │ SPSEL │ nPRIV │
//! └───────────────┴──────┴──────┴───────┴───────┘
//! ```
//!
//! `nPRIV` and `SPSEL` are banked. `FPCA` and `SFPA` are not: they only
//! live in the Secure copy (or the single copy without security).

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

pub const CONTROL_NPRIV: u32 = 1 << 0;
pub const CONTROL_SPSEL: u32 = 1 << 1;
pub const CONTROL_FPCA: u32 = 1 << 2;
pub const CONTROL_SFPA: u32 = 1 << 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control(u32);

impl Control {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value & 0xF)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Thread mode runs unprivileged.
    #[must_use]
    pub fn npriv(self) -> bool {
        self.0.get_bit(0)
    }

    pub fn set_npriv(&mut self, value: bool) {
        self.0.set_bit(0, value);
    }

    /// Thread mode uses the process stack pointer.
    #[must_use]
    pub fn spsel(self) -> bool {
        self.0.get_bit(1)
    }

    pub(crate) fn set_spsel_raw(&mut self, value: bool) {
        self.0.set_bit(1, value);
    }

    /// FP context active.
    #[must_use]
    pub fn fpca(self) -> bool {
        self.0.get_bit(2)
    }

    pub fn set_fpca(&mut self, value: bool) {
        self.0.set_bit(2, value);
    }

    /// Secure FP state active.
    #[must_use]
    pub fn sfpa(self) -> bool {
        self.0.get_bit(3)
    }

    pub fn set_sfpa(&mut self, value: bool) {
        self.0.set_bit(3, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn check_fields() {
        let mut control = Control::new(0xFFFF_FFFF);
        assert_eq!(control.bits(), 0xF);
        assert!(control.npriv() && control.spsel() && control.fpca() && control.sfpa());

        control.set_fpca(false);
        control.set_sfpa(false);
        assert_eq!(control.bits(), CONTROL_NPRIV | CONTROL_SPSEL);
    }
}
