//! # EXC_RETURN payload
//!
//! Written to LR on exception entry and branched to on return.
//!
//! ```text
//!  31          24 23             7   6    5     4     3     2     1    0
//! ┌──────────────┬────────────────┬────┬──────┬─────┬──────┬─────┬────┬────┐
//! │ PREFIX (0xFF)│  RES1          │ S  │ DCRS │FTYPE│ MODE │SPSEL│RES0│ ES │
//! └──────────────┴────────────────┴────┴──────┴─────┴──────┴─────┴────┴────┘
//! ```
//!
//! - **S**: the background context is Secure
//! - **DCRS**: default callee register stacking, 0 means R4-R11 and the
//!   integrity signature were pushed
//! - **FTYPE**: 1 means no FP context in the frame
//! - **MODE**: 1 means return to Thread mode
//! - **ES**: the exception was taken to Secure state

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

pub const EXCRET_ES: u32 = 1 << 0;
pub const EXCRET_RES0: u32 = 1 << 1;
pub const EXCRET_SPSEL: u32 = 1 << 2;
pub const EXCRET_MODE: u32 = 1 << 3;
pub const EXCRET_FTYPE: u32 = 1 << 4;
pub const EXCRET_DCRS: u32 = 1 << 5;
pub const EXCRET_S: u32 = 1 << 6;
pub const EXCRET_RES1: u32 = 0xFFFF_FF80;

/// Branching to an address at or above this value is an exception return.
pub const EXC_RETURN_MIN_MAGIC: u32 = 0xFF00_0000;
/// Branching to an address at or above this value (and below
/// [`EXC_RETURN_MIN_MAGIC`]) is a Secure function return.
pub const FNC_RETURN_MIN_MAGIC: u32 = 0xFEFF_FFFE;
/// LR value written by BLXNS.
pub const FNC_RETURN: u32 = 0xFEFF_FFFF;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcReturn(u32);

impl ExcReturn {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn has_res1(self) -> bool {
        self.0 & EXCRET_RES1 == EXCRET_RES1
    }

    #[must_use]
    pub fn es(self) -> bool {
        self.0.get_bit(0)
    }

    pub fn set_es(&mut self, value: bool) {
        self.0.set_bit(0, value);
    }

    #[must_use]
    pub fn res0(self) -> bool {
        self.0.get_bit(1)
    }

    #[must_use]
    pub fn spsel(self) -> bool {
        self.0.get_bit(2)
    }

    pub fn set_spsel(&mut self, value: bool) {
        self.0.set_bit(2, value);
    }

    /// True when returning to Thread mode.
    #[must_use]
    pub fn mode(self) -> bool {
        self.0.get_bit(3)
    }

    pub fn set_mode(&mut self, value: bool) {
        self.0.set_bit(3, value);
    }

    #[must_use]
    pub fn ftype(self) -> bool {
        self.0.get_bit(4)
    }

    pub fn set_ftype(&mut self, value: bool) {
        self.0.set_bit(4, value);
    }

    #[must_use]
    pub fn dcrs(self) -> bool {
        self.0.get_bit(5)
    }

    pub fn set_dcrs(&mut self, value: bool) {
        self.0.set_bit(5, value);
    }

    #[must_use]
    pub fn s(self) -> bool {
        self.0.get_bit(6)
    }

    pub fn set_s(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    /// Forces the prefix byte back to 0xFF.
    pub fn set_prefix(&mut self) {
        self.0.set_bits(24..=31, 0xFF);
    }

    /// Low nibble, used by the ARMv7-M legality check.
    #[must_use]
    pub fn low_bits(self) -> u32 {
        self.0.get_bits(0..=3)
    }
}

impl From<ExcReturn> for u32 {
    fn from(e: ExcReturn) -> Self {
        e.0
    }
}
