//! # Program Status Register (xPSR)
//!
//! The M-profile xPSR is the union of three views:
//!
//! ```text
//! 31 30 29 28 27 26 25 24 23  20 19  16 15     10 9  8          0
//! ┌──┬──┬──┬──┬──┬─────┬──┬──────┬──────┬─────────┬──┬────────────┐
//! │N │Z │C │V │Q │IT1:0│T │ res  │GE3:0 │ IT7:2   │SR│  EXCP      │
//! └──┴──┴──┴──┴──┴─────┴──┴──────┴──────┴─────────┴──┴────────────┘
//!  └──── APSR ────┘└─ EPSR ─┘                       └─── IPSR ───┘
//! ```
//!
//! - **APSR**: condition flags, sticky saturation and the DSP `GE` bits
//! - **EPSR**: Thumb bit and If-Then state, reads as zero through MRS
//! - **IPSR**: active exception number, owned by
//!   [`ProcessorState`](super::state::ProcessorState) because writing it
//!   can swap stack pointers
//!
//! Bit 9 (`SPREALIGN`) and bit 20 (`SFPA`) only exist in stacked copies.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

pub const XPSR_EXCP: u32 = 0x1FF;
pub const XPSR_SPREALIGN: u32 = 1 << 9;
pub const XPSR_IT_2_7: u32 = 0xFC00;
pub const XPSR_GE: u32 = 0xF << 16;
pub const XPSR_SFPA: u32 = 1 << 20;
pub const XPSR_T: u32 = 1 << 24;
pub const XPSR_IT_0_1: u32 = 3 << 25;
pub const XPSR_Q: u32 = 1 << 27;
pub const XPSR_NZCV: u32 = 0xF << 28;
pub const XPSR_IT: u32 = XPSR_IT_0_1 | XPSR_IT_2_7;

/// APSR and EPSR bits of the live xPSR.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xpsr(u32);

impl Xpsr {
    const STORED: u32 = XPSR_NZCV | XPSR_Q | XPSR_GE | XPSR_T | XPSR_IT;

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value & Self::STORED)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Updates the fields selected by `mask`. IPSR bits in `mask` are
    /// ignored here; the caller handles them.
    pub const fn write(&mut self, value: u32, mask: u32) {
        let mask = mask & Self::STORED;
        self.0 = (self.0 & !mask) | (value & mask);
    }

    /// N => Bit 31
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// Q => Bit 27
    #[must_use]
    pub fn sticky_overflow(self) -> bool {
        self.0.get_bit(27)
    }

    /// T => Bit 24, always 1 for code that can run on an M-profile core.
    #[must_use]
    pub fn thumb(self) -> bool {
        self.0.get_bit(24)
    }

    pub fn set_thumb(&mut self, value: bool) {
        self.0.set_bit(24, value);
    }

    #[must_use]
    pub fn ge(self) -> u32 {
        self.0.get_bits(16..=19)
    }

    /// ITSTATE reassembled from its two halves.
    #[must_use]
    pub fn it_state(self) -> u32 {
        (self.0.get_bits(10..=15) << 2) | self.0.get_bits(25..=26)
    }

    pub fn clear_it(&mut self) {
        self.0 &= !XPSR_IT;
    }
}
