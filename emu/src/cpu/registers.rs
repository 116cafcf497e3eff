//! # Core register file
//!
//! The 16 general-purpose registers visible at any time.
//!
//! - **R0-R3, R12**: caller-saved, part of every exception frame
//! - **R4-R11**: callee-saved, stacked separately when leaving Secure state
//! - **R13 (SP)**: the *live* stack pointer; the other ones are parked in
//!   [`ProcessorState`](super::state::ProcessorState)
//! - **R14 (LR)**: link register, holds `EXC_RETURN` inside handlers
//! - **R15 (PC)**: program counter

use serde::{Deserialize, Serialize};

/// Stack Pointer register index.
pub const REG_SP: usize = 0xD;

/// Link Register index.
pub const REG_LR: usize = 0xE;

/// Program Counter register index.
pub const REG_PC: usize = 0xF;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn new(values: [u32; 16]) -> Self {
        Self(values)
    }

    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[REG_PC]
    }

    pub const fn set_program_counter(&mut self, new_value: u32) {
        self.0[REG_PC] = new_value;
    }

    #[must_use]
    pub const fn stack_pointer(&self) -> u32 {
        self.0[REG_SP]
    }

    pub const fn set_stack_pointer(&mut self, new_value: u32) {
        self.0[REG_SP] = new_value;
    }

    #[must_use]
    pub const fn link_register(&self) -> u32 {
        self.0[REG_LR]
    }

    pub const fn set_link_register(&mut self, new_value: u32) {
        self.0[REG_LR] = new_value;
    }

    pub fn set_register_at(&mut self, reg: usize, new_value: u32) {
        assert!(reg <= 15, "Invalid register index: {reg} (0x{reg:X})");
        self.0[reg] = new_value;
    }

    #[must_use]
    pub const fn register_at(&self, reg: usize) -> u32 {
        self.0[reg]
    }

    /// Zeroes the caller-saved registers (R0-R3, R12) and, when
    /// `callee_saves` is set, R4-R11 as well.
    pub fn scrub(&mut self, callee_saves: bool) {
        for (i, reg) in self.0.iter_mut().take(13).enumerate() {
            if !(4..=11).contains(&i) || callee_saves {
                *reg = 0;
            }
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.0.as_slice().to_vec()
    }
}
