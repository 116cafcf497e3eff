//! # Floating-point context control (FPCCR)
//!
//! Records where a lazily preserved FP context lives and in which context
//! it was created, so the deferred push can happen with the right
//! permissions later on.
//!
//! | bits  | fields                                                       |
//! |-------|--------------------------------------------------------------|
//! | 0-3   | LSPACT, USER, S, THREAD                                      |
//! | 4-8   | HFRDY, MMRDY, BFRDY, SFRDY, MONRDY                           |
//! | 9-10  | SPLIMVIOL, UFRDY                                             |
//! | 26-31 | TS, CLRONRETS, CLRONRET, LSPENS, LSPEN, ASPEN                |
//!
//! With the Security Extension LSPACT, USER, THREAD, MMRDY, UFRDY and
//! SPLIMVIOL are banked. S, HFRDY, BFRDY, SFRDY, MONRDY, TS, CLRONRET and
//! LSPEN are only meaningful in the Secure copy.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

pub const FPCCR_LSPACT: u32 = 1 << 0;
pub const FPCCR_USER: u32 = 1 << 1;
pub const FPCCR_S: u32 = 1 << 2;
pub const FPCCR_THREAD: u32 = 1 << 3;
pub const FPCCR_HFRDY: u32 = 1 << 4;
pub const FPCCR_MMRDY: u32 = 1 << 5;
pub const FPCCR_BFRDY: u32 = 1 << 6;
pub const FPCCR_SFRDY: u32 = 1 << 7;
pub const FPCCR_MONRDY: u32 = 1 << 8;
pub const FPCCR_SPLIMVIOL: u32 = 1 << 9;
pub const FPCCR_UFRDY: u32 = 1 << 10;
pub const FPCCR_TS: u32 = 1 << 26;
pub const FPCCR_CLRONRETS: u32 = 1 << 27;
pub const FPCCR_CLRONRET: u32 = 1 << 28;
pub const FPCCR_LSPENS: u32 = 1 << 29;
pub const FPCCR_LSPEN: u32 = 1 << 30;
pub const FPCCR_ASPEN: u32 = 1 << 31;

macro_rules! fpccr_flag {
    ($get:ident, $set:ident, $bit:expr) => {
        #[must_use]
        pub fn $get(self) -> bool {
            self.0.get_bit($bit)
        }

        pub fn $set(&mut self, value: bool) {
            self.0.set_bit($bit, value);
        }
    };
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fpccr(u32);

impl Fpccr {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    fpccr_flag!(lspact, set_lspact, 0);
    fpccr_flag!(user, set_user, 1);
    fpccr_flag!(s, set_s, 2);
    fpccr_flag!(thread, set_thread, 3);
    fpccr_flag!(hfrdy, set_hfrdy, 4);
    fpccr_flag!(mmrdy, set_mmrdy, 5);
    fpccr_flag!(bfrdy, set_bfrdy, 6);
    fpccr_flag!(sfrdy, set_sfrdy, 7);
    fpccr_flag!(monrdy, set_monrdy, 8);
    fpccr_flag!(splimviol, set_splimviol, 9);
    fpccr_flag!(ufrdy, set_ufrdy, 10);
    fpccr_flag!(ts, set_ts, 26);
    fpccr_flag!(clronret, set_clronret, 28);
    fpccr_flag!(lspen, set_lspen, 30);
    fpccr_flag!(aspen, set_aspen, 31);
}
