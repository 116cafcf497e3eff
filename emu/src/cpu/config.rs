//! # Core configuration
//!
//! Which optional parts of the M-profile architecture a core implements.
//! Everything that only exists with the Security Extension or with an FPU
//! is gated on [`CpuFeatures::security`] and [`CpuFeatures::fpu`] being
//! `Some`, so code paths that need them can't forget the check.

use serde::{Deserialize, Serialize};

/// Architecture revision of the M-profile core.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Arch {
    /// ARMv7-M (Cortex-M3/M4/M7).
    V7M,
    /// ARMv8.0-M (Cortex-M23/M33).
    #[default]
    V8M,
    /// ARMv8.1-M (Cortex-M55/M85).
    V8_1M,
}

/// Presence of the Security Extension (TrustZone for ARMv8-M).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityExtension {
    /// Reset value of `VTOR_S`.
    pub init_svtor: u32,
}

/// Presence of the floating-point unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fpu {
    /// M-profile Vector Extension; adds the VPR slot to FP frames.
    pub mve: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuFeatures {
    pub arch: Arch,
    /// Main Extension: BASEPRI, FAULTMASK, CONTROL.nPRIV.
    pub main_extension: bool,
    /// DSP extension: APSR.GE bits are implemented.
    pub thumb_dsp: bool,
    pub security: Option<SecurityExtension>,
    pub fpu: Option<Fpu>,
    /// Reset value of `VTOR_NS` (or the only VTOR without security).
    pub init_nsvtor: u32,
}

impl Default for CpuFeatures {
    fn default() -> Self {
        Self::cortex_m33()
    }
}

impl CpuFeatures {
    #[must_use]
    pub const fn cortex_m3() -> Self {
        Self {
            arch: Arch::V7M,
            main_extension: true,
            thumb_dsp: false,
            security: None,
            fpu: None,
            init_nsvtor: 0,
        }
    }

    #[must_use]
    pub const fn cortex_m4() -> Self {
        Self {
            arch: Arch::V7M,
            main_extension: true,
            thumb_dsp: true,
            security: None,
            fpu: Some(Fpu { mve: false }),
            init_nsvtor: 0,
        }
    }

    #[must_use]
    pub const fn cortex_m23() -> Self {
        Self {
            arch: Arch::V8M,
            main_extension: false,
            thumb_dsp: false,
            security: Some(SecurityExtension { init_svtor: 0 }),
            fpu: None,
            init_nsvtor: 0,
        }
    }

    #[must_use]
    pub const fn cortex_m33() -> Self {
        Self {
            arch: Arch::V8M,
            main_extension: true,
            thumb_dsp: true,
            security: Some(SecurityExtension { init_svtor: 0 }),
            fpu: Some(Fpu { mve: false }),
            init_nsvtor: 0,
        }
    }

    #[must_use]
    pub const fn cortex_m55() -> Self {
        Self {
            arch: Arch::V8_1M,
            main_extension: true,
            thumb_dsp: true,
            security: Some(SecurityExtension { init_svtor: 0 }),
            fpu: Some(Fpu { mve: true }),
            init_nsvtor: 0,
        }
    }

    #[must_use]
    pub fn is_v8(&self) -> bool {
        self.arch >= Arch::V8M
    }

    #[must_use]
    pub fn is_v8_1(&self) -> bool {
        self.arch >= Arch::V8_1M
    }

    #[must_use]
    pub const fn has_security(&self) -> bool {
        self.security.is_some()
    }

    #[must_use]
    pub const fn has_fpu(&self) -> bool {
        self.fpu.is_some()
    }

    #[must_use]
    pub const fn has_mve(&self) -> bool {
        matches!(self.fpu, Some(Fpu { mve: true }))
    }

    /// v8.1-M with the Security Extension checks the Secure stack
    /// frame when an SG instruction is executed from Thread mode.
    #[must_use]
    pub fn has_sec_state_check(&self) -> bool {
        self.is_v8_1() && self.has_security()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn check_presets() {
        let m3 = CpuFeatures::cortex_m3();
        assert!(!m3.is_v8());
        assert!(!m3.has_security());
        assert!(!m3.has_fpu());

        let m33 = CpuFeatures::cortex_m33();
        assert!(m33.is_v8());
        assert!(!m33.is_v8_1());
        assert!(m33.has_security());
        assert!(m33.has_fpu());
        assert!(!m33.has_mve());

        let m55 = CpuFeatures::cortex_m55();
        assert!(m55.is_v8_1());
        assert!(m55.has_mve());
        assert!(m55.has_sec_state_check());
    }

    #[test]
    fn check_arch_ordering() {
        assert!(Arch::V7M < Arch::V8M);
        assert!(Arch::V8M < Arch::V8_1M);
        assert_eq!(Arch::default(), Arch::V8M);
    }
}
