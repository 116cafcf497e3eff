//! # Security states and processor modes
//!
//! ```text
//!                ┌─────────── Secure ───────────┬───────── Non-secure ─────────┐
//!  Handler mode  │ MSP_S                        │ MSP_NS                       │
//!  Thread mode   │ MSP_S / PSP_S (SPSEL_S)      │ MSP_NS / PSP_NS (SPSEL_NS)   │
//!                └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Most system registers exist once per security state. [`Banked`] holds
//! both copies and is indexed with a [`SecurityState`].

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityState {
    #[default]
    NonSecure = 0,
    Secure = 1,
}

impl SecurityState {
    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Secure)
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::NonSecure => Self::Secure,
            Self::Secure => Self::NonSecure,
        }
    }
}

impl From<bool> for SecurityState {
    fn from(secure: bool) -> Self {
        if secure { Self::Secure } else { Self::NonSecure }
    }
}

impl From<SecurityState> for bool {
    fn from(s: SecurityState) -> Self {
        s.is_secure()
    }
}

impl std::fmt::Display for SecurityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonSecure => write!(f, "non-secure"),
            Self::Secure => write!(f, "secure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorMode {
    /// Application code; may run on either stack pointer.
    Thread,
    /// Exception handlers; always on the main stack pointer.
    Handler,
}

impl ProcessorMode {
    /// Handler mode is in effect iff IPSR is non-zero.
    #[must_use]
    pub const fn from_ipsr(exception: u32) -> Self {
        if exception == 0 {
            Self::Thread
        } else {
            Self::Handler
        }
    }
}

/// A register that has one copy per security state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banked<T> {
    pub non_secure: T,
    pub secure: T,
}

impl<T: Copy> Banked<T> {
    pub const fn splat(value: T) -> Self {
        Self {
            non_secure: value,
            secure: value,
        }
    }
}

impl<T> Index<SecurityState> for Banked<T> {
    type Output = T;

    fn index(&self, s: SecurityState) -> &Self::Output {
        match s {
            SecurityState::NonSecure => &self.non_secure,
            SecurityState::Secure => &self.secure,
        }
    }
}

impl<T> IndexMut<SecurityState> for Banked<T> {
    fn index_mut(&mut self, s: SecurityState) -> &mut Self::Output {
        match s {
            SecurityState::NonSecure => &mut self.non_secure,
            SecurityState::Secure => &mut self.secure,
        }
    }
}
