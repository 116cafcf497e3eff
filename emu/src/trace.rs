use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::exception;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Handler entered from a freshly pushed frame.
    Entry,
    /// Handler entered on the frame of the exception that just returned.
    TailChain,
    /// Handler entered after a fault while entering another one.
    Derived,
    Return,
    /// BLXNS into Non-secure code.
    FunctionCall,
    /// FNC_RETURN back into Secure code.
    FunctionReturn,
    /// SG executed from Non-secure state.
    SecureGateway,
    Lockup,
}

/// One mode/security transition, kept in the CPU history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    /// IPSR after the transition.
    pub exception: u32,
    /// Security state after the transition.
    pub secure: bool,
    pub lr: u32,
}

impl Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.secure { "S" } else { "NS" };
        write!(
            f,
            "{:?} -> {} ({}) [{state}] lr=0x{:08X}",
            self.kind,
            exception::name(self.exception),
            self.exception,
            self.lr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn check_display() {
        let t = Transition {
            kind: TransitionKind::Entry,
            exception: 11,
            secure: true,
            lr: 0xFFFF_FFF9,
        };
        assert_eq!(t.to_string(), "Entry -> SVCall (11) [S] lr=0xFFFFFFF9");

        let t = Transition {
            kind: TransitionKind::Return,
            exception: 0,
            secure: false,
            lr: 0,
        };
        assert_eq!(t.to_string(), "Return -> Thread (0) [NS] lr=0x00000000");
    }
}
