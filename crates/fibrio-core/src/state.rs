//! Fiber state machine

use core::fmt;

/// State of a fiber
///
/// Legal transitions:
///
/// ```text
/// Init ──► Exec ──► Hold ──┐
///           ▲  └──► Ready ─┤
///           └──────────────┘
///          Exec ──► Term | Except
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FiberState {
    /// Created, stack allocated, never run
    Init = 0,

    /// Suspended; only runs again after an explicit reschedule
    Hold = 1,

    /// Currently executing on some thread
    Exec = 2,

    /// Entry function returned
    Term = 3,

    /// Suspended but immediately re-schedulable
    Ready = 4,

    /// Entry function panicked
    Except = 5,
}

impl FiberState {
    /// Finished, either normally or through a panic
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, FiberState::Term | FiberState::Except)
    }

    /// States from which `resume()` is allowed
    #[inline]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, FiberState::Init | FiberState::Hold | FiberState::Ready)
    }

    /// States from which `reset()` is allowed
    #[inline]
    pub const fn is_resettable(&self) -> bool {
        matches!(self, FiberState::Init | FiberState::Term | FiberState::Except)
    }
}

impl From<u8> for FiberState {
    fn from(v: u8) -> Self {
        match v {
            0 => FiberState::Init,
            1 => FiberState::Hold,
            2 => FiberState::Exec,
            3 => FiberState::Term,
            4 => FiberState::Ready,
            _ => FiberState::Except,
        }
    }
}

impl From<FiberState> for u8 {
    fn from(state: FiberState) -> u8 {
        state as u8
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FiberState::Init => "INIT",
            FiberState::Hold => "HOLD",
            FiberState::Exec => "EXEC",
            FiberState::Term => "TERM",
            FiberState::Ready => "READY",
            FiberState::Except => "EXCEPT",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(FiberState::Term.is_terminal());
        assert!(FiberState::Except.is_terminal());
        assert!(!FiberState::Hold.is_terminal());

        assert!(FiberState::Init.is_resumable());
        assert!(FiberState::Hold.is_resumable());
        assert!(FiberState::Ready.is_resumable());
        assert!(!FiberState::Exec.is_resumable());
        assert!(!FiberState::Term.is_resumable());

        assert!(FiberState::Except.is_resettable());
        assert!(!FiberState::Hold.is_resettable());
    }

    #[test]
    fn test_u8_roundtrip() {
        for s in [FiberState::Init, FiberState::Exec, FiberState::Except] {
            assert_eq!(FiberState::from(u8::from(s)), s);
        }
    }
}
