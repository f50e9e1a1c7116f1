/// Debug session state machine

use serde::{Deserialize, Serialize};

/// Lifecycle state of a debug session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session has been started
    #[default]
    Idle,
    /// GDB spawned, waiting for the ready handshake
    Starting,
    /// GDB initialised, inferior not running
    Ready,
    Running,
    /// Inferior paused (breakpoint, step, signal)
    Stopped,
    /// Inferior finished; GDB itself is still alive
    Exited { code: i32 },
    /// GDB is gone
    Terminated,
}

/// Inputs that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Handshake,
    Resume,
    Halt,
    ProgramExit(i32),
    Terminate,
}

impl SessionState {
    /// The state reached by applying `transition`, or `None` when the
    /// transition is not valid from here
    pub fn next(self, transition: Transition) -> Option<SessionState> {
        use SessionState::*;

        match (self, transition) {
            (_, Transition::Terminate) => Some(Terminated),
            (Idle | Terminated, Transition::Start) => Some(Starting),
            (Starting, Transition::Handshake) => Some(Ready),
            (Ready | Stopped | Running | Exited { .. }, Transition::Resume) => Some(Running),
            (Running, Transition::Halt) => Some(Stopped),
            (Running | Stopped, Transition::ProgramExit(code)) => Some(Exited { code }),
            _ => None,
        }
    }

    /// A GDB process belongs to this state
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Terminated)
    }

    /// The inferior can be inspected
    pub fn is_paused(self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = SessionState::Idle;
        let state = state.next(Transition::Start).unwrap();
        assert_eq!(state, SessionState::Starting);
        let state = state.next(Transition::Handshake).unwrap();
        assert_eq!(state, SessionState::Ready);
        let state = state.next(Transition::Resume).unwrap();
        let state = state.next(Transition::Halt).unwrap();
        assert_eq!(state, SessionState::Stopped);
        let state = state.next(Transition::Resume).unwrap();
        assert_eq!(state, SessionState::Running);
        let state = state.next(Transition::ProgramExit(3)).unwrap();
        assert_eq!(state, SessionState::Exited { code: 3 });
    }

    #[test]
    fn test_terminate_from_anywhere() {
        for state in [
            SessionState::Idle,
            SessionState::Starting,
            SessionState::Ready,
            SessionState::Running,
            SessionState::Stopped,
            SessionState::Exited { code: 0 },
            SessionState::Terminated,
        ] {
            assert_eq!(state.next(Transition::Terminate), Some(SessionState::Terminated));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(SessionState::Idle.next(Transition::Resume), None);
        assert_eq!(SessionState::Ready.next(Transition::Halt), None);
        assert_eq!(SessionState::Starting.next(Transition::Resume), None);
        assert_eq!(SessionState::Ready.next(Transition::ProgramExit(0)), None);
        assert_eq!(SessionState::Running.next(Transition::Start), None);
        assert_eq!(SessionState::Exited { code: 0 }.next(Transition::ProgramExit(1)), None);
    }

    #[test]
    fn test_rerun_after_exit() {
        let exited = SessionState::Exited { code: 0 };
        assert_eq!(exited.next(Transition::Resume), Some(SessionState::Running));
    }

    #[test]
    fn test_activity() {
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Terminated.is_active());
        assert!(SessionState::Exited { code: 0 }.is_active());
        assert!(SessionState::Stopped.is_paused());
    }
}
