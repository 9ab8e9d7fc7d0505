//! Script execution state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one script attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptState {
    /// Waiting to take the advisory lock
    Pending,

    /// Advisory lock held, run not yet claimed
    LockHeld,

    /// Run claimed and windows planned
    RangesComputed,

    /// Connector invocations in progress
    Running,

    Completed,

    Failed,

    /// Lock contended or run not claimable
    Skipped,

    /// Lock given back after a terminal state
    LockReleased,
}

impl ScriptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptState::Pending => "pending",
            ScriptState::LockHeld => "lock_held",
            ScriptState::RangesComputed => "ranges_computed",
            ScriptState::Running => "running",
            ScriptState::Completed => "completed",
            ScriptState::Failed => "failed",
            ScriptState::Skipped => "skipped",
            ScriptState::LockReleased => "lock_released",
        }
    }
}

/// State machine for a single script attempt
#[derive(Debug)]
pub struct ScriptStateMachine {
    current_state: ScriptState,
    state_history: Vec<(ScriptState, DateTime<Utc>)>,
}

impl ScriptStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: ScriptState::Pending,
            state_history: vec![(ScriptState::Pending, Utc::now())],
        }
    }

    pub fn current_state(&self) -> ScriptState {
        self.current_state
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: ScriptState) -> crate::Result<()> {
        if !self.is_valid_transition(new_state) {
            return Err(crate::Error::InvalidState(format!(
                "Invalid transition from {:?} to {:?}",
                self.current_state, new_state
            )));
        }

        self.current_state = new_state;
        self.state_history.push((new_state, Utc::now()));
        Ok(())
    }

    fn is_valid_transition(&self, new_state: ScriptState) -> bool {
        use ScriptState::*;

        matches!(
            (self.current_state, new_state),
            (Pending, LockHeld | Skipped)
                | (LockHeld, RangesComputed | Skipped | Failed)
                | (RangesComputed, Running | Failed)
                | (Running, Completed | Failed)
                | (Completed | Failed | Skipped, LockReleased)
        )
    }

    /// Whether the attempt reached a state that holds no lock
    pub fn is_terminal(&self) -> bool {
        use ScriptState::*;
        match self.current_state {
            LockReleased => true,
            // Contention skips never held the lock.
            Skipped => !self.state_history.iter().any(|(s, _)| *s == LockHeld),
            _ => false,
        }
    }

    pub fn history(&self) -> &[(ScriptState, DateTime<Utc>)] {
        &self.state_history
    }

    /// Visited states joined for log output, e.g. `pending>lock_held>...`
    pub fn trail(&self) -> String {
        self.state_history
            .iter()
            .map(|(s, _)| s.as_str())
            .collect::<Vec<_>>()
            .join(">")
    }
}

impl Default for ScriptStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScriptState::*;

    #[test]
    fn test_initial_state() {
        let sm = ScriptStateMachine::new();
        assert_eq!(sm.current_state(), Pending);
        assert!(!sm.is_terminal());
    }

    #[test]
    fn test_success_path() {
        let mut sm = ScriptStateMachine::new();
        for state in [LockHeld, RangesComputed, Running, Completed, LockReleased] {
            sm.transition(state).unwrap();
        }
        assert!(sm.is_terminal());
        assert_eq!(
            sm.trail(),
            "pending>lock_held>ranges_computed>running>completed>lock_released"
        );
    }

    #[test]
    fn test_contention_skip_is_terminal_without_release() {
        let mut sm = ScriptStateMachine::new();
        sm.transition(Skipped).unwrap();
        assert!(sm.is_terminal());
        assert!(sm.transition(LockReleased).is_ok());
    }

    #[test]
    fn test_unclaimed_run_must_release() {
        let mut sm = ScriptStateMachine::new();
        sm.transition(LockHeld).unwrap();
        sm.transition(Skipped).unwrap();
        assert!(!sm.is_terminal());
        sm.transition(LockReleased).unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = ScriptStateMachine::new();
        assert!(sm.transition(Running).is_err());
        assert!(sm.transition(Completed).is_err());

        sm.transition(LockHeld).unwrap();
        assert!(sm.transition(Completed).is_err());
        assert_eq!(sm.current_state(), LockHeld);
    }
}
