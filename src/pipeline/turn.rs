//! Turn state machine with validated transitions.
//!
//! Idle -> ConversationResolved -> UserTurnPersisted -> ContextBuilt
//! -> Dispatched -> Completed | Failed

use std::fmt::Display;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    ConversationResolved,
    UserTurnPersisted,
    ContextBuilt,
    Dispatched,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Failed)
    }
}

impl Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::ConversationResolved => "conversation_resolved",
            TurnState::UserTurnPersisted => "user_turn_persisted",
            TurnState::ContextBuilt => "context_built",
            TurnState::Dispatched => "dispatched",
            TurnState::Completed => "completed",
            TurnState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Validate that a turn transition is allowed.
///
/// Only a dispatched turn can fail. Earlier errors are surfaced to the
/// caller and never reach a terminal state.
pub fn validate_transition(from: TurnState, to: TurnState) -> Result<()> {
    let valid = matches!(
        (from, to),
        (TurnState::Idle, TurnState::ConversationResolved)
            | (TurnState::ConversationResolved, TurnState::UserTurnPersisted)
            | (TurnState::UserTurnPersisted, TurnState::ContextBuilt)
            | (TurnState::ContextBuilt, TurnState::Dispatched)
            | (TurnState::Dispatched, TurnState::Completed)
            | (TurnState::Dispatched, TurnState::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTransition(from, to))
    }
}

/// Tracks one turn through its states.
#[derive(Debug)]
pub struct Turn {
    conversation_id: String,
    state: TurnState,
}

impl Turn {
    pub fn new() -> Self {
        Self {
            conversation_id: String::new(),
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn resolve(&mut self, conversation_id: &str) -> Result<()> {
        validate_transition(self.state, TurnState::ConversationResolved)?;
        self.conversation_id = conversation_id.to_string();
        self.advance(TurnState::ConversationResolved)
    }

    pub fn advance(&mut self, next: TurnState) -> Result<()> {
        validate_transition(self.state, next)?;
        log::debug!("Turn {}: {} -> {}", self.conversation_id, self.state, next);
        self.state = next;
        Ok(())
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut turn = Turn::new();
        turn.resolve("c1").unwrap();
        assert_eq!(turn.conversation_id(), "c1");
        for next in [
            TurnState::UserTurnPersisted,
            TurnState::ContextBuilt,
            TurnState::Dispatched,
            TurnState::Completed,
        ] {
            turn.advance(next).unwrap();
        }
        assert!(turn.state().is_terminal());
    }

    #[test]
    fn test_dispatch_failure() {
        let mut turn = Turn::new();
        turn.resolve("c1").unwrap();
        turn.advance(TurnState::UserTurnPersisted).unwrap();
        turn.advance(TurnState::ContextBuilt).unwrap();
        turn.advance(TurnState::Dispatched).unwrap();
        turn.advance(TurnState::Failed).unwrap();
        assert_eq!(turn.state(), TurnState::Failed);
    }

    #[test]
    fn test_invalid_transitions() {
        let cases = [
            (TurnState::Idle, TurnState::Dispatched),
            (TurnState::Idle, TurnState::Failed),
            (TurnState::ConversationResolved, TurnState::Failed),
            (TurnState::ContextBuilt, TurnState::Failed),
            (TurnState::UserTurnPersisted, TurnState::Completed),
            (TurnState::Completed, TurnState::Failed),
            (TurnState::Failed, TurnState::Completed),
            (TurnState::Completed, TurnState::Idle),
        ];
        for (from, to) in cases {
            let err = validate_transition(from, to).unwrap_err();
            assert!(
                matches!(err, Error::InvalidTransition(f, t) if f == from && t == to),
                "{} -> {}",
                from,
                to
            );
        }
    }

    #[test]
    fn test_terminal_turn_cannot_advance() {
        let mut turn = Turn::new();
        turn.resolve("c1").unwrap();
        turn.advance(TurnState::UserTurnPersisted).unwrap();
        turn.advance(TurnState::ContextBuilt).unwrap();
        turn.advance(TurnState::Dispatched).unwrap();
        turn.advance(TurnState::Completed).unwrap();
        assert!(turn.advance(TurnState::Failed).is_err());
        assert_eq!(turn.state(), TurnState::Completed);
    }
}
