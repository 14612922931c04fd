//! Conversation lifecycle state machine
//!
//! Pure transition logic for `automated -> agent -> closed`. Status only
//! moves forward; repeated UI actions (double-clicked escalate, re-sent
//! close) resolve to explicit no-ops instead of errors so callers can
//! return the current snapshot without emitting duplicate side effects.

use supportdesk_shared::ConversationStatus;

/// Actions that drive conversation status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Customer asked for a human.
    EscalateToAgent,
    /// Assigned agent ended the conversation.
    CloseByAgent,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::EscalateToAgent => "escalate_to_agent",
            TransitionAction::CloseByAgent => "close_by_agent",
        }
    }
}

/// Outcome of applying an action to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed; side effects (system message, assignment,
    /// timestamps) must be applied exactly once.
    Changed(ConversationStatus),
    /// Idempotent replay; the status stays put and no side effects run.
    NoOp(ConversationStatus),
}

impl Transition {
    pub fn status(&self) -> ConversationStatus {
        match self {
            Transition::Changed(status) | Transition::NoOp(status) => *status,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Transition::Changed(_))
    }
}

/// Raised for lifecycle moves that are illegal from the current status.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("cannot apply action '{action}' from status '{current}'")]
pub struct InvalidTransition {
    pub current: &'static str,
    pub action: &'static str,
}

/// State machine for the conversation lifecycle.
pub struct ConversationLifecycle;

impl ConversationLifecycle {
    /// Apply `action` to `current`, returning the resulting transition or
    /// rejecting the move. Idempotent replays are `Ok(NoOp)`.
    pub fn transition(
        current: ConversationStatus,
        action: TransitionAction,
    ) -> Result<Transition, InvalidTransition> {
        use ConversationStatus::{Agent, Automated, Closed};
        use TransitionAction::{CloseByAgent, EscalateToAgent};

        match (current, action) {
            (Automated, EscalateToAgent) => Ok(Transition::Changed(Agent)),
            (Agent, CloseByAgent) => Ok(Transition::Changed(Closed)),

            // Idempotent replays of repeated UI actions. Escalate never
            // fails: once a conversation has left `automated`, re-applying
            // it returns the current state untouched.
            (Agent | Closed, EscalateToAgent) => Ok(Transition::NoOp(current)),
            (Closed, CloseByAgent) => Ok(Transition::NoOp(Closed)),

            (current, action) => Err(InvalidTransition {
                current: current.as_str(),
                action: action.as_str(),
            }),
        }
    }

    /// Closed conversations are read-only: no sends, no transitions.
    pub fn is_read_only(status: ConversationStatus) -> bool {
        status == ConversationStatus::Closed
    }

    /// Whether the customer widget should offer the escalate action.
    pub fn offers_escalation(status: ConversationStatus) -> bool {
        status == ConversationStatus::Automated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supportdesk_shared::ConversationStatus::{Agent, Automated, Closed};

    #[test]
    fn test_escalate_from_automated_changes_status() {
        let transition =
            ConversationLifecycle::transition(Automated, TransitionAction::EscalateToAgent)
                .unwrap();
        assert_eq!(transition, Transition::Changed(Agent));
        assert!(transition.changed());
    }

    #[test]
    fn test_close_from_agent_changes_status() {
        let transition =
            ConversationLifecycle::transition(Agent, TransitionAction::CloseByAgent).unwrap();
        assert_eq!(transition, Transition::Changed(Closed));
    }

    #[test]
    fn test_escalate_replay_is_noop() {
        let transition =
            ConversationLifecycle::transition(Agent, TransitionAction::EscalateToAgent).unwrap();
        assert_eq!(transition, Transition::NoOp(Agent));
        assert!(!transition.changed());
    }

    #[test]
    fn test_close_replay_is_noop() {
        let transition =
            ConversationLifecycle::transition(Closed, TransitionAction::CloseByAgent).unwrap();
        assert_eq!(transition, Transition::NoOp(Closed));
    }

    #[test]
    fn test_close_from_automated_rejected() {
        let err = ConversationLifecycle::transition(Automated, TransitionAction::CloseByAgent)
            .unwrap_err();
        assert_eq!(err.current, "automated");
        assert_eq!(err.action, "close_by_agent");
    }

    #[test]
    fn test_escalate_from_closed_is_noop() {
        let transition =
            ConversationLifecycle::transition(Closed, TransitionAction::EscalateToAgent).unwrap();
        assert_eq!(transition, Transition::NoOp(Closed));
    }

    #[test]
    fn test_status_never_moves_backward() {
        // Exhaustive: no (status, action) pair may produce an earlier status.
        let order = |status: ConversationStatus| match status {
            Automated => 0,
            Agent => 1,
            Closed => 2,
        };

        for current in [Automated, Agent, Closed] {
            for action in [
                TransitionAction::EscalateToAgent,
                TransitionAction::CloseByAgent,
            ] {
                if let Ok(transition) = ConversationLifecycle::transition(current, action) {
                    assert!(order(transition.status()) >= order(current));
                }
            }
        }
    }

    #[test]
    fn test_read_only_and_escalation_flags() {
        assert!(ConversationLifecycle::is_read_only(Closed));
        assert!(!ConversationLifecycle::is_read_only(Agent));
        assert!(ConversationLifecycle::offers_escalation(Automated));
        assert!(!ConversationLifecycle::offers_escalation(Agent));
        assert!(!ConversationLifecycle::offers_escalation(Closed));
    }
}
