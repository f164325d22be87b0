use serde::Serialize;
use strum::Display;
use tokio::time::Instant;

use crate::grant::{AuthorizationRequest, Grant};
use crate::token::Token;

/// Lifecycle of one authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlowState {
    Idle,
    Requesting,
    AwaitingRedirect,
    /// Device-code counterpart of `AwaitingRedirect`.
    Polling,
    Exchanging,
    Authorized,
    Failed,
    Cancelled,
}

impl FlowState {
    /// States that own a live flow; `start` is rejected while in one.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Requesting | Self::AwaitingRedirect | Self::Polling | Self::Exchanging
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Authorized | Self::Failed | Self::Cancelled)
    }
}

/// Result of [`AuthorizationEngine::start`](super::AuthorizationEngine::start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The flow finished and the token is in the store.
    Authorized(Token),
    /// The presenter deferred; deliver the callback through
    /// [`handle_redirect`](super::AuthorizationEngine::handle_redirect).
    AwaitingRedirect(AuthorizationRequest),
}

impl StartOutcome {
    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Authorized(token) => Some(token),
            Self::AwaitingRedirect(_) => None,
        }
    }
}

/// A redirect flow waiting for its callback.
#[derive(Debug, Clone)]
pub(crate) struct PendingAuthorization {
    pub(crate) grant: Grant,
    pub(crate) request: AuthorizationRequest,
    pub(crate) created_at: Instant,
    pub(crate) deadline: Instant,
}

impl PendingAuthorization {
    pub(crate) fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[derive(Debug)]
pub(crate) struct Flow {
    pub(crate) state: FlowState,
    /// Bumped on every `start` and `cancel`; results computed under an older
    /// attempt are dropped.
    pub(crate) attempt: u64,
    pub(crate) pending: Option<PendingAuthorization>,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            state: FlowState::Idle,
            attempt: 0,
            pending: None,
        }
    }
}

impl Flow {
    pub(crate) fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.state != FlowState::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_and_terminal_partition_non_idle_states() {
        let all = [
            FlowState::Idle,
            FlowState::Requesting,
            FlowState::AwaitingRedirect,
            FlowState::Polling,
            FlowState::Exchanging,
            FlowState::Authorized,
            FlowState::Failed,
            FlowState::Cancelled,
        ];
        for state in all {
            if state == FlowState::Idle {
                assert!(!state.is_in_progress() && !state.is_terminal());
            } else {
                assert_ne!(state.is_in_progress(), state.is_terminal(), "{state}");
            }
        }
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(FlowState::AwaitingRedirect.to_string(), "awaiting_redirect");
    }
}
