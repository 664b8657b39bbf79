//! Flow state machine
//!
//! Pure state machine: receives events, returns the new state. The
//! `Container` performs the I/O implied by each state and feeds the result
//! back as the next event. `FlowRun` wraps one attempt with logging and
//! metrics.

use tracing::{debug, info, warn};

use crate::metrics;

/// Which operation a flow attempt belongs to. Used as a log field and
/// metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowVariant {
    Authorize,
    ProviderLogin,
    ProviderLink,
    Anonymous,
    Promote,
    Refresh,
}

impl FlowVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowVariant::Authorize => "authorize",
            FlowVariant::ProviderLogin => "provider_login",
            FlowVariant::ProviderLink => "provider_link",
            FlowVariant::Anonymous => "anonymous",
            FlowVariant::Promote => "promote",
            FlowVariant::Refresh => "refresh",
        }
    }
}

/// Flow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    /// Generating PKCE pair or assertion, building the authorize URL
    BuildingRequest,
    /// Suspended on the UI surface
    AwaitingInteraction,
    /// Code or assertion exchange, userinfo
    ExchangingToken,
    /// Writing the session under the namespace lock
    PersistingSession,
    Completed,
    Cancelled,
    /// `kind` is the error label of the failure
    Failed { kind: &'static str },
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Completed | FlowState::Cancelled | FlowState::Failed { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::BuildingRequest => "building_request",
            FlowState::AwaitingInteraction => "awaiting_interaction",
            FlowState::ExchangingToken => "exchanging_token",
            FlowState::PersistingSession => "persisting_session",
            FlowState::Completed => "completed",
            FlowState::Cancelled => "cancelled",
            FlowState::Failed { .. } => "failed",
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    Start,
    /// Authorize URL ready; hand it to the UI surface
    RequestBuilt,
    /// Non-interactive flow (anonymous, refresh) goes straight to exchange
    InteractionSkipped,
    /// UI surface returned a successful redirect
    RedirectReceived,
    /// End user dismissed the UI surface
    UserCancelled,
    TokensIssued,
    Persisted,
    Error { kind: &'static str },
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: FlowState, event: FlowEvent) -> FlowState {
    match (state, event) {
        (FlowState::Idle, FlowEvent::Start) => FlowState::BuildingRequest,

        // --- BuildingRequest ---
        (FlowState::BuildingRequest, FlowEvent::RequestBuilt) => FlowState::AwaitingInteraction,
        (FlowState::BuildingRequest, FlowEvent::InteractionSkipped) => FlowState::ExchangingToken,

        // --- AwaitingInteraction ---
        (FlowState::AwaitingInteraction, FlowEvent::RedirectReceived) => {
            FlowState::ExchangingToken
        }
        (FlowState::AwaitingInteraction, FlowEvent::UserCancelled) => FlowState::Cancelled,

        // --- ExchangingToken ---
        (FlowState::ExchangingToken, FlowEvent::TokensIssued) => FlowState::PersistingSession,

        // --- PersistingSession ---
        (FlowState::PersistingSession, FlowEvent::Persisted) => FlowState::Completed,

        // --- Any active state + error = failed ---
        (
            FlowState::BuildingRequest
            | FlowState::AwaitingInteraction
            | FlowState::ExchangingToken
            | FlowState::PersistingSession,
            FlowEvent::Error { kind },
        ) => FlowState::Failed { kind },

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => state,
    }
}

/// One flow attempt: current state plus the labels it logs under.
pub(crate) struct FlowRun {
    variant: FlowVariant,
    namespace: String,
    state: FlowState,
}

impl FlowRun {
    /// Enter `BuildingRequest` for a new attempt.
    pub(crate) fn start(variant: FlowVariant, namespace: &str) -> Self {
        let mut run = Self {
            variant,
            namespace: namespace.to_owned(),
            state: FlowState::Idle,
        };
        run.advance(FlowEvent::Start);
        run
    }

    pub(crate) fn state(&self) -> FlowState {
        self.state
    }

    pub(crate) fn advance(&mut self, event: FlowEvent) {
        let from = self.state;
        let to = handle_event(from, event);
        if from == to {
            return;
        }
        self.state = to;
        debug!(
            namespace = %self.namespace,
            variant = self.variant.as_str(),
            from = from.as_str(),
            state = to.as_str(),
            "flow transition"
        );

        match to {
            FlowState::Completed => {
                info!(namespace = %self.namespace, variant = self.variant.as_str(), "flow completed");
            }
            FlowState::Cancelled => {
                info!(namespace = %self.namespace, variant = self.variant.as_str(), "flow cancelled by user");
            }
            FlowState::Failed { kind } => {
                warn!(
                    namespace = %self.namespace,
                    variant = self.variant.as_str(),
                    from = from.as_str(),
                    error_kind = kind,
                    "flow failed"
                );
                metrics::record_flow_error(self.variant.as_str(), kind);
            }
            _ => {}
        }
        if to.is_terminal() {
            metrics::record_flow(self.variant.as_str(), to.as_str());
        }
    }

    /// Move to the terminal state matching `err`. A cancel becomes
    /// `Cancelled`, never `Failed`.
    pub(crate) fn fail(&mut self, err: &authkit_auth::Error) {
        if err.is_cancel() {
            self.advance(FlowEvent::UserCancelled);
        } else {
            self.advance(FlowEvent::Error { kind: err.kind() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_events(events: &[FlowEvent]) -> FlowState {
        events
            .iter()
            .fold(FlowState::Idle, |state, event| handle_event(state, *event))
    }

    #[test]
    fn interactive_happy_path() {
        let state = run_events(&[
            FlowEvent::Start,
            FlowEvent::RequestBuilt,
            FlowEvent::RedirectReceived,
            FlowEvent::TokensIssued,
            FlowEvent::Persisted,
        ]);
        assert_eq!(state, FlowState::Completed);
    }

    #[test]
    fn anonymous_skips_interaction() {
        let state = run_events(&[FlowEvent::Start, FlowEvent::InteractionSkipped]);
        assert_eq!(state, FlowState::ExchangingToken);
    }

    #[test]
    fn cancel_only_from_awaiting_interaction() {
        let state = handle_event(FlowState::AwaitingInteraction, FlowEvent::UserCancelled);
        assert_eq!(state, FlowState::Cancelled);

        // A cancel signal after the redirect has no effect
        let state = handle_event(FlowState::ExchangingToken, FlowEvent::UserCancelled);
        assert_eq!(state, FlowState::ExchangingToken);
    }

    #[test]
    fn error_fails_every_active_state() {
        for state in [
            FlowState::BuildingRequest,
            FlowState::AwaitingInteraction,
            FlowState::ExchangingToken,
            FlowState::PersistingSession,
        ] {
            let next = handle_event(state, FlowEvent::Error { kind: "transport" });
            assert_eq!(next, FlowState::Failed { kind: "transport" }, "from {state:?}");
        }
    }

    #[test]
    fn terminal_states_absorb_events() {
        for state in [
            FlowState::Completed,
            FlowState::Cancelled,
            FlowState::Failed { kind: "provider" },
        ] {
            assert!(state.is_terminal());
            assert_eq!(handle_event(state, FlowEvent::Error { kind: "x" }), state);
            assert_eq!(handle_event(state, FlowEvent::Start), state);
        }
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        assert_eq!(
            handle_event(FlowState::Idle, FlowEvent::Persisted),
            FlowState::Idle
        );
        assert_eq!(
            handle_event(FlowState::BuildingRequest, FlowEvent::TokensIssued),
            FlowState::BuildingRequest
        );
        assert_eq!(
            handle_event(FlowState::AwaitingInteraction, FlowEvent::Persisted),
            FlowState::AwaitingInteraction
        );
    }

    #[test]
    fn run_maps_cancel_error_to_cancelled() {
        let mut run = FlowRun::start(FlowVariant::Authorize, "default");
        run.advance(FlowEvent::RequestBuilt);
        run.fail(&authkit_auth::Error::Cancel);
        assert_eq!(run.state(), FlowState::Cancelled);
    }

    #[test]
    fn run_records_error_kind() {
        let mut run = FlowRun::start(FlowVariant::Anonymous, "default");
        run.advance(FlowEvent::InteractionSkipped);
        run.fail(&authkit_auth::Error::Transport("connection refused".into()));
        assert_eq!(run.state(), FlowState::Failed { kind: "transport" });

        // Later failures don't overwrite the first
        run.fail(&authkit_auth::Error::NotConfigured);
        assert_eq!(run.state(), FlowState::Failed { kind: "transport" });
    }
}
