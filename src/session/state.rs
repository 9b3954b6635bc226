use std::fmt;

/// Progress of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    CredentialAcquired,
    SessionCreated,
    OfferSent,
    Connected,
    Closed,
    Failed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::CredentialAcquired => "credential acquired",
            NegotiationState::SessionCreated => "session created",
            NegotiationState::OfferSent => "offer sent",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
            NegotiationState::Failed => "failed",
        };
        f.write_str(name)
    }
}
