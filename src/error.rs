//! Error types for the voice client.
//!
//! Failures fall into four groups:
//! - **Transient**: a single bad frame or capture overflow. These are logged
//!   inside the loop that saw them and never surface here.
//! - **Stream-terminal**: [`Error::Transport`] and [`Error::Device`] end one
//!   direction of audio and are returned to that loop's owner.
//! - **Setup-fatal**: [`Error::Setup`] aborts a connect attempt and names the
//!   phase that failed.
//! - **Contract violation**: [`Error::BufferClosed`] means a producer kept
//!   writing after the buffer lifecycle ended.

use std::fmt;

/// Negotiation phase in which a connect attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    TokenExchange,
    SessionCreation,
    OfferAnswer,
    ControlChannel,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupPhase::TokenExchange => "token exchange",
            SetupPhase::SessionCreation => "session creation",
            SetupPhase::OfferAnswer => "offer/answer exchange",
            SetupPhase::ControlChannel => "control channel open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("write to closed jitter buffer")]
    BufferClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{phase} failed")]
    Setup {
        phase: SetupPhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn setup(phase: SetupPhase, source: anyhow::Error) -> Self {
        Error::Setup { phase, source }
    }

    /// Phase of a failed connect attempt, if this is a setup failure.
    pub fn setup_phase(&self) -> Option<SetupPhase> {
        match self {
            Error::Setup { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether trying the same operation again can reasonably succeed.
    ///
    /// Session creation failures come from local configuration (codecs,
    /// devices), so retrying them without a change is pointless.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Setup { phase, .. } => *phase != SetupPhase::SessionCreation,
            Error::Transport(_) => true,
            _ => false,
        }
    }
}
