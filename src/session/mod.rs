//! Realtime session setup.
//!
//! - [`negotiator`] - the connect/disconnect state machine
//! - [`media`] - capability traits for tracks, control channel and session
//! - [`signaling`] - credential and offer/answer exchanges over HTTP
//! - [`peer`] - WebRTC implementation of the media traits

pub mod credential;
pub mod media;
pub mod negotiator;
pub mod peer;
pub mod signaling;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use credential::{SessionCredential, SessionParams};
pub use media::{
    CodecParameters, ControlChannel, LocalTrack, MediaSession, MediaSessionFactory, RemoteTrack,
    RemoteTrackHandler, TrackError,
};
pub use negotiator::{ConnectedSession, SessionNegotiator};
pub use peer::PeerSessionFactory;
pub use signaling::{ApiError, RealtimeApiClient, SignalingExchange, TokenExchange};
pub use state::NegotiationState;
