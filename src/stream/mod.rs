//! Steady-state audio loops.
//!
//! - [`outbound::OutboundEncodeLoop`] - capture, encode, send
//! - [`inbound::InboundDecodeLoop`] - receive, decode, buffer
//! - [`player`] - consumers that drain the inbound buffer
//!
//! Each loop runs as its own tokio task and stops on a shared [`Shutdown`].

pub mod inbound;
pub mod outbound;
pub mod player;
pub mod shutdown;

pub use inbound::InboundDecodeLoop;
pub use outbound::OutboundEncodeLoop;
pub use player::{PipePlayer, SpeakerPlayer, TrackPlayer, player_for};
pub use shutdown::{Shutdown, ShutdownTrigger};

/// How a loop finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source ran out (track ended, capture closed).
    Ended,
    /// Shutdown was requested.
    Cancelled,
}
