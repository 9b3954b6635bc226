//! Full-duplex voice client for a realtime speech API over WebRTC.
//!
//! - [`audio`] - samples, codec, jitter buffer, diagnostics
//! - [`io`] - microphone and speaker via cpal
//! - [`session`] - credential, signaling and peer connection setup
//! - [`stream`] - the encode/decode loops and track players
//! - [`config`] - TOML and environment configuration

pub mod audio;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod session;
pub mod stream;

pub use config::Config;
pub use error::{Error, Result, SetupPhase};
