//! Capability traits for the media session.
//!
//! The negotiator and the stream loops only talk to these traits. The
//! WebRTC-backed implementations live in [`super::peer`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::audio::frame::{EncodedFrame, ReceivedFrame};

/// Codec negotiated for a remote track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    #[error("track ended")]
    Ended,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Receive side of a media track.
#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> String;

    fn codec(&self) -> CodecParameters;

    /// Waits for the next compressed frame.
    async fn read_frame(&self) -> Result<ReceivedFrame, TrackError>;
}

/// Send side of a media track.
#[async_trait]
pub trait LocalTrack: Send + Sync {
    async fn send_frame(&self, frame: &EncodedFrame) -> Result<()>;
}

/// Bidirectional side channel for session control events.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    fn label(&self) -> String;

    /// Resolves once the channel can carry messages, or fails after `timeout`.
    async fn wait_open(&self, timeout: Duration) -> Result<()>;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Invoked once per remote track as the peer announces it.
pub type RemoteTrackHandler = Arc<dyn Fn(Arc<dyn RemoteTrack>) + Send + Sync>;

/// One peer session: a local track, a control channel, and the
/// offer/answer plumbing to connect them.
#[async_trait]
pub trait MediaSession: Send + Sync {
    fn local_track(&self) -> Arc<dyn LocalTrack>;

    fn control_channel(&self) -> Arc<dyn ControlChannel>;

    /// Creates the local offer, commits it, and returns the document to send.
    async fn create_offer(&self) -> Result<String>;

    /// Commits the remote answer, which starts connectivity checks.
    async fn apply_answer(&self, sdp: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    /// Builds a session with the codec registered, the local track attached
    /// and `on_remote_track` wired up.
    async fn create(&self, on_remote_track: RemoteTrackHandler) -> Result<Arc<dyn MediaSession>>;
}
