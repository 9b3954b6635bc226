//! Hardware I/O.
//!
//! This module connects the audio devices to the stream loops:
//!
//! - [`MicrophoneInput`] / [`SpeakerOutput`] - Microphone capture and speaker playback via cpal
//! - [`capture`] - Frame assembly between the capture callback and the encode loop
//! - [`PlaybackAdapter`] - Non-blocking pull from a jitter buffer for the playback callback

pub mod audio;
pub mod capture;
pub mod playback;

pub use audio::{MicrophoneInput, SpeakerOutput};
pub use capture::{CaptureError, CaptureReceiver, CaptureSource, FrameAssembler};
pub use playback::PlaybackAdapter;
