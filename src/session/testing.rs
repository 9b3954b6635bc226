//! Scripted capability implementations for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;

use super::credential::{SessionCredential, SessionParams};
use super::media::{
    CodecParameters, ControlChannel, LocalTrack, MediaSession, MediaSessionFactory, RemoteTrack,
    RemoteTrackHandler, TrackError,
};
use super::signaling::{ApiError, SignalingExchange, TokenExchange};
use crate::audio::frame::{EncodedFrame, ReceivedFrame};

pub struct MockTokens {
    calls: AtomicUsize,
    fail_next: AtomicBool,
    lifetime: Option<chrono::Duration>,
}

impl MockTokens {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            lifetime: Some(chrono::Duration::minutes(1)),
        }
    }

    pub fn expiring_in(lifetime: chrono::Duration) -> Self {
        Self {
            lifetime: Some(lifetime),
            ..Self::new()
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchange for MockTokens {
    async fn exchange(&self, _params: &SessionParams) -> Result<SessionCredential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                body: "token service down".into(),
            }
            .into());
        }
        Ok(SessionCredential::new(
            format!("ek_{n}"),
            self.lifetime.map(|lifetime| Utc::now() + lifetime),
        ))
    }
}

pub struct MockSignaling {
    offers: Mutex<Vec<String>>,
    fail_next: Mutex<Option<u16>>,
}

impl MockSignaling {
    pub fn new() -> Self {
        Self {
            offers: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, status: u16) {
        *self.fail_next.lock() = Some(status);
    }

    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().clone()
    }
}

#[async_trait]
impl SignalingExchange for MockSignaling {
    async fn exchange(&self, offer_sdp: &str, _credential: &SessionCredential) -> Result<String> {
        self.offers.lock().push(offer_sdp.to_string());
        if let Some(status) = self.fail_next.lock().take() {
            return Err(ApiError::Status {
                status,
                body: "rejected".into(),
            }
            .into());
        }
        Ok("answer".to_string())
    }
}

pub struct MockFactory {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    never_open: AtomicBool,
    create_delay: Option<Duration>,
    creating: AtomicUsize,
    max_creating: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            never_open: AtomicBool::new(false),
            create_delay: None,
            creating: AtomicUsize::new(0),
            max_creating: AtomicUsize::new(0),
        }
    }

    /// Every `create` parks for `delay`, so concurrent attempts would overlap.
    pub fn slow(delay: Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Self::new()
        }
    }

    /// Most `create` calls that were ever in flight at once.
    pub fn max_concurrent_creates(&self) -> usize {
        self.max_creating.load(Ordering::SeqCst)
    }

    pub fn never_open(&self) {
        self.never_open.store(true, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl MediaSessionFactory for MockFactory {
    async fn create(&self, _on_remote_track: RemoteTrackHandler) -> Result<Arc<dyn MediaSession>> {
        let creating = self.creating.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_creating.fetch_max(creating, Ordering::SeqCst);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.creating.fetch_sub(1, Ordering::SeqCst);

        let mut sessions = self.sessions.lock();
        let session = Arc::new(MockSession {
            id: sessions.len() + 1,
            answers: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            local: Arc::new(MockLocalTrack::new()),
            control: Arc::new(MockControl {
                opens: !self.never_open.load(Ordering::SeqCst),
            }),
        });
        sessions.push(session.clone());
        Ok(session)
    }
}

pub struct MockSession {
    id: usize,
    answers: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    local: Arc<MockLocalTrack>,
    control: Arc<MockControl>,
}

impl MockSession {
    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }
}

#[async_trait]
impl MediaSession for MockSession {
    fn local_track(&self) -> Arc<dyn LocalTrack> {
        self.local.clone()
    }

    fn control_channel(&self) -> Arc<dyn ControlChannel> {
        self.control.clone()
    }

    async fn create_offer(&self) -> Result<String> {
        Ok(format!("offer-{}", self.id))
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        self.answers.lock().push(sdp);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockControl {
    opens: bool,
}

#[async_trait]
impl ControlChannel for MockControl {
    fn label(&self) -> String {
        "oai-events".to_string()
    }

    async fn wait_open(&self, timeout: Duration) -> Result<()> {
        if self.opens {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        anyhow::bail!("Control channel did not open within {:?}", timeout)
    }

    async fn send_text(&self, _text: String) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Records sent frames; fails every send after `fail_after` successes.
pub struct MockLocalTrack {
    sent: Mutex<Vec<EncodedFrame>>,
    fail_after: Option<usize>,
}

impl MockLocalTrack {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_after: None,
        }
    }

    pub fn failing_after(successes: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_after: Some(successes),
        }
    }

    pub fn sent(&self) -> Vec<EncodedFrame> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl LocalTrack for MockLocalTrack {
    async fn send_frame(&self, frame: &EncodedFrame) -> Result<()> {
        let mut sent = self.sent.lock();
        if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
            anyhow::bail!("Peer connection closed");
        }
        sent.push(frame.clone());
        Ok(())
    }
}

/// Replays scripted reads, then ends (or hangs, if asked to).
pub struct MockRemoteTrack {
    mime_type: String,
    script: Mutex<VecDeque<Result<ReceivedFrame, TrackError>>>,
    hang_when_empty: bool,
}

impl MockRemoteTrack {
    pub fn opus(script: Vec<Result<ReceivedFrame, TrackError>>) -> Self {
        Self::with_codec("audio/opus", script)
    }

    pub fn with_codec(mime_type: &str, script: Vec<Result<ReceivedFrame, TrackError>>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            script: Mutex::new(script.into()),
            hang_when_empty: false,
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }
}

/// A received frame whose payload is `payload` verbatim.
pub fn frame(sequence: u16, payload: &'static [u8]) -> Result<ReceivedFrame, TrackError> {
    Ok(ReceivedFrame {
        sequence,
        payload: Bytes::from_static(payload),
    })
}

#[async_trait]
impl RemoteTrack for MockRemoteTrack {
    fn id(&self) -> String {
        "mock-track".to_string()
    }

    fn codec(&self) -> CodecParameters {
        CodecParameters {
            mime_type: self.mime_type.clone(),
            clock_rate: 48000,
            channels: 2,
        }
    }

    async fn read_frame(&self) -> Result<ReceivedFrame, TrackError> {
        let next = self.script.lock().pop_front();
        match next {
            Some(item) => item,
            None if self.hang_when_empty => std::future::pending().await,
            None => Err(TrackError::Ended),
        }
    }
}
