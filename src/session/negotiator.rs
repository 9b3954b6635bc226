//! Connect/disconnect state machine for one realtime session.
//!
//! A connect attempt walks
//! `Idle -> CredentialAcquired -> SessionCreated -> OfferSent -> Connected`
//! and lands in `Failed` if any step errors. The whole attempt runs under one
//! async mutex, so concurrent `connect`/`disconnect` calls serialize.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use super::credential::{SessionCredential, SessionParams};
use super::media::{ControlChannel, LocalTrack, MediaSession, MediaSessionFactory, RemoteTrackHandler};
use super::signaling::{ApiError, SignalingExchange, TokenExchange};
use super::state::NegotiationState;
use crate::config::RealtimeConfig;
use crate::error::{Error, Result, SetupPhase};

/// Handles returned by a successful connect.
#[derive(Clone)]
pub struct ConnectedSession {
    pub local_track: Arc<dyn LocalTrack>,
    pub control: Arc<dyn ControlChannel>,
}

#[derive(Default)]
struct SessionSlot {
    credential: Option<SessionCredential>,
    session: Option<Arc<dyn MediaSession>>,
}

pub struct SessionNegotiator {
    config: RealtimeConfig,
    tokens: Arc<dyn TokenExchange>,
    signaling: Arc<dyn SignalingExchange>,
    factory: Arc<dyn MediaSessionFactory>,
    slot: Mutex<SessionSlot>,
    state: watch::Sender<NegotiationState>,
}

impl SessionNegotiator {
    pub fn new(
        config: RealtimeConfig,
        tokens: Arc<dyn TokenExchange>,
        signaling: Arc<dyn SignalingExchange>,
        factory: Arc<dyn MediaSessionFactory>,
    ) -> Self {
        let (state, _) = watch::channel(NegotiationState::Idle);
        Self {
            config,
            tokens,
            signaling,
            factory,
            slot: Mutex::new(SessionSlot::default()),
            state,
        }
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: NegotiationState) {
        debug!("Negotiation state: {}", state);
        self.state.send_replace(state);
    }

    fn params(&self) -> SessionParams {
        SessionParams {
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
        }
    }

    /// Establishes a session, replacing any session that is already up.
    ///
    /// On failure the partially built session is closed and the error names
    /// the phase that failed.
    pub async fn connect(&self, on_remote_track: RemoteTrackHandler) -> Result<ConnectedSession> {
        let mut slot = self.slot.lock().await;

        if let Some(existing) = slot.session.take() {
            info!("Tearing down existing session before reconnecting");
            close_session(existing.as_ref()).await;
        }

        match self.establish(&mut slot, on_remote_track).await {
            Ok(connected) => {
                self.set_state(NegotiationState::Connected);
                info!("Realtime session connected");
                Ok(connected)
            }
            Err(e) => {
                self.set_state(NegotiationState::Failed);
                match &e {
                    Error::Setup { phase, source } => {
                        error!("Failed to connect during {}: {:#}", phase, source)
                    }
                    other => error!("Failed to connect: {}", other),
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        slot: &mut SessionSlot,
        on_remote_track: RemoteTrackHandler,
    ) -> Result<ConnectedSession> {
        let margin = self.config.credential_refresh_margin();
        let credential = match slot.credential.as_ref().filter(|c| c.is_valid(margin)) {
            Some(cached) => {
                debug!("Reusing cached session credential");
                cached.clone()
            }
            None => {
                let fresh = self
                    .tokens
                    .exchange(&self.params())
                    .await
                    .map_err(|e| Error::setup(SetupPhase::TokenExchange, e))?;
                slot.credential = Some(fresh.clone());
                fresh
            }
        };
        self.set_state(NegotiationState::CredentialAcquired);

        let session = self
            .factory
            .create(on_remote_track)
            .await
            .map_err(|e| Error::setup(SetupPhase::SessionCreation, e))?;
        self.set_state(NegotiationState::SessionCreated);

        match self.handshake(session.as_ref(), &credential).await {
            Ok(connected) => {
                slot.session = Some(session);
                Ok(connected)
            }
            Err(e) => {
                if rejected_credential(&e) {
                    warn!("Signaling rejected the session credential, dropping it");
                    slot.credential = None;
                }
                close_session(session.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        session: &dyn MediaSession,
        credential: &SessionCredential,
    ) -> Result<ConnectedSession> {
        let offer = session
            .create_offer()
            .await
            .map_err(|e| Error::setup(SetupPhase::OfferAnswer, e))?;

        let answer = self
            .signaling
            .exchange(&offer, credential)
            .await
            .map_err(|e| Error::setup(SetupPhase::OfferAnswer, e))?;
        self.set_state(NegotiationState::OfferSent);

        session
            .apply_answer(answer)
            .await
            .map_err(|e| Error::setup(SetupPhase::OfferAnswer, e))?;

        let control = session.control_channel();
        control
            .wait_open(self.config.control_open_timeout())
            .await
            .map_err(|e| Error::setup(SetupPhase::ControlChannel, e))?;

        Ok(ConnectedSession {
            local_track: session.local_track(),
            control,
        })
    }

    /// Closes the current session, if any. The cached credential is kept for
    /// the next connect.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        match slot.session.take() {
            Some(session) => {
                close_session(session.as_ref()).await;
                self.set_state(NegotiationState::Closed);
                info!("Realtime session closed");
            }
            None => debug!("Disconnect with no active session"),
        }
    }
}

fn rejected_credential(err: &Error) -> bool {
    match err {
        Error::Setup {
            phase: SetupPhase::OfferAnswer,
            source,
        } => ApiError::is_unauthorized(source),
        _ => false,
    }
}

async fn close_session(session: &dyn MediaSession) {
    if let Err(e) = session.close().await {
        warn!("Failed to close media session: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{MockFactory, MockSignaling, MockTokens};
    use std::time::Duration;

    fn config() -> RealtimeConfig {
        RealtimeConfig {
            api_key: "sk-test".into(),
            control_open_timeout_ms: 50,
            ..RealtimeConfig::default()
        }
    }

    fn negotiator(
        tokens: &Arc<MockTokens>,
        signaling: &Arc<MockSignaling>,
        factory: &Arc<MockFactory>,
    ) -> SessionNegotiator {
        SessionNegotiator::new(config(), tokens.clone(), signaling.clone(), factory.clone())
    }

    fn no_tracks() -> RemoteTrackHandler {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_connect_happy_path() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);
        let mut states = negotiator.subscribe();

        assert_eq!(negotiator.state(), NegotiationState::Idle);
        let connected = negotiator.connect(no_tracks()).await.unwrap();

        assert_eq!(negotiator.state(), NegotiationState::Connected);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), NegotiationState::Connected);
        assert_eq!(connected.control.label(), "oai-events");
        assert_eq!(signaling.offers(), vec!["offer-1".to_string()]);
        assert_eq!(factory.sessions()[0].answers(), vec!["answer".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_connects_run_one_at_a_time() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::slow(Duration::from_millis(30)));
        let negotiator = negotiator(&tokens, &signaling, &factory);

        let (first, second) = tokio::join!(
            negotiator.connect(no_tracks()),
            negotiator.connect(no_tracks())
        );
        assert!(first.is_ok());
        assert!(second.is_ok());

        assert_eq!(factory.max_concurrent_creates(), 1);
        assert_eq!(signaling.offers(), vec!["offer-1".to_string(), "offer-2".to_string()]);
        // The later attempt replaced the earlier session.
        let sessions = factory.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_closed());
        assert!(!sessions[1].is_closed());
        assert_eq!(negotiator.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn test_signaling_failure_fails_then_recovers() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        signaling.fail_next(500);
        let err = negotiator.connect(no_tracks()).await.err().unwrap();
        assert_eq!(err.setup_phase(), Some(SetupPhase::OfferAnswer));
        assert!(err.is_retryable());
        assert_eq!(negotiator.state(), NegotiationState::Failed);
        assert!(factory.sessions()[0].is_closed());

        negotiator.connect(no_tracks()).await.unwrap();
        assert_eq!(negotiator.state(), NegotiationState::Connected);
        assert_eq!(factory.sessions().len(), 2);
        assert!(!factory.sessions()[1].is_closed());
    }

    #[tokio::test]
    async fn test_credential_reused_across_connects() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        negotiator.connect(no_tracks()).await.unwrap();
        negotiator.disconnect().await;
        negotiator.connect(no_tracks()).await.unwrap();

        assert_eq!(tokens.calls(), 1);
        assert_eq!(factory.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_credential_refreshed() {
        let tokens = Arc::new(MockTokens::expiring_in(chrono::Duration::seconds(5)));
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        // Default refresh margin is 10 s, so a 5 s credential is never reused.
        negotiator.connect(no_tracks()).await.unwrap();
        negotiator.connect(no_tracks()).await.unwrap();
        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_drops_credential() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        negotiator.connect(no_tracks()).await.unwrap();
        signaling.fail_next(401);
        assert!(negotiator.connect(no_tracks()).await.is_err());
        negotiator.connect(no_tracks()).await.unwrap();

        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn test_token_failure_creates_no_session() {
        let tokens = Arc::new(MockTokens::new());
        tokens.fail_next();
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        let err = negotiator.connect(no_tracks()).await.err().unwrap();
        assert_eq!(err.setup_phase(), Some(SetupPhase::TokenExchange));
        assert!(factory.sessions().is_empty());
        assert_eq!(negotiator.state(), NegotiationState::Failed);
    }

    #[tokio::test]
    async fn test_control_channel_timeout() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        factory.never_open();
        let negotiator = negotiator(&tokens, &signaling, &factory);

        let err = negotiator.connect(no_tracks()).await.err().unwrap();
        assert_eq!(err.setup_phase(), Some(SetupPhase::ControlChannel));
        assert!(factory.sessions()[0].is_closed());
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        negotiator.disconnect().await;
        assert_eq!(negotiator.state(), NegotiationState::Idle);

        negotiator.connect(no_tracks()).await.unwrap();
        negotiator.disconnect().await;
        negotiator.disconnect().await;

        assert_eq!(negotiator.state(), NegotiationState::Closed);
        assert_eq!(factory.sessions()[0].close_calls(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let tokens = Arc::new(MockTokens::new());
        let signaling = Arc::new(MockSignaling::new());
        let factory = Arc::new(MockFactory::new());
        let negotiator = negotiator(&tokens, &signaling, &factory);

        negotiator.connect(no_tracks()).await.unwrap();
        negotiator.connect(no_tracks()).await.unwrap();

        let sessions = factory.sessions();
        assert!(sessions[0].is_closed());
        assert!(!sessions[1].is_closed());
    }
}
