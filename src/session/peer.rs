//! WebRTC-backed media session.
//!
//! [`PeerSessionFactory`] builds one `RTCPeerConnection` per connect attempt
//! with:
//! - Opus registered as the only audio codec
//! - a local Opus track fed by the encode loop
//! - the control data channel
//! - remote audio tracks handed to the caller's handler

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::media::{
    CodecParameters, ControlChannel, LocalTrack, MediaSession, MediaSessionFactory, RemoteTrack,
    RemoteTrackHandler, TrackError,
};
use crate::audio::frame::{EncodedFrame, ReceivedFrame};
use crate::config::RealtimeConfig;

const OPUS_PAYLOAD_TYPE: u8 = 111;
const OPUS_CLOCK_RATE: u32 = 48000;
const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";
const STREAM_ID: &str = "realtime-voice";

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: OPUS_CLOCK_RATE,
        // Opus is always signalled as two channels on the wire.
        channels: 2,
        sdp_fmtp_line: OPUS_FMTP.to_owned(),
        rtcp_feedback: vec![],
    }
}

pub struct PeerSessionFactory {
    config: RealtimeConfig,
}

impl PeerSessionFactory {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaSessionFactory for PeerSessionFactory {
    async fn create(&self, on_remote_track: RemoteTrackHandler) -> Result<Arc<dyn MediaSession>> {
        let session = PeerSession::new(&self.config, on_remote_track).await?;
        Ok(Arc::new(session))
    }
}

pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    local: Arc<WebRtcLocalTrack>,
    control: Arc<DataControlChannel>,
    gathering_timeout: Duration,
}

impl PeerSession {
    async fn new(config: &RealtimeConfig, on_remote_track: RemoteTrackHandler) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .context("Failed to register Opus codec")?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("Failed to register interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .context("Failed to create peer connection")?,
        );

        match Self::attach(&pc, config, on_remote_track).await {
            Ok((local, control)) => Ok(Self {
                pc,
                local,
                control,
                gathering_timeout: config.ice_gathering_timeout(),
            }),
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    warn!("Failed to close half-built peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn attach(
        pc: &Arc<RTCPeerConnection>,
        config: &RealtimeConfig,
        on_remote_track: RemoteTrackHandler,
    ) -> Result<(Arc<WebRtcLocalTrack>, Arc<DataControlChannel>)> {
        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            format!("mic-{}", Uuid::new_v4()),
            STREAM_ID.to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("Failed to add local audio track")?;

        // RTCP has to be drained for interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!("RTCP reader finished");
        });

        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let handler = on_remote_track.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    warn!("Ignoring non-audio remote track {}", track.id());
                    return;
                }
                info!(
                    "Remote audio track {} ({})",
                    track.id(),
                    track.codec().capability.mime_type
                );
                handler(Arc::new(WebRtcRemoteTrack { track }));
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state| {
            info!("Peer connection state changed: {}", state);
            Box::pin(async {})
        }));

        pc.on_ice_connection_state_change(Box::new(move |state| {
            debug!("ICE connection state changed: {}", state);
            Box::pin(async {})
        }));

        let dc = pc
            .create_data_channel(&config.control_channel_label, None)
            .await
            .context("Failed to create control data channel")?;

        Ok((
            Arc::new(WebRtcLocalTrack { track }),
            Arc::new(DataControlChannel::new(dc)),
        ))
    }
}

#[async_trait]
impl MediaSession for PeerSession {
    fn local_track(&self) -> Arc<dyn LocalTrack> {
        self.local.clone()
    }

    fn control_channel(&self) -> Arc<dyn ControlChannel> {
        self.control.clone()
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("Failed to create offer")?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .context("Failed to set local description")?;

        if tokio::time::timeout(self.gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering did not complete within {:?}, sending offer with the candidates found so far",
                self.gathering_timeout
            );
        }

        let description = self
            .pc
            .local_description()
            .await
            .context("Local description missing after setting offer")?;
        Ok(description.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp).context("Failed to parse answer")?;
        self.pc
            .set_remote_description(answer)
            .await
            .context("Failed to set remote description")
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.control.close().await {
            debug!("Control channel close: {:#}", e);
        }
        self.pc
            .close()
            .await
            .context("Failed to close peer connection")
    }
}

pub struct WebRtcLocalTrack {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl LocalTrack for WebRtcLocalTrack {
    async fn send_frame(&self, frame: &EncodedFrame) -> Result<()> {
        let sample = Sample {
            data: frame.data.clone(),
            duration: frame.duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .context("Failed to write sample to local track")
    }
}

pub struct WebRtcRemoteTrack {
    track: Arc<TrackRemote>,
}

fn classify_read_error(err: webrtc::Error) -> TrackError {
    match err {
        webrtc::Error::ErrClosedPipe | webrtc::Error::ErrConnectionClosed => TrackError::Ended,
        other => {
            let message = other.to_string();
            if message.contains("EOF") {
                TrackError::Ended
            } else {
                TrackError::Transport(message)
            }
        }
    }
}

#[async_trait]
impl RemoteTrack for WebRtcRemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn codec(&self) -> CodecParameters {
        let codec = self.track.codec();
        CodecParameters {
            mime_type: codec.capability.mime_type,
            clock_rate: codec.capability.clock_rate,
            channels: codec.capability.channels,
        }
    }

    async fn read_frame(&self) -> Result<ReceivedFrame, TrackError> {
        let (packet, _attributes) = self.track.read_rtp().await.map_err(classify_read_error)?;
        Ok(ReceivedFrame {
            sequence: packet.header.sequence_number,
            payload: packet.payload,
        })
    }
}

/// Logs an event received on the control channel by its `type` field.
fn log_control_event(label: &str, data: &[u8]) -> Option<String> {
    let event: serde_json::Value = match serde_json::from_slice(data) {
        Ok(event) => event,
        Err(e) => {
            debug!("Non-JSON message on '{}': {}", label, e);
            return None;
        }
    };
    let kind = event.get("type").and_then(|t| t.as_str())?.to_owned();
    info!("Control event on '{}': {}", label, kind);
    debug!("Control payload: {}", event);
    Some(kind)
}

pub struct DataControlChannel {
    dc: Arc<RTCDataChannel>,
    open: watch::Receiver<bool>,
}

impl DataControlChannel {
    fn new(dc: Arc<RTCDataChannel>) -> Self {
        let (open_tx, open_rx) = watch::channel(false);
        let open_tx = Arc::new(open_tx);

        let label = dc.label().to_owned();
        let tx = open_tx.clone();
        dc.on_open(Box::new(move || {
            info!("Control channel '{}' open", label);
            let _ = tx.send(true);
            Box::pin(async {})
        }));

        let label = dc.label().to_owned();
        let tx = open_tx;
        dc.on_close(Box::new(move || {
            info!("Control channel '{}' closed", label);
            let _ = tx.send(false);
            Box::pin(async {})
        }));

        let label = dc.label().to_owned();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            log_control_event(&label, &msg.data);
            Box::pin(async {})
        }));

        Self { dc, open: open_rx }
    }
}

#[async_trait]
impl ControlChannel for DataControlChannel {
    fn label(&self) -> String {
        self.dc.label().to_owned()
    }

    async fn wait_open(&self, timeout: Duration) -> Result<()> {
        let mut open = self.open.clone();
        tokio::time::timeout(timeout, open.wait_for(|open| *open))
            .await
            .with_context(|| format!("Control channel did not open within {:?}", timeout))?
            .context("Control channel dropped before opening")?;
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .context("Failed to send on control channel")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .context("Failed to close control channel")
    }
}
