//! Audio device I/O using cpal.
//!
//! Provides:
//! - [`MicrophoneInput`] for capture, feeding a [`FrameAssembler`]
//! - [`SpeakerOutput`] for playback, pulling from any [`Pullable<i16>`]
//!
//! `cpal::Stream` is not `Send`, so each stream lives on its own thread for
//! as long as its handle exists. Dropping the handle stops the stream.

use std::thread::JoinHandle;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange};
use crossbeam::channel::{self, Sender};
use dasp_sample::FromSample;
use tracing::{debug, error, info, warn};

use super::capture::{CaptureReceiver, FrameAssembler, capture_channel};
use crate::audio::AudioSample;
use crate::config::AudioConfig;
use crate::pipeline::{Pullable, Pushable};

fn find_device<I: Iterator<Item = Device>>(devices: I, name: &str) -> Option<Device> {
    devices
        .filter_map(|d| d.name().ok().map(|n| (d, n)))
        .find(|(_, n)| n == name)
        .map(|(d, _)| d)
}

fn get_input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let devices = host
                .input_devices()
                .context("Failed to enumerate input devices")?;
            find_device(devices, name)
                .with_context(|| format!("Input device {:?} not found", name))
        }
        None => host
            .default_input_device()
            .context("No default input device available"),
    }
}

fn get_output_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let devices = host
                .output_devices()
                .context("Failed to enumerate output devices")?;
            find_device(devices, name)
                .with_context(|| format!("Output device {:?} not found", name))
        }
        None => host
            .default_output_device()
            .context("No default output device available"),
    }
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Picks a supported configuration running at `sample_rate`, preferring the
/// requested channel count and then the friendliest sample format.
fn pick_config<I>(ranges: I, sample_rate: u32, channels: u16, exact_channels: bool) -> Result<SupportedStreamConfig>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    let rate = SampleRate(sample_rate);
    ranges
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .filter(|r| !exact_channels || r.channels() == channels)
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (r, rank)))
        .min_by_key(|(r, rank)| (r.channels().abs_diff(channels), *rank))
        .map(|(r, _)| r.with_sample_rate(rate))
        .with_context(|| {
            format!(
                "Device has no supported configuration at {} Hz with {} channel(s)",
                sample_rate, channels
            )
        })
}

/// Owns the thread that keeps a cpal stream alive.
struct StreamHost {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHost {
    /// Builds and starts a stream on a dedicated thread. `build` receives a
    /// sender that stops the stream when signalled (used by error callbacks).
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce(Sender<()>) -> Result<cpal::Stream> + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::unbounded::<()>();
        let (ready_tx, ready_rx) = channel::bounded::<Result<()>>(1);
        let error_stop = stop_tx.clone();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build(error_stop).and_then(|stream| {
                    stream.play().context("Failed to start audio stream")?;
                    Ok(stream)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        ready_rx
            .recv()
            .context("Audio thread exited during setup")??;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }
}

impl Drop for StreamHost {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Captures audio from an input device (microphone).
///
/// Frames come out of the [`CaptureReceiver`] returned by [`start`](Self::start).
/// Capture stops when this handle is dropped or the device fails.
pub struct MicrophoneInput {
    _host: StreamHost,
}

impl MicrophoneInput {
    pub fn start(config: &AudioConfig) -> Result<(Self, CaptureReceiver)> {
        let device = get_input_device(config.input_device.as_deref())?;
        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let supported = pick_config(
            device
                .supported_input_configs()
                .context("Failed to query input configs")?,
            config.sample_rate,
            config.channels,
            false,
        )?;
        debug!("Input config: {supported:?}");

        if supported.channels() != config.channels {
            warn!(
                "Input device records {} channel(s), remixing to {}",
                supported.channels(),
                config.channels
            );
        }

        let (assembler, receiver) = capture_channel(config, supported.channels());
        let host = StreamHost::spawn("mic-capture", move |stop| {
            build_input_stream(&device, &supported, assembler, stop)
        })?;

        info!("Microphone capture started");
        Ok((Self { _host: host }, receiver))
    }
}

fn build_input_stream(
    device: &Device,
    supported: &SupportedStreamConfig,
    assembler: FrameAssembler,
    stop: Sender<()>,
) -> Result<cpal::Stream> {
    let config = supported.config();
    match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(device, &config, assembler, stop),
        SampleFormat::I16 => build_input::<i16>(device, &config, assembler, stop),
        SampleFormat::U16 => build_input::<u16>(device, &config, assembler, stop),
        format => anyhow::bail!("Unsupported input sample format: {:?}", format),
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut assembler: FrameAssembler,
    stop: Sender<()>,
) -> Result<cpal::Stream>
where
    T: AudioSample + cpal::SizedSample,
{
    let errors = assembler.device_error_handle();
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|s| s.to_f64_normalized() as f32));
                assembler.push(&scratch);
            },
            move |err| {
                error!("An error occurred on the input audio stream: {}", err);
                errors.report(err.to_string());
                let _ = stop.send(());
            },
            None,
        )
        .context("Failed to build input stream")?;
    Ok(stream)
}

/// Plays audio to an output device (speakers).
pub struct SpeakerOutput {
    _host: StreamHost,
}

impl SpeakerOutput {
    pub fn start<P>(config: &AudioConfig, source: P) -> Result<Self>
    where
        P: Pullable<i16> + 'static,
    {
        let device = get_output_device(config.output_device.as_deref())?;
        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let supported = pick_config(
            device
                .supported_output_configs()
                .context("Failed to query output configs")?,
            config.sample_rate,
            config.channels,
            true,
        )?;
        debug!("Output config: {supported:?}");

        let host = StreamHost::spawn("speaker-playback", move |stop| {
            build_output_stream(&device, &supported, source, stop)
        })?;

        info!("Speaker playback started");
        Ok(Self { _host: host })
    }
}

fn build_output_stream<P: Pullable<i16> + 'static>(
    device: &Device,
    supported: &SupportedStreamConfig,
    source: P,
    stop: Sender<()>,
) -> Result<cpal::Stream> {
    let config = supported.config();
    match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32, P>(device, &config, source, stop),
        SampleFormat::I16 => build_output::<i16, P>(device, &config, source, stop),
        SampleFormat::U16 => build_output::<u16, P>(device, &config, source, stop),
        format => anyhow::bail!("Unsupported output sample format: {:?}", format),
    }
}

fn build_output<T, P>(
    device: &Device,
    config: &StreamConfig,
    mut source: P,
    stop: Sender<()>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + FromSample<i16>,
    P: Pullable<i16> + 'static,
{
    let mut scratch: Vec<i16> = Vec::new();

    debug!("Building output stream");
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0);
                }
                let pcm = &mut scratch[..data.len()];
                source.pull(pcm);
                for (slot, &sample) in data.iter_mut().zip(pcm.iter()) {
                    *slot = T::from_sample_(sample);
                }
            },
            move |err| {
                error!("An error occurred on the output audio stream: {}", err);
                let _ = stop.send(());
            },
            None,
        )
        .context("Failed to build output stream")?;
    Ok(stream)
}
