//! Processing graph on the default output device
//!
//! Uses cpal for cross-platform output. The element's PCM is converted to the
//! device's default format and written to the device, and the same block is
//! mixed down into the analyzer tap on the way, so analysis never silences
//! playback. cpal streams are not `Send`, so each output runs its stream in a
//! dedicated thread driven by commands.

use super::convert::{FormatAdapter, StreamFormat};
use super::engine::{Analyzer, AudioEngine, EngineError, MediaElement, PcmSource, ProcessingGraph};
use super::tap::{tap_channel, TapAnalyzer, TapWriter};
use crate::config::AnalysisConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest callback converted or tapped in one pass, in frames
const MAX_BLOCK_FRAMES: u32 = 8192;

/// cpal-backed engine
#[derive(Debug, Default, Clone)]
pub struct CpalEngine;

impl CpalEngine {
    pub fn new() -> Self {
        Self
    }

    /// List available output devices
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    /// Plays `element` on the default device without any analysis tap.
    ///
    /// For sources the visualizer may not read: audio stays audible while the
    /// view shows the synthetic envelope.
    pub fn play_untapped(
        &self,
        element: &dyn MediaElement,
        config: &AnalysisConfig,
    ) -> Result<CpalOutput, EngineError> {
        let mut output = CpalOutput::open(element, None, config.clone())?;
        output.resume()?;
        Ok(output)
    }
}

impl AudioEngine for CpalEngine {
    fn build_graph(
        &self,
        element: Arc<dyn MediaElement>,
        config: &AnalysisConfig,
    ) -> Result<Box<dyn ProcessingGraph>, EngineError> {
        let graph = CpalGraph::start(element.as_ref(), config.clone())?;
        Ok(Box::new(graph))
    }
}

/// Commands to control the output thread
enum OutputCommand {
    Resume(mpsc::Sender<Result<Option<Duration>, EngineError>>),
    Close,
}

/// Output stream running in its own thread
pub struct CpalOutput {
    command_tx: mpsc::Sender<OutputCommand>,
    thread_handle: Option<JoinHandle<()>>,
    base_latency: Option<Duration>,
    output_latency: Option<Duration>,
}

impl CpalOutput {
    /// Captures the element and builds the stream, paused until [`CpalOutput::resume`]
    fn open(
        element: &dyn MediaElement,
        tap: Option<TapWriter>,
        config: AnalysisConfig,
    ) -> Result<Self, EngineError> {
        let source = element.capture_output()?;
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread_handle = thread::Builder::new()
            .name("wavesync-output".to_string())
            .spawn(move || run_output(source, tap, config, ready_tx, command_rx))
            .map_err(|e| EngineError::StreamError(e.to_string()))?;

        let base_latency = match ready_rx.recv() {
            Ok(Ok(base)) => base,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(EngineError::ThreadExited);
            }
        };

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
            base_latency,
            output_latency: None,
        })
    }

    /// Starts the stream; the first call also measures the device delay
    pub fn resume(&mut self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.command_tx
            .send(OutputCommand::Resume(reply_tx))
            .map_err(|_| EngineError::ThreadExited)?;
        let measured = reply_rx.recv().map_err(|_| EngineError::ThreadExited)??;
        if self.output_latency.is_none() {
            self.output_latency = measured;
        }
        Ok(())
    }

    /// Stops the stream and hands the element's output back. Idempotent.
    pub fn close(&mut self) {
        let _ = self.command_tx.send(OutputCommand::Close);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Output stream released");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Output stream with an analyzer tap
pub struct CpalGraph {
    output: CpalOutput,
    analyzer: Arc<TapAnalyzer>,
}

impl CpalGraph {
    /// Captures the element and builds the stream, paused until [`ProcessingGraph::resume`]
    pub fn start(element: &dyn MediaElement, config: AnalysisConfig) -> Result<Self, EngineError> {
        let (writer, analyzer) = tap_channel(config.window_size, config.smoothing);
        let output = CpalOutput::open(element, Some(writer), config)?;
        Ok(Self {
            output,
            analyzer: Arc::new(analyzer),
        })
    }
}

impl ProcessingGraph for CpalGraph {
    fn resume(&mut self) -> Result<(), EngineError> {
        self.output.resume()
    }

    fn analyzer(&self) -> Arc<dyn Analyzer> {
        self.analyzer.clone()
    }

    fn base_latency(&self) -> Option<Duration> {
        self.output.base_latency
    }

    fn output_latency(&self) -> Option<Duration> {
        self.output.output_latency
    }

    fn close(&mut self) {
        self.output.close();
    }
}

/// Picks a fixed low-latency buffer when the device reports a supported range
fn buffer_size_for(supported: &cpal::SupportedBufferSize, preferred: u32) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed(preferred.clamp(*min, (*max).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

/// Frames per conversion pass: the fixed buffer, or the cap when the device decides
fn block_frames_for(buffer_size: &cpal::BufferSize) -> usize {
    match buffer_size {
        cpal::BufferSize::Fixed(frames) => (*frames).clamp(1, MAX_BLOCK_FRAMES) as usize,
        cpal::BufferSize::Default => MAX_BLOCK_FRAMES as usize,
    }
}

fn base_latency_of(buffer_size: &cpal::BufferSize, sample_rate: u32) -> Option<Duration> {
    match buffer_size {
        cpal::BufferSize::Fixed(frames) if sample_rate > 0 => {
            Some(Duration::from_nanos(
                u64::from(*frames) * 1_000_000_000 / u64::from(sample_rate),
            ))
        }
        _ => None,
    }
}

/// Run the output stream (in a dedicated thread)
fn run_output(
    mut source: Box<dyn PcmSource>,
    mut tap: Option<TapWriter>,
    config: AnalysisConfig,
    ready_tx: mpsc::SyncSender<Result<Option<Duration>, EngineError>>,
    command_rx: mpsc::Receiver<OutputCommand>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(EngineError::NoDevice));
        return;
    };

    tracing::info!("Audio device: {:?}", device.name());

    // Use the device's default configuration
    let supported = match device.default_output_config() {
        Ok(supported) => supported,
        Err(e) => {
            let _ = ready_tx.send(Err(EngineError::ConfigError(e.to_string())));
            return;
        }
    };

    let media = StreamFormat::new(source.sample_rate(), source.channels());
    let device_format = StreamFormat::new(supported.sample_rate().0, supported.channels());
    let buffer_size = buffer_size_for(supported.buffer_size(), config.preferred_buffer_frames);
    let base_latency = base_latency_of(&buffer_size, device_format.sample_rate);
    let block_frames = block_frames_for(&buffer_size);

    tracing::info!(
        "Output config: {}Hz {}ch -> {}Hz {}ch, buffer {:?}",
        media.sample_rate,
        media.channels,
        device_format.sample_rate,
        device_format.channels,
        buffer_size
    );

    let stream_config = cpal::StreamConfig {
        channels: device_format.channels,
        sample_rate: cpal::SampleRate(device_format.sample_rate),
        buffer_size,
    };

    let mut adapter = FormatAdapter::new(media, device_format, block_frames);
    if let Some(ref mut tap) = tap {
        tap.reserve(block_frames);
    }
    let channels = device_format.channels;
    let block_len = block_frames * usize::from(channels);

    // Only the first measurement is kept, later sends fail on the full channel
    let (latency_tx, latency_rx) = mpsc::sync_channel::<Duration>(1);

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
            adapter.render(source.as_mut(), data);

            if let Some(ref mut tap) = tap {
                for block in data.chunks(block_len) {
                    tap.write(block, channels);
                }
            }

            let timestamp = info.timestamp();
            if let Some(delay) = timestamp.playback.duration_since(&timestamp.callback) {
                let _ = latency_tx.try_send(delay);
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(EngineError::StreamError(e.to_string())));
            return;
        }
    };

    if ready_tx.send(Ok(base_latency)).is_err() {
        return;
    }

    let mut measured: Option<Duration> = None;
    for command in command_rx.iter() {
        match command {
            OutputCommand::Resume(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| EngineError::StreamError(e.to_string()));
                if result.is_ok() && measured.is_none() {
                    measured = latency_rx.recv_timeout(config.latency_probe()).ok();
                }
                let _ = reply.send(result.map(|_| measured));
            }
            OutputCommand::Close => break,
        }
    }

    drop(stream);
    tracing::debug!("Output thread exiting");
}
