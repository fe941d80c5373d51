//! WAV-backed media element
//!
//! Stands in for the playback transport in the demo binary: the file is decoded
//! up front with hound. The output has at most one live capture, whose reader
//! drives the playback clock. Dropping the reader (a closed graph) hands the
//! output back, so a later graph resumes from the current position.

use super::source::MediaSourceRef;
use crate::audio::{EngineError, MediaElement, PcmSource};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors while opening a media file
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    Unsupported(String),

    #[error("Empty media file")]
    Empty,
}

/// Playback position and state shared by the transport and the audio callback
#[derive(Clone)]
pub struct PlaybackClock {
    frames: Arc<AtomicU64>,
    playing: Arc<AtomicBool>,
    sample_rate: u32,
    total_frames: u64,
}

impl PlaybackClock {
    fn new(sample_rate: u32, total_frames: u64) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            playing: Arc::new(AtomicBool::new(false)),
            sample_rate: sample_rate.max(1),
            total_frames,
        }
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::Release);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
    }

    /// Playing and not past the end
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire) && !self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.frames.load(Ordering::Acquire) >= self.total_frames
    }

    /// Seconds since the start of the media
    pub fn position(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_frames as f64 / f64::from(self.sample_rate))
    }

    /// Moves to `seconds`, clamped to the media bounds
    pub fn seek(&self, seconds: f64) {
        let frame = (seconds.max(0.0) * f64::from(self.sample_rate)) as u64;
        self.frames
            .store(frame.min(self.total_frames), Ordering::Release);
    }

    /// Advances by wall-clock time when nothing consumes the audio
    pub fn advance(&self, elapsed: Duration) {
        if !self.is_playing() {
            return;
        }
        let frames = (elapsed.as_secs_f64() * f64::from(self.sample_rate)) as u64;
        self.advance_frames(frames);
    }

    fn advance_frames(&self, frames: u64) -> u64 {
        let total = self.total_frames;
        // Returns the position before the advance
        self.frames
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(frames).min(total))
            })
            .unwrap_or_else(|current| current)
    }
}

/// Decoded WAV file exposed as a media element
pub struct WavElement {
    source: MediaSourceRef,
    clock: PlaybackClock,
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
    captured: Arc<AtomicBool>,
}

impl WavElement {
    /// Decodes `path`, served to the page as `url`
    pub fn open(path: &Path, url: impl Into<String>) -> Result<Self, MediaError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(MediaError::Unsupported("zero channels".to_string()));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(MediaError::Unsupported(format!(
                        "{} bits per sample",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };
        if samples.is_empty() {
            return Err(MediaError::Empty);
        }

        let total_frames = (samples.len() / usize::from(spec.channels)) as u64;
        let clock = PlaybackClock::new(spec.sample_rate, total_frames);
        tracing::info!(
            "Media opened: {} ({} Hz, {} ch, {:.1}s)",
            path.display(),
            spec.sample_rate,
            spec.channels,
            clock.duration().as_secs_f64()
        );

        Ok(Self {
            source: MediaSourceRef::new(url),
            clock,
            samples: samples.into(),
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            captured: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// True while a processing graph owns the output
    pub fn is_captured(&self) -> bool {
        self.captured.load(Ordering::Acquire)
    }
}

impl MediaElement for WavElement {
    fn source_ref(&self) -> MediaSourceRef {
        self.source.clone()
    }

    fn capture_output(&self) -> Result<Box<dyn PcmSource>, EngineError> {
        if self.captured.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyCaptured);
        }
        tracing::debug!("Media output captured: {}", self.source.id);
        Ok(Box::new(WavPcm {
            samples: Arc::clone(&self.samples),
            channels: self.channels,
            sample_rate: self.sample_rate,
            clock: self.clock.clone(),
            captured: Arc::clone(&self.captured),
        }))
    }
}

/// Reader over the decoded samples, positioned by the shared clock
struct WavPcm {
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
    clock: PlaybackClock,
    captured: Arc<AtomicBool>,
}

impl Drop for WavPcm {
    fn drop(&mut self) {
        self.captured.store(false, Ordering::Release);
    }
}

impl PcmSource for WavPcm {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fill(&mut self, out: &mut [f32]) {
        let channels = usize::from(self.channels);
        if !self.clock.is_playing() {
            out.fill(0.0);
            return;
        }

        let frames = (out.len() / channels) as u64;
        let start = self.clock.advance_frames(frames) as usize * channels;
        let available = self.samples.len().saturating_sub(start).min(out.len());
        out[..available].copy_from_slice(&self.samples[start..start + available]);
        out[available..].fill(0.0);
    }
}
