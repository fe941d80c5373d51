//! Capability traits between the analysis core and an audio engine
//!
//! The platform backend (cpal) and the test doubles both plug in here, so the
//! context and render loop never touch a real device directly.

use crate::config::AnalysisConfig;
use crate::media::MediaSourceRef;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Engine-side failures while building or driving a processing graph
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Media element output already captured")]
    AlreadyCaptured,

    #[error("Audio thread exited")]
    ThreadExited,
}

/// Decoded PCM handed over by a media element once it has been tapped
pub trait PcmSource: Send {
    fn channels(&self) -> u16;

    fn sample_rate(&self) -> u32;

    /// Fills `out` with interleaved samples.
    ///
    /// Writes silence while the transport is paused or exhausted.
    fn fill(&mut self, out: &mut [f32]);
}

/// A playable element owned by the playback transport
#[cfg_attr(test, mockall::automock)]
pub trait MediaElement: Send + Sync {
    /// Identity and resolved URL of what is currently attached
    fn source_ref(&self) -> MediaSourceRef;

    /// Reroutes the element's decoded output into the returned source.
    ///
    /// An element has at most one live capture: while the returned source
    /// exists, later calls fail with [`EngineError::AlreadyCaptured`]. Dropping
    /// it (closing the graph) makes the output capturable again.
    fn capture_output(&self) -> Result<Box<dyn PcmSource>, EngineError>;
}

/// Read-only view of the most recent signal window
#[cfg_attr(test, mockall::automock)]
pub trait Analyzer: Send + Sync {
    /// Number of samples produced by each pull
    fn window_size(&self) -> usize;

    /// Copies the latest window into `out` (last value wins, nothing is queued)
    fn pull_samples(&self, out: &mut [f32]);
}

/// A live processing graph: media tap -> analyzer -> audible output
pub trait ProcessingGraph: Send {
    /// Starts or resumes processing. Engines may suspend on inactivity.
    fn resume(&mut self) -> Result<(), EngineError>;

    fn analyzer(&self) -> Arc<dyn Analyzer>;

    /// Intrinsic processing latency of the engine, if known
    fn base_latency(&self) -> Option<Duration>;

    /// Device output latency, if known
    fn output_latency(&self) -> Option<Duration>;

    /// Releases the device resources. Idempotent.
    fn close(&mut self);
}

/// Factory for processing graphs
#[cfg_attr(test, mockall::automock)]
pub trait AudioEngine: Send + Sync {
    /// Captures `element` and wires it through an analyzer to the output.
    ///
    /// Blocking: callers run it off the async executor.
    fn build_graph(
        &self,
        element: Arc<dyn MediaElement>,
        config: &AnalysisConfig,
    ) -> Result<Box<dyn ProcessingGraph>, EngineError>;
}
