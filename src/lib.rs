//! wavesync - visualisation audio temps réel
//!
//! Core of a waveform visualizer kept in sync with what the listener hears:
//! taps the playing signal without interrupting it, compensates for the output
//! latency of the device, and falls back to a synthetic envelope when the
//! source cannot be tapped.

pub mod audio;
pub mod canvas;
pub mod config;
pub mod media;
pub mod pipeline;
pub mod session;

pub use audio::{AnalysisContext, AnalyzerHandle, Availability, CpalEngine, SignalTapPolicy};
pub use canvas::{CanvasHost, Container, PixmapSurface, Surface, SurfaceSize};
pub use config::VisualizerConfig;
pub use pipeline::{LatencyCompensationBuffer, RenderLoop, SyntheticEnvelopeGenerator, VisualizationFrame};
pub use session::{Session, SessionStatus};
