//! Per-frame visualization pipeline
//!
//! Latency compensation, synthetic fallback and the render loop tying them to
//! the analyzer.

mod compensation;
mod envelope;
mod render_loop;

pub use compensation::{LatencyCompensationBuffer, Snapshot};
pub use envelope::SyntheticEnvelopeGenerator;
pub use render_loop::{FrameProps, PropsCell, RenderLoop, VisualizationFrame, UNAVAILABLE_CAPTION};
