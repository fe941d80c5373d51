//! Audio analysis subsystem
//!
//! Taps the transport's output, gates the tap on the page origin and publishes
//! an analyzer for the render loop.

mod context;
mod convert;
mod cpal_engine;
mod engine;
mod handle;
mod policy;
mod tap;

pub use context::{AnalysisContext, Availability, ContextState};
pub use convert::{FormatAdapter, StreamFormat};
pub use cpal_engine::{CpalEngine, CpalGraph, CpalOutput};
pub use engine::{Analyzer, AudioEngine, EngineError, MediaElement, PcmSource, ProcessingGraph};
pub use handle::{AnalyzerCell, AnalyzerHandle};
pub use policy::{evaluate, DenyReason, SignalTapPolicy, TapDecision};
pub use tap::{downmix, tap_channel, TapAnalyzer, TapWriter};

#[cfg(test)]
pub(crate) use engine::{MockAnalyzer, MockAudioEngine, MockMediaElement};
