//! Media elements
//!
//! Identity of the attached playable element, plus a WAV-backed element for the demo binary.

mod source;
mod wav;

pub use source::{MediaSourceRef, SourceId};
pub use wav::{MediaError, PlaybackClock, WavElement};
