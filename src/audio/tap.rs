//! Analyzer fed by the audio callback
//!
//! The callback side keeps the newest window in a ring that overwrites its
//! oldest samples, so a late pull always sees the current instant. The
//! callback never waits on the analyzer: if a pull holds the ring, samples are
//! parked in a private ring and flushed on the next callback.

use super::engine::Analyzer;
use ringbuf::{traits::*, HeapRb};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

type SharedRing = Arc<Mutex<HeapRb<f32>>>;

/// Creates the callback-side writer and the analyzer that reads from it
pub fn tap_channel(window_size: usize, smoothing: f32) -> (TapWriter, TapAnalyzer) {
    let window_size = window_size.max(1);
    let ring: SharedRing = Arc::new(Mutex::new(HeapRb::new(window_size)));
    let writer = TapWriter {
        ring: Arc::clone(&ring),
        parked: HeapRb::new(window_size),
        mono: Vec::new(),
    };
    (writer, TapAnalyzer::new(ring, window_size, smoothing))
}

/// Callback half of the tap
pub struct TapWriter {
    ring: SharedRing,
    parked: HeapRb<f32>,
    mono: Vec<f32>,
}

impl TapWriter {
    /// Reserves room for `frames` mono samples per block.
    ///
    /// Call before the stream starts so [`TapWriter::write`] never allocates.
    pub fn reserve(&mut self, frames: usize) {
        self.mono.reserve(frames);
    }

    /// Publishes one block of interleaved output, mixed down to mono
    pub fn write(&mut self, samples: &[f32], channels: u16) {
        downmix(samples, channels, &mut self.mono);

        let mut ring = match self.ring.try_lock() {
            Ok(ring) => ring,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.parked.push_slice_overwrite(&self.mono);
                return;
            }
        };

        if !self.parked.is_empty() {
            let (head, tail) = self.parked.as_slices();
            ring.push_slice_overwrite(head);
            ring.push_slice_overwrite(tail);
            self.parked.clear();
        }
        ring.push_slice_overwrite(&self.mono);
    }
}

struct TapState {
    /// Newest `window_size` samples, oldest first
    window: Vec<f32>,
    smoothed: Vec<f32>,
}

/// Time-domain analyzer over a mono tap
pub struct TapAnalyzer {
    window_size: usize,
    smoothing: f32,
    ring: SharedRing,
    state: Mutex<TapState>,
}

impl TapAnalyzer {
    fn new(ring: SharedRing, window_size: usize, smoothing: f32) -> Self {
        Self {
            window_size,
            smoothing: smoothing.clamp(0.0, 0.99),
            ring,
            state: Mutex::new(TapState {
                window: vec![0.0; window_size],
                smoothed: vec![0.0; window_size],
            }),
        }
    }
}

impl Analyzer for TapAnalyzer {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn pull_samples(&self, out: &mut [f32]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let TapState { window, smoothed } = &mut *state;

        {
            let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
            let (head, tail) = ring.as_slices();
            let held = head.len() + tail.len();
            // Until the ring has filled once, the window is left-padded with silence
            let pad = self.window_size - held;
            window[..pad].fill(0.0);
            window[pad..pad + head.len()].copy_from_slice(head);
            window[pad + head.len()..].copy_from_slice(tail);
        }

        let len = out.len().min(window.len());
        if self.smoothing > 0.0 {
            let s = self.smoothing;
            for (prev, &current) in smoothed.iter_mut().zip(window.iter()) {
                *prev = s * *prev + (1.0 - s) * current;
            }
            out[..len].copy_from_slice(&smoothed[..len]);
        } else {
            out[..len].copy_from_slice(&window[..len]);
        }
        out[len..].fill(0.0);
    }
}

/// Mixes interleaved frames down to mono into `out`
pub fn downmix(samples: &[f32], channels: u16, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(samples);
        return;
    }

    out.extend(
        samples
            .chunks(channels as usize)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
    );
}
