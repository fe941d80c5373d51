//! Synthetic envelope used when the signal cannot be tapped
//!
//! A deterministic sum of a few sinusoids: the visualization keeps moving
//! while playing even though no real samples are available.

use crate::config::EnvelopeConfig;
use std::f64::consts::TAU;

/// Level returned when no partial carries any energy
const MIDPOINT: f32 = 0.5;

/// Pure function of elapsed time, bounded to `[0, 1]`
#[derive(Debug, Clone)]
pub struct SyntheticEnvelopeGenerator {
    config: EnvelopeConfig,
    norm: f64,
}

impl SyntheticEnvelopeGenerator {
    pub fn new(config: EnvelopeConfig) -> Self {
        let norm = config
            .partials
            .iter()
            .map(|p| f64::from(p.amplitude.abs()))
            .sum();
        Self { config, norm }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Envelope level at `seconds` of elapsed time
    pub fn level(&self, seconds: f64) -> f32 {
        if !seconds.is_finite() || self.norm <= f64::EPSILON {
            return MIDPOINT;
        }

        let sum: f64 = self
            .config
            .partials
            .iter()
            .map(|p| {
                let amplitude = f64::from(p.amplitude.abs());
                amplitude * (TAU * f64::from(p.frequency_hz) * seconds + f64::from(p.phase)).sin()
            })
            .sum();

        let level = (0.5 + 0.5 * sum / self.norm) as f32;
        if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            MIDPOINT
        }
    }

    /// Writes the displayed wave for `level` at `seconds` into `out`, values in `[-1, 1]`
    pub fn waveform(&self, seconds: f64, level: f32, out: &mut Vec<f32>) {
        let points = self.config.points.max(1);
        let level = level.clamp(0.0, 1.0);
        let amplitude = (0.3 + 0.7 * level) * (0.5 + 0.5 * level);
        let phase = if seconds.is_finite() {
            seconds * f64::from(self.config.phase_speed)
        } else {
            0.0
        };
        let cycles = f64::from(self.config.cycles);

        out.clear();
        out.extend((0..=points).map(|i| {
            let x = i as f64 / points as f64;
            ((x * TAU * cycles + phase).sin() as f32) * amplitude
        }));
    }
}

impl Default for SyntheticEnvelopeGenerator {
    fn default() -> Self {
        Self::new(EnvelopeConfig::default())
    }
}
