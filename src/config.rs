//! Visualizer configuration
//!
//! Every field has a default, so partial JSON files are accepted.

use crate::canvas::Rgba;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration persistence errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    /// Origin of the hosting page, compared against media URLs before tapping
    pub page_origin: String,
    pub analysis: AnalysisConfig,
    pub compensation: CompensationConfig,
    pub envelope: EnvelopeConfig,
    pub render: RenderConfig,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            page_origin: "http://localhost:8080".to_string(),
            analysis: AnalysisConfig::default(),
            compensation: CompensationConfig::default(),
            envelope: EnvelopeConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl VisualizerConfig {
    /// Load config from disk, or return defaults
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => {
                        tracing::info!("Config loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => tracing::warn!("Invalid config, using defaults: {}", e),
                },
                Err(e) => tracing::warn!("Cannot read config: {}", e),
            }
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
        }
        Self::default()
    }

    /// Save config to disk as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }
}

/// Processing graph settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples per analyzer pull (256 @ 44.1kHz ≈ 5.8ms)
    pub window_size: usize,
    /// Temporal smoothing between pulls, 0 = each pull reflects the current instant
    pub smoothing: f32,
    /// Device buffer requested for low latency, clamped to what the device supports
    pub preferred_buffer_frames: u32,
    /// How long to wait for the first callback when measuring output latency
    pub latency_probe_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 256,
            smoothing: 0.0,
            preferred_buffer_frames: 256,
            latency_probe_ms: 250,
        }
    }
}

impl AnalysisConfig {
    pub fn latency_probe(&self) -> Duration {
        Duration::from_millis(self.latency_probe_ms)
    }
}

/// Latency compensation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationConfig {
    /// Retained snapshots (~2s at 60fps)
    pub capacity: usize,
    /// Output latency at or below this is drawn uncompensated
    pub latency_threshold_ms: f64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            capacity: 120,
            latency_threshold_ms: 10.0,
        }
    }
}

impl CompensationConfig {
    pub fn latency_threshold(&self) -> Duration {
        Duration::from_micros((self.latency_threshold_ms.max(0.0) * 1000.0).round() as u64)
    }
}

/// One sinusoid of the synthetic envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub amplitude: f32,
    pub frequency_hz: f32,
    /// Phase offset in radians
    pub phase: f32,
}

/// Synthetic fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub partials: Vec<Partial>,
    /// Sine cycles across the surface width
    pub cycles: f32,
    /// Phase advance of the displayed wave, in radians per second
    pub phase_speed: f32,
    /// Points of the displayed wave
    pub points: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            partials: vec![
                Partial {
                    amplitude: 0.6,
                    frequency_hz: 0.31,
                    phase: 0.0,
                },
                Partial {
                    amplitude: 0.3,
                    frequency_hz: 0.87,
                    phase: 1.3,
                },
                Partial {
                    amplitude: 0.1,
                    frequency_hz: 2.3,
                    phase: 2.1,
                },
            ],
            cycles: 4.0,
            phase_speed: 3.0,
            points: 1024,
        }
    }
}

/// Drawing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub frame_rate: u32,
    pub background: Rgba,
    pub stroke: Rgba,
    pub stroke_width: f32,
    /// Wave amplitude as a fraction of the surface height
    pub amplitude: f32,
    pub caption: Rgba,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            background: Rgba::new(229, 57, 53, 255),
            stroke: Rgba::new(255, 255, 255, 220),
            stroke_width: 2.0,
            amplitude: 0.35,
            caption: Rgba::new(255, 255, 255, 255),
        }
    }
}

impl RenderConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate.max(1)))
    }
}
