//! Display-clock driven render loop
//!
//! Once per frame the loop reads the shared analyzer cell and the frame props,
//! decides between the real (possibly latency compensated) signal, the
//! synthetic envelope and the idle visual, and draws it. It owns no audio state.

use super::compensation::{LatencyCompensationBuffer, Snapshot};
use super::envelope::SyntheticEnvelopeGenerator;
use crate::audio::{AnalyzerCell, AnalyzerHandle, Availability};
use crate::canvas::Surface;
use crate::config::{RenderConfig, VisualizerConfig};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// Shown while idle when the signal cannot be tapped for the current source
pub const UNAVAILABLE_CAPTION: &str = "Cross-origin audio: waveform only when same origin";

/// Transport and analysis state read by the render loop every frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameProps {
    pub is_playing: bool,
    /// Seconds
    pub playback_position: f64,
    pub output_latency: Duration,
    pub availability: Availability,
}

impl Default for FrameProps {
    fn default() -> Self {
        Self {
            is_playing: false,
            playback_position: 0.0,
            output_latency: Duration::ZERO,
            availability: Availability::Pending,
        }
    }
}

/// Shared cell for [`FrameProps`], written by the transport side
#[derive(Clone)]
pub struct PropsCell {
    inner: Arc<ArcSwap<FrameProps>>,
}

impl PropsCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(FrameProps::default())),
        }
    }

    pub fn load(&self) -> Arc<FrameProps> {
        self.inner.load_full()
    }

    pub fn store(&self, props: FrameProps) {
        self.inner.store(Arc::new(props));
    }

    /// Read-modify-write of the current props
    pub fn update(&self, mut f: impl FnMut(&mut FrameProps)) {
        self.inner.rcu(|current| {
            let mut next = FrameProps::clone(current);
            f(&mut next);
            next
        });
    }
}

impl Default for PropsCell {
    fn default() -> Self {
        Self::new()
    }
}

/// What one tick decided to draw
#[derive(Debug, Clone, PartialEq)]
pub enum VisualizationFrame {
    /// Analyzer output, looked up `output_latency` in the past when `compensated`
    Real { snapshot: Snapshot, compensated: bool },
    Synthetic { level: f32 },
    /// Nothing playing. `placeholder` when analysis is structurally unavailable.
    Idle { placeholder: bool },
}

pub struct RenderLoop {
    render: RenderConfig,
    threshold: Duration,
    analyzer: AnalyzerCell,
    props: PropsCell,
    envelope: SyntheticEnvelopeGenerator,
    history: LatencyCompensationBuffer,
    scratch: Vec<f32>,
    synthetic: Vec<f32>,
    points: Vec<(f32, f32)>,
    generation: Option<u64>,
}

impl RenderLoop {
    pub fn new(config: &VisualizerConfig, analyzer: AnalyzerCell, props: PropsCell) -> Self {
        Self {
            render: config.render.clone(),
            threshold: config.compensation.latency_threshold(),
            analyzer,
            props,
            envelope: SyntheticEnvelopeGenerator::new(config.envelope.clone()),
            history: LatencyCompensationBuffer::new(config.compensation.capacity),
            scratch: Vec::new(),
            synthetic: Vec::new(),
            points: Vec::new(),
            generation: None,
        }
    }

    /// Renders one frame. `elapsed` is the display clock since mount.
    pub fn tick(&mut self, surface: &mut dyn Surface, elapsed: Duration) -> VisualizationFrame {
        // Read both cells once, the handle must not be held across ticks
        let props = self.props.load();
        let handle = self.analyzer.load().filter(|h| h.is_live());

        let frame = match handle {
            Some(handle) => self.pull(&handle, &props),
            None => {
                if self.generation.take().is_some() {
                    self.history.clear();
                }
                if props.is_playing {
                    VisualizationFrame::Synthetic {
                        level: self.envelope.level(elapsed.as_secs_f64()),
                    }
                } else {
                    VisualizationFrame::Idle {
                        placeholder: props.availability.is_structurally_unavailable(),
                    }
                }
            }
        };

        self.draw(surface, &frame, elapsed);
        frame
    }

    /// Snapshots currently held for compensation
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn pull(&mut self, handle: &AnalyzerHandle, props: &FrameProps) -> VisualizationFrame {
        if self.generation != Some(handle.generation()) {
            // Snapshots of a previous connection are meaningless for this one
            self.history.clear();
            self.generation = Some(handle.generation());
            tracing::debug!("Render loop attached to analyzer generation {}", handle.generation());
        }

        let window = handle.window_size();
        if self.scratch.len() != window {
            self.scratch = vec![0.0; window];
        }
        handle.pull_samples(&mut self.scratch);

        let position = props.playback_position;
        if props.output_latency > self.threshold {
            self.history.record(Snapshot::new(position, self.scratch.as_slice()));
            let target = position - props.output_latency.as_secs_f64();
            if let Some(snapshot) = self.history.lookup(target) {
                return VisualizationFrame::Real {
                    snapshot: snapshot.clone(),
                    compensated: true,
                };
            }
        }

        VisualizationFrame::Real {
            snapshot: Snapshot::new(position, self.scratch.as_slice()),
            compensated: false,
        }
    }

    fn draw(&mut self, surface: &mut dyn Surface, frame: &VisualizationFrame, elapsed: Duration) {
        surface.clear(self.render.background);

        match frame {
            VisualizationFrame::Real { snapshot, .. } => {
                stroke_wave(surface, snapshot.samples(), &self.render, &mut self.points);
            }
            VisualizationFrame::Synthetic { level } => {
                self.envelope
                    .waveform(elapsed.as_secs_f64(), *level, &mut self.synthetic);
                stroke_wave(surface, &self.synthetic, &self.render, &mut self.points);
            }
            VisualizationFrame::Idle { placeholder: true } => {
                surface.caption(UNAVAILABLE_CAPTION, self.render.caption);
            }
            VisualizationFrame::Idle { placeholder: false } => {}
        }
    }
}

/// Maps `samples` across the full width around the vertical center
fn stroke_wave(surface: &mut dyn Surface, samples: &[f32], render: &RenderConfig, points: &mut Vec<(f32, f32)>) {
    if samples.len() < 2 {
        return;
    }

    let size = surface.size();
    let width = size.width as f32;
    let center = size.height as f32 / 2.0;
    let amplitude = size.height as f32 * render.amplitude;
    let step = width / (samples.len() - 1) as f32;

    points.clear();
    points.extend(samples.iter().enumerate().map(|(i, &s)| {
        let s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        (i as f32 * step, center + s * amplitude)
    }));
    surface.stroke_polyline(points, render.stroke, render.stroke_width);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DenyReason, MockAnalyzer};
    use crate::canvas::surface::testing::{DrawOp, RecordingSurface};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        render: RenderLoop,
        cell: AnalyzerCell,
        props: PropsCell,
        surface: RecordingSurface,
    }

    fn harness(config: VisualizerConfig) -> Harness {
        let cell = AnalyzerCell::new();
        let props = PropsCell::new();
        Harness {
            render: RenderLoop::new(&config, cell.clone(), props.clone()),
            cell,
            props,
            surface: RecordingSurface::new(200, 100),
        }
    }

    impl Harness {
        fn tick(&mut self, elapsed_ms: u64) -> VisualizationFrame {
            self.render
                .tick(&mut self.surface, Duration::from_millis(elapsed_ms))
        }
    }

    /// Analyzer whose every pull fills the window with an increasing counter
    fn counting_analyzer(window: usize) -> (MockAnalyzer, Arc<AtomicU32>) {
        let pulls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&pulls);
        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_window_size().return_const(window);
        analyzer.expect_pull_samples().returning(move |out| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            out.fill(n as f32 / 100.0);
        });
        (analyzer, pulls)
    }

    fn publish(cell: &AnalyzerCell, generation: u64, analyzer: MockAnalyzer) -> Arc<AnalyzerHandle> {
        let handle = Arc::new(AnalyzerHandle::new(generation, Arc::new(analyzer)));
        cell.publish(Arc::clone(&handle));
        handle
    }

    #[test]
    fn low_latency_draws_the_raw_pull() {
        let mut h = harness(VisualizerConfig::default());
        let (analyzer, pulls) = counting_analyzer(8);
        publish(&h.cell, 1, analyzer);
        h.props.update(|p| {
            p.is_playing = true;
            p.playback_position = 1.0;
            p.output_latency = Duration::from_millis(5);
        });

        let frame = h.tick(0);

        let VisualizationFrame::Real { snapshot, compensated } = frame else {
            panic!("expected a real frame, got {frame:?}");
        };
        assert!(!compensated);
        assert_eq!(snapshot.samples(), vec![0.01_f32; 8].as_slice());
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
        assert_eq!(h.render.history_len(), 0);

        let ops = h.surface.ops();
        assert!(matches!(ops[0], DrawOp::Clear(_)));
        let DrawOp::Polyline(ref points) = ops[1] else {
            panic!("expected a polyline");
        };
        assert_eq!(points.len(), 8);
        assert_eq!(points[0].0, 0.0);
        assert!((points[7].0 - 200.0).abs() < 1e-3);
    }

    #[test]
    fn latency_above_threshold_draws_the_delayed_snapshot() {
        let mut h = harness(VisualizerConfig::default());
        let (analyzer, _) = counting_analyzer(4);
        publish(&h.cell, 1, analyzer);

        let mut last = None;
        for i in 0..=10 {
            h.props.update(|p| {
                p.is_playing = true;
                p.playback_position = i as f64 / 10.0;
                p.output_latency = Duration::from_millis(250);
            });
            last = Some(h.tick(i * 16));
        }

        // Position 1.0 minus 0.25s lands on the snapshot taken at 0.7
        let Some(VisualizationFrame::Real { snapshot, compensated }) = last else {
            panic!("expected a real frame");
        };
        assert!(compensated);
        assert!((snapshot.timestamp() - 0.7).abs() < 1e-9);
        assert_eq!(snapshot.samples()[0], 0.08);
        assert_eq!(h.render.history_len(), 11);
    }

    #[test]
    fn compensation_just_after_connect_falls_back_to_the_oldest_snapshot() {
        let mut h = harness(VisualizerConfig::default());
        let (analyzer, _) = counting_analyzer(4);
        publish(&h.cell, 1, analyzer);
        h.props.update(|p| {
            p.playback_position = 3.0;
            p.output_latency = Duration::from_millis(100);
        });

        let frame = h.tick(0);
        let VisualizationFrame::Real { snapshot, compensated } = frame else {
            panic!("expected a real frame");
        };
        assert!(compensated);
        assert_eq!(snapshot.timestamp(), 3.0);
    }

    #[test]
    fn disconnected_and_playing_draws_the_synthetic_wave() {
        let mut h = harness(VisualizerConfig::default());
        h.props.update(|p| p.is_playing = true);

        let frame = h.tick(1_500);

        let VisualizationFrame::Synthetic { level } = frame else {
            panic!("expected a synthetic frame, got {frame:?}");
        };
        assert!((0.0..=1.0).contains(&level));
        let expected = SyntheticEnvelopeGenerator::default().level(1.5);
        assert_eq!(level, expected);
        let ops = h.surface.ops();
        assert!(matches!(&ops[1], DrawOp::Polyline(points) if points.len() == 1025));
    }

    #[test]
    fn stopped_playback_is_idle_without_motion() {
        let mut h = harness(VisualizerConfig::default());

        assert_eq!(h.tick(0), VisualizationFrame::Idle { placeholder: false });
        assert_eq!(h.tick(500), VisualizationFrame::Idle { placeholder: false });

        let ops = h.surface.ops();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| matches!(op, DrawOp::Clear(_))));
    }

    #[test]
    fn denied_source_shows_the_placeholder_when_idle() {
        let mut h = harness(VisualizerConfig::default());
        h.props.update(|p| {
            p.availability = Availability::Denied(DenyReason::UnparseableSource("x".into()));
        });

        assert_eq!(h.tick(0), VisualizationFrame::Idle { placeholder: true });
        assert!(h
            .surface
            .ops()
            .contains(&DrawOp::Caption(UNAVAILABLE_CAPTION.to_string())));

        // Playing still animates the fallback
        h.props.update(|p| p.is_playing = true);
        assert!(matches!(h.tick(16), VisualizationFrame::Synthetic { .. }));
    }

    #[test]
    fn retired_handles_are_never_pulled() {
        let mut h = harness(VisualizerConfig::default());
        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_window_size().return_const(4usize);
        analyzer.expect_pull_samples().never();
        let handle = publish(&h.cell, 1, analyzer);
        handle.retire();

        assert_eq!(h.tick(0), VisualizationFrame::Idle { placeholder: false });
    }

    #[test]
    fn reconnect_with_another_window_size_reallocates_scratch() {
        let mut config = VisualizerConfig::default();
        config.compensation.latency_threshold_ms = 0.0;
        let mut h = harness(config);
        h.props.update(|p| p.output_latency = Duration::from_millis(20));

        let (small, _) = counting_analyzer(4);
        publish(&h.cell, 1, small);
        h.tick(0);
        h.tick(16);
        assert_eq!(h.render.history_len(), 2);

        h.cell.retire();
        let (large, _) = counting_analyzer(16);
        publish(&h.cell, 2, large);
        h.surface.take_ops();
        let frame = h.tick(32);

        let VisualizationFrame::Real { snapshot, .. } = frame else {
            panic!("expected a real frame");
        };
        assert_eq!(snapshot.samples().len(), 16);
        // History restarted with the new connection
        assert_eq!(h.render.history_len(), 1);
        assert!(matches!(&h.surface.ops()[1], DrawOp::Polyline(points) if points.len() == 16));
    }

    #[test]
    fn props_are_read_fresh_every_tick() {
        let mut h = harness(VisualizerConfig::default());
        assert!(matches!(h.tick(0), VisualizationFrame::Idle { .. }));
        h.props.store(FrameProps {
            is_playing: true,
            ..FrameProps::default()
        });
        assert!(matches!(h.tick(16), VisualizationFrame::Synthetic { .. }));
    }

    #[test]
    fn non_finite_samples_are_drawn_flat() {
        let mut surface = RecordingSurface::new(10, 10);
        let mut points = Vec::new();
        stroke_wave(
            &mut surface,
            &[f32::NAN, 2.0, -0.5],
            &RenderConfig::default(),
            &mut points,
        );
        assert_eq!(points[0].1, 5.0);
        assert_eq!(points[1].1, 5.0 + 3.5);
        assert_eq!(points[2].1, 5.0 - 1.75);
    }
}
