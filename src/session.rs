//! Visualizer session
//!
//! Upward surface of the analysis core for the transport and the view layer:
//! wraps the analysis context and keeps the frame props the render loop reads
//! in sync with it.

use crate::audio::{
    AnalysisContext, AnalyzerCell, AnalyzerHandle, AudioEngine, Availability, ContextState,
    MediaElement, SignalTapPolicy,
};
use crate::config::VisualizerConfig;
use crate::pipeline::{PropsCell, RenderLoop};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Status snapshot for the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: String,
    pub source_url: Option<String>,
    pub is_connected: bool,
    pub output_latency_ms: f64,
    /// Why the synthetic fallback is in use, if it is permanent for this source
    pub fallback: Option<String>,
}

/// Shared state of one visualizer
pub struct Session {
    context: Mutex<AnalysisContext>,
    analyzer: AnalyzerCell,
    props: PropsCell,
    config: VisualizerConfig,
}

impl Session {
    pub fn new(engine: Arc<dyn AudioEngine>, config: VisualizerConfig) -> Self {
        let policy = SignalTapPolicy::new(config.page_origin.clone());
        let context = AnalysisContext::new(engine, policy, config.analysis.clone());
        let analyzer = context.analyzer_cell();
        Self {
            context: Mutex::new(context),
            analyzer,
            props: PropsCell::new(),
            config,
        }
    }

    pub fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    /// Source change notification from the transport
    pub async fn set_source(&self, element: Option<Arc<dyn MediaElement>>) {
        let mut context = self.context.lock().await;
        context.set_source(element);
        self.sync_props(&context);
    }

    /// Connects (or resumes) analysis. Call from a user action, before playing.
    pub async fn resume(&self) {
        let mut context = self.context.lock().await;
        context.resume().await;
        self.sync_props(&context);
    }

    pub async fn is_connected(&self) -> bool {
        self.context.lock().await.is_connected()
    }

    pub async fn output_latency_estimate(&self) -> Duration {
        self.context.lock().await.output_latency_estimate()
    }

    /// Live analyzer handle. Lock-free, safe to call every frame.
    pub fn analyzer(&self) -> Option<Arc<AnalyzerHandle>> {
        self.analyzer.load().filter(|h| h.is_live())
    }

    /// Transport state, pushed at render cadence
    pub fn update_playback(&self, is_playing: bool, position: f64) {
        self.props.update(|props| {
            props.is_playing = is_playing;
            props.playback_position = position;
        });
    }

    pub fn props(&self) -> PropsCell {
        self.props.clone()
    }

    /// Render loop reading this session's cells
    pub fn render_loop(&self) -> RenderLoop {
        RenderLoop::new(&self.config, self.analyzer.clone(), self.props.clone())
    }

    pub async fn status(&self) -> SessionStatus {
        let context = self.context.lock().await;
        let state = match context.state() {
            ContextState::Unconnected => "unconnected",
            ContextState::Connecting => "connecting",
            ContextState::Connected => "connected",
            ContextState::Closed => "closed",
        };
        let fallback = match context.availability() {
            Availability::Denied(reason) => Some(reason.to_string()),
            Availability::Failed(reason) => Some(reason.clone()),
            Availability::Pending | Availability::Available => None,
        };

        SessionStatus {
            state: state.to_string(),
            source_url: context.source().map(|s| s.url.clone()),
            is_connected: context.is_connected(),
            output_latency_ms: context.output_latency_estimate().as_micros() as f64 / 1000.0,
            fallback,
        }
    }

    /// Releases the processing graph, e.g. when the view unmounts
    pub async fn dispose(&self) {
        let mut context = self.context.lock().await;
        context.dispose();
        self.sync_props(&context);
    }

    fn sync_props(&self, context: &AnalysisContext) {
        let latency = context.output_latency_estimate();
        let availability = context.availability().clone();
        self.props.update(|props| {
            props.output_latency = latency;
            props.availability = availability.clone();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        Analyzer, EngineError, MockAnalyzer, MockAudioEngine, MockMediaElement, PcmSource,
        ProcessingGraph,
    };
    use crate::media::{MediaSourceRef, WavElement};
    use crate::pipeline::VisualizationFrame;

    struct StubGraph {
        analyzer: Arc<dyn Analyzer>,
    }

    impl ProcessingGraph for StubGraph {
        fn resume(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn analyzer(&self) -> Arc<dyn Analyzer> {
            Arc::clone(&self.analyzer)
        }

        fn base_latency(&self) -> Option<Duration> {
            Some(Duration::from_millis(10))
        }

        fn output_latency(&self) -> Option<Duration> {
            Some(Duration::from_millis(30))
        }

        fn close(&mut self) {}
    }

    fn engine() -> Arc<dyn AudioEngine> {
        let mut engine = MockAudioEngine::new();
        engine.expect_build_graph().returning(|_, _| {
            let mut analyzer = MockAnalyzer::new();
            analyzer.expect_window_size().return_const(4usize);
            analyzer
                .expect_pull_samples()
                .returning(|out| out.fill(0.25));
            Ok(Box::new(StubGraph {
                analyzer: Arc::new(analyzer),
            }) as Box<dyn ProcessingGraph>)
        });
        Arc::new(engine)
    }

    /// Holds the captured output like a real graph, releasing it on close
    struct CapturingGraph {
        pcm: Option<Box<dyn PcmSource>>,
        analyzer: Arc<dyn Analyzer>,
    }

    impl ProcessingGraph for CapturingGraph {
        fn resume(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn analyzer(&self) -> Arc<dyn Analyzer> {
            Arc::clone(&self.analyzer)
        }

        fn base_latency(&self) -> Option<Duration> {
            None
        }

        fn output_latency(&self) -> Option<Duration> {
            None
        }

        fn close(&mut self) {
            self.pcm = None;
        }
    }

    fn capturing_engine() -> Arc<dyn AudioEngine> {
        let mut engine = MockAudioEngine::new();
        engine.expect_build_graph().returning(|element, _| {
            let pcm = element.capture_output()?;
            let mut analyzer = MockAnalyzer::new();
            analyzer.expect_window_size().return_const(4usize);
            analyzer.expect_pull_samples().returning(|out| out.fill(0.0));
            Ok(Box::new(CapturingGraph {
                pcm: Some(pcm),
                analyzer: Arc::new(analyzer),
            }) as Box<dyn ProcessingGraph>)
        });
        Arc::new(engine)
    }

    fn wav_element(name: &str, url: &str) -> Arc<WavElement> {
        let path = std::env::temp_dir().join(format!("wavesync-{}-{}", std::process::id(), name));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..800 {
            writer.write_sample(((i % 16) * 1000) as i16).unwrap();
        }
        writer.finalize().unwrap();
        let element = WavElement::open(&path, url).unwrap();
        let _ = std::fs::remove_file(&path);
        Arc::new(element)
    }

    fn element(url: &str) -> Arc<dyn MediaElement> {
        let mut element = MockMediaElement::new();
        element
            .expect_source_ref()
            .return_const(MediaSourceRef::new(url));
        Arc::new(element)
    }

    #[tokio::test]
    async fn resume_publishes_latency_and_analyzer() {
        let session = Session::new(engine(), VisualizerConfig::default());
        session
            .set_source(Some(element("http://localhost:8080/media/ep.wav")))
            .await;
        assert!(session.analyzer().is_none());

        session.resume().await;

        assert!(session.is_connected().await);
        assert_eq!(session.output_latency_estimate().await, Duration::from_millis(40));
        assert!(session.analyzer().is_some());
        let props = session.props().load();
        assert_eq!(props.output_latency, Duration::from_millis(40));
        assert_eq!(props.availability, Availability::Available);

        let status = session.status().await;
        assert_eq!(status.state, "connected");
        assert_eq!(status.output_latency_ms, 40.0);
        assert_eq!(status.fallback, None);
        assert_eq!(
            status.source_url.as_deref(),
            Some("http://localhost:8080/media/ep.wav")
        );
    }

    #[tokio::test]
    async fn cross_origin_source_reports_the_fallback() {
        let session = Session::new(engine(), VisualizerConfig::default());
        session
            .set_source(Some(element("https://cdn.example.org/ep.mp3")))
            .await;
        session.resume().await;

        assert!(!session.is_connected().await);
        let status = session.status().await;
        assert_eq!(status.state, "unconnected");
        assert!(status.fallback.is_some());

        let mut render = session.render_loop();
        let mut surface = crate::canvas::surface::testing::RecordingSurface::new(10, 10);
        assert_eq!(
            render.tick(&mut surface, Duration::ZERO),
            VisualizationFrame::Idle { placeholder: true }
        );
        session.update_playback(true, 1.0);
        assert!(matches!(
            render.tick(&mut surface, Duration::from_millis(16)),
            VisualizationFrame::Synthetic { .. }
        ));
    }

    #[tokio::test]
    async fn dispose_clears_the_analyzer_and_latency() {
        let session = Session::new(engine(), VisualizerConfig::default());
        session
            .set_source(Some(element("http://localhost:8080/ep.wav")))
            .await;
        session.resume().await;
        let handle = session.analyzer().expect("connected");

        session.dispose().await;

        assert!(!handle.is_live());
        assert!(session.analyzer().is_none());
        assert_eq!(session.props().load().output_latency, Duration::ZERO);
        assert_eq!(session.status().await.state, "closed");
    }

    #[tokio::test]
    async fn playback_updates_reach_the_render_loop() {
        let session = Session::new(engine(), VisualizerConfig::default());
        session
            .set_source(Some(element("http://localhost:8080/ep.wav")))
            .await;
        session.resume().await;
        session.update_playback(true, 2.0);

        let mut render = session.render_loop();
        let mut surface = crate::canvas::surface::testing::RecordingSurface::new(10, 10);
        let frame = render.tick(&mut surface, Duration::ZERO);

        let VisualizationFrame::Real { snapshot, compensated } = frame else {
            panic!("expected a real frame, got {frame:?}");
        };
        assert!(compensated);
        assert_eq!(snapshot.timestamp(), 2.0);
        assert!(snapshot.samples().iter().all(|&s| s == 0.25));
    }

    #[tokio::test]
    async fn wav_source_reconnects_after_dispose() {
        let element = wav_element("reconnect.wav", "http://localhost:8080/media/ep.wav");
        let session = Session::new(capturing_engine(), VisualizerConfig::default());
        session
            .set_source(Some(Arc::clone(&element) as Arc<dyn MediaElement>))
            .await;

        session.resume().await;
        assert!(session.is_connected().await);
        assert!(element.is_captured());

        session.dispose().await;
        assert!(!element.is_captured());

        session.resume().await;
        assert!(session.is_connected().await);
        assert_eq!(session.status().await.fallback, None);
        assert!(element.is_captured());
        assert!(session.analyzer().is_some());
    }

    #[tokio::test]
    async fn switching_wav_sources_releases_the_previous_output() {
        let first = wav_element("first.wav", "http://localhost:8080/media/a.wav");
        let second = wav_element("second.wav", "http://localhost:8080/media/b.wav");
        let session = Session::new(capturing_engine(), VisualizerConfig::default());

        session
            .set_source(Some(Arc::clone(&first) as Arc<dyn MediaElement>))
            .await;
        session.resume().await;
        session
            .set_source(Some(Arc::clone(&second) as Arc<dyn MediaElement>))
            .await;
        assert!(!first.is_captured());

        session.resume().await;
        assert!(second.is_captured());
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn denied_wav_source_stays_free_for_plain_playback() {
        let element = wav_element("denied.wav", "https://cdn.example.org/ep.wav");
        let session = Session::new(capturing_engine(), VisualizerConfig::default());
        session
            .set_source(Some(Arc::clone(&element) as Arc<dyn MediaElement>))
            .await;
        session.resume().await;

        assert!(!session.is_connected().await);
        assert!(!element.is_captured());
        // An untapped output can take it over and play it
        let mut pcm = element.capture_output().unwrap();
        element.clock().play();
        let mut out = [0.0f32; 4];
        pcm.fill(&mut out);
        assert!(element.clock().position() > 0.0);
    }
}
