//! Lifecycle of the processing graph for one media source
//!
//! The graph (an output stream on the audio device) is a scarce OS resource:
//! it is built lazily on the first `resume()`, which callers issue from a user
//! action, and released deterministically on source change, `dispose()` or drop.

use super::engine::{AudioEngine, EngineError, MediaElement, ProcessingGraph};
use super::handle::{AnalyzerCell, AnalyzerHandle};
use super::policy::{DenyReason, SignalTapPolicy, TapDecision};
use crate::config::AnalysisConfig;
use crate::media::{MediaSourceRef, SourceId};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Connection state of the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No graph exists
    Unconnected,
    /// A graph is being built
    Connecting,
    /// A graph is live and publishing its analyzer
    Connected,
    /// The graph was released
    Closed,
}

/// Whether analysis can be expected for the attached source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Not attempted yet
    Pending,
    Available,
    /// The tap policy refused the source
    Denied(DenyReason),
    /// The engine could not build the graph
    Failed(String),
}

impl Availability {
    /// True when the fallback is permanent for the current source
    pub fn is_structurally_unavailable(&self) -> bool {
        matches!(self, Availability::Denied(_) | Availability::Failed(_))
    }
}

type SharedGraph = Arc<Mutex<Box<dyn ProcessingGraph>>>;

/// Owns the processing graph bound to one media source at a time
pub struct AnalysisContext {
    engine: Arc<dyn AudioEngine>,
    config: AnalysisConfig,
    policy: SignalTapPolicy,
    element: Option<Arc<dyn MediaElement>>,
    source: Option<MediaSourceRef>,
    state: ContextState,
    availability: Availability,
    graph: Option<SharedGraph>,
    cell: AnalyzerCell,
    latency: Duration,
    generation: u64,
}

impl AnalysisContext {
    pub fn new(engine: Arc<dyn AudioEngine>, policy: SignalTapPolicy, config: AnalysisConfig) -> Self {
        Self {
            engine,
            config,
            policy,
            element: None,
            source: None,
            state: ContextState::Unconnected,
            availability: Availability::Pending,
            graph: None,
            cell: AnalyzerCell::new(),
            latency: Duration::ZERO,
            generation: 0,
        }
    }

    /// Attaches the transport's current element, or detaches with `None`.
    ///
    /// A graph is bound to one source: a different source identity disposes
    /// the current graph before anything else happens.
    pub fn set_source(&mut self, element: Option<Arc<dyn MediaElement>>) {
        let next = element.as_ref().map(|e| e.source_ref());
        let next_id = next.as_ref().map(|s| s.id);
        if next_id == self.source_id() {
            return;
        }

        self.dispose();
        match next {
            Some(ref source) => tracing::info!("Media source attached: {} ({})", source.id, source.url),
            None => tracing::info!("Media source detached"),
        }
        self.element = element;
        self.source = next;
        self.state = ContextState::Unconnected;
        self.availability = Availability::Pending;
    }

    /// Builds the graph, or resumes it if it already exists.
    ///
    /// Never fails: policy denial and construction errors leave the context
    /// unconnected and the caller falls back to the synthetic envelope. Must be
    /// called from a user action, and before the transport starts playing.
    pub async fn resume(&mut self) {
        let Some(element) = self.element.clone() else {
            tracing::debug!("resume() without media source, ignoring");
            return;
        };

        if self.state == ContextState::Connected {
            if let Some(graph) = self.graph.clone() {
                let outcome = tokio::task::spawn_blocking(move || {
                    graph.lock().unwrap_or_else(PoisonError::into_inner).resume()
                })
                .await;
                match outcome {
                    Ok(Ok(())) => tracing::debug!("Processing graph resumed"),
                    Ok(Err(e)) => tracing::warn!("Processing graph resume failed: {}", e),
                    Err(e) => tracing::warn!("Resume task failed: {}", e),
                }
            }
            return;
        }

        let source = element.source_ref();
        if let TapDecision::Deny(reason) = self.policy.evaluate(&source.url) {
            tracing::info!("Signal tap denied, using synthetic fallback: {}", reason);
            self.state = ContextState::Unconnected;
            self.availability = Availability::Denied(reason);
            return;
        }

        debug_assert!(self.graph.is_none(), "prior graph must be closed first");
        self.state = ContextState::Connecting;

        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let built = tokio::task::spawn_blocking(move || {
            let mut graph = engine.build_graph(element, &config)?;
            if let Err(e) = graph.resume() {
                graph.close();
                return Err(e);
            }
            Ok::<_, EngineError>(graph)
        })
        .await;

        match built {
            Ok(Ok(graph)) => self.connect(graph),
            Ok(Err(e)) => self.fail(e.to_string()),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn connect(&mut self, graph: Box<dyn ProcessingGraph>) {
        let base = graph.base_latency().unwrap_or_default();
        let output = graph.output_latency().unwrap_or_default();
        self.latency = base + output;
        self.generation += 1;

        let handle = Arc::new(AnalyzerHandle::new(self.generation, graph.analyzer()));
        self.graph = Some(Arc::new(Mutex::new(graph)));
        self.cell.publish(handle);
        self.state = ContextState::Connected;
        self.availability = Availability::Available;

        tracing::info!(
            "Analysis connected (generation {}, output latency {:.1}ms)",
            self.generation,
            self.latency.as_secs_f64() * 1000.0
        );
    }

    fn fail(&mut self, reason: String) {
        tracing::warn!("Processing graph construction failed, using synthetic fallback: {}", reason);
        self.state = ContextState::Unconnected;
        self.availability = Availability::Failed(reason);
    }

    /// Releases the graph and its analyzer. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        // Retire the handle before closing so the render loop never pulls from a closed graph
        self.cell.retire();

        if let Some(graph) = self.graph.take() {
            graph.lock().unwrap_or_else(PoisonError::into_inner).close();
        }

        if matches!(self.state, ContextState::Connected | ContextState::Connecting) {
            self.state = ContextState::Closed;
            tracing::info!("Analysis context closed");
        }
        self.latency = Duration::ZERO;
    }

    pub fn is_connected(&self) -> bool {
        self.state == ContextState::Connected
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    /// Current analyzer handle, `None` when not connected
    pub fn analyzer(&self) -> Option<Arc<AnalyzerHandle>> {
        self.cell.load()
    }

    /// Cell the render loop reads the analyzer from
    pub fn analyzer_cell(&self) -> AnalyzerCell {
        self.cell.clone()
    }

    /// Engine plus device output latency, zero until connected
    pub fn output_latency_estimate(&self) -> Duration {
        self.latency
    }

    pub fn source(&self) -> Option<&MediaSourceRef> {
        self.source.as_ref()
    }

    fn source_id(&self) -> Option<SourceId> {
        self.source.as_ref().map(|s| s.id)
    }
}

impl Drop for AnalysisContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::{Analyzer, MockAnalyzer, MockAudioEngine, PcmSource};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const ORIGIN: &str = "http://localhost:8080";

    struct FakeElement {
        source: MediaSourceRef,
    }

    impl FakeElement {
        fn new(url: &str) -> Arc<dyn MediaElement> {
            Arc::new(Self {
                source: MediaSourceRef::new(url),
            })
        }
    }

    impl MediaElement for FakeElement {
        fn source_ref(&self) -> MediaSourceRef {
            self.source.clone()
        }

        fn capture_output(&self) -> Result<Box<dyn PcmSource>, EngineError> {
            Err(EngineError::AlreadyCaptured)
        }
    }

    struct FakeGraph {
        closed: Arc<AtomicBool>,
        resumes: Arc<AtomicUsize>,
        analyzer: Arc<dyn Analyzer>,
    }

    impl ProcessingGraph for FakeGraph {
        fn resume(&mut self) -> Result<(), EngineError> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn analyzer(&self) -> Arc<dyn Analyzer> {
            Arc::clone(&self.analyzer)
        }

        fn base_latency(&self) -> Option<Duration> {
            Some(Duration::from_millis(5))
        }

        fn output_latency(&self) -> Option<Duration> {
            None
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Probes {
        built: AtomicUsize,
        resumes: Arc<AtomicUsize>,
        closed: Mutex<Vec<Arc<AtomicBool>>>,
    }

    fn engine_with(probes: Arc<Probes>) -> Arc<dyn AudioEngine> {
        let mut engine = MockAudioEngine::new();
        engine.expect_build_graph().returning(move |_, config| {
            probes.built.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::new(AtomicBool::new(false));
            probes.closed.lock().unwrap().push(Arc::clone(&closed));
            let mut analyzer = MockAnalyzer::new();
            analyzer.expect_window_size().return_const(config.window_size);
            Ok(Box::new(FakeGraph {
                closed,
                resumes: Arc::clone(&probes.resumes),
                analyzer: Arc::new(analyzer),
            }) as Box<dyn ProcessingGraph>)
        });
        Arc::new(engine)
    }

    fn context(engine: Arc<dyn AudioEngine>) -> AnalysisContext {
        AnalysisContext::new(engine, SignalTapPolicy::new(ORIGIN), AnalysisConfig::default())
    }

    #[tokio::test]
    async fn same_origin_resume_connects() {
        let probes = Arc::new(Probes::default());
        let mut ctx = context(engine_with(Arc::clone(&probes)));
        ctx.set_source(Some(FakeElement::new("http://localhost:8080/media/ep1.wav")));

        assert_eq!(ctx.state(), ContextState::Unconnected);
        ctx.resume().await;

        assert!(ctx.is_connected());
        assert_eq!(ctx.availability(), &Availability::Available);
        assert_eq!(ctx.output_latency_estimate(), Duration::from_millis(5));
        let handle = ctx.analyzer().expect("analyzer published");
        assert_eq!(handle.window_size(), 256);
        assert_eq!(probes.built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cross_origin_resume_stays_unconnected() {
        let mut engine = MockAudioEngine::new();
        engine.expect_build_graph().never();
        let mut ctx = context(Arc::new(engine));
        ctx.set_source(Some(FakeElement::new("https://cdn.example.org/ep1.mp3")));

        ctx.resume().await;

        assert!(!ctx.is_connected());
        assert_eq!(ctx.state(), ContextState::Unconnected);
        assert!(ctx.analyzer().is_none());
        assert!(matches!(
            ctx.availability(),
            Availability::Denied(DenyReason::CrossOrigin { .. })
        ));
        assert!(ctx.availability().is_structurally_unavailable());
    }

    #[tokio::test]
    async fn construction_failure_degrades_silently() {
        let mut engine = MockAudioEngine::new();
        engine
            .expect_build_graph()
            .times(1)
            .returning(|_, _| Err(EngineError::NoDevice));
        let mut ctx = context(Arc::new(engine));
        ctx.set_source(Some(FakeElement::new("http://localhost:8080/ep1.wav")));

        ctx.resume().await;

        assert_eq!(ctx.state(), ContextState::Unconnected);
        assert!(matches!(ctx.availability(), Availability::Failed(_)));
        assert_eq!(ctx.output_latency_estimate(), Duration::ZERO);
    }

    #[tokio::test]
    async fn resume_without_source_is_a_no_op() {
        let mut engine = MockAudioEngine::new();
        engine.expect_build_graph().never();
        let mut ctx = context(Arc::new(engine));

        ctx.resume().await;

        assert_eq!(ctx.state(), ContextState::Unconnected);
        assert_eq!(ctx.availability(), &Availability::Pending);
    }

    #[tokio::test]
    async fn repeated_resume_reuses_the_live_graph() {
        let probes = Arc::new(Probes::default());
        let mut ctx = context(engine_with(Arc::clone(&probes)));
        ctx.set_source(Some(FakeElement::new("http://localhost:8080/ep1.wav")));

        ctx.resume().await;
        ctx.resume().await;
        ctx.resume().await;

        assert_eq!(probes.built.load(Ordering::SeqCst), 1);
        assert_eq!(probes.resumes.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.analyzer().map(|h| h.generation()), Some(1));
    }

    #[tokio::test]
    async fn dispose_then_resume_builds_a_fresh_graph() {
        let probes = Arc::new(Probes::default());
        let mut ctx = context(engine_with(Arc::clone(&probes)));
        ctx.set_source(Some(FakeElement::new("http://localhost:8080/ep1.wav")));
        ctx.resume().await;
        let first = ctx.analyzer().expect("first handle");

        ctx.dispose();
        ctx.dispose();
        assert!(!ctx.is_connected());
        assert_eq!(ctx.state(), ContextState::Closed);
        assert!(!first.is_live());
        assert!(probes.closed.lock().unwrap()[0].load(Ordering::SeqCst));

        ctx.resume().await;
        let second = ctx.analyzer().expect("second handle");
        assert!(ctx.is_connected());
        assert_ne!(first.generation(), second.generation());
        assert_eq!(probes.built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn switching_sources_closes_the_prior_graph() {
        let probes = Arc::new(Probes::default());
        let mut ctx = context(engine_with(Arc::clone(&probes)));
        let cell = ctx.analyzer_cell();

        ctx.set_source(Some(FakeElement::new("http://localhost:8080/ep1.wav")));
        ctx.resume().await;
        let first = cell.load().expect("first handle");

        ctx.set_source(Some(FakeElement::new("http://localhost:8080/ep2.wav")));
        assert!(cell.load().is_none());
        assert!(!first.is_live());
        assert!(probes.closed.lock().unwrap()[0].load(Ordering::SeqCst));
        assert_eq!(ctx.state(), ContextState::Unconnected);

        ctx.resume().await;
        let second = cell.load().expect("second handle");
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(!probes.closed.lock().unwrap()[1].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn same_source_identity_keeps_the_graph() {
        let probes = Arc::new(Probes::default());
        let mut ctx = context(engine_with(Arc::clone(&probes)));
        let element = FakeElement::new("http://localhost:8080/ep1.wav");

        ctx.set_source(Some(Arc::clone(&element)));
        ctx.resume().await;
        ctx.set_source(Some(element));

        assert!(ctx.is_connected());
        assert!(!probes.closed.lock().unwrap()[0].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_the_context_releases_the_graph() {
        let probes = Arc::new(Probes::default());
        let mut ctx = context(engine_with(Arc::clone(&probes)));
        ctx.set_source(Some(FakeElement::new("http://localhost:8080/ep1.wav")));
        ctx.resume().await;

        drop(ctx);

        assert!(probes.closed.lock().unwrap()[0].load(Ordering::SeqCst));
    }
}
