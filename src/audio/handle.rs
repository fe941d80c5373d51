//! Analyzer handle shared between the context and the render loop

use super::engine::Analyzer;
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Analyzer of one connection, tagged with the connection generation
pub struct AnalyzerHandle {
    generation: u64,
    analyzer: Arc<dyn Analyzer>,
    live: AtomicBool,
}

impl AnalyzerHandle {
    pub fn new(generation: u64, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            generation,
            analyzer,
            live: AtomicBool::new(true),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once the owning graph has been disposed
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn window_size(&self) -> usize {
        self.analyzer.window_size()
    }

    pub fn pull_samples(&self, out: &mut [f32]) {
        self.analyzer.pull_samples(out);
    }

    pub(crate) fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl fmt::Debug for AnalyzerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerHandle")
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Shared cell holding the current analyzer, written by the context, read once per frame
#[derive(Clone, Default)]
pub struct AnalyzerCell {
    inner: Arc<ArcSwapOption<AnalyzerHandle>>,
}

impl AnalyzerCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current handle, or `None` when nothing is connected
    pub fn load(&self) -> Option<Arc<AnalyzerHandle>> {
        self.inner.load_full()
    }

    pub(crate) fn publish(&self, handle: Arc<AnalyzerHandle>) {
        self.inner.store(Some(handle));
    }

    /// Empties the cell and retires whatever it held
    pub(crate) fn retire(&self) -> Option<Arc<AnalyzerHandle>> {
        let previous = self.inner.swap(None);
        if let Some(ref handle) = previous {
            handle.retire();
        }
        previous
    }
}

impl fmt::Debug for AnalyzerCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnalyzerCell").field(&self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::MockAnalyzer;

    fn handle(generation: u64) -> Arc<AnalyzerHandle> {
        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_window_size().return_const(4usize);
        Arc::new(AnalyzerHandle::new(generation, Arc::new(analyzer)))
    }

    #[test]
    fn retired_handles_are_no_longer_live() {
        let cell = AnalyzerCell::new();
        assert!(cell.load().is_none());

        cell.publish(handle(1));
        let seen = cell.load().expect("published handle");
        assert!(seen.is_live());
        assert_eq!(seen.window_size(), 4);

        let retired = cell.retire().expect("handle to retire");
        assert_eq!(retired.generation(), 1);
        assert!(!seen.is_live());
        assert!(cell.load().is_none());
    }

    #[test]
    fn clones_share_the_same_slot() {
        let writer = AnalyzerCell::new();
        let reader = writer.clone();
        writer.publish(handle(7));
        assert_eq!(reader.load().map(|h| h.generation()), Some(7));
    }
}
