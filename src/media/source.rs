//! Identity of the currently attached playable element

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a playable element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocates a fresh identity
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to the element the transport currently plays.
///
/// Only referenced by the analysis core, never owned: the transport mutates it
/// whenever the listener switches tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSourceRef {
    pub id: SourceId,
    /// Resolved URL of the media resource
    pub url: String,
}

impl MediaSourceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: SourceId::next(),
            url: url.into(),
        }
    }
}
