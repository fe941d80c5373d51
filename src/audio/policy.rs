//! Same-origin gate for signal tapping
//!
//! Tapping a cross-origin stream for sample-level analysis is refused by the
//! engine's security model. The decision is taken here, before any graph is
//! built, instead of being discovered through a construction failure.

use thiserror::Error;
use url::{Origin, Url};

/// Why a source may not be tapped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    #[error("cross-origin source {media} (page origin {page})")]
    CrossOrigin { media: String, page: String },

    #[error("unparseable source URL: {0}")]
    UnparseableSource(String),

    #[error("unparseable page origin: {0}")]
    UnparseableOrigin(String),

    #[error("opaque origin: {0}")]
    OpaqueOrigin(String),
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapDecision {
    Allow,
    Deny(DenyReason),
}

impl TapDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, TapDecision::Allow)
    }
}

/// Policy bound to the hosting page's origin
#[derive(Debug, Clone)]
pub struct SignalTapPolicy {
    page_origin: String,
}

impl SignalTapPolicy {
    pub fn new(page_origin: impl Into<String>) -> Self {
        Self {
            page_origin: page_origin.into(),
        }
    }

    pub fn page_origin(&self) -> &str {
        &self.page_origin
    }

    pub fn evaluate(&self, media_url: &str) -> TapDecision {
        evaluate(media_url, &self.page_origin)
    }
}

/// Allows tapping only when `media_url` shares scheme, host and port with `page_origin`
pub fn evaluate(media_url: &str, page_origin: &str) -> TapDecision {
    let page = match Url::parse(page_origin) {
        Ok(url) => url.origin(),
        Err(_) => return TapDecision::Deny(DenyReason::UnparseableOrigin(page_origin.to_string())),
    };
    let media = match Url::parse(media_url) {
        Ok(url) => url.origin(),
        Err(_) => return TapDecision::Deny(DenyReason::UnparseableSource(media_url.to_string())),
    };

    // Opaque origins (file:, data:, blob: without a tuple) never match, not even themselves
    if let Origin::Opaque(_) = page {
        return TapDecision::Deny(DenyReason::OpaqueOrigin(page_origin.to_string()));
    }
    if let Origin::Opaque(_) = media {
        return TapDecision::Deny(DenyReason::OpaqueOrigin(media_url.to_string()));
    }

    if media == page {
        TapDecision::Allow
    } else {
        TapDecision::Deny(DenyReason::CrossOrigin {
            media: media.ascii_serialization(),
            page: page.ascii_serialization(),
        })
    }
}
