//! Immutable upstream topology and the shared handle it is published through.
//!
//! A [`TopologySnapshot`] is built by a resolver and never mutated afterwards.
//! The [`TopologyHandle`] is the only state shared between the discovery task
//! and request-serving tasks: the snapshot pointer is replaced wholesale with
//! `ArcSwapOption::store`, so a reader observes either the previous complete
//! snapshot or the next one, never a mix.
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use url::Url;

use crate::core::backend::BackendTarget;

/// Point-in-time set of resolved upstream base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    primary: Option<Url>,
    analyzer: Option<Url>,
    resolved_at: DateTime<Utc>,
}

impl TopologySnapshot {
    /// Build a snapshot stamped with the current time.
    pub fn new(primary: Option<Url>, analyzer: Option<Url>) -> Self {
        Self {
            primary,
            analyzer,
            resolved_at: Utc::now(),
        }
    }

    /// Base URL for a logical target, if it was resolved.
    pub fn url_for(&self, target: BackendTarget) -> Option<&Url> {
        match target {
            BackendTarget::PrimaryApi => self.primary.as_ref(),
            BackendTarget::Analyzer => self.analyzer.as_ref(),
        }
    }

    /// When the resolver produced this snapshot.
    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }
}

/// Cheaply cloneable handle over the published topology and readiness flag.
#[derive(Clone, Default)]
pub struct TopologyHandle {
    inner: Arc<TopologyState>,
}

#[derive(Default)]
struct TopologyState {
    snapshot: ArcSwapOption<TopologySnapshot>,
    ready: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl TopologyHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the current snapshot and mark the gateway ready.
    pub fn publish(&self, snapshot: TopologySnapshot) {
        self.inner.snapshot.store(Some(Arc::new(snapshot)));
        if let Ok(mut last_error) = self.inner.last_error.lock() {
            *last_error = None;
        }
        self.inner.ready.store(true, Ordering::Release);
    }

    /// Record a failed resolve. The published snapshot is left untouched.
    pub fn mark_failed(&self, error: String) {
        self.inner.ready.store(false, Ordering::Release);
        if let Ok(mut last_error) = self.inner.last_error.lock() {
            *last_error = Some(error);
        }
    }

    /// Lock-free read of the most recent good snapshot plus current readiness.
    pub fn snapshot(&self) -> (Option<Arc<TopologySnapshot>>, bool) {
        (
            self.inner.snapshot.load_full(),
            self.inner.ready.load(Ordering::Acquire),
        )
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Error message of the most recent failed resolve, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}
