//! Static path-prefix routing.
//!
//! Rules are evaluated most specific first; the first match wins. The table is
//! fixed at compile time, so identical paths always map to identical targets.
use crate::core::backend::BackendTarget;

/// How a rule compares against the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathMatch {
    /// Path equals the pattern or continues with `/` after it.
    Segment(&'static str),
    /// Path starts with the pattern (any continuation).
    Prefix(&'static str),
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match *self {
            PathMatch::Segment(pattern) => match path.strip_prefix(pattern) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
            PathMatch::Prefix(pattern) => path.starts_with(pattern),
        }
    }
}

/// Rule table in priority order.
const RULES: &[(PathMatch, BackendTarget)] = &[
    (
        PathMatch::Prefix("/api/v1/release-analyzer"),
        BackendTarget::Analyzer,
    ),
    (PathMatch::Prefix("/ws"), BackendTarget::PrimaryApi),
    (PathMatch::Segment("/api"), BackendTarget::PrimaryApi),
];

/// Map a request path to its logical backend, or `None` when nothing matches.
pub fn route(path: &str) -> Option<BackendTarget> {
    RULES
        .iter()
        .find(|(rule, _)| rule.matches(path))
        .map(|(_, target)| *target)
}
