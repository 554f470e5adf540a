use std::fmt;

/// Logical name of an upstream service.
///
/// Routing only ever produces one of these; the physical location is looked
/// up separately in the current [`TopologySnapshot`](crate::core::topology::TopologySnapshot),
/// so path matching never depends on how (or whether) discovery succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendTarget {
    /// The metrics API (history, websocket feed, general `/api` surface).
    PrimaryApi,
    /// The release-analyzer service.
    Analyzer,
}

impl BackendTarget {
    /// Stable identifier used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendTarget::PrimaryApi => "primary-api",
            BackendTarget::Analyzer => "analyzer",
        }
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
