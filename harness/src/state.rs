//! Lifecycle state of the test cluster

use std::fmt;

/// Which lifecycle operations are legal right now
///
/// `Uninitialized -> Starting -> Started -> Stopped -> Starting -> ...`.
/// A failed start leaves the cluster in `Starting` so diagnostics and
/// `stop` remain available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClusterState {
    #[default]
    Uninitialized,
    Starting,
    Started,
    Stopped,
}

impl ClusterState {
    /// Starting or started: the start cycle's services may be inspected
    pub fn is_active(&self) -> bool {
        matches!(self, ClusterState::Starting | ClusterState::Started)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterState::Uninitialized => "uninitialized",
            ClusterState::Starting => "starting",
            ClusterState::Started => "started",
            ClusterState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
