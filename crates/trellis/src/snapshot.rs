//! Observational snapshots for debugging and external monitors.
//!
//! Captures occupancy of the data graph and the materialized tree topology
//! as plain serializable data. Snapshots are read-only exports; there is no
//! restore path, and none is planned — all runtime state is process-lifetime.
//!
//! JSON helpers require the `json` feature.

use serde::{Deserialize, Serialize};

use crate::graph::DataGraph;
use crate::routing::RegionArena;
use crate::tree::{ObjectTree, TreeObject};

/// A serializable summary of one runtime's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Version for consumers that outlive the format.
    pub version: u32,
    /// Passes started on the graph so far.
    pub pass: u64,
    pub live_cells: usize,
    pub live_scopes: usize,
    pub live_regions: usize,
    /// Live tree nodes in slot order; links are slot indices.
    pub tree: Vec<NodeEntry>,
}

/// One materialized tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub index: u32,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
}

impl EngineSnapshot {
    /// Current snapshot version.
    pub const VERSION: u32 = 1;

    /// Capture the current state of the three components.
    pub fn capture<T: TreeObject>(
        graph: &DataGraph,
        tree: &ObjectTree<T>,
        regions: &RegionArena,
    ) -> Self {
        let entries = tree
            .iter()
            .map(|id| NodeEntry {
                index: id.index,
                parent: tree.parent(id).map(|parent| parent.index),
                children: tree.children(id).iter().map(|child| child.index).collect(),
            })
            .collect();
        Self {
            version: Self::VERSION,
            pass: graph.pass_count(),
            live_cells: graph.live_cells(),
            live_scopes: graph.live_scopes(),
            live_regions: regions.len(),
            tree: entries,
        }
    }

    /// Serialize to JSON.
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
