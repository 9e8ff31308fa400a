//! Retained-mode tree reconciliation with positional identity.
//!
//! A declaring procedure is re-run on every update pass and describes a tree
//! of objects by visiting leaves and opening containers, in an order that may
//! change between passes. Trellis keeps a previously materialized external
//! tree synchronized with the latest declared structure using the minimum
//! number of mutations — create, relocate, remove — while every declared
//! object keeps a stable identity across passes, so per-object state and
//! caches survive unrelated structural changes elsewhere.
//!
//! The pieces:
//!
//! - [`id`] — change fingerprints ([`ValueId`], [`CapturedId`]) and the
//!   synthetic-id counter.
//! - [`graph`] — the positional data graph: stable cells per call site or
//!   explicit key, garbage-collected when their scope closes unvisited.
//! - [`tree`] — the object tree reconciler and its cached-subtree state.
//! - [`routing`] — routing regions and the stack-allocated dispatch path.
//! - [`context`] — the [`Context`] handed to the declaring procedure, the
//!   pass entry points, and the [`System`] bundle.
//! - [`snapshot`] — serializable state summaries for debugging and monitors.
//!
//! The declaring procedure must traverse deterministically: the sequence of
//! scope and key operations decides cell identity, and breaking that
//! determinism is a programming error this crate does not try to recover
//! from.

pub mod context;
pub mod graph;
pub mod id;
pub mod routing;
pub mod snapshot;
pub mod tree;

pub use context::{broadcast_pass, dispatch_pass, refresh_pass, Context, NamingId, System};
pub use graph::{CellId, CellKey, DataGraph, DataTraversal, ScopeId};
pub use id::{CapturedId, IdSource, ValueId};
pub use routing::{PathNode, RegionArena, RegionId};
pub use snapshot::EngineSnapshot;
pub use tree::{NodeId, ObjectTree, TreeCachingData, TreeNode, TreeObject, TreeTraversal};
