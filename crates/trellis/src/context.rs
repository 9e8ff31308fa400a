//! The pass driver.
//!
//! A [`Context`] is what the declaring procedure receives: it threads one
//! traversal of the data graph past the tree reconciler and the event router
//! at once. The same procedure runs for refresh passes and event dispatches;
//! it queries [`is_refresh`](Context::is_refresh),
//! [`event_mut`](Context::event_mut) and
//! [`is_relevant`](Context::is_relevant) to decide what applies.
//!
//! All scoped constructs take the body as a closure, so the matching close
//! runs on every exit path.

use std::any::Any;

use tracing::{debug, trace};

use crate::graph::{CellId, CellKey, DataGraph, DataTraversal};
use crate::id::{CapturedId, ValueId};
use crate::routing::{PathNode, RegionArena, RegionId, RegionToken};
use crate::tree::{NodeId, NodeToken, ObjectTree, TreeCachingData, TreeObject, TreeTraversal};

enum PassKind<'p> {
    Refresh,
    Event { event: &'p mut dyn Any, path: Option<&'p PathNode<'p>>, targeted: bool },
}

/// Handle to an active naming context; names a keyed-cell table.
#[derive(Clone, Copy)]
pub struct NamingId(CellId);

/// Per-pass view over the data graph, object tree and region arena.
pub struct Context<'p, T: TreeObject> {
    data: DataTraversal<'p>,
    tree: TreeTraversal<'p, T>,
    regions: &'p mut RegionArena,
    kind: PassKind<'p>,
    active_region: Option<RegionId>,
    relevant: bool,
}

impl<'p, T: TreeObject> Context<'p, T> {
    /// Is this a refresh pass (as opposed to an event dispatch)?
    pub fn is_refresh(&self) -> bool {
        matches!(self.kind, PassKind::Refresh)
    }

    /// Is the current nesting on the path to the dispatch target?
    ///
    /// Always true during refresh passes and untargeted dispatches.
    /// Irrelevant regions still evaluate their contents; relevance only gates
    /// caller side effects.
    pub fn is_relevant(&self) -> bool {
        self.relevant
    }

    /// The event being dispatched, if this pass carries one of type `E`.
    pub fn event_mut<E: 'static>(&mut self) -> Option<&mut E> {
        match &mut self.kind {
            PassKind::Event { event, .. } => event.downcast_mut::<E>(),
            PassKind::Refresh => None,
        }
    }

    /// The tree being reconciled.
    pub fn tree(&self) -> &ObjectTree<T> {
        self.tree.tree()
    }

    pub fn tree_mut(&mut self) -> &mut ObjectTree<T> {
        self.tree.tree_mut()
    }

    // --- data graph -------------------------------------------------------

    /// Stable storage for this call site; created with `init` on first visit,
    /// destroyed when the owning scope closes without a revisit.
    pub fn cell<D: 'static>(&mut self, init: impl FnOnce() -> D) -> &mut D {
        self.data.cell(init)
    }

    /// A conditional block with its own addressing scope.
    ///
    /// When inactive, the block's cells are retired on the spot, which is
    /// what turns an untaken branch into removals of the objects it used to
    /// declare.
    pub fn branch<R>(&mut self, active: bool, f: impl FnOnce(&mut Self) -> R) -> Option<R> {
        self.data.enter_subscope();
        let result = if active { Some(f(self)) } else { None };
        self.data.exit_scope();
        self.finalize_retired();
        result
    }

    /// A conditional block whose condition may differ between pass kinds.
    ///
    /// Unlike [`branch`](Context::branch), an inactive pass leaves the
    /// block's cells untouched, so state survives passes that skip the body.
    pub fn event_branch<R>(&mut self, active: bool, f: impl FnOnce(&mut Self) -> R) -> Option<R> {
        let (cell, _) = self.data.visit(|| ());
        if !active {
            return None;
        }
        self.data.enter_scope_of(cell);
        let result = f(self);
        self.data.exit_scope();
        self.finalize_retired();
        Some(result)
    }

    /// Open a naming context for a dynamic collection. Keys requested through
    /// [`named`](Context::named) during `f` are matched by key regardless of
    /// order; keys unseen by the end of `f` retire.
    pub fn naming<R>(&mut self, f: impl FnOnce(&mut Self, NamingId) -> R) -> R {
        let (cell, _) = self.data.visit(|| ());
        let result = f(self, NamingId(cell));
        self.data.sweep_keyed(cell);
        self.finalize_retired();
        result
    }

    /// A block addressed by an explicit key instead of positional order.
    pub fn named<R>(
        &mut self,
        naming: NamingId,
        key: impl Into<CellKey>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let (cell, _) = self.data.keyed_visit(naming.0, key.into(), || ());
        self.data.enter_scope_of(cell);
        let result = f(self);
        self.data.exit_scope();
        self.finalize_retired();
        result
    }

    // --- tree reconciliation ----------------------------------------------

    /// The call site's tree node, materializing the object on first visit.
    /// The fresh node is detached; nothing external happens until placement.
    pub fn node_cell(&mut self, init: impl FnOnce() -> T) -> NodeId {
        let tree = &mut self.tree;
        let (cell, _) = self.data.visit(|| NodeToken(tree.alloc_node(init())));
        self.data.value_mut::<NodeToken>(cell).0
    }

    /// Synchronize a leaf node with the current container position.
    /// Refresh passes only.
    pub fn place(&mut self, node: NodeId) {
        debug_assert!(self.is_refresh(), "tree placement outside a refresh pass");
        self.tree.place(node);
    }

    /// Place a container node, then reconcile its children inside `f`.
    pub fn container<R>(&mut self, node: NodeId, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.is_refresh() {
            self.tree.place(node);
        }
        self.children(node, f)
    }

    /// The piecewise variant: reconcile `node`'s children without placing the
    /// node itself, which the caller did (or will do) separately.
    pub fn children<R>(&mut self, node: NodeId, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.is_refresh() {
            self.tree.begin_children(node);
        }
        let result = f(self);
        if self.is_refresh() {
            self.tree.end_children();
        }
        result
    }

    /// Wrap a sub-region with a change fingerprint.
    ///
    /// On a refresh pass the content is skipped — returning `None` and
    /// assuming the previously materialized children unchanged in place —
    /// iff the fingerprint matches the captured one, a previous refresh
    /// captured valid content state, and the region's position (parent and
    /// preceding sibling) is unchanged. A position shift forces a traversal
    /// even under a matching fingerprint, since a skipped region cannot
    /// reposition its content. Event passes always run the content.
    pub fn cached_subtree<R>(
        &mut self,
        fingerprint: ValueId,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Option<R> {
        let (cell, _) = self.data.visit(TreeCachingData::default);

        if !self.is_refresh() {
            self.data.enter_scope_of(cell);
            let result = f(self);
            self.data.exit_scope();
            self.finalize_retired();
            return Some(result);
        }

        let data = *self.data.value_mut::<TreeCachingData>(cell);
        let (parent, position) = self.tree.current_position();
        let predecessor = self.tree.child_before(parent, position);

        if data.valid
            && data.fingerprint.matches(fingerprint)
            && data.parent == Some(parent)
            && data.predecessor == predecessor
        {
            trace!(extent = data.extent, "cached subtree unchanged; skipping traversal");
            self.tree.skip_placed(data.extent as usize);
            return None;
        }

        self.data.enter_scope_of(cell);
        let result = f(self);
        self.data.exit_scope();
        self.finalize_retired();

        let (end_parent, end_position) = self.tree.current_position();
        debug_assert_eq!(end_parent, parent, "cached subtree crossed container boundaries");
        *self.data.value_mut::<TreeCachingData>(cell) = TreeCachingData {
            fingerprint: CapturedId::captured(fingerprint),
            valid: true,
            parent: Some(parent),
            predecessor,
            extent: (end_position - position) as u32,
        };
        Some(result)
    }

    // --- event routing ----------------------------------------------------

    /// Declare a routing region for the duration of `f`.
    ///
    /// The region reuses the one captured in this call site's cell, relinking
    /// its parent when the nesting changed. During a targeted dispatch the
    /// region consumes the head of the remaining path when it matches;
    /// otherwise it and its descendants read as irrelevant.
    pub fn region<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let parent = self.active_region;
        let regions = &mut *self.regions;
        let (cell, fresh) = self.data.visit(|| RegionToken(regions.alloc(parent)));
        let region = self.data.value_mut::<RegionToken>(cell).0;
        if !fresh && self.regions.parent(region) != parent {
            self.regions.set_parent(region, parent);
        }

        let saved_region = self.active_region;
        let saved_relevant = self.relevant;
        self.active_region = Some(region);
        if let PassKind::Event { targeted: true, path, .. } = &mut self.kind {
            let head = *path;
            match head {
                Some(head) if head.region == region => {
                    *path = head.rest;
                    self.relevant = true;
                }
                _ => self.relevant = false,
            }
        }

        let result = f(self);

        self.active_region = saved_region;
        self.relevant = saved_relevant;
        result
    }

    /// The innermost region currently open; capture it to target a later
    /// dispatch at this point of the tree.
    pub fn current_region(&self) -> Option<RegionId> {
        self.active_region
    }

    /// Finalize cells retired by the scope close that just ran: removed tree
    /// nodes issue their external `remove` here, retired regions free their
    /// arena slot. Everything else just drops.
    fn finalize_retired(&mut self) {
        if !self.data.has_retired() {
            return;
        }
        for boxed in self.data.take_retired() {
            if let Some(token) = boxed.downcast_ref::<NodeToken>() {
                self.tree.discard(token.0);
            } else if let Some(token) = boxed.downcast_ref::<RegionToken>() {
                self.regions.free(token.0);
            }
        }
    }
}

/// Run one refresh pass: re-invoke the declaring procedure and synchronize
/// the external tree with whatever it declares this time.
pub fn refresh_pass<T: TreeObject>(
    graph: &mut DataGraph,
    regions: &mut RegionArena,
    tree: &mut ObjectTree<T>,
    controller: &mut dyn FnMut(&mut Context<'_, T>),
) {
    let root = tree.root();
    let mut traversal = TreeTraversal::begin(tree);
    traversal.begin_children(root);
    let mut ctx = Context {
        data: DataTraversal::begin(graph),
        tree: traversal,
        regions,
        kind: PassKind::Refresh,
        active_region: None,
        relevant: true,
    };
    controller(&mut ctx);
    ctx.tree.end_children();
    ctx.data.end_pass();
    ctx.finalize_retired();
}

/// Dispatch an event at a previously captured region (or at the root when
/// `target` is `None`). The declaring procedure runs once with the
/// root-to-target path attached; containers off the path read as irrelevant.
pub fn dispatch_pass<T: TreeObject, E: 'static>(
    graph: &mut DataGraph,
    regions: &mut RegionArena,
    tree: &mut ObjectTree<T>,
    target: Option<RegionId>,
    event: &mut E,
    controller: &mut dyn FnMut(&mut Context<'_, T>),
) {
    let targeted = target.is_some();
    let target = target.filter(|&region| {
        let valid = regions.is_valid(region);
        if !valid {
            debug!(?region, "dispatch target is stale; delivering at the root");
        }
        valid
    });
    route(graph, regions, tree, controller, target, None, event, targeted);
}

/// Broadcast an event: every region is relevant.
pub fn broadcast_pass<T: TreeObject, E: 'static>(
    graph: &mut DataGraph,
    regions: &mut RegionArena,
    tree: &mut ObjectTree<T>,
    event: &mut E,
    controller: &mut dyn FnMut(&mut Context<'_, T>),
) {
    route(graph, regions, tree, controller, None, None, event, false);
}

/// Walk parent links from the target to the root, building the path on the
/// call stack, then invoke the procedure once at the bottom.
#[allow(clippy::too_many_arguments)]
fn route<T: TreeObject>(
    graph: &mut DataGraph,
    regions: &mut RegionArena,
    tree: &mut ObjectTree<T>,
    controller: &mut dyn FnMut(&mut Context<'_, T>),
    target: Option<RegionId>,
    path: Option<&PathNode<'_>>,
    event: &mut dyn Any,
    targeted: bool,
) {
    if let Some(region) = target {
        let node = PathNode { region, rest: path };
        let parent = regions.parent(region);
        route(graph, regions, tree, controller, parent, Some(&node), event, targeted);
    } else {
        let mut ctx = Context {
            data: DataTraversal::begin(graph),
            tree: TreeTraversal::begin(tree),
            regions,
            kind: PassKind::Event { event, path, targeted },
            active_region: None,
            relevant: true,
        };
        controller(&mut ctx);
        ctx.data.end_pass();
        ctx.finalize_retired();
    }
}

/// Convenience bundle: the three components plus the declaring procedure.
///
/// Nothing here is ambient — the components stay plain values, and the
/// free-function pass drivers remain usable on their own. The bundle exists
/// because dispatch re-invokes the same procedure a refresh runs, so someone
/// has to own it across passes.
pub struct System<T: TreeObject> {
    graph: DataGraph,
    regions: RegionArena,
    tree: ObjectTree<T>,
    controller: Box<dyn FnMut(&mut Context<'_, T>)>,
}

impl<T: TreeObject> System<T> {
    pub fn new(
        root_object: T,
        controller: impl FnMut(&mut Context<'_, T>) + 'static,
    ) -> Self {
        Self {
            graph: DataGraph::new(),
            regions: RegionArena::new(),
            tree: ObjectTree::new(root_object),
            controller: Box::new(controller),
        }
    }

    /// Run one refresh pass.
    pub fn refresh(&mut self) {
        refresh_pass(&mut self.graph, &mut self.regions, &mut self.tree, &mut *self.controller);
    }

    /// Dispatch an event at a captured region, or at the root for `None`.
    pub fn dispatch<E: 'static>(&mut self, target: Option<RegionId>, event: &mut E) {
        dispatch_pass(
            &mut self.graph,
            &mut self.regions,
            &mut self.tree,
            target,
            event,
            &mut *self.controller,
        );
    }

    /// Broadcast an event to every region.
    pub fn broadcast<E: 'static>(&mut self, event: &mut E) {
        broadcast_pass(&mut self.graph, &mut self.regions, &mut self.tree, event, &mut *self.controller);
    }

    pub fn tree(&self) -> &ObjectTree<T> {
        &self.tree
    }

    pub fn graph(&self) -> &DataGraph {
        &self.graph
    }

    pub fn regions(&self) -> &RegionArena {
        &self.regions
    }

    /// Capture an observational snapshot of the current state.
    pub fn snapshot(&self) -> crate::snapshot::EngineSnapshot {
        crate::snapshot::EngineSnapshot::capture(&self.graph, &self.tree, &self.regions)
    }
}
