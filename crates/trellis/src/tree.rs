//! The object tree reconciler.
//!
//! An [`ObjectTree`] pairs externally owned objects with their tree linkage
//! in a generational arena. A [`TreeTraversal`] consumes one pass over the
//! data graph and, per visited child, decides whether the external object
//! must be created-and-placed, relocated, or left untouched; when a container
//! scope closes, children not revisited are removed. The mutation set per
//! pass is minimal: an unchanged container produces zero external calls.

use smallvec::SmallVec;
use tracing::trace;

use crate::id::CapturedId;

/// Capability interface of a materialized object.
///
/// Implementors are cheap handles with interior mutability; the reconciler
/// holds the only right to issue structural mutations through them.
pub trait TreeObject {
    /// Detach self from its current parent's child collection.
    fn remove(&self);

    /// Move self into `parent`'s child collection, immediately after `after`
    /// (or at the head when `after` is none). `before` asserts — not infers —
    /// the resulting next sibling. Serves initial placement too; there is no
    /// separate create-without-placing step.
    fn relocate(&self, parent: &Self, after: Option<&Self>, before: Option<&Self>);
}

/// Generational index of a node in an [`ObjectTree`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

/// Cell value marking tree-node ownership; finalized when the cell retires.
pub(crate) struct NodeToken(pub(crate) NodeId);

/// A materialized object plus its tree linkage.
///
/// `children` always reflects the true current order of the object's
/// children in the external tree.
pub struct TreeNode<T> {
    pub object: T,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl<T> TreeNode<T> {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

struct NodeSlot<T> {
    generation: u32,
    /// `None` marks a free slot.
    node: Option<TreeNode<T>>,
}

/// Arena of tree nodes; parent/child links are ids, ownership is the arena.
pub struct ObjectTree<T> {
    slots: Vec<NodeSlot<T>>,
    free: Vec<u32>,
    root: NodeId,
}

impl<T: TreeObject> ObjectTree<T> {
    /// Create a tree rooted at an already-materialized object. The root is
    /// never placed or removed by the reconciler.
    pub fn new(root_object: T) -> Self {
        Self::with_capacity(root_object, 64)
    }

    pub fn with_capacity(root_object: T, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.push(NodeSlot {
            generation: 0,
            node: Some(TreeNode { object: root_object, parent: None, children: Vec::new() }),
        });
        Self { slots, free: Vec::new(), root: NodeId { index: 0, generation: 0 } }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes (the root included).
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the root is always alive
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        match self.slots.get(id.index as usize) {
            Some(slot) => slot.generation == id.generation && slot.node.is_some(),
            None => false,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode<T>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn object(&self, id: NodeId) -> &T {
        &self.node(id).object
    }

    pub fn object_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).object
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Iterate the live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|_| NodeId { index: index as u32, generation: slot.generation })
        })
    }

    fn node(&self, id: NodeId) -> &TreeNode<T> {
        self.get(id).expect("stale node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode<T> {
        self.get_mut(id).expect("stale node id")
    }

    fn alloc(&mut self, object: T) -> NodeId {
        let node = TreeNode { object, parent: None, children: Vec::new() };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(NodeSlot { generation: 0, node: Some(node) });
            NodeId { index, generation: 0 }
        }
    }

    fn free(&mut self, id: NodeId) {
        debug_assert_ne!(id, self.root, "the root node is never freed");
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale node id");
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    /// Unlink a node from its parent's child list. Internal bookkeeping only;
    /// no external mutation is issued. A stale parent link is cleared quietly.
    fn detach(&mut self, id: NodeId) {
        let parent = self.node(id).parent;
        if let Some(parent) = parent {
            if self.is_valid(parent) {
                let children = &mut self.node_mut(parent).children;
                if let Some(position) = children.iter().position(|&child| child == id) {
                    children.remove(position);
                }
            }
        }
        self.node_mut(id).parent = None;
    }

    fn attach_at(&mut self, parent: NodeId, position: usize, id: NodeId) {
        debug_assert!(position <= self.node(parent).children.len());
        self.node_mut(parent).children.insert(position, id);
        self.node_mut(id).parent = Some(parent);
    }
}

#[derive(Clone, Copy)]
struct TreeFrame {
    parent: NodeId,
    /// Cursor: index where the next visited child belongs.
    position: usize,
}

/// Pass-scoped reconciliation state: a stack of container frames.
///
/// Only active during refresh passes; event passes construct one but never
/// push a frame.
pub struct TreeTraversal<'t, T: TreeObject> {
    tree: &'t mut ObjectTree<T>,
    frames: SmallVec<[TreeFrame; 8]>,
}

impl<'t, T: TreeObject> TreeTraversal<'t, T> {
    pub(crate) fn begin(tree: &'t mut ObjectTree<T>) -> Self {
        Self { tree, frames: SmallVec::new() }
    }

    pub(crate) fn tree(&self) -> &ObjectTree<T> {
        self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut ObjectTree<T> {
        self.tree
    }

    pub(crate) fn alloc_node(&mut self, object: T) -> NodeId {
        self.tree.alloc(object)
    }

    /// Synchronize one visited child against the current frame.
    ///
    /// Already in place: advance the cursor, no mutation. Otherwise issue
    /// exactly one relocate, with `after` being the previously placed sibling
    /// of the current pass and `before` the node now following the insertion
    /// point.
    pub(crate) fn place(&mut self, id: NodeId) {
        let (parent, position) = {
            let frame = self.frames.last().expect("place() outside an active refresh traversal");
            (frame.parent, frame.position)
        };
        debug_assert!(self.tree.is_valid(id), "placing a discarded node");

        if self.tree.children(parent).get(position) == Some(&id) {
            self.frames.last_mut().expect("no frame").position += 1;
            return;
        }

        self.tree.detach(id);
        self.tree.attach_at(parent, position, id);
        self.frames.last_mut().expect("no frame").position += 1;

        let children = self.tree.children(parent);
        let after = position.checked_sub(1).map(|index| children[index]);
        let before = children.get(position + 1).copied();
        trace!(?id, ?parent, ?after, "relocating node");

        let parent_object = self.tree.object(parent);
        let after_object = after.map(|id| self.tree.object(id));
        let before_object = before.map(|id| self.tree.object(id));
        self.tree.object(id).relocate(parent_object, after_object, before_object);
    }

    /// Open a container frame: subsequent `place` calls order `parent`'s
    /// children.
    pub(crate) fn begin_children(&mut self, parent: NodeId) {
        self.frames.push(TreeFrame { parent, position: 0 });
    }

    /// Close the current container frame: every child past the cursor was not
    /// revisited this pass and is removed. Subtree links below removed nodes
    /// stay intact, so a keyed node moving containers survives with its
    /// state.
    pub(crate) fn end_children(&mut self) {
        let frame = self.frames.pop().expect("end_children without a matching begin");
        let removed: Vec<NodeId> = {
            let children = &mut self.tree.node_mut(frame.parent).children;
            if frame.position < children.len() {
                children.split_off(frame.position)
            } else {
                Vec::new()
            }
        };
        for id in removed {
            trace!(?id, parent = ?frame.parent, "removing unvisited child");
            self.tree.object(id).remove();
            self.tree.node_mut(id).parent = None;
        }
    }

    /// Current frame: the parent being filled and its cursor.
    pub(crate) fn current_position(&self) -> (NodeId, usize) {
        let frame = self.frames.last().expect("no active refresh traversal");
        (frame.parent, frame.position)
    }

    /// The sibling placed immediately before `position`, if any.
    pub(crate) fn child_before(&self, parent: NodeId, position: usize) -> Option<NodeId> {
        position.checked_sub(1).map(|index| self.tree.children(parent)[index])
    }

    /// Advance the cursor over `extent` children assumed unchanged in place.
    pub(crate) fn skip_placed(&mut self, extent: usize) {
        let (parent, position) = self.current_position();
        debug_assert!(
            position + extent <= self.tree.children(parent).len(),
            "cached extent runs past the parent's child list",
        );
        self.frames.last_mut().expect("no frame").position += extent;
    }

    /// Finalize a node whose owning cell retired: issue the remove if the
    /// node is still attached, then recycle the slot.
    pub(crate) fn discard(&mut self, id: NodeId) {
        if !self.tree.is_valid(id) {
            return;
        }
        if self.tree.parent(id).is_some() {
            trace!(?id, "removing node with retired cell");
            self.tree.object(id).remove();
            self.tree.detach(id);
        }
        self.tree.free(id);
    }
}

/// Cross-pass state of one cached-subtree site.
///
/// Captures the content fingerprint plus the position the content was last
/// traversed at; a skip is only sound while both still match.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeCachingData {
    pub(crate) fingerprint: CapturedId,
    /// False until a refresh pass has captured position and extent.
    pub(crate) valid: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) predecessor: Option<NodeId>,
    /// Direct children the content materialized under `parent`.
    pub(crate) extent: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inert object for exercising the arena bookkeeping alone.
    #[derive(Clone)]
    struct Silent;

    impl TreeObject for Silent {
        fn remove(&self) {}
        fn relocate(&self, _parent: &Self, _after: Option<&Self>, _before: Option<&Self>) {}
    }

    #[test]
    fn arena_alloc_and_free() {
        let mut tree = ObjectTree::new(Silent);

        let first = tree.alloc(Silent);
        let second = tree.alloc(Silent);
        assert!(tree.is_valid(first));
        assert_ne!(first, second);

        tree.free(first);
        assert!(!tree.is_valid(first));

        // Freed slots are reused under a new generation.
        let third = tree.alloc(Silent);
        assert_eq!(third.index, first.index);
        assert_ne!(third.generation, first.generation);
    }

    #[test]
    fn place_orders_children_left_to_right() {
        let mut tree = ObjectTree::new(Silent);
        let a = tree.alloc(Silent);
        let b = tree.alloc(Silent);
        let root = tree.root();

        let mut traversal = TreeTraversal::begin(&mut tree);
        traversal.begin_children(root);
        traversal.place(a);
        traversal.place(b);
        traversal.end_children();

        assert_eq!(tree.children(root), [a, b]);
        assert_eq!(tree.parent(a), Some(root));
    }

    #[test]
    fn unvisited_children_are_detached_on_close() {
        let mut tree = ObjectTree::new(Silent);
        let a = tree.alloc(Silent);
        let b = tree.alloc(Silent);
        let root = tree.root();

        let mut traversal = TreeTraversal::begin(&mut tree);
        traversal.begin_children(root);
        traversal.place(a);
        traversal.place(b);
        traversal.end_children();

        let mut traversal = TreeTraversal::begin(&mut tree);
        traversal.begin_children(root);
        traversal.place(b);
        traversal.end_children();

        assert_eq!(tree.children(root), [b]);
        assert_eq!(tree.parent(a), None);
        // The node survives detachment; only its cell's retirement frees it.
        assert!(tree.is_valid(a));
    }

    #[test]
    fn in_place_children_produce_no_reordering() {
        let mut tree = ObjectTree::new(Silent);
        let a = tree.alloc(Silent);
        let b = tree.alloc(Silent);
        let root = tree.root();

        for _ in 0..2 {
            let mut traversal = TreeTraversal::begin(&mut tree);
            traversal.begin_children(root);
            traversal.place(a);
            traversal.place(b);
            traversal.end_children();
        }

        assert_eq!(tree.children(root), [a, b]);
    }
}
