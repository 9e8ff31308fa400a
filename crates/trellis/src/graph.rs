//! The positional data graph: pass-persistent storage addressed by call site.
//!
//! Every construct that asks the graph for storage gets the same cell back on
//! every pass, as long as the sequence of scope openings, closings and keyed
//! lookups observed so far is the same. Positional identity is the default:
//! the Nth visit inside a scope on one pass binds to the Nth visit on the
//! next. Keyed cells opt out of positional order so that reordering a dynamic
//! collection reuses existing cells instead of recreating them.
//!
//! Cells and scopes live in generational arenas. A cell not touched by the
//! time its owning scope closes is retired: its sub-scope is torn down
//! depth-first, its value is surrendered to a retirement bin, and its slot is
//! recycled. The pass driver drains the bin after every scope close so that
//! consumers (the tree reconciler, the event router) can finalize the values
//! at exactly the traversal point where the owning branch died.
//!
//! Nesting mistakes — unbalanced scopes, revisiting a cell with a different
//! type, skipping visits nondeterministically — are caller programming
//! errors. The graph panics on the ones it can detect and makes no promises
//! about the rest.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Generational index of a cell in the data graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CellId {
    pub index: u32,
    pub generation: u32,
}

/// Generational index of a scope in the data graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ScopeId {
    pub index: u32,
    pub generation: u32,
}

/// Application-supplied key for keyed addressing inside a naming context.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum CellKey {
    Int(i64),
    Str(Arc<str>),
}

impl From<i64> for CellKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for CellKey {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<usize> for CellKey {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<&str> for CellKey {
    fn from(value: &str) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<String> for CellKey {
    fn from(value: String) -> Self {
        Self::Str(Arc::from(value.as_str()))
    }
}

impl From<&String> for CellKey {
    fn from(value: &String) -> Self {
        Self::Str(Arc::from(value.as_str()))
    }
}

struct CellSlot {
    generation: u32,
    /// Pass stamp of the last visit; used for keyed garbage collection.
    stamp: u64,
    /// `None` marks a free slot.
    value: Option<Box<dyn Any>>,
    /// Lazily created sub-scope owned by this cell.
    scope: Option<ScopeId>,
}

struct ScopeSlot {
    generation: u32,
    /// `None` marks a free slot.
    data: Option<ScopeData>,
}

#[derive(Default)]
struct ScopeData {
    /// Sibling cells in visitation order.
    positional: Vec<CellId>,
    /// Keyed cells; insertion order kept so retirement is deterministic.
    keyed: IndexMap<CellKey, CellId>,
}

/// Persistent, pass-over-pass store of typed cells.
pub struct DataGraph {
    cells: Vec<CellSlot>,
    free_cells: Vec<u32>,
    scopes: Vec<ScopeSlot>,
    free_scopes: Vec<u32>,
    root: ScopeId,
    /// Values of cells retired during the current pass, awaiting finalization.
    retired: Vec<Box<dyn Any>>,
    pass: u64,
}

impl DataGraph {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut graph = Self {
            cells: Vec::with_capacity(capacity),
            free_cells: Vec::new(),
            scopes: Vec::with_capacity(capacity / 4 + 1),
            free_scopes: Vec::new(),
            root: ScopeId { index: 0, generation: 0 },
            retired: Vec::new(),
            pass: 0,
        };
        graph.root = graph.alloc_scope();
        graph
    }

    /// Number of cells currently alive.
    pub fn live_cells(&self) -> usize {
        self.cells.len() - self.free_cells.len()
    }

    /// Number of scopes currently alive (the root scope included).
    pub fn live_scopes(&self) -> usize {
        self.scopes.len() - self.free_scopes.len()
    }

    /// How many passes have been started on this graph.
    pub fn pass_count(&self) -> u64 {
        self.pass
    }

    pub fn is_valid_cell(&self, id: CellId) -> bool {
        let Some(slot) = self.cells.get(id.index as usize) else {
            return false;
        };
        slot.generation == id.generation && slot.value.is_some()
    }

    fn alloc_scope(&mut self) -> ScopeId {
        if let Some(index) = self.free_scopes.pop() {
            let slot = &mut self.scopes[index as usize];
            slot.data = Some(ScopeData::default());
            ScopeId { index, generation: slot.generation }
        } else {
            let index = self.scopes.len() as u32;
            self.scopes.push(ScopeSlot { generation: 0, data: Some(ScopeData::default()) });
            ScopeId { index, generation: 0 }
        }
    }

    fn alloc_cell(&mut self, value: Box<dyn Any>) -> CellId {
        let stamp = self.pass;
        if let Some(index) = self.free_cells.pop() {
            let slot = &mut self.cells[index as usize];
            slot.value = Some(value);
            slot.stamp = stamp;
            slot.scope = None;
            CellId { index, generation: slot.generation }
        } else {
            let index = self.cells.len() as u32;
            self.cells.push(CellSlot { generation: 0, stamp, value: Some(value), scope: None });
            CellId { index, generation: 0 }
        }
    }

    fn cell_slot(&self, id: CellId) -> &CellSlot {
        let slot = &self.cells[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale cell id");
        slot
    }

    fn cell_slot_mut(&mut self, id: CellId) -> &mut CellSlot {
        let slot = &mut self.cells[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale cell id");
        slot
    }

    fn scope_data(&self, id: ScopeId) -> &ScopeData {
        let slot = &self.scopes[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale scope id");
        slot.data.as_ref().expect("scope already retired")
    }

    fn scope_data_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        let slot = &mut self.scopes[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale scope id");
        slot.data.as_mut().expect("scope already retired")
    }

    fn touch(&mut self, id: CellId) {
        let pass = self.pass;
        self.cell_slot_mut(id).stamp = pass;
    }

    fn ensure_scope(&mut self, cell: CellId) -> ScopeId {
        if let Some(scope) = self.cell_slot(cell).scope {
            return scope;
        }
        let scope = self.alloc_scope();
        self.cell_slot_mut(cell).scope = Some(scope);
        scope
    }

    fn cell_value_mut<D: 'static>(&mut self, id: CellId) -> &mut D {
        self.cell_slot_mut(id)
            .value
            .as_mut()
            .expect("cell already retired")
            .downcast_mut::<D>()
            .expect("cell revisited with a different type; the traversal is nondeterministic")
    }

    /// Retire one cell: tear down its sub-scope depth-first, surrender its
    /// value to the retirement bin, recycle the slot. Stale ids are ignored.
    fn retire_cell(&mut self, id: CellId) {
        {
            let Some(slot) = self.cells.get(id.index as usize) else {
                return;
            };
            if slot.generation != id.generation || slot.value.is_none() {
                return;
            }
        }
        let scope = self.cells[id.index as usize].scope.take();
        if let Some(scope) = scope {
            self.retire_scope(scope);
        }
        let slot = &mut self.cells[id.index as usize];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_cells.push(id.index);
        if let Some(value) = value {
            self.retired.push(value);
        }
    }

    /// Retire a whole scope and everything under it.
    ///
    /// Contents go in reverse declaration order, so a container's cells retire
    /// after the cells its body declared.
    fn retire_scope(&mut self, id: ScopeId) {
        let data = {
            let slot = &mut self.scopes[id.index as usize];
            if slot.generation != id.generation {
                return;
            }
            match slot.data.take() {
                Some(data) => data,
                None => return,
            }
        };
        for &cell in data.positional.iter().rev() {
            self.retire_cell(cell);
        }
        for (_, &cell) in data.keyed.iter().rev() {
            self.retire_cell(cell);
        }
        let slot = &mut self.scopes[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free_scopes.push(id.index);
    }

    /// Close a scope at the end of its activation: retire every positional
    /// cell past the cursor and every keyed cell not touched this pass.
    fn close_scope(&mut self, id: ScopeId, visited: usize) {
        let tail: Vec<CellId> = {
            let data = self.scope_data_mut(id);
            if visited < data.positional.len() {
                data.positional.split_off(visited)
            } else {
                Vec::new()
            }
        };
        let keyed_entries: Vec<(CellKey, CellId)> = self
            .scope_data(id)
            .keyed
            .iter()
            .map(|(key, &cell)| (key.clone(), cell))
            .collect();
        let mut stale: Vec<(CellKey, CellId)> = Vec::new();
        for (key, cell) in keyed_entries {
            let slot = &self.cells[cell.index as usize];
            let fresh = slot.generation == cell.generation && slot.stamp == self.pass;
            if !fresh {
                stale.push((key, cell));
            }
        }
        if !stale.is_empty() {
            let data = self.scope_data_mut(id);
            for (key, _) in &stale {
                data.keyed.shift_remove(key);
            }
        }
        for &cell in tail.iter().rev() {
            self.retire_cell(cell);
        }
        for &(_, cell) in stale.iter().rev() {
            self.retire_cell(cell);
        }
    }
}

impl Default for DataGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
struct Frame {
    scope: ScopeId,
    cursor: usize,
}

/// One pass over a [`DataGraph`].
///
/// Holds the scope stack and the per-scope cursors. All addressing happens
/// through this type; the pass driver must close the root scope with
/// [`end_pass`](DataTraversal::end_pass), or unvisited root cells survive
/// past their last pass.
pub struct DataTraversal<'g> {
    graph: &'g mut DataGraph,
    frames: SmallVec<[Frame; 8]>,
}

impl<'g> DataTraversal<'g> {
    /// Begin a pass: bump the pass stamp and open the root scope.
    pub fn begin(graph: &'g mut DataGraph) -> Self {
        graph.pass += 1;
        let root = graph.root;
        let mut frames = SmallVec::new();
        frames.push(Frame { scope: root, cursor: 0 });
        Self { graph, frames }
    }

    /// Visit the next positional cell of the current scope, creating it with
    /// `init` on first visit. Returns the cell id and whether it is fresh.
    pub fn visit<D: 'static>(&mut self, init: impl FnOnce() -> D) -> (CellId, bool) {
        let frame = self.frames.last_mut().expect("no active scope");
        let scope = frame.scope;
        let index = frame.cursor;
        frame.cursor += 1;

        let existing = self.graph.scope_data(scope).positional.get(index).copied();
        let (id, fresh) = match existing {
            Some(id) => (id, false),
            None => {
                debug_assert_eq!(
                    index,
                    self.graph.scope_data(scope).positional.len(),
                    "positional cursor ran past the scope's cell list",
                );
                let id = self.graph.alloc_cell(Box::new(init()));
                self.graph.scope_data_mut(scope).positional.push(id);
                (id, true)
            }
        };
        self.graph.touch(id);
        (id, fresh)
    }

    /// Visit the keyed cell `key` of the naming cell's table, creating it on
    /// first sight of the key. Keyed cells are matched by key regardless of
    /// the order in which keys are requested.
    pub fn keyed_visit<D: 'static>(
        &mut self,
        naming: CellId,
        key: CellKey,
        init: impl FnOnce() -> D,
    ) -> (CellId, bool) {
        let scope = self.graph.ensure_scope(naming);
        let existing = self.graph.scope_data(scope).keyed.get(&key).copied();
        let (id, fresh) = match existing {
            Some(id) => (id, false),
            None => {
                let id = self.graph.alloc_cell(Box::new(init()));
                self.graph.scope_data_mut(scope).keyed.insert(key, id);
                (id, true)
            }
        };
        self.graph.touch(id);
        (id, fresh)
    }

    /// Borrow a visited cell's value.
    pub fn value_mut<D: 'static>(&mut self, id: CellId) -> &mut D {
        self.graph.cell_value_mut(id)
    }

    /// Visit the next positional cell and borrow its value in one step.
    pub fn cell<D: 'static>(&mut self, init: impl FnOnce() -> D) -> &mut D {
        let (id, _) = self.visit(init);
        self.graph.cell_value_mut(id)
    }

    /// Open the sub-scope owned by `cell` as the current scope.
    pub fn enter_scope_of(&mut self, cell: CellId) {
        let scope = self.graph.ensure_scope(cell);
        self.frames.push(Frame { scope, cursor: 0 });
    }

    /// Visit a positional cell and open its sub-scope in one step.
    pub fn enter_subscope(&mut self) {
        let (cell, _) = self.visit(|| ());
        self.enter_scope_of(cell);
    }

    /// Close the current scope, retiring every child cell not visited since
    /// the matching enter.
    pub fn exit_scope(&mut self) {
        assert!(self.frames.len() > 1, "exit_scope without a matching enter");
        let frame = self.frames.pop().expect("no active scope");
        self.graph.close_scope(frame.scope, frame.cursor);
    }

    /// Retire keyed cells of the naming cell's table that were not touched
    /// this pass. Called when a naming context ends.
    pub fn sweep_keyed(&mut self, naming: CellId) {
        let Some(scope) = self.graph.cell_slot(naming).scope else {
            return;
        };
        let visited = self.graph.scope_data(scope).positional.len();
        self.graph.close_scope(scope, visited);
    }

    /// Close the root scope. Must be the last operation of the pass.
    pub fn end_pass(&mut self) {
        assert_eq!(self.frames.len(), 1, "pass ended with unclosed scopes");
        let frame = self.frames.pop().expect("no active scope");
        self.graph.close_scope(frame.scope, frame.cursor);
    }

    pub(crate) fn has_retired(&self) -> bool {
        !self.graph.retired.is_empty()
    }

    /// Drain the retirement bin for finalization.
    pub fn take_retired(&mut self) -> Vec<Box<dyn Any>> {
        std::mem::take(&mut self.graph.retired)
    }
}
