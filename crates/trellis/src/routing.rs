//! Event routing regions.
//!
//! Each pass rebuilds a lightweight tree of regions mirroring the declared
//! container nesting. Regions exist only for addressing: a dispatch walks
//! parent links from a captured target up to the root, then re-invokes the
//! declaring procedure with that path attached so intermediate containers can
//! decide relevance. Regions own no objects and issue no mutations.

/// Generational index of a region in a [`RegionArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegionId {
    pub index: u32,
    pub generation: u32,
}

/// Cell value marking region ownership; finalized when the cell retires.
pub(crate) struct RegionToken(pub(crate) RegionId);

struct RegionSlot {
    generation: u32,
    alive: bool,
    parent: Option<RegionId>,
}

/// Arena of routing regions; "ownership" is solely the arena, parent links
/// are ids.
pub struct RegionArena {
    slots: Vec<RegionSlot>,
    free: Vec<u32>,
}

impl RegionArena {
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { slots: Vec::with_capacity(capacity), free: Vec::new() }
    }

    /// Number of regions currently alive.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self, id: RegionId) -> bool {
        match self.slots.get(id.index as usize) {
            Some(slot) => slot.generation == id.generation && slot.alive,
            None => false,
        }
    }

    /// Parent of a region; `None` for top-level regions or stale ids.
    pub fn parent(&self, id: RegionId) -> Option<RegionId> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation || !slot.alive {
            return None;
        }
        slot.parent
    }

    pub(crate) fn alloc(&mut self, parent: Option<RegionId>) -> RegionId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            slot.parent = parent;
            RegionId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(RegionSlot { generation: 0, alive: true, parent });
            RegionId { index, generation: 0 }
        }
    }

    /// Relink a region after its container moved to a different nesting.
    pub(crate) fn set_parent(&mut self, id: RegionId, parent: Option<RegionId>) {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale region id");
        slot.parent = parent;
    }

    /// Retire a region. Stale ids are ignored, so finalization after a
    /// cascading scope teardown is order-independent.
    pub(crate) fn free(&mut self, id: RegionId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation || !slot.alive {
            return;
        }
        slot.alive = false;
        slot.parent = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }
}

impl Default for RegionArena {
    fn default() -> Self {
        Self::new()
    }
}

/// One link of a root-to-target routing path.
///
/// Built by recursion during dispatch, so the whole path lives on the call
/// stack: O(depth) frames, no heap allocation. Consumed head-first as the
/// re-invoked procedure opens regions.
pub struct PathNode<'a> {
    pub(crate) region: RegionId,
    pub(crate) rest: Option<&'a PathNode<'a>>,
}

impl<'a> PathNode<'a> {
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn rest(&self) -> Option<&'a PathNode<'a>> {
        self.rest
    }
}
