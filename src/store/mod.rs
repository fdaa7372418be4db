//! Entity interning, alias resolution, and node ownership.
//!
//! The store is exclusively owned by the engine's owner thread; nothing in
//! here is shared across threads and nothing needs a lock.

pub mod arena;

use rustc_hash::FxHashMap;

use crate::model::{EntityId, GeneratedItem, NodeState};
pub use arena::{Arena, SlotId};

/// Materialized state for one row of the tree.
///
/// At most one node per entity id is *canonical*; every other node for the
/// same identity class carries a back-link toward the canonical one and is
/// never expanded.
#[derive(Debug)]
pub struct Node {
    /// The entity this node stands for.
    pub entity: EntityId,
    /// Snapshot of the item the node was materialized from; handed back to
    /// the generator as the parent of a later `children` call.
    pub item: GeneratedItem,
    /// The owning parent, `None` for the root.
    pub parent: Option<SlotId>,
    /// Children in arrival order. Row indices are never renumbered.
    pub children: Vec<SlotId>,
    /// Row index among siblings.
    pub row: usize,
    /// Expansion state.
    pub state: NodeState,
    /// Back-link toward the canonical node of this identity class; `None`
    /// when this node is itself canonical.
    pub canonical: Option<SlotId>,
}

impl Node {
    fn new(entity: EntityId, item: GeneratedItem) -> Self {
        Self {
            entity,
            item,
            parent: None,
            children: Vec::new(),
            row: 0,
            state: NodeState::Unopened,
            canonical: None,
        }
    }
}

/// Interns entity ids into canonical nodes and owns the node arena.
#[derive(Debug)]
pub struct NodeStore {
    arena: Arena<Node>,
    canonical: FxHashMap<EntityId, SlotId>,
    pending_alias: FxHashMap<EntityId, Vec<EntityId>>,
    root: SlotId,
}

impl NodeStore {
    /// Creates a store holding only a fresh root.
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(Node::new(EntityId(0), GeneratedItem::default()));
        Self {
            arena,
            canonical: FxHashMap::default(),
            pending_alias: FxHashMap::default(),
            root,
        }
    }

    /// Destroys every node and reseeds the root. All previously issued
    /// handles become stale.
    pub fn reset(&mut self) {
        self.arena.clear();
        self.canonical.clear();
        self.pending_alias.clear();
        self.root = self
            .arena
            .insert(Node::new(EntityId(0), GeneratedItem::default()));
    }

    /// Handle of the root node.
    pub fn root(&self) -> SlotId {
        self.root
    }

    /// Resolves `slot`, or `None` when it predates the last reset.
    pub fn node(&self, slot: SlotId) -> Option<&Node> {
        self.arena.get(slot)
    }

    /// Number of materialized nodes, the root included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the store holds nothing but the root.
    pub fn is_empty(&self) -> bool {
        self.arena.len() <= 1
    }

    /// Updates the expansion state of `slot`, ignoring stale handles.
    pub fn set_state(&mut self, slot: SlotId, state: NodeState) {
        if let Some(node) = self.arena.get_mut(slot) {
            node.state = state;
        }
    }

    /// The canonical node currently registered for `entity`, if any.
    pub fn canonical_slot(&mut self, entity: EntityId) -> Option<SlotId> {
        let slot = self.canonical.get(&entity).copied()?;
        let rep = self.canonicalize(slot);
        self.canonical.insert(entity, rep);
        Some(rep)
    }

    /// Returns the canonical node for `entity`, allocating and registering a
    /// fresh `Unopened` node when none exists yet.
    ///
    /// The returned flag is true when a node was allocated. A freshly
    /// allocated node may still come out `Duplicate`: a pending alias can
    /// join it to an earlier-registered identity class at creation time.
    pub fn intern(&mut self, entity: EntityId, item: GeneratedItem) -> (SlotId, bool) {
        if let Some(slot) = self.canonical.get(&entity).copied() {
            let rep = self.canonicalize(slot);
            self.canonical.insert(entity, rep);
            return (rep, false);
        }

        let slot = self.arena.insert(Node::new(entity, item));
        self.canonical.insert(entity, slot);

        // Endpoints that registered first win; the new node is born a
        // duplicate of their class.
        if let Some(others) = self.pending_alias.remove(&entity) {
            for other in others {
                match self.canonical.get(&other).copied() {
                    Some(other_slot) => {
                        self.union(slot, other_slot);
                        let now_empty = match self.pending_alias.get_mut(&other) {
                            Some(waiters) => {
                                waiters.retain(|&waiter| waiter != entity);
                                waiters.is_empty()
                            }
                            None => false,
                        };
                        if now_empty {
                            self.pending_alias.remove(&other);
                        }
                    }
                    // Not registered yet; the reciprocal pending entry on
                    // `other` establishes the link when it appears.
                    None => {}
                }
            }
        }

        (slot, true)
    }

    /// Records that `primary` and `aliased` name the same identity class.
    ///
    /// When both endpoints already have nodes the classes are united on the
    /// spot; otherwise the alias is kept pending, symmetrically, so that
    /// whichever endpoint registers second immediately becomes a duplicate
    /// of the first.
    pub fn link_alias(&mut self, primary: EntityId, aliased: EntityId) {
        if primary == aliased {
            return;
        }
        let a = self.canonical.get(&primary).copied();
        let b = self.canonical.get(&aliased).copied();
        match (a, b) {
            (Some(sa), Some(sb)) => {
                self.union(sa, sb);
            }
            _ => {
                // Registered entities already waiting on the same missing
                // endpoint belong to one class; unite them now rather than
                // when (if ever) the endpoint materializes.
                if let (Some(sa), None) = (a, b) {
                    let waiters: Vec<EntityId> = self
                        .pending_alias
                        .get(&aliased)
                        .cloned()
                        .unwrap_or_default();
                    for waiter in waiters {
                        if let Some(waiter_slot) = self.canonical.get(&waiter).copied() {
                            self.union(sa, waiter_slot);
                        }
                    }
                }
                self.add_pending(primary, aliased);
                self.add_pending(aliased, primary);
            }
        }
    }

    fn add_pending(&mut self, from: EntityId, to: EntityId) {
        let waiters = self.pending_alias.entry(from).or_default();
        if !waiters.contains(&to) {
            waiters.push(to);
        }
    }

    /// Follows the duplicate chain from `slot` to the canonical node of its
    /// identity class, compressing intermediate links along the way.
    pub fn canonicalize(&mut self, slot: SlotId) -> SlotId {
        let mut rep = slot;
        loop {
            match self.arena.get(rep) {
                Some(node) => match node.canonical {
                    Some(next) => rep = next,
                    None => break,
                },
                None => return slot,
            }
        }

        let mut walk = slot;
        while walk != rep {
            match self.arena.get_mut(walk) {
                Some(node) => {
                    let next = node.canonical.take();
                    node.canonical = Some(rep);
                    match next {
                        Some(next) => walk = next,
                        None => break,
                    }
                }
                None => break,
            }
        }
        rep
    }

    /// Allocates a duplicate row node for `entity` pointing at the identity
    /// class of `of`. Duplicate rows are never registered as canonical and
    /// never expanded.
    pub fn new_duplicate(&mut self, entity: EntityId, item: GeneratedItem, of: SlotId) -> SlotId {
        let rep = self.canonicalize(of);
        let mut node = Node::new(entity, item);
        node.state = NodeState::Duplicate;
        node.canonical = Some(rep);
        self.arena.insert(node)
    }

    /// Appends `rows` to `parent`'s children at the next row indices and
    /// returns the inserted `(first, last)` row range.
    pub fn append_children(&mut self, parent: SlotId, rows: &[SlotId]) -> (usize, usize) {
        let first = self
            .arena
            .get(parent)
            .map(|node| node.children.len())
            .unwrap_or(0);
        for (offset, &row_slot) in rows.iter().enumerate() {
            if let Some(node) = self.arena.get_mut(row_slot) {
                node.parent = Some(parent);
                node.row = first + offset;
            }
        }
        if let Some(node) = self.arena.get_mut(parent) {
            node.children.extend_from_slice(rows);
        }
        (first, first + rows.len().saturating_sub(1))
    }

    /// Unites two identity classes; the earlier-registered representative
    /// survives, the other is demoted to a duplicate of it.
    fn union(&mut self, a: SlotId, b: SlotId) -> SlotId {
        let ra = self.canonicalize(a);
        let rb = self.canonicalize(b);
        if ra == rb {
            return ra;
        }
        let (winner, loser) = if ra.index() <= rb.index() {
            (ra, rb)
        } else {
            (rb, ra)
        };
        if let Some(node) = self.arena.get_mut(loser) {
            node.canonical = Some(winner);
            node.state = NodeState::Duplicate;
        }
        winner
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
