//! Per-device activation stack: a doubly-linked list of currently-active
//! layer activations with O(1) push/pop and O(depth) search (spec.md
//! §4.1). Implemented as a slab of slots plus index links rather than
//! raw pointers, per design notes §9 ("never with raw shared pointers").
//!
//! The first 8 slots live inline (`SmallVec`); deeper stacks spill to the
//! heap transparently. `kind`-specific state — timeout, the buffered
//! delayed key, whether the hold path was taken — lives directly on the
//! `Activation`, never as hidden state elsewhere (design notes §9).

use smallvec::SmallVec;

use crate::keys::KeyCode;
use crate::layers::LayerIndex;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActivationKind {
    OverloadMod,
    OverloadLayer,
    ShiftLayer,
    LatchLayer,
    LockLayer,
}

/// Identifies which `(layer, code)` keymap slot produced an activation,
/// so the dispatcher and executor can recognize "this release matches
/// the action that created this activation" without cloning the action
/// itself (spec.md §3: "`action` — back-pointer to the originating
/// action").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ActionOrigin {
    pub layer: LayerIndex,
    pub code: KeyCode,
}

#[derive(Clone, Debug)]
pub struct Activation {
    pub layer: LayerIndex,
    pub kind: ActivationKind,
    /// The key that created this activation. Cleared to 0 once that key
    /// is released while the activation itself persists (latched/locked),
    /// per invariant 1 of spec.md §3.
    pub code: KeyCode,
    pub origin: ActionOrigin,
    /// Whether the hold path has been taken (overload resolved to hold).
    pub active: bool,
    /// The first foreign key pressed while this overload was undecided,
    /// buffered until tap-vs-hold resolves (spec.md §4.4).
    pub delayed_code: Option<KeyCode>,
    pub timeout_at_ms: Option<u64>,
    /// `LockLayer` only: true if this is an overlay lock that coexists
    /// with another non-overlay lock instead of replacing it.
    pub is_overlay: bool,
    /// True once this activation has been promoted from
    /// latch/lock-pending (`code == 0, action set`) to an ordinary
    /// `ShiftLayer` by the dispatcher because another key was pressed
    /// during the hold (spec.md §4.4's `LatchLayer`/`LockLayer` routing).
    pub promoted_to_shift: bool,
    /// `LockModIf` only: the modifier bit whose release retires this
    /// lock, checked by the executor on every key release.
    pub lock_if_mod: Option<crate::layers::ModBit>,
}

impl Activation {
    pub fn new(layer: LayerIndex, kind: ActivationKind, code: KeyCode, origin: ActionOrigin) -> Self {
        Self {
            layer,
            kind,
            code,
            origin,
            active: false,
            delayed_code: None,
            timeout_at_ms: None,
            is_overlay: false,
            promoted_to_shift: false,
            lock_if_mod: None,
        }
    }

    /// True for an activation still pending a press after its
    /// originating key released (latch/lock waiting for the next key),
    /// per invariant 4 of spec.md §8.
    pub fn is_pending_latch_or_lock(&self) -> bool {
        self.code.is_undefined()
            && matches!(self.kind, ActivationKind::LatchLayer | ActivationKind::LockLayer)
            && !self.promoted_to_shift
    }
}

struct Node {
    activation: Activation,
    prev: Option<usize>,
    next: Option<usize>,
}

pub type ActivationId = usize;

/// Per-device stack. `next` always points toward the top (most recently
/// activated); `prev` toward the bottom.
pub struct ActivationStack {
    slots: SmallVec<[Option<Node>; 8]>,
    free: Vec<usize>,
    top: Option<usize>,
}

impl ActivationStack {
    pub fn new() -> Self {
        Self {
            slots: SmallVec::new(),
            free: Vec::new(),
            top: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    pub fn top_id(&self) -> Option<ActivationId> {
        self.top
    }

    pub fn top(&self) -> Option<&Activation> {
        self.top.map(|i| &self.node(i).activation)
    }

    pub fn top_mut(&mut self) -> Option<&mut Activation> {
        self.top.map(move |i| &mut self.slots[i].as_mut().unwrap().activation)
    }

    pub fn get(&self, id: ActivationId) -> &Activation {
        &self.node(id).activation
    }

    pub fn get_mut(&mut self, id: ActivationId) -> &mut Activation {
        &mut self.slots[id].as_mut().unwrap().activation
    }

    fn node(&self, id: ActivationId) -> &Node {
        self.slots[id].as_ref().expect("activation id refers to a freed slot")
    }

    /// Does not validate that `layer` is not already active elsewhere in
    /// the stack — duplicates are legal (e.g. two different overload
    /// keys both holding the same layer), per spec.md §4.1.
    pub fn activate(&mut self, layer: LayerIndex, kind: ActivationKind, code: KeyCode, origin: ActionOrigin) -> ActivationId {
        let activation = Activation::new(layer, kind, code, origin);
        let node = Node {
            activation,
            prev: self.top,
            next: None,
        };
        let id = if let Some(free_id) = self.free.pop() {
            self.slots[free_id] = Some(node);
            free_id
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        };
        if let Some(old_top) = self.top {
            self.slots[old_top].as_mut().unwrap().next = Some(id);
        }
        self.top = Some(id);
        id
    }

    pub fn deactivate(&mut self, id: ActivationId) {
        let node = self.slots[id].take().expect("double-deactivate of activation");
        match node.prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = node.next,
            None => {}
        }
        match node.next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = node.prev,
            None => self.top = node.prev,
        }
        self.free.push(id);
    }

    /// Walks `id.next..` and removes every activation whose kind is
    /// `LockLayer` — they must be overlays stacked above `id` by
    /// construction (spec.md §4.1).
    pub fn deactivate_overlays_above(&mut self, id: ActivationId) {
        let mut cur = self.node(id).next;
        let mut overlays = Vec::new();
        while let Some(c) = cur {
            let node = self.node(c);
            if node.activation.kind == ActivationKind::LockLayer {
                overlays.push(c);
            }
            cur = node.next;
        }
        for overlay in overlays {
            self.deactivate(overlay);
        }
    }

    /// Linear search from top for the activation whose `code` matches
    /// (only codes still nonzero, per invariant 1, are findable this
    /// way — latched/locked activations have `code == 0` and are found
    /// via `find_by_origin` instead).
    pub fn find_by_code(&self, code: KeyCode) -> Option<ActivationId> {
        let mut cur = self.top;
        while let Some(c) = cur {
            let node = self.node(c);
            if node.activation.code == code {
                return Some(c);
            }
            cur = node.prev;
        }
        None
    }

    /// Finds the (at most one) activation whose `origin` matches — used
    /// to recognize "this key press re-triggers the lock/latch it
    /// itself created" after the originating key has already released.
    pub fn find_by_origin(&self, origin: ActionOrigin) -> Option<ActivationId> {
        let mut cur = self.top;
        while let Some(c) = cur {
            let node = self.node(c);
            if node.activation.origin == origin {
                return Some(c);
            }
            cur = node.prev;
        }
        None
    }

    /// Iterates activation ids from top to bottom.
    pub fn iter_top_down(&self) -> TopDownIter<'_> {
        TopDownIter {
            stack: self,
            cur: self.top,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl Default for ActivationStack {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TopDownIter<'a> {
    stack: &'a ActivationStack,
    cur: Option<usize>,
}

impl<'a> Iterator for TopDownIter<'a> {
    type Item = (ActivationId, &'a Activation);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let node = self.stack.node(id);
        self.cur = node.prev;
        Some((id, &node.activation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(code: u16) -> ActionOrigin {
        ActionOrigin {
            layer: 0,
            code: KeyCode::new(code),
        }
    }

    #[test]
    fn push_pop_order() {
        let mut s = ActivationStack::new();
        let a = s.activate(1, ActivationKind::ShiftLayer, KeyCode::new(10), origin(10));
        let b = s.activate(2, ActivationKind::ShiftLayer, KeyCode::new(11), origin(11));
        assert_eq!(s.top_id(), Some(b));
        s.deactivate(b);
        assert_eq!(s.top_id(), Some(a));
        s.deactivate(a);
        assert!(s.is_empty());
    }

    #[test]
    fn reuses_freed_slots() {
        let mut s = ActivationStack::new();
        let a = s.activate(1, ActivationKind::ShiftLayer, KeyCode::new(10), origin(10));
        s.deactivate(a);
        let b = s.activate(1, ActivationKind::ShiftLayer, KeyCode::new(10), origin(10));
        assert_eq!(a, b, "freed slot should be reused");
    }

    #[test]
    fn deactivate_overlays_above_only_removes_lock_layers_above() {
        let mut s = ActivationStack::new();
        let base = s.activate(1, ActivationKind::LockLayer, KeyCode::new(1), origin(1));
        let shift = s.activate(2, ActivationKind::ShiftLayer, KeyCode::new(2), origin(2));
        let overlay = s.activate(3, ActivationKind::LockLayer, KeyCode::new(3), origin(3));
        s.deactivate_overlays_above(base);
        assert!(s.top_id() == Some(shift) || s.get(overlay).kind != ActivationKind::LockLayer);
        // shift remains (not LockLayer kind), overlay (LockLayer, above base) is gone
        let remaining: Vec<_> = s.iter_top_down().map(|(id, _)| id).collect();
        assert!(remaining.contains(&base));
        assert!(remaining.contains(&shift));
        assert!(!remaining.contains(&overlay));
    }

    #[test]
    fn find_by_code_searches_top_down() {
        let mut s = ActivationStack::new();
        s.activate(1, ActivationKind::ShiftLayer, KeyCode::new(5), origin(5));
        let b = s.activate(2, ActivationKind::ShiftLayer, KeyCode::new(5), origin(5));
        // two activations share the code 5 in this synthetic test; top-down search finds the newest
        assert_eq!(s.find_by_code(KeyCode::new(5)), Some(b));
    }

    #[test]
    fn duplicate_layers_are_allowed() {
        let mut s = ActivationStack::new();
        s.activate(1, ActivationKind::OverloadLayer, KeyCode::new(1), origin(1));
        s.activate(1, ActivationKind::OverloadLayer, KeyCode::new(2), origin(2));
        assert_eq!(s.len(), 2);
    }
}
