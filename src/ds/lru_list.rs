//! Arena-backed LRU key list with an embedded index.
//!
//! Per-shard recency order for listing-mode eviction: a doubly-linked list
//! of 64-bit keys whose nodes live in a reusable slot arena, linked by u32
//! slot indices, plus a key → slot map for O(1) membership surgery.
//!
//! ## Architecture
//!
//! ```text
//!   nodes: Vec<Node { key, prev, next }>      index: FxHashMap<u64, u32>
//!   ┌──────┬───────────────────────────┐
//!   │ slot │ node                      │      key 7  -> slot 0
//!   ├──────┼───────────────────────────┤      key 21 -> slot 2
//!   │  0   │ { 7,  prev: NIL, next: 2} │
//!   │  1   │ (free)                    │      head ─► slot 0 (MRU)
//!   │  2   │ { 21, prev: 0, next: NIL} │      tail ─► slot 2 (LRU)
//!   └──────┴───────────────────────────┘
//! ```
//!
//! Freed slots are recycled through a free list, so a shard at steady state
//! performs no node allocation. All operations are O(1); the caller holds
//! the shard lock, so the structure itself is single-threaded.

use rustc_hash::FxHashMap;

/// Sentinel slot meaning "no link".
const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    key: u64,
    prev: u32,
    next: u32,
}

/// Doubly-linked access-order list of keys. Front is most recent.
#[derive(Debug)]
pub(crate) struct LruList {
    nodes: Vec<Node>,
    free: Vec<u32>,
    index: FxHashMap<u64, u32>,
    head: u32,
    tail: u32,
}

impl LruList {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: FxHashMap::default(),
            head: NIL,
            tail: NIL,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Inserts `key` at the front, or moves it there when already present.
    pub(crate) fn push_front(&mut self, key: u64) {
        if let Some(&slot) = self.index.get(&key) {
            self.detach(slot);
            self.attach_front(slot);
            return;
        }
        let slot = self.alloc(key);
        self.attach_front(slot);
        self.index.insert(key, slot);
    }

    /// Moves an existing key to the front; absent keys are ignored.
    pub(crate) fn touch(&mut self, key: u64) {
        if let Some(&slot) = self.index.get(&key) {
            if self.head == slot {
                return;
            }
            self.detach(slot);
            self.attach_front(slot);
        }
    }

    /// Unlinks `key`; returns whether it was present.
    pub(crate) fn remove(&mut self, key: u64) -> bool {
        match self.index.remove(&key) {
            Some(slot) => {
                self.detach(slot);
                self.release(slot);
                true
            }
            None => false,
        }
    }

    /// Least-recently-used key, without unlinking it.
    pub(crate) fn peek_tail(&self) -> Option<u64> {
        (self.tail != NIL).then(|| self.nodes[self.tail as usize].key)
    }

    /// Unlinks and returns the least-recently-used key.
    pub(crate) fn pop_tail(&mut self) -> Option<u64> {
        let slot = self.tail;
        if slot == NIL {
            return None;
        }
        let key = self.nodes[slot as usize].key;
        self.detach(slot);
        self.release(slot);
        self.index.remove(&key);
        Some(key)
    }

    /// Drops all nodes but keeps allocated capacity.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn alloc(&mut self, key: u64) -> u32 {
        let node = Node {
            key,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn release(&mut self, slot: u32) {
        self.free.push(slot);
    }

    fn detach(&mut self, slot: u32) {
        let Node { prev, next, .. } = self.nodes[slot as usize];
        if prev != NIL {
            self.nodes[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }
        let node = &mut self.nodes[slot as usize];
        node.prev = NIL;
        node.next = NIL;
    }

    fn attach_front(&mut self, slot: u32) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[slot as usize];
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head as usize].prev = slot;
        } else {
            self.tail = slot;
        }
        self.head = slot;
    }

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn debug_validate_invariants(&self) {
        if self.head == NIL || self.tail == NIL {
            assert_eq!(self.head, NIL);
            assert_eq!(self.tail, NIL);
            assert_eq!(self.len(), 0);
            return;
        }

        let mut seen = std::collections::HashSet::new();
        let mut count = 0usize;
        let mut slot = self.head;
        let mut prev = NIL;

        while slot != NIL {
            assert!(seen.insert(slot));
            let node = self.nodes[slot as usize];
            assert_eq!(node.prev, prev);
            assert_eq!(self.index.get(&node.key), Some(&slot));
            if node.next == NIL {
                assert_eq!(self.tail, slot);
            }
            prev = slot;
            slot = node.next;
            count += 1;
            assert!(count <= self.len());
        }

        assert_eq!(count, self.len());
        assert_eq!(self.nodes.len(), self.free.len() + self.len());
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Push(u64),
        Touch(u64),
        Remove(u64),
        PopTail,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..32).prop_map(Op::Push),
            (0u64..32).prop_map(Op::Touch),
            (0u64..32).prop_map(Op::Remove),
            Just(Op::PopTail),
        ]
    }

    proptest! {
        /// Property: the list agrees with a reference VecDeque model and
        /// its structural invariants hold after every operation.
        #[test]
        fn prop_matches_reference_model(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut list = LruList::new();
            // Reference: front of the Vec is MRU.
            let mut model: Vec<u64> = Vec::new();

            for op in ops {
                match op {
                    Op::Push(k) => {
                        model.retain(|&x| x != k);
                        model.insert(0, k);
                        list.push_front(k);
                    }
                    Op::Touch(k) => {
                        if let Some(pos) = model.iter().position(|&x| x == k) {
                            let k = model.remove(pos);
                            model.insert(0, k);
                        }
                        list.touch(k);
                    }
                    Op::Remove(k) => {
                        let had = model.iter().any(|&x| x == k);
                        model.retain(|&x| x != k);
                        prop_assert_eq!(list.remove(k), had);
                    }
                    Op::PopTail => {
                        prop_assert_eq!(list.pop_tail(), model.pop());
                    }
                }
                list.debug_validate_invariants();
                prop_assert_eq!(list.len(), model.len());
                prop_assert_eq!(list.peek_tail(), model.last().copied());
            }
        }
    }
}
