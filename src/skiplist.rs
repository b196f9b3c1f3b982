//! Skip list — probabilistically balanced ordered multiset
//!
//! Keys are `u64` deadline ticks; duplicates are allowed. Nodes live in an
//! index-addressed pool with `u32` links instead of raw pointers, and every
//! handle carries a generation counter so removing through a stale handle
//! is a no-op rather than a corruption.
//!
//! A node's level is drawn by repeated fair coin flips from an injectable
//! generator, capped at [`MAX_LEVEL`]: P(level = k) is 2^-(k+1). Search,
//! insert and remove descend from the head at the list's current level,
//! advancing while the next key is strictly smaller and recording the
//! predecessor at each level; expected cost is O(log n). The front of
//! level 0 is always the minimum key, read in O(1).
//!
//! Author: Moroya Sakamoto

use alloc::vec::Vec;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Highest level a node can reach (levels run 0..=MAX_LEVEL)
pub const MAX_LEVEL: usize = 8;

const HEAD: u32 = 0;
const TAIL: u32 = 1;

/// Generational handle to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    index: u32,
    generation: u32,
}

struct Node<T> {
    key: u64,
    value: Option<T>,
    level: usize,
    generation: u32,
    forward: [u32; MAX_LEVEL + 1],
}

impl<T> Node<T> {
    fn sentinel(key: u64) -> Self {
        Self {
            key,
            value: None,
            level: MAX_LEVEL,
            generation: 0,
            forward: [TAIL; MAX_LEVEL + 1],
        }
    }
}

/// Ordered multiset keyed by `u64`
pub struct SkipList<T, R = SmallRng> {
    nodes: Vec<Node<T>>,
    free: Vec<u32>,
    level: usize,
    len: usize,
    rng: R,
}

impl<T> SkipList<T, SmallRng> {
    /// List with the default generator seeded from `seed`
    pub fn new(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }
}

impl<T, R: RngCore> SkipList<T, R> {
    /// List drawing node levels from `rng`
    pub fn with_rng(rng: R) -> Self {
        let mut nodes = Vec::with_capacity(2);
        nodes.push(Node::sentinel(0));
        // the tail key is an upper bound for every real key, so the
        // descent loops need no explicit end-of-list checks
        nodes.push(Node::sentinel(u64::MAX));
        Self {
            nodes,
            free: Vec::new(),
            level: 0,
            len: 0,
            rng,
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the list empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Highest level with a real edge from the head
    pub fn level(&self) -> usize {
        self.level
    }

    /// Insert an entry, returning its handle
    ///
    /// Equal keys are allowed; a new node is spliced ahead of an existing
    /// run of its key at every level it occupies, so the run's order is
    /// the same on every level.
    pub fn insert(&mut self, key: u64, value: T) -> NodeRef {
        debug_assert!(key < u64::MAX, "the maximum key is reserved for the tail");
        let mut update = [HEAD; MAX_LEVEL + 1];
        let mut at = HEAD;
        for lvl in (0..=self.level).rev() {
            loop {
                let next = self.nodes[at as usize].forward[lvl];
                if self.nodes[next as usize].key < key {
                    at = next;
                } else {
                    break;
                }
            }
            update[lvl] = at;
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for entry in update.iter_mut().take(new_level + 1).skip(self.level + 1) {
                *entry = HEAD;
            }
            self.level = new_level;
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.nodes.push(Node::sentinel(0));
                (self.nodes.len() - 1) as u32
            }
        };
        let generation = {
            let node = &mut self.nodes[index as usize];
            node.key = key;
            node.value = Some(value);
            node.level = new_level;
            node.generation
        };
        for lvl in 0..=new_level {
            let successor = self.nodes[update[lvl] as usize].forward[lvl];
            self.nodes[index as usize].forward[lvl] = successor;
            self.nodes[update[lvl] as usize].forward[lvl] = index;
        }
        self.len += 1;
        NodeRef { index, generation }
    }

    /// Remove the entry behind a handle
    ///
    /// Returns `None` if the handle is stale (already removed or popped),
    /// making removal idempotent.
    pub fn remove(&mut self, node: NodeRef) -> Option<T> {
        let index = node.index as usize;
        if index >= self.nodes.len() {
            return None;
        }
        if self.nodes[index].generation != node.generation || self.nodes[index].value.is_none() {
            return None;
        }
        let key = self.nodes[index].key;
        let node_level = self.nodes[index].level;

        // predecessors of the whole equal-key run, per level
        let mut update = [HEAD; MAX_LEVEL + 1];
        let mut at = HEAD;
        for lvl in (0..=self.level).rev() {
            loop {
                let next = self.nodes[at as usize].forward[lvl];
                if self.nodes[next as usize].key < key {
                    at = next;
                } else {
                    break;
                }
            }
            update[lvl] = at;
        }
        // walk each occupied level up to the exact node, then unsplice
        for lvl in 0..=node_level {
            let mut at = update[lvl];
            while self.nodes[at as usize].forward[lvl] != node.index {
                at = self.nodes[at as usize].forward[lvl];
            }
            let successor = self.nodes[index].forward[lvl];
            self.nodes[at as usize].forward[lvl] = successor;
        }
        while self.level > 0 && self.nodes[HEAD as usize].forward[self.level] == TAIL {
            self.level -= 1;
        }

        self.len -= 1;
        let value = self.nodes[index].value.take();
        self.nodes[index].generation = self.nodes[index].generation.wrapping_add(1);
        self.free.push(node.index);
        value
    }

    /// Remove the first entry carrying `key`
    pub fn remove_key(&mut self, key: u64) -> Option<T> {
        let node = self.find(key)?;
        self.remove(node)
    }

    /// First entry carrying `key`, if any
    pub fn search(&self, key: u64) -> Option<&T> {
        let node = self.find(key)?;
        self.nodes[node.index as usize].value.as_ref()
    }

    /// The minimum entry without removing it
    pub fn peek_front(&self) -> Option<(u64, &T)> {
        let first = self.nodes[HEAD as usize].forward[0];
        if first == TAIL {
            return None;
        }
        let node = &self.nodes[first as usize];
        Some((node.key, node.value.as_ref()?))
    }

    /// Detach and return the minimum entry
    pub fn pop_front(&mut self) -> Option<(u64, T)> {
        let first = self.nodes[HEAD as usize].forward[0];
        if first == TAIL {
            return None;
        }
        let key = self.nodes[first as usize].key;
        let node = NodeRef {
            index: first,
            generation: self.nodes[first as usize].generation,
        };
        let value = self.remove(node)?;
        Some((key, value))
    }

    /// Level-0 traversal in key order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        let mut at = self.nodes[HEAD as usize].forward[0];
        core::iter::from_fn(move || {
            if at == TAIL {
                return None;
            }
            let node = &self.nodes[at as usize];
            at = node.forward[0];
            Some((node.key, node.value.as_ref()?))
        })
    }

    fn find(&self, key: u64) -> Option<NodeRef> {
        let mut at = HEAD;
        for lvl in (0..=self.level).rev() {
            loop {
                let next = self.nodes[at as usize].forward[lvl];
                if self.nodes[next as usize].key < key {
                    at = next;
                } else {
                    break;
                }
            }
        }
        let candidate = self.nodes[at as usize].forward[0];
        if candidate != TAIL && self.nodes[candidate as usize].key == key {
            Some(NodeRef {
                index: candidate,
                generation: self.nodes[candidate as usize].generation,
            })
        } else {
            None
        }
    }

    /// Fair-coin level draw, capped at [`MAX_LEVEL`]
    fn random_level(&mut self) -> usize {
        let mut level = 0;
        while level < MAX_LEVEL && self.rng.next_u32() & 1 == 1 {
            level += 1;
        }
        level
    }
}
