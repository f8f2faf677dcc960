//! # Relation Runtime
//!
//! Per-predicate tuple storage for semi-naive evaluation. Each relation
//! carries three buffers:
//!
//! - `base`  - all tuples promoted so far, readable by joins;
//! - `delta` - the subset of `base` added by the most recent promote
//!   (or seeded from `base` at the start of a stratum);
//! - `next`  - tuples produced in the current iteration, invisible to
//!   joins until [`Relation::promote_next`] runs.
//!
//! Membership sets over `base` and `next` give O(1) dedup, and two
//! single-column hash indices (`arg0`, `arg1`) map a key value to the
//! ordered list of matching row indices in `base`.

use crate::value::{Tuple, Value};
use rustc_hash::{FxHashMap, FxHashSet};

/// Runtime state for one predicate's tuples
#[derive(Debug, Default)]
pub struct Relation {
    arity: usize,
    base: Vec<Tuple>,
    delta: Vec<Tuple>,
    next: Vec<Tuple>,
    base_set: FxHashSet<Tuple>,
    next_set: FxHashSet<Tuple>,
    /// key at position 0 -> row indices in `base`, insertion order
    arg0: FxHashMap<Value, Vec<usize>>,
    /// key at position 1 -> row indices in `base`, insertion order
    arg1: FxHashMap<Value, Vec<usize>>,
}

impl Relation {
    pub fn new(arity: usize) -> Self {
        Relation {
            arity,
            ..Relation::default()
        }
    }

    pub fn with_capacity(arity: usize, capacity: usize) -> Self {
        let mut rel = Relation::new(arity);
        rel.base.reserve(capacity);
        rel
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn base(&self) -> &[Tuple] {
        &self.base
    }

    pub fn delta(&self) -> &[Tuple] {
        &self.delta
    }

    pub fn next(&self) -> &[Tuple] {
        &self.next
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Membership test against promoted tuples only
    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.base_set.contains(tuple)
    }

    /// Row indices in `base` whose value at `pos` (0 or 1) equals `key`.
    /// Returns `None` when no index covers `pos`.
    pub fn index_lookup(&self, pos: usize, key: &Value) -> Option<&[usize]> {
        let index = match pos {
            0 if self.arity >= 1 => &self.arg0,
            1 if self.arity >= 2 => &self.arg1,
            _ => return None,
        };
        Some(index.get(key).map_or(&[][..], Vec::as_slice))
    }

    pub fn row(&self, idx: usize) -> &Tuple {
        &self.base[idx]
    }

    /// Insert directly into `base`. Returns true if the tuple was new.
    pub fn base_insert_unique(&mut self, tuple: Tuple) -> bool {
        debug_assert_eq!(tuple.arity(), self.arity);
        if self.base_set.contains(&tuple) {
            return false;
        }
        self.base_set.insert(tuple.clone());
        self.push_base_row(tuple);
        true
    }

    /// Stage a tuple into `next`. Returns true if it is new with respect
    /// to both `base` and `next`.
    pub fn next_insert_unique(&mut self, tuple: Tuple) -> bool {
        debug_assert_eq!(tuple.arity(), self.arity);
        if self.base_set.contains(&tuple) || self.next_set.contains(&tuple) {
            return false;
        }
        self.next_set.insert(tuple.clone());
        self.next.push(tuple);
        true
    }

    /// Insert during the host iteration callback: the tuple lands in
    /// `base` immediately and in `delta` so the next iteration sees it
    /// as newly derived. Returns true if the tuple was new.
    pub fn hook_insert(&mut self, tuple: Tuple) -> bool {
        if !self.base_insert_unique(tuple.clone()) {
            return false;
        }
        self.delta.push(tuple);
        true
    }

    /// Seed `delta` with a snapshot of `base` so every existing tuple
    /// counts as newly derived in the first iteration of a stratum.
    pub fn prepare_delta(&mut self) {
        self.delta.clear();
        self.delta.extend(self.base.iter().cloned());
    }

    /// Merge `next` into `base`, rebuild the indices for the merged
    /// rows, and reassign `delta` to the tuples that were not already in
    /// `base`. `next` is empty afterwards. Returns true if anything new
    /// was promoted.
    pub fn promote_next(&mut self) -> bool {
        self.delta.clear();
        if self.next.is_empty() {
            return false;
        }
        let staged = std::mem::take(&mut self.next);
        self.next_set.clear();
        for tuple in staged {
            // next_insert_unique already checked base_set, but the host
            // may have inserted the same tuple through the hook since.
            if self.base_set.contains(&tuple) {
                continue;
            }
            self.base_set.insert(tuple.clone());
            self.push_base_row(tuple.clone());
            self.delta.push(tuple);
        }
        !self.delta.is_empty()
    }

    /// Remove and return staged tuples without promoting them into
    /// `base`. Used for provider-backed relations, where staged head
    /// tuples are handed to the provider instead.
    pub fn take_next(&mut self) -> Vec<Tuple> {
        self.next_set.clear();
        std::mem::take(&mut self.next)
    }

    /// Drop staged and delta tuples without promoting
    pub fn discard_pending(&mut self) {
        self.next.clear();
        self.next_set.clear();
        self.delta.clear();
    }

    /// Remove every tuple and index entry
    pub fn clear(&mut self) {
        self.base.clear();
        self.base_set.clear();
        self.arg0.clear();
        self.arg1.clear();
        self.discard_pending();
    }

    /// Truncate `base` back to `len` rows, rebuilding sets and indices.
    /// Used to restore pre-evaluation state after a failure (evaluation
    /// only ever appends to `base`).
    pub fn rollback_to(&mut self, len: usize) {
        if self.base.len() > len {
            self.base.truncate(len);
            self.base_set.clear();
            self.arg0.clear();
            self.arg1.clear();
            let rows = std::mem::take(&mut self.base);
            for tuple in rows {
                self.base_set.insert(tuple.clone());
                self.push_base_row(tuple);
            }
        }
        self.discard_pending();
    }

    fn push_base_row(&mut self, tuple: Tuple) {
        let idx = self.base.len();
        if self.arity >= 1 {
            if let Some(key) = tuple.get(0) {
                self.arg0.entry(*key).or_default().push(idx);
            }
        }
        if self.arity >= 2 {
            if let Some(key) = tuple.get(1) {
                self.arg1.entry(*key).or_default().push(idx);
            }
        }
        self.base.push(tuple);
    }
}
