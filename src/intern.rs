//! # Fact Intern Table
//!
//! Assigns each `(predicate, tuple)` pair a stable 64-bit [`FactId`] so
//! tuples can appear as first-class values inside other tuples. Ids are
//! assigned in insertion order within each predicate, packed as
//! `(pred_id << 48) | local_index`, and survive `clear_derived`.
//!
//! The inverse direction (`FactId -> Tuple`) is a direct vector index.

use crate::error::EvalError;
use crate::value::{FactId, PredId, Tuple, FACT_LOCAL_MASK};
use rustc_hash::FxHashMap;

/// Per-engine fact interner
#[derive(Debug, Default)]
pub struct FactInterner {
    /// (pred, tuple) -> id, for dedup on intern
    ids: FxHashMap<(PredId, Tuple), FactId>,
    /// Per-predicate tuple pools indexed by the id's local ordinal
    pools: FxHashMap<PredId, Vec<Tuple>>,
}

impl FactInterner {
    pub fn new() -> Self {
        FactInterner::default()
    }

    /// Intern a tuple under a predicate, returning its stable id.
    ///
    /// Interning the same pair twice returns the same id. Fails only if
    /// the 48-bit per-predicate ordinal space is exhausted.
    pub fn intern(
        &mut self,
        pred: PredId,
        pred_name: &str,
        tuple: &Tuple,
    ) -> Result<FactId, EvalError> {
        if let Some(&id) = self.ids.get(&(pred, tuple.clone())) {
            return Ok(id);
        }
        let pool = self.pools.entry(pred).or_default();
        let local = pool.len() as u64;
        if local > FACT_LOCAL_MASK {
            return Err(EvalError::FactIdOverflow {
                predicate: pred_name.to_string(),
            });
        }
        let id = FactId::new(pred, local);
        pool.push(tuple.clone());
        self.ids.insert((pred, tuple.clone()), id);
        Ok(id)
    }

    /// Id already assigned to `(pred, tuple)`, if any
    pub fn get(&self, pred: PredId, tuple: &Tuple) -> Option<FactId> {
        self.ids.get(&(pred, tuple.clone())).copied()
    }

    /// O(1) inverse lookup; `None` for ids this interner never produced
    pub fn lookup(&self, id: FactId) -> Option<&Tuple> {
        self.pools
            .get(&id.pred())
            .and_then(|pool| pool.get(id.local_index() as usize))
    }

    /// Number of interned facts for one predicate
    pub fn count_for(&self, pred: PredId) -> usize {
        self.pools.get(&pred).map_or(0, Vec::len)
    }
}
