//! Equivalence-relation provider backed by union-find.
//!
//! Represents the reflexive-symmetric-transitive closure of the added
//! pairs in O(N) space over N distinct symbols. `add(a, b)` unifies the
//! two classes; `contains(a, b)` is `find(a) == find(b)`; `lookup(k, p)`
//! pairs `k` with every member of its class. Delta iteration emits the
//! pairs that became equivalent since the last ack, including the
//! reflexive pair when a symbol first appears, so rules reading the
//! relation see the closure grow incrementally.

use super::{AddOutcome, ProviderError, ProviderKind, RelationProvider};
use crate::value::{SymbolId, Tuple, Value};
use rustc_hash::FxHashMap;

/// Union-find over dense slots, path compression on the mutable path
/// and union by rank. Shared with the e-graph provider.
#[derive(Debug, Default, Clone)]
pub(crate) struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn make_set(&mut self) -> u32 {
        let slot = self.parent.len() as u32;
        self.parent.push(slot);
        self.rank.push(0);
        slot
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Non-compressing find, usable from `&self` contexts
    pub fn find(&self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            x = self.parent[x as usize];
        }
        x
    }

    /// Compressing find
    pub fn find_mut(&mut self, x: u32) -> u32 {
        let root = self.find(x);
        let mut cur = x;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    /// Union two slots. Returns `(winner, loser)` roots, or `None` when
    /// they were already in the same class.
    pub fn union(&mut self, a: u32, b: u32) -> Option<(u32, u32)> {
        let ra = self.find_mut(a);
        let rb = self.find_mut(b);
        if ra == rb {
            return None;
        }
        let (winner, loser) = match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => (rb, ra),
            std::cmp::Ordering::Greater => (ra, rb),
            std::cmp::Ordering::Equal => {
                self.rank[ra as usize] += 1;
                (ra, rb)
            }
        };
        self.parent[loser as usize] = winner;
        Some((winner, loser))
    }
}

/// Binary equivalence relation over symbols
#[derive(Debug, Default)]
pub struct EqrelProvider {
    uf: UnionFind,
    slot_of: FxHashMap<SymbolId, u32>,
    /// slot -> symbol, in first-seen order
    syms: Vec<SymbolId>,
    /// root slot -> member slots (meaningful at roots only)
    members: Vec<Vec<u32>>,
    /// pairs newly equivalent since the last ack
    delta: Vec<(SymbolId, SymbolId)>,
}

impl EqrelProvider {
    pub fn new() -> Self {
        EqrelProvider::default()
    }

    fn slot(&mut self, sym: SymbolId) -> u32 {
        if let Some(&slot) = self.slot_of.get(&sym) {
            return slot;
        }
        let slot = self.uf.make_set();
        self.slot_of.insert(sym, slot);
        self.syms.push(sym);
        self.members.push(vec![slot]);
        self.delta.push((sym, sym));
        slot
    }

    fn sym_pair(tuple: &Tuple) -> Result<(SymbolId, SymbolId), ProviderError> {
        match (tuple.get(0), tuple.get(1)) {
            (Some(Value::Sym(a)), Some(Value::Sym(b))) if tuple.arity() == 2 => Ok((*a, *b)),
            _ => Err(ProviderError(
                "equivalence relation takes two symbol arguments".to_string(),
            )),
        }
    }

    /// Members of `sym`'s class in first-seen order; empty if unknown
    pub fn class_members(&self, sym: SymbolId) -> Vec<SymbolId> {
        let Some(&slot) = self.slot_of.get(&sym) else {
            return Vec::new();
        };
        let root = self.uf.find(slot);
        self.members[root as usize]
            .iter()
            .map(|&s| self.syms[s as usize])
            .collect()
    }

    /// Number of distinct symbols seen
    pub fn element_count(&self) -> usize {
        self.syms.len()
    }
}

impl RelationProvider for EqrelProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Eqrel
    }

    fn arity(&self) -> usize {
        2
    }

    fn add(&mut self, tuple: &Tuple) -> Result<AddOutcome, ProviderError> {
        let (a, b) = Self::sym_pair(tuple)?;
        let known = self.slot_of.contains_key(&a) && self.slot_of.contains_key(&b);
        let sa = self.slot(a);
        let sb = self.slot(b);
        match self.uf.union(sa, sb) {
            Some((winner, loser)) => {
                // every (winner-member, loser-member) pair is newly equal
                let loser_members = std::mem::take(&mut self.members[loser as usize]);
                for &x in &self.members[winner as usize] {
                    for &y in &loser_members {
                        self.delta.push((self.syms[x as usize], self.syms[y as usize]));
                        self.delta.push((self.syms[y as usize], self.syms[x as usize]));
                    }
                }
                self.members[winner as usize].extend(loser_members);
                Ok(AddOutcome::Added)
            }
            None => {
                if known {
                    Ok(AddOutcome::NoChange)
                } else {
                    // fresh symbols contribute their reflexive pairs
                    Ok(AddOutcome::Added)
                }
            }
        }
    }

    fn contains(&self, tuple: &Tuple) -> bool {
        let Ok((a, b)) = Self::sym_pair(tuple) else {
            return false;
        };
        match (self.slot_of.get(&a), self.slot_of.get(&b)) {
            (Some(&sa), Some(&sb)) => self.uf.find(sa) == self.uf.find(sb),
            _ => false,
        }
    }

    fn lookup<'a>(
        &'a self,
        key: &Value,
        pos: usize,
    ) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        if pos > 1 {
            return None;
        }
        let Value::Sym(sym) = key else {
            return Some(Box::new(std::iter::empty()));
        };
        let key_value = *key;
        let tuples: Vec<Tuple> = self
            .class_members(*sym)
            .into_iter()
            .map(move |member| {
                let member_value = Value::Sym(member);
                if pos == 0 {
                    Tuple::new(vec![key_value, member_value])
                } else {
                    Tuple::new(vec![member_value, key_value])
                }
            })
            .collect();
        Some(Box::new(tuples.into_iter()))
    }

    fn iter_all<'a>(&'a self) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        // classes in first-creation order of their representative slot,
        // members in first-seen order
        let mut tuples = Vec::new();
        for slot in 0..self.uf.len() as u32 {
            if self.uf.find(slot) != slot {
                continue;
            }
            let class = &self.members[slot as usize];
            for &x in class {
                for &y in class {
                    tuples.push(Tuple::new(vec![
                        Value::Sym(self.syms[x as usize]),
                        Value::Sym(self.syms[y as usize]),
                    ]));
                }
            }
        }
        Some(Box::new(tuples.into_iter()))
    }

    fn has_delta(&self) -> bool {
        !self.delta.is_empty()
    }

    fn iter_delta<'a>(&'a self) -> Box<dyn Iterator<Item = Tuple> + 'a> {
        Box::new(
            self.delta
                .iter()
                .map(|&(a, b)| Tuple::new(vec![Value::Sym(a), Value::Sym(b)])),
        )
    }

    fn ack_delta(&mut self) {
        self.delta.clear();
    }
}
