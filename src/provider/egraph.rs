//! E-graph provider with congruence closure.
//!
//! One shared [`EgraphContext`] holds a union-find over e-class ids and
//! a hash-consed table of e-nodes keyed on `(opcode, canonical
//! children)`. Leaf classes are created per symbol; e-nodes map child
//! classes to a result class. Unifying two classes re-canonicalizes
//! every e-node that referenced the losing class; when two e-nodes
//! collide on their canonical key their result classes are unified in
//! turn, maintaining the congruence invariant: `a = b` implies
//! `f(a) = f(b)` wherever both applications exist.
//!
//! Several provider facets expose one context to the engine:
//! [`TermEqProvider`] as a binary equivalence over symbols, and
//! [`EnodeProvider`] as `(opcode, children..., result)` tuples of
//! child arity 1 to 3.

use super::eqrel::UnionFind;
use super::{AddOutcome, ProviderError, ProviderKind, RelationProvider};
use crate::value::{SymbolId, Tuple, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;

/// Reserved opcodes; user-defined opcodes start at [`opcode::USER_BASE`]
pub mod opcode {
    pub const ADD: i64 = 0;
    pub const SUB: i64 = 1;
    pub const MUL: i64 = 2;
    pub const DIV: i64 = 3;
    pub const NEG: i64 = 4;
    pub const APP: i64 = 5;
    pub const IF: i64 = 6;
    pub const CONS: i64 = 7;
    pub const TUPLE: i64 = 8;
    /// First opcode available to hosts
    pub const USER_BASE: i64 = 256;
}

type ClassId = u32;

#[derive(Debug)]
struct ENode {
    op: i64,
    /// canonical at the last rebuild
    children: Vec<ClassId>,
    result: ClassId,
}

/// Shared congruence-closure state
#[derive(Debug, Default)]
pub struct EgraphContext {
    uf: UnionFind,
    leaf_of: FxHashMap<SymbolId, ClassId>,
    /// root class -> symbol members, first-seen order
    members: Vec<Vec<SymbolId>>,
    nodes: Vec<ENode>,
    /// (op, canonical children) -> node index
    node_keys: FxHashMap<(i64, Vec<ClassId>), usize>,
    /// root class -> e-nodes referencing it as a child
    parents: Vec<Vec<usize>>,
    /// newly-equal symbol pairs, append-only; facets keep cursors
    eq_log: Vec<(SymbolId, SymbolId)>,
}

impl EgraphContext {
    pub fn new() -> Self {
        EgraphContext::default()
    }

    /// Wrap a fresh context for sharing between facets
    pub fn shared() -> Rc<RefCell<EgraphContext>> {
        Rc::new(RefCell::new(EgraphContext::new()))
    }

    fn class_for(&mut self, sym: SymbolId) -> ClassId {
        if let Some(&class) = self.leaf_of.get(&sym) {
            return class;
        }
        let class = self.uf.make_set();
        self.leaf_of.insert(sym, class);
        self.members.push(vec![sym]);
        self.parents.push(Vec::new());
        self.eq_log.push((sym, sym));
        class
    }

    fn canonical(&self, class: ClassId) -> ClassId {
        self.uf.find(class)
    }

    /// Unify two classes and run congruence closure to a fixed point.
    /// Returns true if any merge happened.
    fn union(&mut self, a: ClassId, b: ClassId) -> bool {
        let mut pending = vec![(a, b)];
        let mut merged = false;
        while let Some((x, y)) = pending.pop() {
            let Some((winner, loser)) = self.uf.union(x, y) else {
                continue;
            };
            merged = true;

            // closure growth for delta readers
            let loser_members = std::mem::take(&mut self.members[loser as usize]);
            for &wx in &self.members[winner as usize] {
                for &ly in &loser_members {
                    self.eq_log.push((wx, ly));
                    self.eq_log.push((ly, wx));
                }
            }
            self.members[winner as usize].extend(loser_members);

            // re-canonicalize every e-node that referenced the loser
            let moved = std::mem::take(&mut self.parents[loser as usize]);
            for node_idx in moved {
                let old_key = (
                    self.nodes[node_idx].op,
                    self.nodes[node_idx].children.clone(),
                );
                // the entry may already point at a congruent survivor
                if self.node_keys.get(&old_key) == Some(&node_idx) {
                    self.node_keys.remove(&old_key);
                }
                let new_children: Vec<ClassId> = self.nodes[node_idx]
                    .children
                    .iter()
                    .map(|&c| self.uf.find(c))
                    .collect();
                self.nodes[node_idx].children = new_children.clone();
                let new_key = (self.nodes[node_idx].op, new_children);
                if let Some(&other) = self.node_keys.get(&new_key) {
                    if other != node_idx {
                        pending.push((self.nodes[node_idx].result, self.nodes[other].result));
                        continue;
                    }
                }
                self.node_keys.insert(new_key, node_idx);
                self.parents[winner as usize].push(node_idx);
            }
        }
        merged
    }

    /// Assert `a = b` between two symbols
    pub fn add_equiv(&mut self, a: SymbolId, b: SymbolId) -> AddOutcome {
        let known = self.leaf_of.contains_key(&a) && self.leaf_of.contains_key(&b);
        let ca = self.class_for(a);
        let cb = self.class_for(b);
        if self.union(ca, cb) || !known {
            AddOutcome::Added
        } else {
            AddOutcome::NoChange
        }
    }

    /// Record the application `op(children...) = result`
    pub fn add_enode(&mut self, op: i64, children: &[SymbolId], result: SymbolId) -> AddOutcome {
        let child_classes: Vec<ClassId> = children
            .iter()
            .map(|&c| {
                let class = self.class_for(c);
                self.canonical(class)
            })
            .collect();
        let result_class = {
            let class = self.class_for(result);
            self.canonical(class)
        };
        let key = (op, child_classes.clone());
        if let Some(&existing) = self.node_keys.get(&key) {
            let existing_result = self.nodes[existing].result;
            if self.union(existing_result, result_class) {
                AddOutcome::Added
            } else {
                AddOutcome::NoChange
            }
        } else {
            let idx = self.nodes.len();
            self.nodes.push(ENode {
                op,
                children: child_classes.clone(),
                result: result_class,
            });
            self.node_keys.insert(key, idx);
            let mut roots: FxHashSet<ClassId> = FxHashSet::default();
            for &c in &child_classes {
                roots.insert(self.canonical(c));
            }
            for root in roots {
                self.parents[root as usize].push(idx);
            }
            AddOutcome::Added
        }
    }

    /// `a = b` for two symbols both seen before
    pub fn symbols_equal(&self, a: SymbolId, b: SymbolId) -> bool {
        match (self.leaf_of.get(&a), self.leaf_of.get(&b)) {
            (Some(&ca), Some(&cb)) => self.uf.find(ca) == self.uf.find(cb),
            _ => false,
        }
    }

    /// True if `op(children...)` exists and its result class equals
    /// `result`'s class
    pub fn enode_matches(&self, op: i64, children: &[SymbolId], result: SymbolId) -> bool {
        let mut child_classes = Vec::with_capacity(children.len());
        for sym in children {
            match self.leaf_of.get(sym) {
                Some(&class) => child_classes.push(self.uf.find(class)),
                None => return false,
            }
        }
        let Some(&result_class) = self.leaf_of.get(&result) else {
            return false;
        };
        match self.node_keys.get(&(op, child_classes)) {
            Some(&idx) => {
                self.uf.find(self.nodes[idx].result) == self.uf.find(result_class)
            }
            None => false,
        }
    }

    /// Symbol members of `sym`'s class, first-seen order
    pub fn class_members(&self, sym: SymbolId) -> Vec<SymbolId> {
        let Some(&class) = self.leaf_of.get(&sym) else {
            return Vec::new();
        };
        let root = self.uf.find(class);
        self.members[root as usize].clone()
    }

    /// All (member, member) pairs per class, classes in creation order
    fn closure_pairs(&self) -> Vec<(SymbolId, SymbolId)> {
        let mut pairs = Vec::new();
        for class in 0..self.uf.len() as ClassId {
            if self.uf.find(class) != class {
                continue;
            }
            let class_members = &self.members[class as usize];
            for &x in class_members {
                for &y in class_members {
                    pairs.push((x, y));
                }
            }
        }
        pairs
    }

    fn eq_log_len(&self) -> usize {
        self.eq_log.len()
    }

    fn eq_log_since(&self, cursor: usize) -> Vec<(SymbolId, SymbolId)> {
        self.eq_log[cursor..].to_vec()
    }
}

// ============================================================================
// term_eq facet
// ============================================================================

/// Binary symbol equivalence over a shared e-graph context
pub struct TermEqProvider {
    ctx: Rc<RefCell<EgraphContext>>,
    delta_cursor: usize,
}

impl TermEqProvider {
    pub fn new(ctx: Rc<RefCell<EgraphContext>>) -> Self {
        TermEqProvider {
            ctx,
            delta_cursor: 0,
        }
    }

    fn sym_pair(tuple: &Tuple) -> Result<(SymbolId, SymbolId), ProviderError> {
        match (tuple.get(0), tuple.get(1)) {
            (Some(Value::Sym(a)), Some(Value::Sym(b))) if tuple.arity() == 2 => Ok((*a, *b)),
            _ => Err(ProviderError(
                "term_eq takes two symbol arguments".to_string(),
            )),
        }
    }
}

impl RelationProvider for TermEqProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EgraphTermEq
    }

    fn arity(&self) -> usize {
        2
    }

    fn add(&mut self, tuple: &Tuple) -> Result<AddOutcome, ProviderError> {
        let (a, b) = Self::sym_pair(tuple)?;
        Ok(self.ctx.borrow_mut().add_equiv(a, b))
    }

    fn contains(&self, tuple: &Tuple) -> bool {
        let Ok((a, b)) = Self::sym_pair(tuple) else {
            return false;
        };
        self.ctx.borrow().symbols_equal(a, b)
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
            .ctx
            .borrow()
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
        let tuples: Vec<Tuple> = self
            .ctx
            .borrow()
            .closure_pairs()
            .into_iter()
            .map(|(a, b)| Tuple::new(vec![Value::Sym(a), Value::Sym(b)]))
            .collect();
        Some(Box::new(tuples.into_iter()))
    }

    fn has_delta(&self) -> bool {
        self.delta_cursor < self.ctx.borrow().eq_log_len()
    }

    fn iter_delta<'a>(&'a self) -> Box<dyn Iterator<Item = Tuple> + 'a> {
        let pairs = self.ctx.borrow().eq_log_since(self.delta_cursor);
        Box::new(
            pairs
                .into_iter()
                .map(|(a, b)| Tuple::new(vec![Value::Sym(a), Value::Sym(b)])),
        )
    }

    fn ack_delta(&mut self) {
        self.delta_cursor = self.ctx.borrow().eq_log_len();
    }
}

// ============================================================================
// enode facets
// ============================================================================

/// Function-application facet: tuples are `(opcode, child..., result)`
/// with 1 to 3 children. The opcode is an integer, children and result
/// are symbols naming e-classes.
pub struct EnodeProvider {
    ctx: Rc<RefCell<EgraphContext>>,
    child_arity: usize,
    rows: Vec<Tuple>,
    row_set: FxHashSet<Tuple>,
    delta_cursor: usize,
}

impl EnodeProvider {
    /// `child_arity` must be 1, 2, or 3
    pub fn new(ctx: Rc<RefCell<EgraphContext>>, child_arity: usize) -> Self {
        debug_assert!((1..=3).contains(&child_arity));
        EnodeProvider {
            ctx,
            child_arity,
            rows: Vec::new(),
            row_set: FxHashSet::default(),
            delta_cursor: 0,
        }
    }

    fn parts(&self, tuple: &Tuple) -> Result<(i64, Vec<SymbolId>, SymbolId), ProviderError> {
        if tuple.arity() != self.arity() {
            return Err(ProviderError(format!(
                "enode{} takes {} arguments",
                self.child_arity,
                self.arity()
            )));
        }
        let Some(Value::Int(op)) = tuple.get(0) else {
            return Err(ProviderError("enode opcode must be an integer".to_string()));
        };
        let mut children = Vec::with_capacity(self.child_arity);
        for pos in 1..=self.child_arity {
            match tuple.get(pos) {
                Some(Value::Sym(s)) => children.push(*s),
                _ => {
                    return Err(ProviderError(
                        "enode children and result must be symbols".to_string(),
                    ));
                }
            }
        }
        let Some(Value::Sym(result)) = tuple.get(self.child_arity + 1) else {
            return Err(ProviderError(
                "enode children and result must be symbols".to_string(),
            ));
        };
        Ok((*op, children, *result))
    }
}

impl RelationProvider for EnodeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EgraphNode
    }

    fn arity(&self) -> usize {
        self.child_arity + 2
    }

    fn add(&mut self, tuple: &Tuple) -> Result<AddOutcome, ProviderError> {
        let (op, children, result) = self.parts(tuple)?;
        let outcome = self.ctx.borrow_mut().add_enode(op, &children, result);
        if self.row_set.insert(tuple.clone()) {
            self.rows.push(tuple.clone());
            return Ok(AddOutcome::Added);
        }
        Ok(outcome)
    }

    fn contains(&self, tuple: &Tuple) -> bool {
        let Ok((op, children, result)) = self.parts(tuple) else {
            return false;
        };
        self.ctx.borrow().enode_matches(op, &children, result)
    }

    fn lookup<'a>(
        &'a self,
        key: &Value,
        pos: usize,
    ) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        if pos >= self.arity() {
            return None;
        }
        let key = *key;
        Some(Box::new(
            self.rows
                .iter()
                .filter(move |t| t.get(pos) == Some(&key))
                .cloned(),
        ))
    }

    fn iter_all<'a>(&'a self) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        Some(Box::new(self.rows.iter().cloned()))
    }

    fn has_delta(&self) -> bool {
        self.delta_cursor < self.rows.len()
    }

    fn iter_delta<'a>(&'a self) -> Box<dyn Iterator<Item = Tuple> + 'a> {
        Box::new(self.rows[self.delta_cursor..].iter().cloned())
    }

    fn ack_delta(&mut self) {
        self.delta_cursor = self.rows.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: u32) -> SymbolId {
        SymbolId(id)
    }

    #[test]
    fn test_congruence_closure_basic() {
        // f(a) = r1, f(b) = r2, a = b  =>  r1 = r2
        let mut ctx = EgraphContext::new();
        ctx.add_enode(opcode::APP, &[s(0)], s(10));
        ctx.add_enode(opcode::APP, &[s(1)], s(11));
        assert!(!ctx.symbols_equal(s(10), s(11)));
        ctx.add_equiv(s(0), s(1));
        assert!(ctx.symbols_equal(s(10), s(11)));
    }

    #[test]
    fn test_congruence_binary_needs_both_children() {
        // add(a,b)=r1, add(c,d)=r2; a=c alone is not enough, b=d closes
        let mut ctx = EgraphContext::new();
        ctx.add_enode(opcode::ADD, &[s(0), s(1)], s(10));
        ctx.add_enode(opcode::ADD, &[s(2), s(3)], s(11));
        ctx.add_equiv(s(0), s(2));
        assert!(!ctx.symbols_equal(s(10), s(11)));
        ctx.add_equiv(s(1), s(3));
        assert!(ctx.symbols_equal(s(10), s(11)));
    }

    #[test]
    fn test_congruence_propagates_transitively() {
        // g(f(a)) chain: f(a)=m1, f(b)=m2, g(m1)=r1, g(m2)=r2, a=b
        let mut ctx = EgraphContext::new();
        ctx.add_enode(opcode::APP, &[s(0)], s(10));
        ctx.add_enode(opcode::APP, &[s(1)], s(11));
        ctx.add_enode(opcode::NEG, &[s(10)], s(20));
        ctx.add_enode(opcode::NEG, &[s(11)], s(21));
        ctx.add_equiv(s(0), s(1));
        assert!(ctx.symbols_equal(s(20), s(21)));
    }

    #[test]
    fn test_same_key_unifies_results() {
        let mut ctx = EgraphContext::new();
        ctx.add_enode(opcode::MUL, &[s(0), s(1)], s(10));
        let outcome = ctx.add_enode(opcode::MUL, &[s(0), s(1)], s(11));
        assert_eq!(outcome, AddOutcome::Added);
        assert!(ctx.symbols_equal(s(10), s(11)));
        assert_eq!(
            ctx.add_enode(opcode::MUL, &[s(0), s(1)], s(10)),
            AddOutcome::NoChange
        );
    }

    #[test]
    fn test_opcode_distinguishes_nodes() {
        let mut ctx = EgraphContext::new();
        ctx.add_enode(opcode::ADD, &[s(0), s(1)], s(10));
        ctx.add_enode(opcode::MUL, &[s(0), s(1)], s(11));
        assert!(!ctx.symbols_equal(s(10), s(11)));
    }

    #[test]
    fn test_term_eq_facet() {
        let ctx = EgraphContext::shared();
        let mut eq = TermEqProvider::new(Rc::clone(&ctx));
        let t = |a: u32, b: u32| Tuple::new(vec![Value::Sym(s(a)), Value::Sym(s(b))]);
        eq.add(&t(0, 1)).unwrap();
        assert!(eq.contains(&t(1, 0)));
        assert!(eq.has_delta());
        let delta: Vec<Tuple> = eq.iter_delta().collect();
        assert!(delta.contains(&t(0, 1)));
        eq.ack_delta();
        assert!(!eq.has_delta());
        let members: Vec<Tuple> = eq.lookup(&Value::Sym(s(0)), 0).unwrap().collect();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_facets_share_one_context() {
        let ctx = EgraphContext::shared();
        let mut enode2 = EnodeProvider::new(Rc::clone(&ctx), 2);
        let mut term_eq = TermEqProvider::new(Rc::clone(&ctx));

        let node = |op: i64, a: u32, b: u32, r: u32| {
            Tuple::new(vec![
                Value::Int(op),
                Value::Sym(s(a)),
                Value::Sym(s(b)),
                Value::Sym(s(r)),
            ])
        };
        let eq = |a: u32, b: u32| Tuple::new(vec![Value::Sym(s(a)), Value::Sym(s(b))]);

        enode2.add(&node(opcode::ADD, 0, 1, 10)).unwrap();
        enode2.add(&node(opcode::ADD, 2, 3, 11)).unwrap();
        term_eq.ack_delta();
        term_eq.add(&eq(0, 2)).unwrap();
        term_eq.add(&eq(1, 3)).unwrap();

        // congruence surfaced through the sibling facet
        assert!(term_eq.contains(&eq(10, 11)));
        assert!(enode2.contains(&node(opcode::ADD, 2, 3, 10)));
        let delta: Vec<Tuple> = term_eq.iter_delta().collect();
        assert!(delta.contains(&eq(10, 11)) || delta.contains(&eq(11, 10)));
    }

    #[test]
    fn test_enode_rejects_bad_shapes() {
        let ctx = EgraphContext::shared();
        let mut enode1 = EnodeProvider::new(ctx, 1);
        let bad = Tuple::new(vec![Value::Sym(s(0)), Value::Sym(s(1)), Value::Sym(s(2))]);
        assert!(enode1.add(&bad).is_err());
        let short = Tuple::new(vec![Value::Int(0), Value::Sym(s(1))]);
        assert!(enode1.add(&short).is_err());
    }
}
