//! # Semi-Naive Evaluator
//!
//! Runs the per-stratum fixed-point loop over an analyzed program.
//!
//! For each stratum, deltas are seeded from the relations' current
//! contents, then iterations run until nothing changes: every rule with
//! at least one positive body atom on a same-stratum predicate is
//! specialized into one variant per such atom, with that atom reading
//! the delta buffer and the rest reading base; rules with no in-stratum
//! positive atom fire only on the first iteration. Joins are left-deep,
//! preferring the `arg0`/`arg1` hash indices (or a provider `lookup`)
//! once an argument is bound, and falling back to scans. Negated atoms,
//! comparisons, and string builtins filter ground bindings.
//!
//! After each iteration every in-stratum relation promotes its staged
//! tuples (providers absorb them through `add` and are drained through
//! their delta interface), then the host iteration hook runs and may
//! inject more facts or force another round.

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, EvalError};
use crate::intern::FactInterner;
use crate::ir::{IrAtom, IrLiteral, IrProgram, IrRule, IrTerm};
use crate::provider::{AddOutcome, RelationProvider};
use crate::relation::Relation;
use crate::symbol::SymbolResolver;
use crate::value::{FactId, PredId, SymbolId, Tuple, Value};
use crate::ast::{CompareOp, StringBuiltin};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Cooperative cancellation flag for [`crate::Engine::evaluate_with_cancel`].
///
/// Clone the handle, hand one copy to another thread, and `cancel()`
/// makes the evaluator stop at the next check point with
/// [`EvalError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Counters reported by a successful evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Iterations run per stratum
    pub iterations: Vec<usize>,
    /// Head tuples newly staged across all rules
    pub tuples_derived: u64,
    /// Join candidate steps executed
    pub join_steps: u64,
}

/// Host callback context for the end-of-iteration hook.
///
/// Inserting a fact into a predicate of the current stratum counts as a
/// change and keeps the stratum iterating; [`HookCtx::set_changed`]
/// forces another iteration regardless.
pub struct HookCtx<'a> {
    catalog: &'a Catalog,
    rels: &'a mut [Relation],
    providers: &'a mut FxHashMap<PredId, Box<dyn RelationProvider>>,
    interner: &'a mut FactInterner,
    symbols: &'a mut dyn SymbolResolver,
    stratum: usize,
    changed: bool,
}

impl HookCtx<'_> {
    pub fn predicate_id(&self, name: &str) -> Option<PredId> {
        self.catalog.id(name)
    }

    pub fn stratum(&self) -> usize {
        self.stratum
    }

    pub fn intern_symbol(&mut self, s: &str) -> SymbolId {
        self.symbols.intern_symbol(s)
    }

    /// Force at least one more iteration of the current stratum
    pub fn set_changed(&mut self) {
        self.changed = true;
    }

    /// Insert a fact mid-evaluation. It lands in `base` immediately and
    /// participates as delta in the next iteration.
    pub fn insert_fact(&mut self, pred: PredId, values: &[Value]) -> Result<FactId, EngineError> {
        if pred.index() >= self.catalog.len() {
            return Err(EngineError::UnknownPredicate(format!("#{}", pred.0)));
        }
        let def = self.catalog.def(pred);
        if def.arity != values.len() {
            return Err(EngineError::ArityMismatch {
                predicate: def.name.clone(),
                expected: def.arity,
                got: values.len(),
            });
        }
        let tuple = Tuple::new(values.to_vec());
        let newly_added = if let Some(provider) = self.providers.get_mut(&pred) {
            let outcome = provider.add(&tuple).map_err(|e| EvalError::Provider {
                predicate: def.name.clone(),
                message: e.to_string(),
            })?;
            outcome == AddOutcome::Added
        } else {
            self.rels[pred.index()].hook_insert(tuple.clone())
        };
        if newly_added && def.stratum == self.stratum {
            self.changed = true;
        }
        let id = self
            .interner
            .intern(pred, &def.name, &tuple)
            .map_err(EngineError::from)?;
        Ok(id)
    }
}

/// Hook signature stored on the engine
pub type IterationHook = dyn FnMut(&mut HookCtx<'_>, usize) -> bool;

/// Everything `evaluate` borrows from the engine
pub(crate) struct EvalCx<'a> {
    pub catalog: &'a Catalog,
    pub rels: &'a mut [Relation],
    pub providers: &'a mut FxHashMap<PredId, Box<dyn RelationProvider>>,
    pub interner: &'a mut FactInterner,
    pub symbols: &'a mut dyn SymbolResolver,
    pub program: &'a IrProgram,
    pub config: &'a EngineConfig,
    pub cancel: Option<CancelHandle>,
    pub hook: Option<&'a mut IterationHook>,
}

impl EvalCx<'_> {
    pub(crate) fn run(mut self) -> Result<EvalStats, EvalError> {
        let mut stats = EvalStats::default();
        let pred_count = self.catalog.len();
        // drained provider deltas, indexed by predicate
        let mut prov_delta: Vec<Vec<Tuple>> = (0..pred_count).map(|_| Vec::new()).collect();
        let steps = Cell::new(0u64);
        // compiled patterns live for the duration of one evaluate call
        let regexes = RefCell::new(FxHashMap::default());

        for stratum in 0..self.program.strata.len() {
            self.seed_stratum(stratum, &mut prov_delta);
            let mut iteration = 0usize;
            loop {
                iteration += 1;
                if iteration > self.config.max_iterations {
                    return Err(EvalError::IterationCapExceeded {
                        stratum,
                        cap: self.config.max_iterations,
                    });
                }
                check_cancel(self.cancel.as_ref())?;

                let derived_before = stats.tuples_derived;
                self.run_rules(stratum, iteration == 1, &prov_delta, &steps, &regexes, &mut stats)?;

                let mut changed = self.promote_stratum(stratum, &mut prov_delta)?;
                changed |= self.run_hook(stratum)?;

                trace!(
                    stratum,
                    iteration,
                    derived = stats.tuples_derived - derived_before,
                    changed,
                    "iteration complete"
                );
                if !changed {
                    break;
                }
            }
            debug!(stratum, iterations = iteration, "stratum stabilized");
            stats.iterations.push(iteration);
        }
        stats.join_steps = steps.get();
        Ok(stats)
    }

    /// Seed deltas for every predicate of the stratum: explicit
    /// relations snapshot their base, providers enumerate their current
    /// contents (so re-evaluation re-derives dependent relations).
    fn seed_stratum(&mut self, stratum: usize, prov_delta: &mut [Vec<Tuple>]) {
        for &pred in &self.program.strata[stratum] {
            if let Some(provider) = self.providers.get_mut(&pred) {
                prov_delta[pred.index()] = match provider.iter_all() {
                    Some(iter) => iter.collect(),
                    None => provider.iter_delta().collect(),
                };
                provider.ack_delta();
            } else {
                self.rels[pred.index()].prepare_delta();
            }
        }
    }

    fn run_rules(
        &mut self,
        stratum: usize,
        first_iteration: bool,
        prov_delta: &[Vec<Tuple>],
        steps: &Cell<u64>,
        regexes: &RefCell<FxHashMap<SymbolId, Regex>>,
        stats: &mut EvalStats,
    ) -> Result<(), EvalError> {
        for &rule_idx in &self.program.rules_by_stratum[stratum] {
            let rule = &self.program.rules[rule_idx];
            let mut derived: Vec<Tuple> = Vec::new();
            {
                let env = JoinEnv {
                    catalog: self.catalog,
                    rels: &*self.rels,
                    providers: &*self.providers,
                    prov_delta,
                    symbols: &*self.symbols,
                    regexes,
                    // inner-step check interval is floored at 1000
                    check_interval: (self.config.cancel_check_interval as u64).max(1000),
                    cancel: self.cancel.as_ref(),
                    steps,
                };
                if rule.delta_positions.is_empty() {
                    if first_iteration {
                        join(
                            &env,
                            rule,
                            &rule.eval_order,
                            0,
                            None,
                            &mut vec![None; rule.var_count],
                            &mut derived,
                        )?;
                    }
                } else {
                    for &pos in &rule.delta_positions {
                        // the delta atom is scanned first so the other
                        // atoms can use indexed lookups on its bindings
                        let mut order = Vec::with_capacity(rule.body.len());
                        order.push(pos);
                        order.extend(rule.eval_order.iter().copied().filter(|&i| i != pos));
                        join(
                            &env,
                            rule,
                            &order,
                            0,
                            Some(pos),
                            &mut vec![None; rule.var_count],
                            &mut derived,
                        )?;
                    }
                }
            }
            let head_rel = &mut self.rels[rule.head.pred.index()];
            for tuple in derived {
                if head_rel.next_insert_unique(tuple) {
                    stats.tuples_derived += 1;
                }
            }
        }
        Ok(())
    }

    /// Promote staged tuples for every predicate in the stratum.
    /// Returns true if anything new appeared.
    fn promote_stratum(
        &mut self,
        stratum: usize,
        prov_delta: &mut [Vec<Tuple>],
    ) -> Result<bool, EvalError> {
        let mut changed = false;
        for &pred in &self.program.strata[stratum] {
            let idx = pred.index();
            if let Some(provider) = self.providers.get_mut(&pred) {
                let staged = self.rels[idx].take_next();
                let mut any_added = false;
                for tuple in staged {
                    let outcome = provider.add(&tuple).map_err(|e| EvalError::Provider {
                        predicate: self.catalog.name(pred).to_string(),
                        message: e.to_string(),
                    })?;
                    any_added |= outcome == AddOutcome::Added;
                }
                let drained: Vec<Tuple> = if provider.has_delta() {
                    let d = provider.iter_delta().collect();
                    provider.ack_delta();
                    d
                } else {
                    Vec::new()
                };
                changed |= any_added || !drained.is_empty();
                prov_delta[idx] = drained;
            } else {
                changed |= self.rels[idx].promote_next();
            }
        }
        Ok(changed)
    }

    fn run_hook(&mut self, stratum: usize) -> Result<bool, EvalError> {
        let Some(hook) = self.hook.as_mut() else {
            return Ok(false);
        };
        let mut ctx = HookCtx {
            catalog: self.catalog,
            rels: &mut *self.rels,
            providers: &mut *self.providers,
            interner: &mut *self.interner,
            symbols: &mut *self.symbols,
            stratum,
            changed: false,
        };
        let forced = hook(&mut ctx, stratum);
        Ok(forced || ctx.changed)
    }
}

fn check_cancel(cancel: Option<&CancelHandle>) -> Result<(), EvalError> {
    if cancel.is_some_and(CancelHandle::is_cancelled) {
        return Err(EvalError::Cancelled);
    }
    Ok(())
}

// ============================================================================
// Join execution
// ============================================================================

/// Immutable join context; interior mutability for the per-evaluate
/// regex cache and the step counter so recursion can share it.
struct JoinEnv<'a> {
    catalog: &'a Catalog,
    rels: &'a [Relation],
    providers: &'a FxHashMap<PredId, Box<dyn RelationProvider>>,
    prov_delta: &'a [Vec<Tuple>],
    symbols: &'a dyn SymbolResolver,
    regexes: &'a RefCell<FxHashMap<SymbolId, Regex>>,
    cancel: Option<&'a CancelHandle>,
    check_interval: u64,
    steps: &'a Cell<u64>,
}

impl JoinEnv<'_> {
    fn step(&self) -> Result<(), EvalError> {
        let count = self.steps.get() + 1;
        self.steps.set(count);
        if count % self.check_interval == 0 {
            check_cancel(self.cancel)?;
        }
        Ok(())
    }

    fn provider_for(&self, pred: PredId) -> Option<&dyn RelationProvider> {
        self.providers.get(&pred).map(Box::as_ref)
    }
}

type Bindings = Vec<Option<Value>>;

/// Extend bindings left-to-right over the rule body; on reaching the end
/// materialize the head tuple into `out`.
fn join(
    env: &JoinEnv<'_>,
    rule: &IrRule,
    order: &[usize],
    depth: usize,
    delta_pos: Option<usize>,
    bindings: &mut Bindings,
    out: &mut Vec<Tuple>,
) -> Result<(), EvalError> {
    let Some(&body_idx) = order.get(depth) else {
        if let Some(tuple) = build_head(&rule.head, bindings) {
            out.push(tuple);
        }
        return Ok(());
    };
    let literal = &rule.body[body_idx];

    match literal {
        IrLiteral::Atom(atom) => {
            if Some(body_idx) == delta_pos {
                join_delta_atom(env, rule, order, depth, delta_pos, atom, bindings, out)
            } else {
                join_base_atom(env, rule, order, depth, delta_pos, atom, bindings, out)
            }
        }
        IrLiteral::Negated(atom) => {
            env.step()?;
            if !atom_has_match(env, atom, bindings)? {
                join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
            }
            Ok(())
        }
        IrLiteral::Compare { op, left, right } => {
            env.step()?;
            let lhs = resolve(left, bindings);
            let rhs = resolve(right, bindings);
            if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
                if compare_values(*op, lhs, rhs, env.symbols) {
                    join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
                }
            }
            Ok(())
        }
        IrLiteral::Builtin { func, args } => {
            env.step()?;
            if eval_builtin(env, *func, args, bindings)? {
                join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
            }
            Ok(())
        }
    }
}

/// Delta-designated atom: scan the delta buffer
fn join_delta_atom(
    env: &JoinEnv<'_>,
    rule: &IrRule,
    order: &[usize],
    depth: usize,
    delta_pos: Option<usize>,
    atom: &IrAtom,
    bindings: &mut Bindings,
    out: &mut Vec<Tuple>,
) -> Result<(), EvalError> {
    let delta: &[Tuple] = if env.providers.contains_key(&atom.pred) {
        &env.prov_delta[atom.pred.index()]
    } else {
        env.rels[atom.pred.index()].delta()
    };
    for tuple in delta {
        env.step()?;
        let mut bound = Vec::new();
        if bind_tuple(&atom.args, tuple, bindings, &mut bound) {
            join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
        }
        unbind(bindings, &bound);
    }
    Ok(())
}

/// Positive atom read from base: membership test when ground, indexed
/// lookup when a covered argument is bound, scan otherwise
fn join_base_atom(
    env: &JoinEnv<'_>,
    rule: &IrRule,
    order: &[usize],
    depth: usize,
    delta_pos: Option<usize>,
    atom: &IrAtom,
    bindings: &mut Bindings,
    out: &mut Vec<Tuple>,
) -> Result<(), EvalError> {
    if let Some(tuple) = ground_tuple(&atom.args, bindings) {
        env.step()?;
        let present = match env.provider_for(atom.pred) {
            Some(provider) => provider.contains(&tuple),
            None => env.rels[atom.pred.index()].contains(&tuple),
        };
        if present {
            join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
        }
        return Ok(());
    }

    if let Some(provider) = env.provider_for(atom.pred) {
        // prefer a provider lookup on the first ground argument
        for (pos, term) in atom.args.iter().enumerate() {
            let Some(key) = resolve(term, bindings) else {
                continue;
            };
            if let Some(iter) = provider.lookup(&key, pos) {
                for tuple in iter {
                    env.step()?;
                    let mut bound = Vec::new();
                    if bind_tuple(&atom.args, &tuple, bindings, &mut bound) {
                        join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
                    }
                    unbind(bindings, &bound);
                }
                return Ok(());
            }
        }
        let Some(iter) = provider.iter_all() else {
            return Err(EvalError::ScanUnsupported {
                predicate: env.catalog.name(atom.pred).to_string(),
            });
        };
        for tuple in iter {
            env.step()?;
            let mut bound = Vec::new();
            if bind_tuple(&atom.args, &tuple, bindings, &mut bound) {
                join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
            }
            unbind(bindings, &bound);
        }
        return Ok(());
    }

    let rel = &env.rels[atom.pred.index()];
    // indexed access on arg0/arg1 when bound
    for pos in 0..2usize {
        let Some(term) = atom.args.get(pos) else {
            break;
        };
        let Some(key) = resolve(term, bindings) else {
            continue;
        };
        if let Some(rows) = rel.index_lookup(pos, &key) {
            for &row in rows {
                env.step()?;
                let tuple = rel.row(row);
                let mut bound = Vec::new();
                if bind_tuple(&atom.args, tuple, bindings, &mut bound) {
                    join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
                }
                unbind(bindings, &bound);
            }
            return Ok(());
        }
    }

    for tuple in rel.base() {
        env.step()?;
        let mut bound = Vec::new();
        if bind_tuple(&atom.args, tuple, bindings, &mut bound) {
            join(env, rule, order, depth + 1, delta_pos, bindings, out)?;
        }
        unbind(bindings, &bound);
    }
    Ok(())
}

/// Existence test for a negated atom. Safety guarantees its variables
/// are bound; wildcards make it an any-value test.
fn atom_has_match(
    env: &JoinEnv<'_>,
    atom: &IrAtom,
    bindings: &Bindings,
) -> Result<bool, EvalError> {
    if let Some(tuple) = ground_tuple(&atom.args, bindings) {
        return Ok(match env.provider_for(atom.pred) {
            Some(provider) => provider.contains(&tuple),
            None => env.rels[atom.pred.index()].contains(&tuple),
        });
    }

    // wildcards present: enumerate candidates
    let matches_pattern = |tuple: &Tuple| -> bool {
        atom.args.iter().zip(tuple.values()).all(|(term, value)| match term {
            IrTerm::Wildcard => true,
            _ => resolve(term, bindings).as_ref() == Some(value),
        })
    };

    if let Some(provider) = env.provider_for(atom.pred) {
        for (pos, term) in atom.args.iter().enumerate() {
            let Some(key) = resolve(term, bindings) else {
                continue;
            };
            if let Some(mut iter) = provider.lookup(&key, pos) {
                return Ok(iter.any(|t| matches_pattern(&t)));
            }
        }
        let Some(mut iter) = provider.iter_all() else {
            return Err(EvalError::ScanUnsupported {
                predicate: env.catalog.name(atom.pred).to_string(),
            });
        };
        return Ok(iter.any(|t| matches_pattern(&t)));
    }

    let rel = &env.rels[atom.pred.index()];
    for pos in 0..2usize {
        let Some(term) = atom.args.get(pos) else {
            break;
        };
        let Some(key) = resolve(term, bindings) else {
            continue;
        };
        if let Some(rows) = rel.index_lookup(pos, &key) {
            return Ok(rows.iter().any(|&row| matches_pattern(rel.row(row))));
        }
    }
    Ok(rel.base().iter().any(matches_pattern))
}

/// Resolve a term to a value; `None` for unbound variables / wildcards
fn resolve(term: &IrTerm, bindings: &Bindings) -> Option<Value> {
    match term {
        IrTerm::Var(v) => bindings[*v as usize],
        IrTerm::Const(value) => Some(*value),
        IrTerm::Wildcard => None,
    }
}

/// Build a fully ground tuple if every argument resolves
fn ground_tuple(args: &[IrTerm], bindings: &Bindings) -> Option<Tuple> {
    let mut values = Vec::with_capacity(args.len());
    for term in args {
        values.push(resolve(term, bindings)?);
    }
    Some(Tuple::new(values))
}

/// Unify atom arguments against a candidate tuple, extending `bindings`
/// and recording newly bound slots in `bound`
fn bind_tuple(
    args: &[IrTerm],
    tuple: &Tuple,
    bindings: &mut Bindings,
    bound: &mut Vec<u32>,
) -> bool {
    if args.len() != tuple.arity() {
        return false;
    }
    for (term, value) in args.iter().zip(tuple.values()) {
        match term {
            IrTerm::Wildcard => {}
            IrTerm::Const(c) => {
                if c != value {
                    unbind(bindings, bound);
                    bound.clear();
                    return false;
                }
            }
            IrTerm::Var(v) => match bindings[*v as usize] {
                Some(existing) => {
                    if existing != *value {
                        unbind(bindings, bound);
                        bound.clear();
                        return false;
                    }
                }
                None => {
                    bindings[*v as usize] = Some(*value);
                    bound.push(*v);
                }
            },
        }
    }
    true
}

fn unbind(bindings: &mut Bindings, bound: &[u32]) {
    for &v in bound {
        bindings[v as usize] = None;
    }
}

/// Head tuple from final bindings; analysis guarantees every head
/// variable is bound
fn build_head(head: &IrAtom, bindings: &Bindings) -> Option<Tuple> {
    let mut values = Vec::with_capacity(head.args.len());
    for term in &head.args {
        match resolve(term, bindings) {
            Some(value) => values.push(value),
            None => {
                debug_assert!(false, "unbound head term after safe join");
                return None;
            }
        }
    }
    Some(Tuple::new(values))
}

/// Comparison semantics: `=`/`!=` are total over kind + payload;
/// ordering compares int/int numerically, sym/sym by resolved string,
/// range/range by payload, and fails on mixed kinds.
fn compare_values(op: CompareOp, lhs: Value, rhs: Value, symbols: &dyn SymbolResolver) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        _ => {
            let ordering = match (lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => a.cmp(&b),
                (Value::Range(a), Value::Range(b)) => a.cmp(&b),
                (Value::Sym(a), Value::Sym(b)) => {
                    match (symbols.lookup_symbol(a), symbols.lookup_symbol(b)) {
                        (Some(sa), Some(sb)) => sa.cmp(&sb),
                        _ => return false,
                    }
                }
                _ => return false,
            };
            match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            }
        }
    }
}

/// String builtins over symbol arguments. Non-symbol arguments fail the
/// filter; a bad `match` pattern is a hard error.
fn eval_builtin(
    env: &JoinEnv<'_>,
    func: StringBuiltin,
    args: &[IrTerm],
    bindings: &Bindings,
) -> Result<bool, EvalError> {
    let (Some(pattern_value), Some(subject_value)) =
        (resolve(&args[0], bindings), resolve(&args[1], bindings))
    else {
        return Ok(false);
    };
    let (Value::Sym(pattern_sym), Value::Sym(subject_sym)) = (pattern_value, subject_value) else {
        return Ok(false);
    };
    let Some(subject) = env.symbols.lookup_symbol(subject_sym) else {
        return Ok(false);
    };
    let Some(pattern) = env.symbols.lookup_symbol(pattern_sym) else {
        return Ok(false);
    };

    Ok(match func {
        StringBuiltin::Match => {
            let mut cache = env.regexes.borrow_mut();
            if !cache.contains_key(&pattern_sym) {
                let compiled = Regex::new(&pattern).map_err(|source| EvalError::Regex {
                    pattern: pattern.clone(),
                    source,
                })?;
                cache.insert(pattern_sym, compiled);
            }
            cache[&pattern_sym].is_match(&subject)
        }
        StringBuiltin::StartsWith => subject.starts_with(&pattern),
        StringBuiltin::EndsWith => subject.ends_with(&pattern),
        StringBuiltin::Contains => subject.contains(&pattern),
    })
}
