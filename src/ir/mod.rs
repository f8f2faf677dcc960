//! # Stratified IR
//!
//! The evaluator's rule representation. Lowering ([`lower`]) resolves
//! predicate names to dense ids and variables to dense per-rule slots;
//! analysis ([`stratify`]) checks safety and range restriction, computes
//! strongly-connected components of the predicate dependency graph,
//! assigns strata, and rejects negation inside a recursive component.
//!
//! [`analyze`] is the driver that takes a parsed program to an
//! [`IrProgram`] ready for evaluation, updating the catalog's IDB and
//! stratum attributes along the way.

pub mod lower;
pub mod stratify;

use crate::ast::{self, CompareOp, StringBuiltin};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::symbol::SymbolResolver;
use crate::value::{PredId, Value};

/// A term in an IR atom: a dense per-rule variable slot, a resolved
/// constant, or a wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrTerm {
    Var(u32),
    Const(Value),
    Wildcard,
}

/// A resolved atom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrAtom {
    pub pred: PredId,
    pub args: Vec<IrTerm>,
}

/// One body literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrLiteral {
    Atom(IrAtom),
    Negated(IrAtom),
    Compare {
        op: CompareOp,
        left: IrTerm,
        right: IrTerm,
    },
    Builtin {
        func: StringBuiltin,
        args: Vec<IrTerm>,
    },
}

/// A lowered rule. Facts appear as bodyless rules that fire once per
/// evaluation.
#[derive(Debug, Clone)]
pub struct IrRule {
    pub head: IrAtom,
    pub body: Vec<IrLiteral>,
    /// Number of distinct variables (binding environment size)
    pub var_count: usize,
    /// Stratum of the head predicate
    pub stratum: usize,
    /// Body indices of positive atoms over same-stratum predicates -
    /// the positions rewritten to read the delta buffer, one variant
    /// each. Empty for rules that fire only on a stratum's first
    /// iteration.
    pub delta_positions: Vec<usize>,
    /// Join order over body indices: positive atoms first (source
    /// order), then negations, comparisons, and builtins, which are
    /// filters and need their variables bound. A delta variant moves
    /// its delta atom to the front of this order.
    pub eval_order: Vec<usize>,
}

/// A fully analyzed program
#[derive(Debug, Clone, Default)]
pub struct IrProgram {
    /// All rules in load order
    pub rules: Vec<IrRule>,
    /// Predicates per stratum, in predicate-id order
    pub strata: Vec<Vec<PredId>>,
    /// Rule indices per stratum, in load order
    pub rules_by_stratum: Vec<Vec<usize>>,
}

impl IrProgram {
    pub fn max_stratum(&self) -> usize {
        self.strata.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Lower and analyze a parsed program against a catalog.
///
/// On success the catalog's IDB flags and strata reflect the program;
/// the caller is expected to work on cloned state and commit only then,
/// so a failed analysis has no visible effect.
pub fn analyze(
    program: &ast::Program,
    catalog: &mut Catalog,
    symbols: &mut dyn SymbolResolver,
) -> Result<IrProgram> {
    for rule in &program.rules {
        stratify::check_rule_safety(rule)?;
    }

    let mut rules = Vec::with_capacity(program.facts.len() + program.rules.len());
    for decl in &program.declarations {
        catalog.register(&decl.name, decl.arity(), Some(&decl.arg_kinds()), true)?;
    }
    for fact in &program.facts {
        rules.push(lower::lower_fact(fact, catalog, symbols)?);
    }
    for rule in &program.rules {
        rules.push(lower::lower_rule(rule, catalog, symbols)?);
    }

    catalog.reset_analysis();
    for rule in &rules {
        catalog.def_mut(rule.head.pred).idb = true;
    }
    stratify::assign_strata(&rules, catalog)?;

    for rule in &mut rules {
        let stratum = catalog.def(rule.head.pred).stratum;
        rule.stratum = stratum;
        rule.delta_positions = rule
            .body
            .iter()
            .enumerate()
            .filter_map(|(i, lit)| match lit {
                IrLiteral::Atom(atom) if catalog.def(atom.pred).stratum == stratum => Some(i),
                _ => None,
            })
            .collect();
        let (positives, filters): (Vec<usize>, Vec<usize>) = (0..rule.body.len())
            .partition(|&i| matches!(rule.body[i], IrLiteral::Atom(_)));
        rule.eval_order = positives;
        rule.eval_order.extend(filters);
    }

    let stratum_count = catalog
        .iter()
        .map(|(_, def)| def.stratum + 1)
        .max()
        .unwrap_or(1);
    let mut strata = vec![Vec::new(); stratum_count];
    for (id, def) in catalog.iter() {
        strata[def.stratum].push(id);
    }
    let mut rules_by_stratum = vec![Vec::new(); stratum_count];
    for (i, rule) in rules.iter().enumerate() {
        rules_by_stratum[rule.stratum].push(i);
    }

    Ok(IrProgram {
        rules,
        strata,
        rules_by_stratum,
    })
}
