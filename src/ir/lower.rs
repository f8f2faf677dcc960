//! AST to IR lowering.
//!
//! Resolves predicate names to catalog ids (registering lazily on first
//! reference), interns symbol constants, and maps rule variables to
//! dense slots in first-occurrence order.

use super::{IrAtom, IrLiteral, IrRule, IrTerm};
use crate::ast::{Atom, Literal, Rule, Term};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::symbol::SymbolResolver;
use crate::value::Value;
use rustc_hash::FxHashMap;

/// Per-rule variable slot assignment
#[derive(Default)]
struct VarMap {
    slots: FxHashMap<String, u32>,
}

impl VarMap {
    fn slot(&mut self, name: &str) -> u32 {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.slots.len() as u32;
        self.slots.insert(name.to_string(), slot);
        slot
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

fn lower_term(term: &Term, vars: &mut VarMap, symbols: &mut dyn SymbolResolver) -> IrTerm {
    match term {
        Term::Variable(name) => IrTerm::Var(vars.slot(name)),
        Term::Symbol(s) => IrTerm::Const(Value::Sym(symbols.intern_symbol(s))),
        Term::Int(i) => IrTerm::Const(Value::Int(*i)),
        Term::Wildcard => IrTerm::Wildcard,
    }
}

fn lower_atom(
    atom: &Atom,
    vars: &mut VarMap,
    catalog: &mut Catalog,
    symbols: &mut dyn SymbolResolver,
) -> Result<IrAtom> {
    let pred = catalog.register(&atom.relation, atom.arity(), None, false)?;
    let args = atom
        .args
        .iter()
        .map(|t| lower_term(t, vars, symbols))
        .collect();
    Ok(IrAtom { pred, args })
}

/// Lower a ground fact into a bodyless rule
pub fn lower_fact(
    fact: &Atom,
    catalog: &mut Catalog,
    symbols: &mut dyn SymbolResolver,
) -> Result<IrRule> {
    let mut vars = VarMap::default();
    let head = lower_atom(fact, &mut vars, catalog, symbols)?;
    Ok(IrRule {
        head,
        body: Vec::new(),
        var_count: vars.len(),
        stratum: 0,
        delta_positions: Vec::new(),
        eval_order: Vec::new(),
    })
}

/// Lower one rule; safety has already been checked on the AST
pub fn lower_rule(
    rule: &Rule,
    catalog: &mut Catalog,
    symbols: &mut dyn SymbolResolver,
) -> Result<IrRule> {
    let mut vars = VarMap::default();
    // body first so join-time bindings line up with scan order
    let mut body = Vec::with_capacity(rule.body.len());
    for literal in &rule.body {
        body.push(match literal {
            Literal::Positive(atom) => {
                IrLiteral::Atom(lower_atom(atom, &mut vars, catalog, symbols)?)
            }
            Literal::Negated(atom) => {
                IrLiteral::Negated(lower_atom(atom, &mut vars, catalog, symbols)?)
            }
            Literal::Comparison { left, op, right } => IrLiteral::Compare {
                op: *op,
                left: lower_term(left, &mut vars, symbols),
                right: lower_term(right, &mut vars, symbols),
            },
            Literal::Builtin { func, args } => {
                // the parser enforces this for text input; AST and
                // compiled input land here directly
                if args.len() != func.arity() {
                    return Err(crate::error::EngineError::ArityMismatch {
                        predicate: func.as_str().to_string(),
                        expected: func.arity(),
                        got: args.len(),
                    });
                }
                IrLiteral::Builtin {
                    func: *func,
                    args: args
                        .iter()
                        .map(|t| lower_term(t, &mut vars, symbols))
                        .collect(),
                }
            }
        });
    }
    let head = lower_atom(&rule.head, &mut vars, catalog, symbols)?;
    Ok(IrRule {
        head,
        body,
        var_count: vars.len(),
        stratum: 0,
        delta_positions: Vec::new(),
        eval_order: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_rule;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_variables_get_dense_slots() {
        let rule = parse_rule("path(X, Z) :- edge(X, Y), path(Y, Z).").unwrap();
        let mut catalog = Catalog::new();
        let mut symbols = SymbolTable::new();
        let ir = lower_rule(&rule, &mut catalog, &mut symbols).unwrap();
        assert_eq!(ir.var_count, 3);
        // X, Y seen first in the edge atom, Z in the recursive atom
        match &ir.body[0] {
            IrLiteral::Atom(atom) => {
                assert_eq!(atom.args, vec![IrTerm::Var(0), IrTerm::Var(1)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ir.head.args, vec![IrTerm::Var(0), IrTerm::Var(2)]);
    }

    #[test]
    fn test_constants_are_interned() {
        let rule = parse_rule("p(X) :- q(X, \"ada\", 7).").unwrap();
        let mut catalog = Catalog::new();
        let mut symbols = SymbolTable::new();
        let ir = lower_rule(&rule, &mut catalog, &mut symbols).unwrap();
        match &ir.body[0] {
            IrLiteral::Atom(atom) => {
                let sym = symbols.intern("ada");
                assert_eq!(atom.args[1], IrTerm::Const(Value::Sym(sym)));
                assert_eq!(atom.args[2], IrTerm::Const(Value::Int(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_predicates_registered_lazily() {
        let rule = parse_rule("p(X) :- q(X), not r(X).").unwrap();
        let mut catalog = Catalog::new();
        let mut symbols = SymbolTable::new();
        lower_rule(&rule, &mut catalog, &mut symbols).unwrap();
        assert!(catalog.id("p").is_some());
        assert!(catalog.id("q").is_some());
        assert!(catalog.id("r").is_some());
    }
}
