//! Safety checking and stratification.
//!
//! Safety: every variable in a rule head, negated atom, comparison, or
//! builtin must appear in some positive body atom of the same rule.
//! Range restriction is the head-variable half of that condition.
//!
//! Stratification: nodes are predicates, edges run head -> body
//! predicate and carry a positive/negative tag. Strongly-connected
//! components (iterative Tarjan) give the recursive groups; strata are
//! assigned along the condensation so that a negative edge always
//! crosses strictly downward. A negative edge inside one component makes
//! the program unstratifiable.

use super::{IrLiteral, IrRule};
use crate::ast::{Literal, Rule};
use crate::catalog::Catalog;
use crate::error::{AnalysisError, Result};

/// Check safety and range restriction of one rule
pub fn check_rule_safety(rule: &Rule) -> std::result::Result<(), AnalysisError> {
    let head_name = rule.head.relation.clone();
    if rule.head.args.iter().any(|t| matches!(t, crate::ast::Term::Wildcard)) {
        return Err(AnalysisError::WildcardInHead {
            rule_head: head_name,
        });
    }

    let safe = rule.positive_body_variables();
    for variable in rule.head.variables() {
        if !safe.contains(variable) {
            return Err(AnalysisError::NotRangeRestricted {
                rule_head: head_name,
                variable: variable.to_string(),
            });
        }
    }
    for literal in &rule.body {
        let needs_check = !matches!(literal, Literal::Positive(_));
        if !needs_check {
            continue;
        }
        for variable in literal.variables() {
            if !safe.contains(variable) {
                return Err(AnalysisError::UnsafeVariable {
                    rule_head: head_name,
                    variable: variable.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Dependency edge tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negative,
}

/// Assign a stratum to every predicate in the catalog and reject
/// negation inside a recursive component.
pub fn assign_strata(rules: &[IrRule], catalog: &mut Catalog) -> Result<()> {
    let n = catalog.len();
    // head -> body-predicate adjacency with polarity
    let mut edges: Vec<Vec<(usize, Polarity)>> = vec![Vec::new(); n];
    for rule in rules {
        let head = rule.head.pred.index();
        for literal in &rule.body {
            match literal {
                IrLiteral::Atom(atom) => {
                    edges[head].push((atom.pred.index(), Polarity::Positive));
                }
                IrLiteral::Negated(atom) => {
                    edges[head].push((atom.pred.index(), Polarity::Negative));
                }
                IrLiteral::Compare { .. } | IrLiteral::Builtin { .. } => {}
            }
        }
    }

    let (scc_of, scc_order) = tarjan_sccs(&edges);

    // A negative edge within one component is recursion through negation
    for rule in rules {
        let head = rule.head.pred.index();
        for literal in &rule.body {
            if let IrLiteral::Negated(atom) = literal {
                if scc_of[head] == scc_of[atom.pred.index()] {
                    return Err(AnalysisError::Unstratifiable {
                        rule_head: catalog.name(rule.head.pred).to_string(),
                        negated: catalog.name(atom.pred).to_string(),
                    }
                    .into());
                }
            }
        }
    }

    // Tarjan emits components in reverse topological order of the
    // condensation (dependencies first), so one pass suffices.
    let scc_count = scc_order.len();
    let mut scc_stratum = vec![0usize; scc_count];
    for (scc_id, members) in scc_order.iter().enumerate() {
        let mut stratum = 0;
        for &node in members {
            for &(dep, polarity) in &edges[node] {
                let dep_scc = scc_of[dep];
                if dep_scc == scc_id {
                    continue;
                }
                let bump = usize::from(polarity == Polarity::Negative);
                stratum = stratum.max(scc_stratum[dep_scc] + bump);
            }
        }
        scc_stratum[scc_id] = stratum;
    }

    for node in 0..n {
        catalog
            .def_mut(crate::value::PredId(node as u32))
            .stratum = scc_stratum[scc_of[node]];
    }
    Ok(())
}

/// Iterative Tarjan SCC. Returns the component id per node and the
/// member lists in emission order (reverse topological).
fn tarjan_sccs(edges: &[Vec<(usize, Polarity)>]) -> (Vec<usize>, Vec<Vec<usize>>) {
    const UNVISITED: usize = usize::MAX;
    let n = edges.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut scc_of = vec![0usize; n];
    let mut sccs: Vec<Vec<usize>> = Vec::new();

    // explicit call stack: (node, next edge offset)
    let mut call_stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        call_stack.push((start, 0));
        'frames: while let Some((node, mut edge_pos)) = call_stack.pop() {
            if edge_pos == 0 {
                index[node] = next_index;
                lowlink[node] = next_index;
                next_index += 1;
                stack.push(node);
                on_stack[node] = true;
            }
            while let Some(&(succ, _)) = edges[node].get(edge_pos) {
                edge_pos += 1;
                if index[succ] == UNVISITED {
                    call_stack.push((node, edge_pos));
                    call_stack.push((succ, 0));
                    continue 'frames;
                }
                if on_stack[succ] {
                    lowlink[node] = lowlink[node].min(index[succ]);
                }
            }
            // all successors explored
            if let Some(&(parent, _)) = call_stack.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }
            if lowlink[node] == index[node] {
                let mut members = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    scc_of[member] = sccs.len();
                    members.push(member);
                    if member == node {
                        break;
                    }
                }
                members.reverse();
                sccs.push(members);
            }
        }
    }
    (scc_of, sccs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::parser::parse_rule;
    use crate::symbol::SymbolTable;

    fn strata_for(rules_src: &[&str]) -> (Catalog, Vec<IrRule>) {
        let mut catalog = Catalog::new();
        let mut symbols = SymbolTable::new();
        let mut rules = Vec::new();
        for src in rules_src {
            let rule = parse_rule(src).unwrap();
            rules.push(super::super::lower::lower_rule(&rule, &mut catalog, &mut symbols).unwrap());
        }
        assign_strata(&rules, &mut catalog).unwrap();
        (catalog, rules)
    }

    #[test]
    fn test_safety_accepts_bound_rule() {
        let rule = parse_rule("p(X, Y) :- q(X), r(X, Y).").unwrap();
        assert!(check_rule_safety(&rule).is_ok());
    }

    #[test]
    fn test_range_restriction_violation() {
        let rule = parse_rule("p(X, Y) :- q(X).").unwrap();
        let err = check_rule_safety(&rule).unwrap_err();
        assert!(matches!(err, AnalysisError::NotRangeRestricted { .. }));
    }

    #[test]
    fn test_unsafe_negation_variable() {
        let rule = parse_rule("p(X) :- q(X), not r(Y).").unwrap();
        let err = check_rule_safety(&rule).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsafeVariable { .. }));
    }

    #[test]
    fn test_unsafe_comparison_variable() {
        let rule = parse_rule("p(X) :- q(X), Y < 3.").unwrap();
        let err = check_rule_safety(&rule).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsafeVariable { variable, .. } if variable == "Y"));
    }

    #[test]
    fn test_wildcard_in_head_rejected() {
        let rule = parse_rule("p(_) :- q(X).").unwrap();
        let err = check_rule_safety(&rule).unwrap_err();
        assert!(matches!(err, AnalysisError::WildcardInHead { .. }));
    }

    #[test]
    fn test_positive_cycle_shares_stratum() {
        let (catalog, _) = strata_for(&[
            "p(X) :- q(X).",
            "q(X) :- p(X).",
            "r(X) :- p(X), not s(X).",
            "s(X) :- base(X).",
        ]);
        let p = catalog.id("p").unwrap();
        let q = catalog.id("q").unwrap();
        let r = catalog.id("r").unwrap();
        let s = catalog.id("s").unwrap();
        assert_eq!(catalog.def(p).stratum, catalog.def(q).stratum);
        assert!(catalog.def(r).stratum > catalog.def(s).stratum);
    }

    #[test]
    fn test_negation_chain_stacks_strata() {
        let (catalog, _) = strata_for(&[
            "a(X) :- base(X).",
            "b(X) :- base(X), not a(X).",
            "c(X) :- base(X), not b(X).",
        ]);
        let a = catalog.def(catalog.id("a").unwrap()).stratum;
        let b = catalog.def(catalog.id("b").unwrap()).stratum;
        let c = catalog.def(catalog.id("c").unwrap()).stratum;
        assert!(a < b && b < c);
    }

    #[test]
    fn test_unstratifiable_detected() {
        let mut catalog = Catalog::new();
        let mut symbols = SymbolTable::new();
        let mut rules = Vec::new();
        for src in ["p(X) :- q(X), not r(X).", "r(X) :- q(X), not p(X)."] {
            let rule = parse_rule(src).unwrap();
            rules.push(super::super::lower::lower_rule(&rule, &mut catalog, &mut symbols).unwrap());
        }
        let err = assign_strata(&rules, &mut catalog).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Analysis(AnalysisError::Unstratifiable { .. })
        ));
    }

    #[test]
    fn test_tarjan_on_diamond() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3, no cycles: four singleton components
        let edges = vec![
            vec![(1, Polarity::Positive), (2, Polarity::Positive)],
            vec![(3, Polarity::Positive)],
            vec![(3, Polarity::Positive)],
            vec![],
        ];
        let (scc_of, sccs) = tarjan_sccs(&edges);
        assert_eq!(sccs.len(), 4);
        // dependencies are emitted before dependents
        assert!(scc_of[3] < scc_of[1]);
        assert!(scc_of[1] < scc_of[0] || scc_of[2] < scc_of[0]);
    }

    #[test]
    fn test_tarjan_finds_cycle() {
        let edges = vec![
            vec![(1, Polarity::Positive)],
            vec![(0, Polarity::Positive), (2, Polarity::Positive)],
            vec![],
        ];
        let (scc_of, sccs) = tarjan_sccs(&edges);
        assert_eq!(sccs.len(), 2);
        assert_eq!(scc_of[0], scc_of[1]);
        assert_ne!(scc_of[0], scc_of[2]);
    }
}
