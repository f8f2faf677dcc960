//! # Rule Language AST
//!
//! Abstract syntax for the rule language: declarations, directives,
//! facts, and rules built from atoms, terms, and body literals. The AST
//! is the frontend's hand-off to lowering and also the unit of
//! serialization - canonical text through [`printer`], JSON through the
//! serde derives, and the compiled binary form through [`compiled`].

use crate::value::ArgKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub mod compiled;
pub mod printer;

// ============================================================================
// Core AST Types
// ============================================================================

/// A term in an atom argument position.
///
/// Identifiers starting with an uppercase letter or `_` are variables;
/// lowercase identifiers and quoted strings are symbol constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Variable(String),
    Symbol(String),
    Int(i64),
    Wildcard,
}

impl Term {
    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Term::Symbol(_) | Term::Int(_))
    }

    /// Variable name if this is a variable
    pub fn as_variable(&self) -> Option<&str> {
        if let Term::Variable(name) = self {
            Some(name)
        } else {
            None
        }
    }
}

/// Comparison operators usable between body terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// String builtins usable as body literals. All take (pattern, subject)
/// symbol arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringBuiltin {
    /// Regular-expression match (the `regex` crate's dialect)
    Match,
    StartsWith,
    EndsWith,
    Contains,
}

impl StringBuiltin {
    /// Recognize a builtin by its surface name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "match" => Some(StringBuiltin::Match),
            "starts_with" => Some(StringBuiltin::StartsWith),
            "ends_with" => Some(StringBuiltin::EndsWith),
            "contains" => Some(StringBuiltin::Contains),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StringBuiltin::Match => "match",
            StringBuiltin::StartsWith => "starts_with",
            StringBuiltin::EndsWith => "ends_with",
            StringBuiltin::Contains => "contains",
        }
    }

    /// Expected argument count
    pub fn arity(self) -> usize {
        2
    }
}

/// An atom like `edge(X, Y)` or `live("x")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    pub relation: String,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(relation: impl Into<String>, args: Vec<Term>) -> Self {
        Atom {
            relation: relation.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// All variable names in this atom
    pub fn variables(&self) -> HashSet<&str> {
        self.args.iter().filter_map(Term::as_variable).collect()
    }

    /// True if every argument is a constant (no variables or wildcards)
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_constant)
    }
}

/// One literal in a rule body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Literal {
    Positive(Atom),
    Negated(Atom),
    Comparison {
        left: Term,
        op: CompareOp,
        right: Term,
    },
    Builtin {
        func: StringBuiltin,
        args: Vec<Term>,
    },
}

impl Literal {
    pub fn is_positive(&self) -> bool {
        matches!(self, Literal::Positive(_))
    }

    /// The underlying atom for positive and negated literals
    pub fn atom(&self) -> Option<&Atom> {
        match self {
            Literal::Positive(atom) | Literal::Negated(atom) => Some(atom),
            _ => None,
        }
    }

    /// All variable names in this literal
    pub fn variables(&self) -> HashSet<&str> {
        match self {
            Literal::Positive(atom) | Literal::Negated(atom) => atom.variables(),
            Literal::Comparison { left, right, .. } => [left, right]
                .into_iter()
                .filter_map(Term::as_variable)
                .collect(),
            Literal::Builtin { args, .. } => args.iter().filter_map(Term::as_variable).collect(),
        }
    }
}

/// A rule `head :- body`. A fact in rule position has an empty body and
/// fires once per evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub head: Atom,
    pub body: Vec<Literal>,
}

impl Rule {
    pub fn new(head: Atom, body: Vec<Literal>) -> Self {
        Rule { head, body }
    }

    /// Variables bound by positive body atoms - the safe set
    pub fn positive_body_variables(&self) -> HashSet<&str> {
        self.body
            .iter()
            .filter(|lit| lit.is_positive())
            .flat_map(Literal::variables)
            .collect()
    }

    /// True if the head relation also appears in the body
    pub fn is_recursive(&self) -> bool {
        self.body
            .iter()
            .filter_map(Literal::atom)
            .any(|a| a.relation == self.head.relation)
    }
}

/// A `.pred name(arg: type, ...)` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    /// (argument name, declared kind) per position
    pub args: Vec<(String, ArgKind)>,
}

impl Declaration {
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn arg_kinds(&self) -> Vec<ArgKind> {
        self.args.iter().map(|(_, k)| *k).collect()
    }
}

/// Program-level directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// `.clear_derived()` - erase IDB tuples when the batch is loaded
    ClearDerived,
}

/// A parsed rule file: declarations and directives first, then facts and
/// rules in source order within their kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Declaration>,
    pub directives: Vec<Directive>,
    pub facts: Vec<Atom>,
    pub rules: Vec<Rule>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
            && self.directives.is_empty()
            && self.facts.is_empty()
            && self.rules.is_empty()
    }

    /// Append another program's items, preserving order within each kind
    pub fn merge(&mut self, other: Program) {
        self.declarations.extend(other.declarations);
        self.directives.extend(other.directives);
        self.facts.extend(other.facts);
        self.rules.extend(other.rules);
    }

    /// Relation names that appear as rule or fact heads
    pub fn idb_relations(&self) -> HashSet<&str> {
        self.rules
            .iter()
            .map(|r| r.head.relation.as_str())
            .chain(self.facts.iter().map(|f| f.relation.as_str()))
            .collect()
    }
}
