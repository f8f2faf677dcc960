//! Canonical pretty-printer for the AST.
//!
//! Printing is total and semantically round-trips: parsing the printed
//! text yields the same program as parsing the original source. Symbols
//! print bare when they are lowercase identifiers and quoted otherwise.

use super::{Atom, Declaration, Directive, Literal, Program, Rule, StringBuiltin, Term};
use std::fmt;

/// True if `s` parses back as a bare symbol constant
fn is_bare_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && StringBuiltin::parse(s).is_none()
        && s != "not"
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(name) => f.write_str(name),
            Term::Symbol(s) if is_bare_symbol(s) => f.write_str(s),
            Term::Symbol(s) => write_quoted(f, s),
            Term::Int(i) => write!(f, "{i}"),
            Term::Wildcard => f.write_str("_"),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relation)?;
        f.write_str("(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Positive(atom) => write!(f, "{atom}"),
            Literal::Negated(atom) => write!(f, "not {atom}"),
            Literal::Comparison { left, op, right } => {
                write!(f, "{left} {} {right}", op.as_str())
            }
            Literal::Builtin { func, args } => {
                f.write_str(func.as_str())?;
                f.write_str("(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            f.write_str(" :- ")?;
            for (i, lit) in self.body.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{lit}")?;
            }
        }
        f.write_str(".")
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".pred {}(", self.name)?;
        for (i, (name, kind)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {}", kind.as_str())?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::ClearDerived => f.write_str(".clear_derived()"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.declarations {
            writeln!(f, "{decl}")?;
        }
        for dir in &self.directives {
            writeln!(f, "{dir}")?;
        }
        for fact in &self.facts {
            writeln!(f, "{fact}.")?;
        }
        for rule in &self.rules {
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;

    fn var(name: &str) -> Term {
        Term::Variable(name.to_string())
    }

    #[test]
    fn test_term_printing() {
        assert_eq!(Term::Variable("X".into()).to_string(), "X");
        assert_eq!(Term::Symbol("ada".into()).to_string(), "ada");
        assert_eq!(Term::Symbol("Ada".into()).to_string(), "\"Ada\"");
        assert_eq!(Term::Symbol("a b".into()).to_string(), "\"a b\"");
        assert_eq!(Term::Int(-5).to_string(), "-5");
        assert_eq!(Term::Wildcard.to_string(), "_");
    }

    #[test]
    fn test_symbol_escapes() {
        assert_eq!(
            Term::Symbol("a\"b\\c\n".into()).to_string(),
            "\"a\\\"b\\\\c\\n\""
        );
    }

    #[test]
    fn test_keyword_symbols_are_quoted() {
        assert_eq!(Term::Symbol("not".into()).to_string(), "\"not\"");
        assert_eq!(Term::Symbol("match".into()).to_string(), "\"match\"");
    }

    #[test]
    fn test_rule_printing() {
        let rule = Rule::new(
            Atom::new("dead", vec![var("N")]),
            vec![
                Literal::Positive(Atom::new("node", vec![var("N")])),
                Literal::Negated(Atom::new("live", vec![var("N")])),
            ],
        );
        assert_eq!(rule.to_string(), "dead(N) :- node(N), not live(N).");
    }

    #[test]
    fn test_bodyless_rule_prints_as_fact() {
        let rule = Rule::new(Atom::new("flag", vec![Term::Int(1)]), vec![]);
        assert_eq!(rule.to_string(), "flag(1).");
    }

    #[test]
    fn test_comparison_and_builtin_printing() {
        let cmp = Literal::Comparison {
            left: var("X"),
            op: CompareOp::Le,
            right: Term::Int(10),
        };
        assert_eq!(cmp.to_string(), "X <= 10");
        let b = Literal::Builtin {
            func: StringBuiltin::StartsWith,
            args: vec![Term::Symbol("ab".into()), var("S")],
        };
        assert_eq!(b.to_string(), "starts_with(ab, S)");
    }
}
