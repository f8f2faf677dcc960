//! # Rule Language Parser
//!
//! Recursive-descent parser over the [`lexer`] token stream:
//!
//! ```text
//! Program   = Directive* Item*
//! Directive = ".pred" name "(" arg ":" type ("," arg ":" type)* ")"
//!           | ".clear_derived" "(" ")"
//! Item      = Fact "." | Rule "."
//! Fact      = pred "(" constant ("," constant)* ")"
//! Rule      = head ":-" literal ("," literal)* "."
//! ```
//!
//! On a syntax error the parser records it and recovers at the next item
//! boundary (the terminating `.`), so it can keep validating the rest of
//! the input; the first error is what the caller receives.

pub mod lexer;

use crate::ast::{Atom, CompareOp, Declaration, Directive, Literal, Program, Rule, StringBuiltin, Term};
use crate::error::ParseError;
use crate::value::ArgKind;
use lexer::{Lexer, Token, TokenKind};

/// Parse a complete rule file
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

/// Parse a single rule or fact (must be exactly one item)
pub fn parse_rule(source: &str) -> Result<Rule, ParseError> {
    let program = parse_program(source)?;
    let mut rules = program.rules;
    let mut facts = program.facts;
    if rules.len() + facts.len() != 1 {
        return Err(ParseError::syntax(1, 1, "expected exactly one rule"));
    }
    if let Some(rule) = rules.pop() {
        Ok(rule)
    } else {
        let fact = facts.remove(0);
        Ok(Rule::new(fact, Vec::new()))
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            let found = self.peek();
            Err(ParseError::syntax(
                found.line,
                found.column,
                format!("expected {}, found {}", kind.describe(), found.kind.describe()),
            ))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::syntax(token.line, token.column, message)
    }

    /// Skip tokens up to and including the next item-terminating dot
    fn recover_to_item_boundary(&mut self) {
        loop {
            match &self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Dot => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut program = Program::new();
        let mut errors: Vec<ParseError> = Vec::new();

        while !self.at(&TokenKind::Eof) {
            let result = match self.peek().kind {
                TokenKind::DirPred => self.parse_pred_declaration(&mut program),
                TokenKind::DirClearDerived => self.parse_clear_derived(&mut program),
                _ => self.parse_item(&mut program),
            };
            if let Err(err) = result {
                errors.push(err);
                self.recover_to_item_boundary();
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(program),
        }
    }

    fn parse_pred_declaration(&mut self, program: &mut Program) -> Result<(), ParseError> {
        self.bump();
        let name = self.expect_ident("predicate name")?;
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let arg_name = self.expect_ident("argument name")?;
                self.expect(&TokenKind::Colon)?;
                let type_pos = self.peek().clone();
                let type_name = self.expect_ident("type name")?;
                let kind = ArgKind::parse(&type_name).ok_or_else(|| {
                    ParseError::syntax(
                        type_pos.line,
                        type_pos.column,
                        format!("unknown argument type '{type_name}'"),
                    )
                })?;
                args.push((arg_name, kind));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        program.declarations.push(Declaration { name, args });
        Ok(())
    }

    fn parse_clear_derived(&mut self, program: &mut Program) -> Result<(), ParseError> {
        self.bump();
        self.expect(&TokenKind::LParen)?;
        self.expect(&TokenKind::RParen)?;
        program.directives.push(Directive::ClearDerived);
        Ok(())
    }

    fn parse_item(&mut self, program: &mut Program) -> Result<(), ParseError> {
        let head_pos = self.peek().clone();
        let head = self.parse_atom()?;

        if StringBuiltin::parse(&head.relation).is_some() {
            return Err(ParseError::syntax(
                head_pos.line,
                head_pos.column,
                format!("'{}' is a builtin and cannot be a rule head", head.relation),
            ));
        }

        if self.eat(&TokenKind::Turnstile) {
            let mut body = Vec::new();
            loop {
                body.push(self.parse_literal()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Dot)?;
            program.rules.push(Rule::new(head, body));
        } else {
            self.expect(&TokenKind::Dot)?;
            if !head.is_ground() {
                return Err(ParseError::syntax(
                    head_pos.line,
                    head_pos.column,
                    format!("fact '{}' must have constant arguments", head.relation),
                ));
            }
            program.facts.push(head);
        }
        Ok(())
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        if self.eat(&TokenKind::KwNot) {
            let atom = self.parse_atom()?;
            return Ok(Literal::Negated(atom));
        }

        // An atom or builtin call when an identifier is directly followed
        // by '('; otherwise a comparison between two terms.
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::LParen) {
                if let Some(func) = StringBuiltin::parse(&name) {
                    let call_pos = self.peek().clone();
                    let atom = self.parse_atom()?;
                    if atom.args.len() != func.arity() {
                        return Err(ParseError::syntax(
                            call_pos.line,
                            call_pos.column,
                            format!(
                                "builtin '{}' takes {} arguments, got {}",
                                func.as_str(),
                                func.arity(),
                                atom.args.len()
                            ),
                        ));
                    }
                    return Ok(Literal::Builtin {
                        func,
                        args: atom.args,
                    });
                }
                return Ok(Literal::Positive(self.parse_atom()?));
            }
        }

        let left = self.parse_term()?;
        let op = match self.bump().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            other => {
                return Err(self.error_here(format!(
                    "expected comparison operator, found {}",
                    other.describe()
                )));
            }
        };
        let right = self.parse_term()?;
        Ok(Literal::Comparison { left, op, right })
    }

    fn parse_atom(&mut self) -> Result<Atom, ParseError> {
        let relation = self.expect_ident("predicate name")?;
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                args.push(self.parse_term()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(Atom::new(relation, args))
    }

    fn parse_term(&mut self) -> Result<Term, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.bump();
                if name == "_" {
                    Ok(Term::Wildcard)
                } else if name.starts_with(|c: char| c.is_ascii_uppercase() || c == '_') {
                    Ok(Term::Variable(name))
                } else {
                    Ok(Term::Symbol(name))
                }
            }
            TokenKind::Int(value) => {
                self.bump();
                Ok(Term::Int(value))
            }
            TokenKind::Str(text) => {
                self.bump();
                Ok(Term::Symbol(text))
            }
            other => Err(ParseError::syntax(
                token.line,
                token.column,
                format!("expected term, found {}", other.describe()),
            )),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        let token = self.peek().clone();
        if let TokenKind::Ident(name) = token.kind {
            self.bump();
            Ok(name)
        } else {
            Err(ParseError::syntax(
                token.line,
                token.column,
                format!("expected {what}, found {}", token.kind.describe()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_facts_and_rules() {
        let program = parse_program(
            r#"
            parent("ada", "bea").
            ancestor(X, Y) :- parent(X, Y).
            ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).
            "#,
        )
        .unwrap();
        assert_eq!(program.facts.len(), 1);
        assert_eq!(program.rules.len(), 2);
        assert_eq!(program.facts[0].relation, "parent");
        assert!(program.rules[1].is_recursive());
    }

    #[test]
    fn test_parse_declaration() {
        let program = parse_program(".pred parent(a: sym, b: sym)\nparent(ada, bea).").unwrap();
        assert_eq!(program.declarations.len(), 1);
        let decl = &program.declarations[0];
        assert_eq!(decl.name, "parent");
        assert_eq!(decl.arg_kinds(), vec![ArgKind::Sym, ArgKind::Sym]);
    }

    #[test]
    fn test_parse_clear_derived_directive() {
        let program = parse_program(".clear_derived()\np(1).").unwrap();
        assert_eq!(program.directives, vec![Directive::ClearDerived]);
    }

    #[test]
    fn test_parse_negation_and_comparison() {
        let program = parse_program("dead(N) :- node(N), not live(N), N != 0.").unwrap();
        let rule = &program.rules[0];
        assert_eq!(rule.body.len(), 3);
        assert!(matches!(rule.body[1], Literal::Negated(_)));
        assert!(matches!(
            rule.body[2],
            Literal::Comparison {
                op: CompareOp::Ne,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_builtin_literal() {
        let program = parse_program(r#"short(S) :- name(S), starts_with("ab", S)."#).unwrap();
        match &program.rules[0].body[1] {
            Literal::Builtin { func, args } => {
                assert_eq!(*func, StringBuiltin::StartsWith);
                assert_eq!(args[0], Term::Symbol("ab".into()));
            }
            other => panic!("expected builtin, got {other:?}"),
        }
    }

    #[test]
    fn test_builtin_arity_is_checked() {
        let err = parse_program("p(X) :- q(X), contains(X).").unwrap_err();
        assert!(err.to_string().contains("takes 2 arguments"));
    }

    #[test]
    fn test_builtin_cannot_be_head() {
        let err = parse_program("match(X, Y) :- q(X, Y).").unwrap_err();
        assert!(err.to_string().contains("cannot be a rule head"));
    }

    #[test]
    fn test_fact_with_variable_is_rejected() {
        let err = parse_program("edge(X, 1).").unwrap_err();
        assert!(err.to_string().contains("constant arguments"));
    }

    #[test]
    fn test_wildcard_terms() {
        let program = parse_program("p(X) :- q(X, _).").unwrap();
        match &program.rules[0].body[0] {
            Literal::Positive(atom) => assert_eq!(atom.args[1], Term::Wildcard),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_case_convention() {
        // facts must be ground, so exercise the convention in a rule body
        assert!(parse_program("p(X, lower, \"Quoted\", _rest).").is_err());
        let program = parse_program("p(A) :- q(A, lower, \"Quoted\", _rest).").unwrap();
        match &program.rules[0].body[0] {
            Literal::Positive(atom) => {
                assert_eq!(atom.args[0], Term::Variable("A".into()));
                assert_eq!(atom.args[1], Term::Symbol("lower".into()));
                assert_eq!(atom.args[2], Term::Symbol("Quoted".into()));
                assert_eq!(atom.args[3], Term::Variable("_rest".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_recovery_reports_first_error() {
        let err = parse_program("p(.\nq(1).\nr(").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 1),
            ParseError::Compiled(_) => panic!("expected syntax error"),
        }
    }

    #[test]
    fn test_nullary_atom() {
        let program = parse_program("ready() :- init().").unwrap();
        assert_eq!(program.rules[0].head.arity(), 0);
        assert_eq!(program.rules[0].body.len(), 1);
    }

    #[test]
    fn test_parse_rule_helper() {
        let rule = parse_rule("p(X) :- q(X).").unwrap();
        assert_eq!(rule.head.relation, "p");
        let fact_rule = parse_rule("p(1).").unwrap();
        assert!(fact_rule.body.is_empty());
    }
}
