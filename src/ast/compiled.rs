//! Compiled rule format (`.dlc`).
//!
//! Layout: the 8-byte magic `RULRAST1`, followed by a deflate stream
//! whose inflation is a tag-length-value encoding of the AST:
//!
//! ```text
//! record  := tag:u8 len:u32le body
//! string  := len:u32le utf8-bytes          (inside record bodies)
//! PROGRAM := count:u32 DECL* count:u32 DIRECTIVE*
//!            count:u32 ATOM* count:u32 RULE*
//! DECL    := string name, count:u32, (string arg-name, kind:u8)*
//! DIRECTIVE := code:u8                     (0 = clear_derived)
//! ATOM    := string relation, count:u32, TERM*
//! RULE    := ATOM head, count:u32, LITERAL*
//! TERM    := VAR(string) | SYM(string) | INT(i64le) | WILD
//! LITERAL := POS(ATOM) | NEG(ATOM)
//!          | CMP(op:u8, TERM, TERM)
//!          | BUILTIN(func:u8, count:u32, TERM*)
//! ```
//!
//! Decoding is independent of any source text and round-trips every AST
//! node: `deserialize(serialize(p)) == p`.

use super::{Atom, CompareOp, Declaration, Directive, Literal, Program, Rule, StringBuiltin, Term};
use crate::error::ParseError;
use crate::value::ArgKind;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// File magic for compiled rule streams
pub const MAGIC: &[u8; 8] = b"RULRAST1";

// Record tags
const TAG_PROGRAM: u8 = 0x01;
const TAG_DECL: u8 = 0x02;
const TAG_DIRECTIVE: u8 = 0x03;
const TAG_ATOM: u8 = 0x04;
const TAG_RULE: u8 = 0x05;
const TAG_TERM_VAR: u8 = 0x10;
const TAG_TERM_SYM: u8 = 0x11;
const TAG_TERM_INT: u8 = 0x12;
const TAG_TERM_WILD: u8 = 0x13;
const TAG_LIT_POS: u8 = 0x20;
const TAG_LIT_NEG: u8 = 0x21;
const TAG_LIT_CMP: u8 = 0x22;
const TAG_LIT_BUILTIN: u8 = 0x23;

// ============================================================================
// Serialization
// ============================================================================

/// Serialize a program to the compiled byte format
pub fn serialize_program(program: &Program) -> Vec<u8> {
    let mut body = Vec::new();
    write_u32(&mut body, program.declarations.len() as u32);
    for decl in &program.declarations {
        write_decl(&mut body, decl);
    }
    write_u32(&mut body, program.directives.len() as u32);
    for dir in &program.directives {
        write_record(&mut body, TAG_DIRECTIVE, |buf| match dir {
            Directive::ClearDerived => buf.push(0),
        });
    }
    write_u32(&mut body, program.facts.len() as u32);
    for fact in &program.facts {
        write_atom(&mut body, fact);
    }
    write_u32(&mut body, program.rules.len() as u32);
    for rule in &program.rules {
        write_rule(&mut body, rule);
    }

    let mut payload = Vec::new();
    write_record(&mut payload, TAG_PROGRAM, |buf| buf.extend_from_slice(&body));

    let mut out = Vec::with_capacity(payload.len() / 2 + MAGIC.len());
    out.extend_from_slice(MAGIC);
    let mut encoder = DeflateEncoder::new(&mut out, Compression::default());
    // writing into a Vec cannot fail
    let _ = encoder.write_all(&payload);
    let _ = encoder.finish();
    out
}

fn write_record(out: &mut Vec<u8>, tag: u8, fill: impl FnOnce(&mut Vec<u8>)) {
    let mut body = Vec::new();
    fill(&mut body);
    out.push(tag);
    write_u32(out, body.len() as u32);
    out.extend_from_slice(&body);
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_decl(out: &mut Vec<u8>, decl: &Declaration) {
    write_record(out, TAG_DECL, |buf| {
        write_str(buf, &decl.name);
        write_u32(buf, decl.args.len() as u32);
        for (name, kind) in &decl.args {
            write_str(buf, name);
            buf.push(kind_code(*kind));
        }
    });
}

fn write_atom(out: &mut Vec<u8>, atom: &Atom) {
    write_record(out, TAG_ATOM, |buf| {
        write_str(buf, &atom.relation);
        write_u32(buf, atom.args.len() as u32);
        for term in &atom.args {
            write_term(buf, term);
        }
    });
}

fn write_rule(out: &mut Vec<u8>, rule: &Rule) {
    write_record(out, TAG_RULE, |buf| {
        write_atom(buf, &rule.head);
        write_u32(buf, rule.body.len() as u32);
        for lit in &rule.body {
            write_literal(buf, lit);
        }
    });
}

fn write_term(out: &mut Vec<u8>, term: &Term) {
    match term {
        Term::Variable(name) => write_record(out, TAG_TERM_VAR, |buf| write_str(buf, name)),
        Term::Symbol(s) => write_record(out, TAG_TERM_SYM, |buf| write_str(buf, s)),
        Term::Int(i) => write_record(out, TAG_TERM_INT, |buf| {
            buf.extend_from_slice(&i.to_le_bytes());
        }),
        Term::Wildcard => write_record(out, TAG_TERM_WILD, |_| {}),
    }
}

fn write_literal(out: &mut Vec<u8>, lit: &Literal) {
    match lit {
        Literal::Positive(atom) => write_record(out, TAG_LIT_POS, |buf| write_atom(buf, atom)),
        Literal::Negated(atom) => write_record(out, TAG_LIT_NEG, |buf| write_atom(buf, atom)),
        Literal::Comparison { left, op, right } => write_record(out, TAG_LIT_CMP, |buf| {
            buf.push(op_code(*op));
            write_term(buf, left);
            write_term(buf, right);
        }),
        Literal::Builtin { func, args } => write_record(out, TAG_LIT_BUILTIN, |buf| {
            buf.push(builtin_code(*func));
            write_u32(buf, args.len() as u32);
            for term in args {
                write_term(buf, term);
            }
        }),
    }
}

fn kind_code(kind: ArgKind) -> u8 {
    match kind {
        ArgKind::Sym => 0,
        ArgKind::Int => 1,
        ArgKind::Range => 2,
        ArgKind::Unknown => 3,
    }
}

fn op_code(op: CompareOp) -> u8 {
    match op {
        CompareOp::Eq => 0,
        CompareOp::Ne => 1,
        CompareOp::Lt => 2,
        CompareOp::Le => 3,
        CompareOp::Gt => 4,
        CompareOp::Ge => 5,
    }
}

fn builtin_code(func: StringBuiltin) -> u8 {
    match func {
        StringBuiltin::Match => 0,
        StringBuiltin::StartsWith => 1,
        StringBuiltin::EndsWith => 2,
        StringBuiltin::Contains => 3,
    }
}

// ============================================================================
// Deserialization
// ============================================================================

/// Decode a compiled byte stream back into a program
pub fn deserialize_program(bytes: &[u8]) -> Result<Program, ParseError> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(ParseError::Compiled("bad magic".to_string()));
    }
    let mut payload = Vec::new();
    DeflateDecoder::new(&bytes[MAGIC.len()..])
        .read_to_end(&mut payload)
        .map_err(|e| ParseError::Compiled(format!("deflate stream: {e}")))?;

    let mut reader = Reader::new(&payload);
    let (tag, mut body) = reader.record()?;
    if tag != TAG_PROGRAM {
        return Err(bad_tag(tag));
    }
    if !reader.is_empty() {
        return Err(ParseError::Compiled("trailing data after program".to_string()));
    }

    let mut program = Program::new();
    for _ in 0..body.u32()? {
        program.declarations.push(read_decl(&mut body)?);
    }
    for _ in 0..body.u32()? {
        let (tag, mut dir) = body.record()?;
        if tag != TAG_DIRECTIVE {
            return Err(bad_tag(tag));
        }
        match dir.u8()? {
            0 => program.directives.push(Directive::ClearDerived),
            other => {
                return Err(ParseError::Compiled(format!("unknown directive code {other}")));
            }
        }
    }
    for _ in 0..body.u32()? {
        program.facts.push(read_atom_record(&mut body)?);
    }
    for _ in 0..body.u32()? {
        program.rules.push(read_rule(&mut body)?);
    }
    if !body.is_empty() {
        return Err(ParseError::Compiled("trailing data in program body".to_string()));
    }
    Ok(program)
}

fn bad_tag(tag: u8) -> ParseError {
    ParseError::Compiled(format!("unexpected tag 0x{tag:02x}"))
}

/// Bounds-checked cursor over one record body
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.pos + n > self.bytes.len() {
            return Err(ParseError::Compiled("truncated stream".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i64(&mut self) -> Result<i64, ParseError> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| ParseError::Compiled("truncated stream".to_string()))?;
        Ok(i64::from_le_bytes(bytes))
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ParseError::Compiled("invalid utf-8 in string".to_string()))
    }

    /// Read one `tag + len + body` record, returning a sub-reader
    fn record(&mut self) -> Result<(u8, Reader<'a>), ParseError> {
        let tag = self.u8()?;
        let len = self.u32()? as usize;
        let body = self.take(len)?;
        Ok((tag, Reader::new(body)))
    }
}

fn read_decl(reader: &mut Reader<'_>) -> Result<Declaration, ParseError> {
    let (tag, mut body) = reader.record()?;
    if tag != TAG_DECL {
        return Err(bad_tag(tag));
    }
    let name = body.string()?;
    let mut args = Vec::new();
    for _ in 0..body.u32()? {
        let arg_name = body.string()?;
        let kind = match body.u8()? {
            0 => ArgKind::Sym,
            1 => ArgKind::Int,
            2 => ArgKind::Range,
            3 => ArgKind::Unknown,
            other => return Err(ParseError::Compiled(format!("unknown kind code {other}"))),
        };
        args.push((arg_name, kind));
    }
    Ok(Declaration { name, args })
}

fn read_atom_record(reader: &mut Reader<'_>) -> Result<Atom, ParseError> {
    let (tag, mut body) = reader.record()?;
    if tag != TAG_ATOM {
        return Err(bad_tag(tag));
    }
    let relation = body.string()?;
    let mut args = Vec::new();
    for _ in 0..body.u32()? {
        args.push(read_term(&mut body)?);
    }
    Ok(Atom::new(relation, args))
}

fn read_rule(reader: &mut Reader<'_>) -> Result<Rule, ParseError> {
    let (tag, mut body) = reader.record()?;
    if tag != TAG_RULE {
        return Err(bad_tag(tag));
    }
    let head = read_atom_record(&mut body)?;
    let mut literals = Vec::new();
    for _ in 0..body.u32()? {
        literals.push(read_literal(&mut body)?);
    }
    Ok(Rule::new(head, literals))
}

fn read_term(reader: &mut Reader<'_>) -> Result<Term, ParseError> {
    let (tag, mut body) = reader.record()?;
    match tag {
        TAG_TERM_VAR => Ok(Term::Variable(body.string()?)),
        TAG_TERM_SYM => Ok(Term::Symbol(body.string()?)),
        TAG_TERM_INT => Ok(Term::Int(body.i64()?)),
        TAG_TERM_WILD => Ok(Term::Wildcard),
        other => Err(bad_tag(other)),
    }
}

fn read_literal(reader: &mut Reader<'_>) -> Result<Literal, ParseError> {
    let (tag, mut body) = reader.record()?;
    match tag {
        TAG_LIT_POS => Ok(Literal::Positive(read_atom_record(&mut body)?)),
        TAG_LIT_NEG => Ok(Literal::Negated(read_atom_record(&mut body)?)),
        TAG_LIT_CMP => {
            let op = match body.u8()? {
                0 => CompareOp::Eq,
                1 => CompareOp::Ne,
                2 => CompareOp::Lt,
                3 => CompareOp::Le,
                4 => CompareOp::Gt,
                5 => CompareOp::Ge,
                other => return Err(ParseError::Compiled(format!("unknown op code {other}"))),
            };
            let left = read_term(&mut body)?;
            let right = read_term(&mut body)?;
            Ok(Literal::Comparison { left, op, right })
        }
        TAG_LIT_BUILTIN => {
            let func = match body.u8()? {
                0 => StringBuiltin::Match,
                1 => StringBuiltin::StartsWith,
                2 => StringBuiltin::EndsWith,
                3 => StringBuiltin::Contains,
                other => {
                    return Err(ParseError::Compiled(format!("unknown builtin code {other}")));
                }
            };
            let mut args = Vec::new();
            for _ in 0..body.u32()? {
                args.push(read_term(&mut body)?);
            }
            Ok(Literal::Builtin { func, args })
        }
        other => Err(bad_tag(other)),
    }
}
