//! # Value Type System
//!
//! Tagged scalar values and fixed-arity tuples. A [`Value`] is one of
//! {interned symbol, 64-bit integer, opaque range id, interned fact id};
//! a [`Tuple`] is an ordered sequence of values whose length is fixed per
//! predicate (at most [`MAX_ARITY`]).
//!
//! Tuple hashes must be order-sensitive and stable across runs with the
//! same input, so hashing goes through `FxHasher` (fixed seed) rather
//! than the std `RandomState`.

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Maximum tuple arity supported by the engine
pub const MAX_ARITY: usize = 8;

/// Dense id for an interned string, assigned in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// Index into the interner's string pool
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Dense id for a registered predicate, stable for the engine lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredId(pub u32);

impl PredId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable 64-bit id for an interned `(predicate, tuple)` pair.
///
/// Layout: predicate id in the top 16 bits, per-predicate insertion
/// ordinal in the low 48 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(pub u64);

/// Number of low bits holding the per-predicate ordinal
pub(crate) const FACT_LOCAL_BITS: u64 = 48;
pub(crate) const FACT_LOCAL_MASK: u64 = (1 << FACT_LOCAL_BITS) - 1;

impl FactId {
    /// Pack a predicate id and a per-predicate ordinal
    pub fn new(pred: PredId, local: u64) -> Self {
        FactId((u64::from(pred.0) << FACT_LOCAL_BITS) | (local & FACT_LOCAL_MASK))
    }

    /// Predicate the fact belongs to
    pub fn pred(self) -> PredId {
        PredId((self.0 >> FACT_LOCAL_BITS) as u32)
    }

    /// Per-predicate insertion ordinal
    pub fn local_index(self) -> u64 {
        self.0 & FACT_LOCAL_MASK
    }
}

/// Declared kind hint for one argument position of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    /// Interned symbol
    Sym,
    /// 64-bit signed integer
    Int,
    /// Opaque range id
    Range,
    /// Not declared / inferred
    Unknown,
}

impl ArgKind {
    /// Parse a type name from a `.pred` declaration
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sym" | "symbol" | "string" => Some(ArgKind::Sym),
            "int" => Some(ArgKind::Int),
            "range" => Some(ArgKind::Range),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArgKind::Sym => "sym",
            ArgKind::Int => "int",
            ArgKind::Range => "range",
            ArgKind::Unknown => "unknown",
        }
    }
}

/// A single scalar value.
///
/// Equality compares kind and payload. `Range` carries an opaque 64-bit
/// identifier and joins exactly like `Int` (payload equality). `Fact`
/// references another interned tuple, making facts first-class values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Interned string
    Sym(SymbolId),
    /// Signed integer
    Int(i64),
    /// Opaque range identifier
    Range(u64),
    /// Reference to an interned fact
    Fact(FactId),
}

impl Value {
    /// The declared-kind bucket this value falls into
    pub fn kind(&self) -> ArgKind {
        match self {
            Value::Sym(_) => ArgKind::Sym,
            Value::Int(_) => ArgKind::Int,
            Value::Range(_) => ArgKind::Range,
            Value::Fact(_) => ArgKind::Unknown,
        }
    }

    /// Symbol id, if this is a symbol
    pub fn as_sym(&self) -> Option<SymbolId> {
        match self {
            Value::Sym(s) => Some(*s),
            _ => None,
        }
    }

    /// Integer payload, if this is an int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Sym(s) => write!(f, "sym#{}", s.0),
            Value::Int(i) => write!(f, "{i}"),
            Value::Range(r) => write!(f, "range#{r}"),
            Value::Fact(id) => write!(f, "fact#{:x}", id.0),
        }
    }
}

/// An ordered, fixed-arity sequence of values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Create a tuple. Arity is not checked here; relations validate it.
    pub fn new(values: Vec<Value>) -> Self {
        Tuple { values }
    }

    /// The empty (nullary) tuple
    pub fn empty() -> Self {
        Tuple { values: Vec::new() }
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, pos: usize) -> Option<&Value> {
        self.values.get(pos)
    }

    /// Order-sensitive hash, stable across runs with the same input
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.values.hash(&mut hasher);
        hasher.finish()
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Tuple::new(values)
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_id_layout() {
        let id = FactId::new(PredId(7), 42);
        assert_eq!(id.pred(), PredId(7));
        assert_eq!(id.local_index(), 42);
        assert_eq!(id.0, (7u64 << 48) | 42);
    }

    #[test]
    fn test_value_equality_is_kind_sensitive() {
        assert_ne!(Value::Int(1), Value::Range(1));
        assert_ne!(Value::Sym(SymbolId(0)), Value::Int(0));
        assert_eq!(Value::Int(5), Value::Int(5));
    }

    #[test]
    fn test_tuple_hash_order_sensitive() {
        let a = Tuple::new(vec![Value::Int(1), Value::Int(2)]);
        let b = Tuple::new(vec![Value::Int(2), Value::Int(1)]);
        assert_ne!(a.stable_hash(), b.stable_hash());
        assert_eq!(a.stable_hash(), a.clone().stable_hash());
    }

    #[test]
    fn test_nullary_tuple() {
        let t = Tuple::empty();
        assert_eq!(t.arity(), 0);
        assert_eq!(t, Tuple::new(vec![]));
    }

    #[test]
    fn test_arg_kind_parse() {
        assert_eq!(ArgKind::parse("sym"), Some(ArgKind::Sym));
        assert_eq!(ArgKind::parse("int"), Some(ArgKind::Int));
        assert_eq!(ArgKind::parse("range"), Some(ArgKind::Range));
        assert_eq!(ArgKind::parse("float"), None);
    }
}
