//! # Relation Providers
//!
//! "Bring your own data structure": a relation may be backed by a
//! specialized structure instead of explicit tuple storage. The engine
//! talks to such structures exclusively through [`RelationProvider`]:
//!
//! | op | required | contract |
//! |----|----------|----------|
//! | `add` | yes | `Added` if newly present, `NoChange` if already there |
//! | `contains` | yes | ground membership test |
//! | `lookup` | no | enumerate tuples with `key` at position `pos` |
//! | `iter_all` | no | full enumeration (may be expensive) |
//! | `has_delta`/`iter_delta`/`ack_delta` | no | semi-naive interface |
//!
//! Providers own private state and never call back into the engine.
//! Teardown is `Drop`. Built-in kinds: [`eqrel`] (union-find closure),
//! [`egraph`] (congruence closure), and the [`ExternalProvider`] adapter
//! over a host-owned tuple source.

pub mod egraph;
pub mod eqrel;

use crate::value::{Tuple, Value};
use thiserror::Error;

/// Result of a provider `add`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The tuple (or an equivalence it implies) was new
    Added,
    /// Already represented
    NoChange,
}

/// Fault reported by a provider operation
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// Tag identifying a provider implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Union-find equivalence relation
    Eqrel,
    /// E-graph equivalence facet
    EgraphTermEq,
    /// E-graph function-application facet
    EgraphNode,
    /// Host-owned external tuple source
    External,
    /// Anything else a host plugs in
    Custom,
}

/// Interface backing one relation
pub trait RelationProvider {
    fn kind(&self) -> ProviderKind;

    /// Tuple width this provider serves
    fn arity(&self) -> usize;

    fn add(&mut self, tuple: &Tuple) -> Result<AddOutcome, ProviderError>;

    /// Ground membership test
    fn contains(&self, tuple: &Tuple) -> bool;

    /// Enumerate tuples whose position `pos` equals `key`; `None` when
    /// the provider cannot serve this position
    fn lookup<'a>(
        &'a self,
        key: &Value,
        pos: usize,
    ) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        let _ = (key, pos);
        None
    }

    /// Full enumeration; `None` when unsupported
    fn iter_all<'a>(&'a self) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        None
    }

    /// True if tuples were added since the last `ack_delta`
    fn has_delta(&self) -> bool {
        false
    }

    /// Tuples added since the last `ack_delta`
    fn iter_delta<'a>(&'a self) -> Box<dyn Iterator<Item = Tuple> + 'a> {
        Box::new(std::iter::empty())
    }

    /// Reset the delta cursor; `has_delta` becomes false
    fn ack_delta(&mut self) {}
}

// ============================================================================
// External fact sources
// ============================================================================

/// A host-owned tuple source that does not live inside the engine.
///
/// Iteration errors stop the current join branch only; they never abort
/// evaluation.
pub trait ExternalRelation {
    fn arity(&self) -> usize;

    fn iter_all(&self) -> Result<Vec<Tuple>, ProviderError>;

    fn has_delta(&self) -> bool {
        false
    }

    fn iter_delta(&self) -> Result<Vec<Tuple>, ProviderError> {
        Ok(Vec::new())
    }

    fn ack_delta(&mut self) {}

    fn lookup_arg0(&self, key: &Value) -> Option<Vec<Tuple>> {
        let _ = key;
        None
    }

    fn lookup_arg1(&self, key: &Value) -> Option<Vec<Tuple>> {
        let _ = key;
        None
    }
}

/// Adapter exposing an [`ExternalRelation`] through the provider trait
pub struct ExternalProvider {
    source: Box<dyn ExternalRelation>,
}

impl ExternalProvider {
    pub fn new(source: Box<dyn ExternalRelation>) -> Self {
        ExternalProvider { source }
    }

    fn rows(&self) -> Vec<Tuple> {
        match self.source.iter_all() {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!("external relation iteration failed: {err}");
                Vec::new()
            }
        }
    }
}

impl RelationProvider for ExternalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::External
    }

    fn arity(&self) -> usize {
        self.source.arity()
    }

    fn add(&mut self, _tuple: &Tuple) -> Result<AddOutcome, ProviderError> {
        Err(ProviderError("external relation is read-only".to_string()))
    }

    fn contains(&self, tuple: &Tuple) -> bool {
        self.rows().iter().any(|t| t == tuple)
    }

    fn lookup<'a>(
        &'a self,
        key: &Value,
        pos: usize,
    ) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        let rows = match pos {
            0 => self.source.lookup_arg0(key)?,
            1 => self.source.lookup_arg1(key)?,
            _ => return None,
        };
        Some(Box::new(rows.into_iter()))
    }

    fn iter_all<'a>(&'a self) -> Option<Box<dyn Iterator<Item = Tuple> + 'a>> {
        Some(Box::new(self.rows().into_iter()))
    }

    fn has_delta(&self) -> bool {
        self.source.has_delta()
    }

    fn iter_delta<'a>(&'a self) -> Box<dyn Iterator<Item = Tuple> + 'a> {
        match self.source.iter_delta() {
            Ok(rows) => Box::new(rows.into_iter()),
            Err(err) => {
                tracing::warn!("external relation delta iteration failed: {err}");
                Box::new(std::iter::empty())
            }
        }
    }

    fn ack_delta(&mut self) {
        self.source.ack_delta();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct FixedSource {
        rows: Vec<Tuple>,
    }

    impl ExternalRelation for FixedSource {
        fn arity(&self) -> usize {
            2
        }

        fn iter_all(&self) -> Result<Vec<Tuple>, ProviderError> {
            Ok(self.rows.clone())
        }

        fn lookup_arg0(&self, key: &Value) -> Option<Vec<Tuple>> {
            Some(
                self.rows
                    .iter()
                    .filter(|t| t.get(0) == Some(key))
                    .cloned()
                    .collect(),
            )
        }
    }

    fn t2(a: i64, b: i64) -> Tuple {
        Tuple::new(vec![Value::Int(a), Value::Int(b)])
    }

    #[test]
    fn test_external_adapter_enumeration_and_lookup() {
        let provider = ExternalProvider::new(Box::new(FixedSource {
            rows: vec![t2(1, 2), t2(1, 3), t2(2, 4)],
        }));
        assert_eq!(provider.kind(), ProviderKind::External);
        assert!(provider.contains(&t2(1, 3)));
        assert!(!provider.contains(&t2(9, 9)));
        let hits: Vec<_> = provider.lookup(&Value::Int(1), 0).unwrap().collect();
        assert_eq!(hits, vec![t2(1, 2), t2(1, 3)]);
        assert!(provider.lookup(&Value::Int(1), 1).is_none());
        assert_eq!(provider.iter_all().unwrap().count(), 3);
    }

    #[test]
    fn test_external_adapter_rejects_writes() {
        let mut provider = ExternalProvider::new(Box::new(FixedSource { rows: vec![] }));
        assert!(provider.add(&t2(1, 2)).is_err());
    }
}
