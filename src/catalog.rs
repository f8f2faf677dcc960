//! # Predicate Catalog
//!
//! Registry of predicate definitions: name, arity, per-position argument
//! kind hints, and the declared / IDB / stratum attributes filled in by
//! declarations and analysis. Predicate ids are dense and stable for the
//! engine lifetime; registering the same (name, arity) twice is
//! idempotent, a different arity is an error.

use crate::error::EngineError;
use crate::value::{ArgKind, PredId, MAX_ARITY};
use rustc_hash::FxHashMap;

/// One predicate definition
#[derive(Debug, Clone)]
pub struct PredicateDef {
    pub name: String,
    pub arity: usize,
    /// Kind hint per argument position
    pub arg_kinds: Vec<ArgKind>,
    /// True once a `.pred` declaration or explicit registration named it
    pub declared: bool,
    /// True if the predicate appears as a rule head anywhere in the
    /// loaded program
    pub idb: bool,
    /// Evaluation stratum assigned by stratification (0 before analysis)
    pub stratum: usize,
}

/// Predicate registry with stable dense ids
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    by_name: FxHashMap<String, PredId>,
    defs: Vec<PredicateDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    /// Register a predicate, or return the existing id when the name is
    /// already known with the same arity.
    ///
    /// Kind hints upgrade `Unknown` positions of an existing definition;
    /// `declared` is sticky once set.
    pub fn register(
        &mut self,
        name: &str,
        arity: usize,
        arg_kinds: Option<&[ArgKind]>,
        declared: bool,
    ) -> Result<PredId, EngineError> {
        if arity > MAX_ARITY {
            return Err(EngineError::ArityTooLarge {
                predicate: name.to_string(),
                arity,
                max: MAX_ARITY,
            });
        }
        if let Some(&id) = self.by_name.get(name) {
            let def = &mut self.defs[id.index()];
            if def.arity != arity {
                return Err(EngineError::ArityMismatch {
                    predicate: name.to_string(),
                    expected: def.arity,
                    got: arity,
                });
            }
            if let Some(kinds) = arg_kinds {
                for (slot, kind) in def.arg_kinds.iter_mut().zip(kinds) {
                    if *slot == ArgKind::Unknown {
                        *slot = *kind;
                    }
                }
            }
            def.declared |= declared;
            return Ok(id);
        }

        let id = PredId(self.defs.len() as u32);
        self.defs.push(PredicateDef {
            name: name.to_string(),
            arity,
            arg_kinds: arg_kinds.map_or_else(|| vec![ArgKind::Unknown; arity], <[ArgKind]>::to_vec),
            declared,
            idb: false,
            stratum: 0,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id for a name, if registered
    pub fn id(&self, name: &str) -> Option<PredId> {
        self.by_name.get(name).copied()
    }

    pub fn def(&self, id: PredId) -> &PredicateDef {
        &self.defs[id.index()]
    }

    pub fn def_mut(&mut self, id: PredId) -> &mut PredicateDef {
        &mut self.defs[id.index()]
    }

    pub fn name(&self, id: PredId) -> &str {
        &self.defs[id.index()].name
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Iterate definitions in id order
    pub fn iter(&self) -> impl Iterator<Item = (PredId, &PredicateDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, d)| (PredId(i as u32), d))
    }

    /// Reset every IDB flag and stratum before re-analysis
    pub(crate) fn reset_analysis(&mut self) {
        for def in &mut self.defs {
            def.idb = false;
            def.stratum = 0;
        }
    }
}
