//! # rulrast - Embeddable Datalog Evaluation Engine
//!
//! An in-memory Datalog engine meant to live inside a host application:
//! the host registers predicates, injects facts, loads rule text (or
//! compiled rule bytes), evaluates to a least fixed point, and iterates
//! the resulting relations.
//!
//! ## Pipeline
//!
//! ```text
//! Rule Source (.dl) / Compiled Rules (.dlc)
//!     |
//! [parser]            -> AST  (lexer with positions, item recovery)
//!     |
//! [ir::analyze]       -> stratified IR
//!     |                   safety + range restriction
//!     |                   SCC condensation -> strata, negation check
//!     |
//! [eval]              -> fixed point
//!     |                   per-stratum semi-naive loop, delta rewriting
//!     |                   index/provider lookups, negation, builtins
//!     |                   host hook between iterations
//!     v
//! relation views / fact ids
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rulrast::{Engine, Value};
//!
//! let mut engine = Engine::new();
//! let a = engine.sym("a");
//! let b = engine.sym("b");
//! engine.insert("edge", &[a, b]).unwrap();
//! engine
//!     .load_rules("path(X, Y) :- edge(X, Y). path(X, Z) :- edge(X, Y), path(Y, Z).")
//!     .unwrap();
//! engine.evaluate().unwrap();
//!
//! let path = engine.predicate_id("path").unwrap();
//! assert_eq!(engine.relation_view(path).unwrap().len(), 1);
//! ```
//!
//! Relations can be backed by specialized providers - a union-find
//! equivalence relation, an e-graph with congruence closure, or a
//! host-owned external source - registered per predicate through
//! [`Engine::set_provider`].

pub mod ast;
pub mod catalog;
pub mod config;
pub mod error;
pub mod eval;
pub mod intern;
pub mod ir;
pub mod parser;
pub mod provider;
pub mod relation;
pub mod symbol;
pub mod value;

pub use config::EngineConfig;
pub use error::{AnalysisError, EngineError, EvalError, ParseError, Result};
pub use eval::{CancelHandle, EvalStats, HookCtx};
pub use provider::egraph::{opcode, EgraphContext, EnodeProvider, TermEqProvider};
pub use provider::eqrel::EqrelProvider;
pub use provider::{
    AddOutcome, ExternalProvider, ExternalRelation, ProviderError, ProviderKind, RelationProvider,
};
pub use symbol::{SymbolResolver, SymbolTable};
pub use value::{ArgKind, FactId, PredId, SymbolId, Tuple, Value, MAX_ARITY};

use catalog::Catalog;
use eval::{EvalCx, IterationHook};
use intern::FactInterner;
use ir::IrProgram;
use relation::Relation;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Read-only view over a predicate's materialized tuples.
///
/// Borrowed from the engine, so it is valid until the next mutating
/// call. For provider-backed relations the explicit buffer is empty;
/// use [`Engine::relation_contains`] / [`Engine::relation_lookup`].
#[derive(Debug, Clone, Copy)]
pub struct RelationView<'a> {
    tuples: &'a [Tuple],
    arity: usize,
}

impl<'a> RelationView<'a> {
    pub fn tuples(&self) -> &'a [Tuple] {
        self.tuples
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'a, Tuple> {
        self.tuples.iter()
    }
}

/// The engine facade: predicate registry, fact storage, rule loading,
/// and fixed-point evaluation behind one handle.
///
/// All operations are non-reentrant (`&mut self`); relation views borrow
/// the engine immutably.
pub struct Engine {
    config: EngineConfig,
    symbols: Box<dyn SymbolResolver>,
    catalog: Catalog,
    rels: Vec<Relation>,
    providers: FxHashMap<PredId, Box<dyn RelationProvider>>,
    interner: FactInterner,
    /// Merged source program; re-analyzed as batches arrive
    ast: ast::Program,
    program: IrProgram,
    hook: Option<Box<IterationHook>>,
}

impl Engine {
    /// Create an engine with default configuration and its own symbol
    /// table
    pub fn new() -> Self {
        Engine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            config,
            symbols: Box::new(SymbolTable::new()),
            catalog: Catalog::new(),
            rels: Vec::new(),
            providers: FxHashMap::default(),
            interner: FactInterner::new(),
            ast: ast::Program::new(),
            program: IrProgram::default(),
            hook: None,
        }
    }

    /// Replace the default symbol table with a host-owned resolver.
    /// Must happen before any symbols are interned.
    pub fn with_symbol_resolver(mut self, resolver: Box<dyn SymbolResolver>) -> Self {
        self.symbols = resolver;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------

    /// Intern a string, returning its id
    pub fn intern_symbol(&mut self, s: &str) -> SymbolId {
        self.symbols.intern_symbol(s)
    }

    /// Resolve a symbol id back to its string
    pub fn resolve_symbol(&self, id: SymbolId) -> Option<String> {
        self.symbols.lookup_symbol(id)
    }

    /// Intern a string and wrap it as a [`Value`]
    pub fn sym(&mut self, s: &str) -> Value {
        Value::Sym(self.symbols.intern_symbol(s))
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    /// Register a predicate. Idempotent for the same (name, arity);
    /// a different arity is an error.
    pub fn register_predicate(
        &mut self,
        name: &str,
        arity: usize,
        kinds: &[ArgKind],
    ) -> Result<PredId> {
        let kinds = if kinds.is_empty() { None } else { Some(kinds) };
        let id = self.catalog.register(name, arity, kinds, true)?;
        self.ensure_relations();
        Ok(id)
    }

    pub fn predicate_id(&self, name: &str) -> Option<PredId> {
        self.catalog.id(name)
    }

    pub fn predicate_name(&self, id: PredId) -> Option<&str> {
        if id.index() < self.catalog.len() {
            Some(self.catalog.name(id))
        } else {
            None
        }
    }

    /// Iterate registered predicates in id order
    pub fn predicates(&self) -> impl Iterator<Item = (PredId, &catalog::PredicateDef)> {
        self.catalog.iter()
    }

    // ------------------------------------------------------------------
    // Facts
    // ------------------------------------------------------------------

    /// Insert a fact for an already-registered predicate. Returns the
    /// fact's stable id; inserting a duplicate returns the same id and
    /// changes nothing.
    pub fn insert_fact(&mut self, pred: PredId, values: &[Value]) -> Result<FactId> {
        if pred.index() >= self.catalog.len() {
            return Err(EngineError::UnknownPredicate(format!("#{}", pred.0)));
        }
        let def = self.catalog.def(pred);
        if def.arity != values.len() {
            return Err(EngineError::ArityMismatch {
                predicate: def.name.clone(),
                expected: def.arity,
                got: values.len(),
            });
        }
        let name = def.name.clone();
        let tuple = Tuple::new(values.to_vec());
        if let Some(provider) = self.providers.get_mut(&pred) {
            provider.add(&tuple).map_err(|e| EvalError::Provider {
                predicate: name.clone(),
                message: e.to_string(),
            })?;
        } else {
            self.rels[pred.index()].base_insert_unique(tuple.clone());
        }
        Ok(self.interner.intern(pred, &name, &tuple)?)
    }

    /// Register-if-needed and insert in one step
    pub fn insert(&mut self, name: &str, values: &[Value]) -> Result<FactId> {
        let pred = self.catalog.register(name, values.len(), None, false)?;
        self.ensure_relations();
        self.insert_fact(pred, values)
    }

    /// Inverse fact lookup; `None` for ids this engine never produced
    pub fn lookup_fact(&self, id: FactId) -> Option<&Tuple> {
        self.interner.lookup(id)
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// Parse rule text and merge it into the loaded program.
    ///
    /// The combined program is re-analyzed as a whole; on any error the
    /// engine is left unchanged apart from symbols already interned.
    pub fn load_rules(&mut self, source: &str) -> Result<()> {
        let batch = parser::parse_program(source)?;
        self.load_rules_ast(batch)
    }

    /// Merge an already-built AST batch into the loaded program
    pub fn load_rules_ast(&mut self, batch: ast::Program) -> Result<()> {
        let clear_requested = batch.directives.contains(&ast::Directive::ClearDerived);
        let mut combined = self.ast.clone();
        combined.merge(batch);

        // analyze against cloned state; commit only on success
        let mut catalog = self.catalog.clone();
        let program = ir::analyze(&combined, &mut catalog, self.symbols.as_mut())?;

        self.catalog = catalog;
        self.ast = combined;
        self.program = program;
        self.ensure_relations();
        debug!(
            rules = self.program.rules.len(),
            strata = self.program.strata.len(),
            "rules loaded"
        );
        if clear_requested {
            self.clear_derived_facts();
        }
        Ok(())
    }

    /// Decode compiled rule bytes (`RULRAST1` + deflate TLV) and merge
    pub fn load_rules_compiled(&mut self, bytes: &[u8]) -> Result<()> {
        let batch = ast::compiled::deserialize_program(bytes)?;
        self.load_rules_ast(batch)
    }

    /// The merged program as loaded so far
    pub fn loaded_program(&self) -> &ast::Program {
        &self.ast
    }

    /// Drop every loaded rule (facts are preserved), so a host can
    /// reload from scratch
    pub fn clear_rules(&mut self) {
        self.ast = ast::Program::new();
        self.program = IrProgram::default();
    }

    /// Erase all tuples of explicit IDB relations. EDB facts and
    /// provider-backed relations are preserved; hosts reset providers by
    /// installing fresh ones.
    pub fn clear_derived_facts(&mut self) {
        for idx in 0..self.catalog.len() {
            let id = PredId(idx as u32);
            if self.catalog.def(id).idb && !self.providers.contains_key(&id) {
                self.rels[idx].clear();
            }
        }
    }

    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    /// Back a predicate with a relation provider. Registers the
    /// predicate at the provider's arity if needed; tuples already in
    /// explicit storage are migrated through `add`.
    pub fn set_provider(
        &mut self,
        name: &str,
        provider: Box<dyn RelationProvider>,
    ) -> Result<PredId> {
        let pred = self.catalog.register(name, provider.arity(), None, false)?;
        self.ensure_relations();
        let mut provider = provider;
        for tuple in self.rels[pred.index()].base() {
            provider.add(tuple).map_err(|e| EvalError::Provider {
                predicate: name.to_string(),
                message: e.to_string(),
            })?;
        }
        self.rels[pred.index()].clear();
        self.providers.insert(pred, provider);
        Ok(pred)
    }

    /// Register a host-owned external tuple source for a predicate
    pub fn register_external_source(
        &mut self,
        name: &str,
        source: Box<dyn ExternalRelation>,
    ) -> Result<PredId> {
        self.set_provider(name, Box::new(ExternalProvider::new(source)))
    }

    /// The provider backing a predicate, if any
    pub fn provider(&self, pred: PredId) -> Option<&dyn RelationProvider> {
        self.providers.get(&pred).map(Box::as_ref)
    }

    // ------------------------------------------------------------------
    // Host callback
    // ------------------------------------------------------------------

    /// Install the end-of-iteration hook. It runs after every iteration
    /// of every stratum; returning true (or inserting a fact into an
    /// in-stratum predicate) forces at least one more iteration.
    pub fn set_iteration_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut HookCtx<'_>, usize) -> bool + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    pub fn clear_iteration_hook(&mut self) {
        self.hook = None;
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Run the per-stratum fixed-point loop.
    ///
    /// All-or-nothing with respect to explicit relation state: on
    /// failure, partially derived tuples are discarded and `base`
    /// buffers are restored to their pre-call contents. Provider-backed
    /// state cannot be unwound (contexts may be shared across
    /// predicates).
    pub fn evaluate(&mut self) -> Result<EvalStats> {
        self.evaluate_inner(None)
    }

    /// [`Engine::evaluate`] with cooperative cancellation
    pub fn evaluate_with_cancel(&mut self, cancel: CancelHandle) -> Result<EvalStats> {
        self.evaluate_inner(Some(cancel))
    }

    fn evaluate_inner(&mut self, cancel: Option<CancelHandle>) -> Result<EvalStats> {
        let marks: Vec<usize> = self.rels.iter().map(Relation::len).collect();
        let mut hook = self.hook.take();
        let result = EvalCx {
            catalog: &self.catalog,
            rels: &mut self.rels,
            providers: &mut self.providers,
            interner: &mut self.interner,
            symbols: self.symbols.as_mut(),
            program: &self.program,
            config: &self.config,
            cancel,
            hook: hook.as_deref_mut(),
        }
        .run();
        self.hook = hook;

        match result {
            Ok(stats) => {
                for rel in &mut self.rels {
                    rel.discard_pending();
                }
                debug!(
                    derived = stats.tuples_derived,
                    join_steps = stats.join_steps,
                    "evaluation complete"
                );
                Ok(stats)
            }
            Err(err) => {
                for (rel, &mark) in self.rels.iter_mut().zip(&marks) {
                    rel.rollback_to(mark);
                }
                Err(err.into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Borrowed snapshot of a predicate's materialized tuples
    pub fn relation_view(&self, pred: PredId) -> Result<RelationView<'_>> {
        if pred.index() >= self.catalog.len() {
            return Err(EngineError::UnknownPredicate(format!("#{}", pred.0)));
        }
        let rel = &self.rels[pred.index()];
        Ok(RelationView {
            tuples: rel.base(),
            arity: rel.arity(),
        })
    }

    /// Number of materialized tuples. For provider-backed relations
    /// this enumerates the provider, which may be expensive.
    pub fn relation_len(&self, pred: PredId) -> usize {
        if pred.index() >= self.catalog.len() {
            return 0;
        }
        match self.providers.get(&pred) {
            Some(provider) => provider.iter_all().map_or(0, |iter| iter.count()),
            None => self.rels[pred.index()].len(),
        }
    }

    /// Membership test routed through the provider when one is set
    pub fn relation_contains(&self, pred: PredId, values: &[Value]) -> bool {
        if pred.index() >= self.catalog.len() {
            return false;
        }
        let tuple = Tuple::new(values.to_vec());
        match self.providers.get(&pred) {
            Some(provider) => provider.contains(&tuple),
            None => self.rels[pred.index()].contains(&tuple),
        }
    }

    /// Tuples whose position `pos` equals `key`, in deterministic order
    pub fn relation_lookup(&self, pred: PredId, key: &Value, pos: usize) -> Vec<Tuple> {
        if pred.index() >= self.catalog.len() {
            return Vec::new();
        }
        if let Some(provider) = self.providers.get(&pred) {
            if let Some(iter) = provider.lookup(key, pos) {
                return iter.collect();
            }
            return provider
                .iter_all()
                .map(|iter| iter.filter(|t| t.get(pos) == Some(key)).collect())
                .unwrap_or_default();
        }
        let rel = &self.rels[pred.index()];
        if let Some(rows) = rel.index_lookup(pos, key) {
            return rows.iter().map(|&i| rel.row(i).clone()).collect();
        }
        rel.base()
            .iter()
            .filter(|t| t.get(pos) == Some(key))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------

    /// Grow the relation vector to match the catalog
    fn ensure_relations(&mut self) {
        while self.rels.len() < self.catalog.len() {
            let id = PredId(self.rels.len() as u32);
            let arity = self.catalog.def(id).arity;
            self.rels
                .push(Relation::with_capacity(arity, self.config.initial_capacity));
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
