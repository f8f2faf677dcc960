//! End-to-end engine tests: fixed-point evaluation, stratified
//! negation, semi-naive behavior, the host iteration hook, and the
//! facade's boundary behaviors.

use rulrast::{
    ArgKind, CancelHandle, Engine, EngineConfig, EngineError, EvalError, Tuple, Value,
};
use std::cell::Cell;
use std::rc::Rc;

fn pairs(engine: &Engine, name: &str) -> Vec<(String, String)> {
    let pred = engine.predicate_id(name).unwrap();
    engine
        .relation_view(pred)
        .unwrap()
        .iter()
        .map(|t| {
            let sym = |v: &Value| match v {
                Value::Sym(s) => engine.resolve_symbol(*s).unwrap(),
                other => panic!("expected symbol, got {other:?}"),
            };
            (sym(&t.values()[0]), sym(&t.values()[1]))
        })
        .collect()
}

// ============================================================================
// Seed scenarios
// ============================================================================

#[test]
fn test_transitive_closure() {
    let mut engine = Engine::new();
    engine
        .load_rules(
            r#"
            edge("a", "b"). edge("b", "c"). edge("c", "d").
            path(X, Y) :- edge(X, Y).
            path(X, Z) :- edge(X, Y), path(Y, Z).
            "#,
        )
        .unwrap();
    engine.evaluate().unwrap();

    let mut path = pairs(&engine, "path");
    path.sort();
    let expected = vec![
        ("a", "b"),
        ("a", "c"),
        ("a", "d"),
        ("b", "c"),
        ("b", "d"),
        ("c", "d"),
    ];
    let expected: Vec<(String, String)> = expected
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    assert_eq!(path, expected);
}

#[test]
fn test_stratified_negation() {
    let mut engine = Engine::new();
    engine
        .load_rules(
            r#"
            node("x"). node("y"). live("x").
            dead(N) :- node(N), not live(N).
            "#,
        )
        .unwrap();
    engine.evaluate().unwrap();

    let dead = engine.predicate_id("dead").unwrap();
    let tuples: Vec<Tuple> = engine.relation_view(dead).unwrap().tuples().to_vec();
    assert_eq!(tuples.len(), 1);
    let y = tuples[0].values()[0];
    match y {
        Value::Sym(s) => assert_eq!(engine.resolve_symbol(s).unwrap(), "y"),
        other => panic!("expected symbol, got {other:?}"),
    }
    assert!(engine.relation_contains(dead, &[y]));
}

#[test]
fn test_semi_naive_chain_closure() {
    // linear chain, single-step rule: |path| = n(n+1)/2 and the
    // recursive stratum stabilizes in about n iterations
    let n = 1000usize;
    let mut engine = Engine::new();
    let nodes: Vec<Value> = (0..=n).map(|i| engine.sym(&format!("n{i}"))).collect();
    for window in nodes.windows(2) {
        engine.insert("edge", &[window[0], window[1]]).unwrap();
    }
    engine
        .load_rules("path(X, Y) :- edge(X, Y). path(X, Z) :- edge(X, Y), path(Y, Z).")
        .unwrap();
    let stats = engine.evaluate().unwrap();

    let path = engine.predicate_id("path").unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), n * (n + 1) / 2);
    assert_eq!(stats.iterations.len(), 1);
    assert!(
        stats.iterations[0] <= n + 2,
        "expected at most {} iterations, ran {}",
        n + 2,
        stats.iterations[0]
    );
}

#[test]
fn test_doubling_rule_converges_logarithmically() {
    let n = 64usize;
    let mut engine = Engine::new();
    let nodes: Vec<Value> = (0..=n).map(|i| engine.sym(&format!("n{i}"))).collect();
    for window in nodes.windows(2) {
        engine.insert("path", &[window[0], window[1]]).unwrap();
    }
    engine
        .load_rules("path(X, Z) :- path(X, Y), path(Y, Z).")
        .unwrap();
    let stats = engine.evaluate().unwrap();

    let path = engine.predicate_id("path").unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), n * (n + 1) / 2);
    // doubling: the longest chain closes in ~log2(n) rounds
    assert!(
        stats.iterations[0] <= 10,
        "expected logarithmic convergence, ran {}",
        stats.iterations[0]
    );
}

#[test]
fn test_host_callback_injects_facts() {
    // the hook grows the edge chain by one fact per iteration, five
    // times; the final path relation reflects all of them
    let mut engine = Engine::new();
    let a = engine.sym("e0");
    let b = engine.sym("e1");
    engine.insert("edge", &[a, b]).unwrap();
    engine
        .load_rules("path(X, Y) :- edge(X, Y). path(X, Z) :- edge(X, Y), path(Y, Z).")
        .unwrap();

    let inserted = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&inserted);
    engine.set_iteration_hook(move |ctx, _stratum| {
        let i = counter.get();
        if i >= 5 {
            return false;
        }
        counter.set(i + 1);
        let from = ctx.intern_symbol(&format!("e{}", i + 1));
        let to = ctx.intern_symbol(&format!("e{}", i + 2));
        let edge = ctx.predicate_id("edge").unwrap();
        ctx.insert_fact(edge, &[Value::Sym(from), Value::Sym(to)])
            .unwrap();
        false
    });
    engine.evaluate().unwrap();

    assert_eq!(inserted.get(), 5);
    // chain e0..e6: 6 edges, 21 paths
    let path = engine.predicate_id("path").unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), 21);
}

#[test]
fn test_hook_changed_flag_forces_iterations() {
    let mut engine = Engine::new();
    engine.load_rules("p(1).").unwrap();
    let calls = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&calls);
    engine.set_iteration_hook(move |_ctx, _stratum| {
        let i = counter.get();
        counter.set(i + 1);
        i < 3
    });
    let stats = engine.evaluate().unwrap();
    // three forced extra rounds beyond the two natural ones
    assert!(calls.get() >= 4);
    assert!(stats.iterations[0] >= 4);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn test_nullary_predicates() {
    let mut engine = Engine::new();
    engine
        .load_rules(
            r#"
            init().
            ready() :- init().
            quiet() :- not noisy(), init().
            "#,
        )
        .unwrap();
    engine.evaluate().unwrap();

    let ready = engine.predicate_id("ready").unwrap();
    let quiet = engine.predicate_id("quiet").unwrap();
    let noisy = engine.predicate_id("noisy").unwrap();
    assert_eq!(engine.relation_view(ready).unwrap().len(), 1);
    assert!(engine.relation_contains(ready, &[]));
    assert!(engine.relation_contains(quiet, &[]));
    assert!(!engine.relation_contains(noisy, &[]));
}

#[test]
fn test_clear_derived_then_reevaluate_is_idempotent() {
    let mut engine = Engine::new();
    let a = engine.sym("a");
    let b = engine.sym("b");
    let c = engine.sym("c");
    engine.insert("edge", &[a, b]).unwrap();
    engine.insert("edge", &[b, c]).unwrap();
    engine
        .load_rules("path(X, Y) :- edge(X, Y). path(X, Z) :- edge(X, Y), path(Y, Z).")
        .unwrap();
    engine.evaluate().unwrap();

    let edge = engine.predicate_id("edge").unwrap();
    let path = engine.predicate_id("path").unwrap();
    let first: Vec<Tuple> = engine.relation_view(path).unwrap().tuples().to_vec();
    assert_eq!(first.len(), 3);

    engine.clear_derived_facts();
    // EDB facts survive, derived tuples are gone
    assert_eq!(engine.relation_view(edge).unwrap().len(), 2);
    assert_eq!(engine.relation_view(path).unwrap().len(), 0);

    engine.evaluate().unwrap();
    let second: Vec<Tuple> = engine.relation_view(path).unwrap().tuples().to_vec();
    assert_eq!(first, second);
}

#[test]
fn test_file_facts_rederive_after_clear() {
    let mut engine = Engine::new();
    engine
        .load_rules("edge(\"a\", \"b\").\npath(X, Y) :- edge(X, Y).")
        .unwrap();
    engine.evaluate().unwrap();
    let edge = engine.predicate_id("edge").unwrap();
    assert_eq!(engine.relation_view(edge).unwrap().len(), 1);

    // facts stated in rule text are re-derived on the next evaluate
    engine.clear_derived_facts();
    assert_eq!(engine.relation_view(edge).unwrap().len(), 0);
    engine.evaluate().unwrap();
    assert_eq!(engine.relation_view(edge).unwrap().len(), 1);
    assert_eq!(pairs(&engine, "path").len(), 1);
}

#[test]
fn test_reevaluation_without_clear_is_stable() {
    let mut engine = Engine::new();
    let a = engine.sym("a");
    let b = engine.sym("b");
    engine.insert("edge", &[a, b]).unwrap();
    engine.load_rules("path(X, Y) :- edge(X, Y).").unwrap();
    engine.evaluate().unwrap();
    engine.evaluate().unwrap();
    assert_eq!(pairs(&engine, "path").len(), 1);
}

// ============================================================================
// Comparisons and builtins
// ============================================================================

#[test]
fn test_comparison_filters() {
    let mut engine = Engine::new();
    for i in 0..10i64 {
        engine.insert("num", &[Value::Int(i)]).unwrap();
    }
    engine
        .load_rules(
            "small(X) :- num(X), X < 3.\n\
             edgey(X) :- num(X), X >= 8.\n\
             mid(X) :- num(X), X != 0, X <= 2.",
        )
        .unwrap();
    engine.evaluate().unwrap();

    let count = |name: &str| {
        engine
            .relation_view(engine.predicate_id(name).unwrap())
            .unwrap()
            .len()
    };
    assert_eq!(count("small"), 3);
    assert_eq!(count("edgey"), 2);
    assert_eq!(count("mid"), 2);
}

#[test]
fn test_string_builtins() {
    let mut engine = Engine::new();
    for name in ["ada", "adele", "bea", "ade"] {
        let v = engine.sym(name);
        engine.insert("name", &[v]).unwrap();
    }
    engine
        .load_rules(
            r#"
            a_names(S) :- name(S), starts_with("ad", S).
            e_names(S) :- name(S), ends_with("e", S).
            has_de(S) :- name(S), contains("de", S).
            re_names(S) :- name(S), match("^a.*a$", S).
            "#,
        )
        .unwrap();
    engine.evaluate().unwrap();

    let count = |name: &str| {
        engine
            .relation_view(engine.predicate_id(name).unwrap())
            .unwrap()
            .len()
    };
    assert_eq!(count("a_names"), 3); // ada, adele, ade
    assert_eq!(count("e_names"), 2); // adele, ade
    assert_eq!(count("has_de"), 2); // adele, ade
    assert_eq!(count("re_names"), 1); // ada
}

#[test]
fn test_bad_regex_fails_evaluation() {
    let mut engine = Engine::new();
    let v = engine.sym("x");
    engine.insert("name", &[v]).unwrap();
    engine
        .load_rules(r#"bad(S) :- name(S), match("([", S)."#)
        .unwrap();
    let err = engine.evaluate().unwrap_err();
    assert!(matches!(err, EngineError::Eval(EvalError::Regex { .. })));
    // failed evaluation leaves no partial derivations
    let bad = engine.predicate_id("bad").unwrap();
    assert_eq!(engine.relation_view(bad).unwrap().len(), 0);
}

// ============================================================================
// Cancellation, caps, determinism
// ============================================================================

#[test]
fn test_cancellation_rolls_back() {
    let mut engine = Engine::new();
    let a = engine.sym("a");
    let b = engine.sym("b");
    engine.insert("edge", &[a, b]).unwrap();
    engine.load_rules("path(X, Y) :- edge(X, Y).").unwrap();

    let handle = CancelHandle::new();
    handle.cancel();
    let err = engine.evaluate_with_cancel(handle).unwrap_err();
    assert!(matches!(err, EngineError::Eval(EvalError::Cancelled)));

    let edge = engine.predicate_id("edge").unwrap();
    let path = engine.predicate_id("path").unwrap();
    assert_eq!(engine.relation_view(edge).unwrap().len(), 1);
    assert_eq!(engine.relation_view(path).unwrap().len(), 0);

    // the engine stays usable
    engine.evaluate().unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), 1);
}

#[test]
fn test_iteration_cap_fails_loudly() {
    let config = EngineConfig {
        max_iterations: 3,
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_config(config);
    let nodes: Vec<Value> = (0..10).map(|i| engine.sym(&format!("n{i}"))).collect();
    for window in nodes.windows(2) {
        engine.insert("edge", &[window[0], window[1]]).unwrap();
    }
    engine
        .load_rules("path(X, Y) :- edge(X, Y). path(X, Z) :- edge(X, Y), path(Y, Z).")
        .unwrap();
    let err = engine.evaluate().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Eval(EvalError::IterationCapExceeded { cap: 3, .. })
    ));
    // rollback leaves base as before the call
    let path = engine.predicate_id("path").unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), 0);
}

#[test]
fn test_determinism_across_runs() {
    let build = || {
        let mut engine = Engine::new();
        engine
            .load_rules(
                r#"
                edge("a", "b"). edge("b", "c"). edge("a", "c"). edge("c", "d").
                path(X, Y) :- edge(X, Y).
                path(X, Z) :- edge(X, Y), path(Y, Z).
                dead(N) :- vertex(N), not path("a", N).
                vertex("a"). vertex("d"). vertex("z").
                "#,
            )
            .unwrap();
        engine.evaluate().unwrap();
        let path = engine.predicate_id("path").unwrap();
        let dead = engine.predicate_id("dead").unwrap();
        (
            engine.relation_view(path).unwrap().tuples().to_vec(),
            engine.relation_view(dead).unwrap().tuples().to_vec(),
        )
    };
    let (path_a, dead_a) = build();
    let (path_b, dead_b) = build();
    // identical contents in identical order, not just as sets
    assert_eq!(path_a, path_b);
    assert_eq!(dead_a, dead_b);
}

// ============================================================================
// Facade behaviors
// ============================================================================

#[test]
fn test_fact_ids_are_stable_and_invertible() {
    let mut engine = Engine::new();
    let a = engine.sym("a");
    let b = engine.sym("b");
    let edge = engine
        .register_predicate("edge", 2, &[ArgKind::Sym, ArgKind::Sym])
        .unwrap();
    let id = engine.insert_fact(edge, &[a, b]).unwrap();
    assert_eq!(id.pred(), edge);
    assert_eq!(id.local_index(), 0);
    assert_eq!(engine.lookup_fact(id).unwrap().values(), &[a, b]);

    engine.clear_derived_facts();
    // intern table survives clears
    assert_eq!(engine.lookup_fact(id).unwrap().values(), &[a, b]);
}

#[test]
fn test_nested_fact_values() {
    let mut engine = Engine::new();
    let a = engine.sym("a");
    let b = engine.sym("b");
    let edge_fact = engine.insert("edge", &[a, b]).unwrap();
    // a fact id used as a value in another relation
    engine
        .insert("observed", &[Value::Fact(edge_fact), Value::Int(42)])
        .unwrap();
    let observed = engine.predicate_id("observed").unwrap();
    assert!(engine.relation_contains(observed, &[Value::Fact(edge_fact), Value::Int(42)]));
}

#[test]
fn test_load_rules_error_preserves_facts() {
    let mut engine = Engine::new();
    let a = engine.sym("a");
    engine.insert("node", &[a]).unwrap();
    let err = engine.load_rules("p(X) :- node(X), not p(X).").unwrap_err();
    assert!(matches!(err, EngineError::Analysis(_)));
    let node = engine.predicate_id("node").unwrap();
    assert_eq!(engine.relation_view(node).unwrap().len(), 1);
    // and no rules were kept
    assert!(engine.loaded_program().rules.is_empty());
}

#[test]
fn test_clear_derived_directive_applies_at_load() {
    let mut engine = Engine::new();
    engine
        .load_rules("edge(\"a\", \"b\").\npath(X, Y) :- edge(X, Y).")
        .unwrap();
    engine.evaluate().unwrap();
    let path = engine.predicate_id("path").unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), 1);

    engine.load_rules(".clear_derived()").unwrap();
    assert_eq!(engine.relation_view(path).unwrap().len(), 0);
}

#[test]
fn test_compiled_rules_load() {
    let source = r#"
        edge("a", "b"). edge("b", "c").
        path(X, Y) :- edge(X, Y).
        path(X, Z) :- edge(X, Y), path(Y, Z).
    "#;
    let program = rulrast::parser::parse_program(source).unwrap();
    let bytes = rulrast::ast::compiled::serialize_program(&program);

    let mut engine = Engine::new();
    engine.load_rules_compiled(&bytes).unwrap();
    engine.evaluate().unwrap();
    assert_eq!(pairs(&engine, "path").len(), 3);
}

#[test]
fn test_rule_batches_merge() {
    let mut engine = Engine::new();
    engine.load_rules("edge(\"a\", \"b\"). edge(\"b\", \"c\").").unwrap();
    engine.load_rules("path(X, Y) :- edge(X, Y).").unwrap();
    engine
        .load_rules("path(X, Z) :- edge(X, Y), path(Y, Z).")
        .unwrap();
    engine.evaluate().unwrap();
    assert_eq!(pairs(&engine, "path").len(), 3);

    engine.clear_rules();
    engine.clear_derived_facts();
    engine.load_rules("edge(\"x\", \"y\").").unwrap();
    engine.evaluate().unwrap();
    assert_eq!(pairs(&engine, "edge"), vec![("x".to_string(), "y".to_string())]);
}
