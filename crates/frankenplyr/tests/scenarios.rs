use std::sync::Arc;

use frankenplyr::{
    AnsiQuoter, BatchEntry, ClassifyError, ClassifyPolicy, Classifier, Environment, Expr,
    FallbackKind, FunctionRegistry, Quosure, RemoteTable, TableRef, Value, classify,
    classify_batch, parse_expr,
};

fn flights() -> RemoteTable {
    RemoteTable::with_columns(
        TableRef::in_schema("analytics", "flights").expect("table ref"),
        ["year", "id", "c1", "c2"],
    )
    .expect("table")
}

fn env() -> Arc<Environment> {
    Environment::global().bind("year", 1980_i64).into_shared()
}

fn parsed(input: &str) -> Expr {
    parse_expr(input).expect("parse")
}

fn run(input: &str) -> Result<Expr, ClassifyError> {
    classify(&parsed(input), &flights(), &env())
}

#[test]
fn remote_column_shadows_local_binding() {
    assert_eq!(run("year > 1980").expect("classify"), parsed("year > 1980"));
    assert_eq!(run("year").expect("classify"), Expr::symbol("year"));
}

#[test]
fn literal_vector_passes_through() {
    let expr = Expr::call(
        "%in%",
        vec![Expr::symbol("id"), Expr::literal(Value::strings(["a", "b"]))],
    );
    assert_eq!(classify(&expr, &flights(), &env()).expect("classify"), expr);
}

#[test]
fn constant_call_keeps_its_shape() {
    let out = run("id %in% c(\"a\", \"b\")").expect("classify");
    assert_eq!(out.to_string(), "id %in% c(\"a\", \"b\")");
    assert_eq!(
        out,
        Expr::call(
            "%in%",
            vec![
                Expr::symbol("id"),
                Expr::call(
                    "c",
                    vec![Expr::literal("a"), Expr::literal("b")]
                ),
            ]
        )
    );
}

#[test]
fn local_override_reads_the_caller_scope() {
    assert_eq!(run("year > local(year)").expect("classify"), parsed("year > 1980"));
}

#[test]
fn pronouns_pick_their_side() {
    assert_eq!(run(".data$id").expect("classify"), Expr::symbol("id"));
    assert_eq!(run(".env$year").expect("classify"), Expr::literal(1980_i64));
}

#[test]
fn unknown_symbols_fail() {
    assert!(matches!(
        run("month == 1"),
        Err(ClassifyError::UnresolvedSymbol { name }) if name == "month"
    ));
}

#[test]
fn batch_splices_across_between_named_entries() {
    let env = env();
    let entries = vec![
        BatchEntry::named("a", Quosure::parse("year", &env).expect("parse")),
        BatchEntry::unnamed(Quosure::parse("across(c(c1, c2), f)", &env).expect("parse")),
    ];
    let out = classify_batch(&entries, &flights()).expect("batch");
    assert_eq!(
        out,
        vec![
            ("a".to_owned(), Expr::symbol("year")),
            ("c1_f".to_owned(), parsed("f(c1)")),
            ("c2_f".to_owned(), parsed("f(c2)")),
        ]
    );
}

#[test]
fn batch_rejects_named_fan_out() {
    let env = env();
    let entries = BatchEntry::parse_all("z = across(c(c1, c2), f)", &env).expect("parse");
    assert!(matches!(
        classify_batch(&entries, &flights()),
        Err(ClassifyError::NamedFanOut { name }) if name == "z"
    ));
}

#[test]
fn entries_keep_their_own_environments() {
    let outer = env();
    let inner = Environment::with_parent(Arc::clone(&outer))
        .bind("threshold", 3_i64)
        .into_shared();
    let entries = vec![
        BatchEntry::named("a", Quosure::parse("c1 > threshold", &inner).expect("parse")),
        BatchEntry::unnamed(Quosure::parse("c2 + year", &outer).expect("parse")),
    ];
    let out = classify_batch(&entries, &flights()).expect("batch");
    assert_eq!(out[0].1, parsed("c1 > 3"));
    assert_eq!(out[1], ("c2 + year".to_owned(), parsed("c2 + year")));

    let escaped = vec![BatchEntry::unnamed(
        Quosure::parse("c1 > threshold", &outer).expect("parse"),
    )];
    let err = classify_batch(&escaped, &flights()).expect_err("threshold is not visible");
    assert!(matches!(
        err.root_cause(),
        ClassifyError::UnresolvedSymbol { name } if name == "threshold"
    ));
}

#[test]
fn custom_policy_and_registry_control_fallbacks() {
    let table = flights();
    let policy = ClassifyPolicy::new().with_namespaces(["dplyr"]);
    let registry = FunctionRegistry::default();
    let env = Environment::global()
        .bind("scale", Value::from(2.5))
        .into_shared();
    let mut classifier = Classifier::new(&table, &policy, &registry);

    let out = classifier
        .classify_expr(&parsed("c1 * base::round(scale)"), &env)
        .expect("classify");
    assert_eq!(out, Expr::call("*", vec![Expr::symbol("c1"), Expr::literal(2.0)]));

    let ledger = classifier.into_ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.records()[0].kind, FallbackKind::CompoundHead);
    assert_eq!(ledger.records()[0].subject, "base::round(scale)");
}

#[test]
fn table_reference_renders_quoted() {
    assert_eq!(
        flights().table().render(&AnsiQuoter),
        "\"analytics\".\"flights\""
    );
}
