#![forbid(unsafe_code)]

//! Decide, for each part of a dplyr-style expression, whether it refers to a
//! column of a remote table or to a value in the caller's scope.
//!
//! ```
//! use frankenplyr::{ColumnIndex, Environment, classify, parse_expr};
//!
//! let columns = ColumnIndex::new(["year", "id"]).unwrap();
//! let env = Environment::global().bind("year", 1980_i64).into_shared();
//! let expr = parse_expr("year > local(year)").unwrap();
//! let out = classify(&expr, &columns, &env).unwrap();
//! assert_eq!(out.to_string(), "year > 1980");
//! ```

use std::sync::Arc;

pub use fpl_expr::{
    Arg, Builtin, Closure, ColumnFormula, Environment, EvalError, Expr, Function, ParseError,
    Quosure, Value, eval, parse_args, parse_expr,
};
pub use fpl_partial::{
    BatchEntry, Classified, Classifier, ClassifyError, ColumnSelector, FunctionRegistry,
    SelectError, TidySelect,
};
pub use fpl_remote::{
    AnsiQuoter, BacktickQuoter, CatalogRef, ColumnIndex, IdentQuoter, RemoteDataset, RemoteError,
    RemoteTable, SchemaRef, TableRef,
};
pub use fpl_runtime::{ClassifyPolicy, FallbackKind, FallbackLedger, FallbackRecord, PolicyError};
pub use fpl_types::{DType, NullKind, Scalar, TypeError};

/// Classify one expression with the default policy and registry.
pub fn classify(
    expr: &Expr,
    dataset: &dyn RemoteDataset,
    env: &Arc<Environment>,
) -> Result<Expr, ClassifyError> {
    let policy = ClassifyPolicy::default();
    let registry = FunctionRegistry::default();
    Classifier::new(dataset, &policy, &registry).classify_expr(expr, env)
}

/// Classify verb arguments with the default policy; unnamed entries are
/// named after their deparsed expression.
pub fn classify_batch(
    entries: &[BatchEntry],
    dataset: &dyn RemoteDataset,
) -> Result<Vec<(String, Expr)>, ClassifyError> {
    let policy = ClassifyPolicy::default();
    let registry = FunctionRegistry::default();
    Classifier::new(dataset, &policy, &registry).classify_batch(entries, policy.default_naming)
}
