#![forbid(unsafe_code)]

mod builtins;
mod deparse;
mod env;
mod eval;
mod parse;

use std::fmt;
use std::sync::Arc;

use fpl_types::Scalar;
use serde::{Deserialize, Serialize};

pub use builtins::{BuiltinFn, MAX_RANGE_LEN};
pub use deparse::{binary_precedence, is_syntactic_name};
pub use env::Environment;
pub use eval::{EvalError, MAX_EVAL_DEPTH, apply, eval};
pub use parse::{ParseError, parse_args, parse_expr};

/// Expression tree shared by the local evaluator and the remote classifier.
///
/// Operators are ordinary calls on symbol heads: `a + b` is
/// `Call { func: Symbol("+"), args: [a, b] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Value,
    },
    Symbol {
        name: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    #[serde(skip)]
    Quoted(Quosure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Expr,
}

impl Arg {
    #[must_use]
    pub fn positional(value: Expr) -> Self {
        Self { name: None, value }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, value: Expr) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

impl Expr {
    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol { name: name.into() }
    }

    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Call with a symbol head and positional arguments only.
    #[must_use]
    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call {
            func: Box::new(Self::symbol(func)),
            args: args.into_iter().map(Arg::positional).collect(),
        }
    }

    #[must_use]
    pub fn call_with(func: Expr, args: Vec<Arg>) -> Self {
        Self::Call {
            func: Box::new(func),
            args,
        }
    }

    #[must_use]
    pub fn quoted(expr: Expr, env: Arc<Environment>) -> Self {
        Self::Quoted(Quosure::new(expr, env))
    }

    #[must_use]
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol { name } => Some(name),
            _ => None,
        }
    }

    /// Head and arguments when this node is a call.
    #[must_use]
    pub fn as_call(&self) -> Option<(&Expr, &[Arg])> {
        match self {
            Self::Call { func, args } => Some((func, args)),
            _ => None,
        }
    }

    /// True when this is a call whose head is the symbol `name`.
    #[must_use]
    pub fn is_call_to(&self, name: &str) -> bool {
        self.as_call()
            .is_some_and(|(func, _)| func.as_symbol() == Some(name))
    }

    /// Short name of the node kind, used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Literal { value } => value.kind_name(),
            Self::Symbol { .. } => "symbol",
            Self::Call { .. } => "call",
            Self::Quoted(_) => "quosure",
        }
    }

    /// Replace every argument-position occurrence of the given symbols.
    ///
    /// Call heads are left alone, and nested lambdas and formulas are not
    /// entered since they bind their own placeholders.
    #[must_use]
    pub fn replace_symbols(&self, names: &[&str], replacement: &Expr) -> Expr {
        match self {
            Self::Symbol { name } if names.contains(&name.as_str()) => replacement.clone(),
            Self::Call { func, .. }
                if matches!(func.as_symbol(), Some("~" | "function")) =>
            {
                self.clone()
            }
            Self::Call { func, args } => Self::Call {
                func: func.clone(),
                args: args
                    .iter()
                    .map(|arg| Arg {
                        name: arg.name.clone(),
                        value: arg.value.replace_symbols(names, replacement),
                    })
                    .collect(),
            },
            Self::Quoted(quosure) => Self::Quoted(Quosure {
                expr: Box::new(quosure.expr.replace_symbols(names, replacement)),
                env: Arc::clone(&quosure.env),
            }),
            other => other.clone(),
        }
    }
}

/// An expression paired with the environment it must be resolved in.
#[derive(Debug, Clone)]
pub struct Quosure {
    expr: Box<Expr>,
    env: Arc<Environment>,
}

impl Quosure {
    #[must_use]
    pub fn new(expr: Expr, env: Arc<Environment>) -> Self {
        Self {
            expr: Box::new(expr),
            env,
        }
    }

    /// Parse `input` and capture it together with `env`.
    pub fn parse(input: &str, env: &Arc<Environment>) -> Result<Self, ParseError> {
        Ok(Self::new(parse_expr(input)?, Arc::clone(env)))
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    #[must_use]
    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }
}

impl PartialEq for Quosure {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr && Arc::ptr_eq(&self.env, &other.env)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Scalar(Scalar),
    Vector(Vec<Scalar>),
    #[serde(skip)]
    Function(Function),
}

impl Value {
    /// Build a value from evaluated elements; a single element stays a scalar.
    #[must_use]
    pub fn from_scalars(mut values: Vec<Scalar>) -> Self {
        if values.len() == 1 {
            if let Some(only) = values.pop() {
                return Self::Scalar(only);
            }
        }
        Self::Vector(values)
    }

    #[must_use]
    pub fn strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Vector(
            values
                .into_iter()
                .map(|value| Scalar::Utf8(value.into()))
                .collect(),
        )
    }

    /// Elements of an atomic value; `NULL` has none.
    #[must_use]
    pub fn elements(&self) -> Option<&[Scalar]> {
        match self {
            Self::Null => Some(&[]),
            Self::Scalar(value) => Some(std::slice::from_ref(value)),
            Self::Vector(values) => Some(values),
            Self::Function(_) => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// The single string this value holds, if it is exactly one string.
    #[must_use]
    pub fn as_single_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Utf8(value)) => Some(value),
            Self::Vector(values) if values.len() == 1 => values[0].as_str(),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Scalar(_) | Self::Vector(_) => "atomic vector",
            Self::Function(_) => "function",
        }
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<Scalar>> for Value {
    fn from(values: Vec<Scalar>) -> Self {
        Self::Vector(values)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Self::Function(value)
    }
}

/// A function value living on the host side.
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Builtin(Builtin),
    Closure(Closure),
    /// A one-sided formula that `across()` applies per column: the column
    /// argument at `column_arg` is spliced in for `.x` / `.`.
    ColumnFormula(ColumnFormula),
}

impl Function {
    /// Name used in deparsed output and diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Builtin(builtin) => builtin.name().to_owned(),
            Self::Closure(closure) => format!("\\({}) {}", closure.params.join(", "), closure.body),
            Self::ColumnFormula(formula) => format!("~{}", formula.body),
        }
    }
}

/// Natively implemented function, tagged with the name it was registered under.
#[derive(Clone)]
pub struct Builtin {
    name: String,
    imp: BuiltinFn,
}

impl Builtin {
    #[must_use]
    pub fn new(name: impl Into<String>, imp: BuiltinFn) -> Self {
        Self {
            name: name.into(),
            imp,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.imp)(args)
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Box<Expr>,
    pub env: Arc<Environment>,
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.body == other.body && Arc::ptr_eq(&self.env, &other.env)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnFormula {
    pub body: Box<Expr>,
    pub env: Arc<Environment>,
    pub column_arg: usize,
}

impl ColumnFormula {
    /// Placeholder symbols substituted with the column.
    pub const PLACEHOLDERS: [&'static str; 2] = [".x", "."];

    /// Body with the placeholders replaced by `column`.
    #[must_use]
    pub fn instantiate(&self, column: &Expr) -> Expr {
        self.body.replace_symbols(&Self::PLACEHOLDERS, column)
    }
}

impl PartialEq for ColumnFormula {
    fn eq(&self, other: &Self) -> bool {
        self.column_arg == other.column_arg
            && self.body == other.body
            && Arc::ptr_eq(&self.env, &other.env)
    }
}

#[cfg(test)]
mod tests {
    use fpl_types::Scalar;

    use super::{Arg, Environment, Expr, Value, parse_expr};

    #[test]
    fn expr_serializes_with_kind_tags() {
        let expr = Expr::call(">", vec![Expr::symbol("year"), Expr::literal(1980_i64)]);
        let json = serde_json::to_string(&expr).expect("serialize");
        assert!(json.starts_with(r#"{"kind":"call""#));
        let back: Expr = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, expr);
    }

    #[test]
    fn replace_symbols_skips_call_heads_and_nested_formulas() {
        let expr = parse_expr("f(.x, g(.), ~ .x)").expect("parse");
        let out = expr.replace_symbols(&[".x", "."], &Expr::symbol("col"));
        assert_eq!(out.to_string(), "f(col, g(col), ~.x)");
    }

    #[test]
    fn from_scalars_collapses_single_element() {
        assert_eq!(
            Value::from_scalars(vec![Scalar::Int64(1)]),
            Value::Scalar(Scalar::Int64(1))
        );
        assert_eq!(Value::from_scalars(Vec::new()), Value::Vector(Vec::new()));
    }

    #[test]
    fn quosure_equality_is_environment_identity() {
        let env = Environment::global().into_shared();
        let other = Environment::global().into_shared();
        let a = Expr::quoted(Expr::symbol("x"), env.clone());
        assert_eq!(a, Expr::quoted(Expr::symbol("x"), env));
        assert_ne!(a, Expr::quoted(Expr::symbol("x"), other));
    }

    #[test]
    fn is_call_to_matches_symbol_heads_only() {
        let expr = Expr::call_with(
            Expr::symbol("local"),
            vec![Arg::positional(Expr::symbol("x"))],
        );
        assert!(expr.is_call_to("local"));
        assert!(!expr.is_call_to("remote"));
        assert!(!Expr::symbol("local").is_call_to("local"));
    }
}
