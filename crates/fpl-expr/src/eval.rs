use std::sync::Arc;

use fpl_types::TypeError;
use thiserror::Error;

use crate::{Arg, Closure, ColumnFormula, Environment, Expr, Function, Value};

/// Deepest call nesting the local evaluator will follow.
pub const MAX_EVAL_DEPTH: usize = 512;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("object `{0}` not found")]
    UnboundVariable(String),
    #[error("could not find function `{0}`")]
    UnknownFunction(String),
    #[error("attempt to apply non-function `{0}`")]
    NotAFunction(String),
    #[error("`{function}` expects {expected} argument(s) but got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },
    #[error("`{function}`: {reason}")]
    InvalidArgument { function: String, reason: String },
    #[error("`{0}()` is only available inside a remote expression")]
    RemoteOnly(String),
    #[error("the `.data` pronoun cannot be evaluated locally (field `{0}`)")]
    DataPronoun(String),
    #[error("expression nesting exceeds the local evaluation limit of {limit}")]
    DepthExceeded { limit: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl EvalError {
    pub(crate) fn arity(function: &str, expected: impl Into<String>, found: usize) -> Self {
        Self::Arity {
            function: function.to_owned(),
            expected: expected.into(),
            found,
        }
    }

    pub(crate) fn invalid(function: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Evaluate `expr` now, in `env`.
///
/// This is the host-side "evaluate immediately" primitive the remote
/// classifier falls back to. Remote-only functions such as `n()` fail here.
pub fn eval(expr: &Expr, env: &Arc<Environment>) -> Result<Value, EvalError> {
    eval_at(expr, env, 0)
}

/// Call `function` with already evaluated positional arguments.
pub fn apply(function: &Function, args: Vec<Value>) -> Result<Value, EvalError> {
    apply_at(function, args, 0)
}

fn eval_at(expr: &Expr, env: &Arc<Environment>, depth: usize) -> Result<Value, EvalError> {
    if depth > MAX_EVAL_DEPTH {
        return Err(EvalError::DepthExceeded {
            limit: MAX_EVAL_DEPTH,
        });
    }
    match expr {
        Expr::Literal { value } => Ok(value.clone()),
        Expr::Symbol { name } => env
            .lookup(name)
            .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
        Expr::Quoted(quosure) => eval_at(quosure.expr(), quosure.env(), depth + 1),
        Expr::Call { func, args } => eval_call(func, args, env, depth + 1),
    }
}

fn single_arg<'a>(function: &str, args: &'a [Arg]) -> Result<&'a Expr, EvalError> {
    match args {
        [only] => Ok(&only.value),
        _ => Err(EvalError::arity(function, "1", args.len())),
    }
}

fn eval_call(
    func: &Expr,
    args: &[Arg],
    env: &Arc<Environment>,
    depth: usize,
) -> Result<Value, EvalError> {
    if let Some(name) = func.as_symbol() {
        match name {
            "function" => return make_closure(args, env),
            "~" => return make_formula(args, env),
            "local" => return eval_at(single_arg("local", args)?, env, depth),
            "::" => return eval_namespaced(args, env),
            "$" | "[[" => return eval_access(name, args, env, depth),
            _ => {}
        }
    }

    let callee = match func {
        Expr::Symbol { name } => match env.lookup_function(name) {
            Some(function) => function.clone(),
            None if env.has(name) => return Err(EvalError::NotAFunction(name.clone())),
            None => return Err(EvalError::UnknownFunction(name.clone())),
        },
        other => match eval_at(other, env, depth)? {
            Value::Function(function) => function,
            _ => return Err(EvalError::NotAFunction(other.to_string())),
        },
    };

    let values = args
        .iter()
        .map(|arg| eval_at(&arg.value, env, depth))
        .collect::<Result<Vec<_>, _>>()?;
    apply_at(&callee, values, depth)
}

fn apply_at(function: &Function, args: Vec<Value>, depth: usize) -> Result<Value, EvalError> {
    match function {
        Function::Builtin(builtin) => builtin.call(&args),
        Function::Closure(Closure { params, body, env }) => {
            if params.len() != args.len() {
                return Err(EvalError::arity(
                    &function.label(),
                    params.len().to_string(),
                    args.len(),
                ));
            }
            let mut frame = Environment::with_parent(Arc::clone(env));
            for (param, value) in params.iter().zip(args) {
                frame.define(param.clone(), value);
            }
            eval_at(body, &frame.into_shared(), depth + 1)
        }
        Function::ColumnFormula(formula) => {
            let ColumnFormula { column_arg, env, .. } = formula;
            let column = args.get(*column_arg).cloned().ok_or_else(|| {
                EvalError::arity(
                    &function.label(),
                    format!("at least {}", column_arg + 1),
                    args.len(),
                )
            })?;
            let mut frame = Environment::with_parent(Arc::clone(env));
            for placeholder in ColumnFormula::PLACEHOLDERS {
                frame.define(placeholder, column.clone());
            }
            eval_at(&formula.body, &frame.into_shared(), depth + 1)
        }
    }
}

fn make_closure(args: &[Arg], env: &Arc<Environment>) -> Result<Value, EvalError> {
    let [params, body] = args else {
        return Err(EvalError::arity("function", "2", args.len()));
    };
    let Expr::Literal { value } = &params.value else {
        return Err(EvalError::invalid("function", "parameter list must be literal names"));
    };
    let params = value
        .elements()
        .unwrap_or_default()
        .iter()
        .map(fpl_types::Scalar::to_text)
        .collect();
    Ok(Value::Function(Function::Closure(Closure {
        params,
        body: Box::new(body.value.clone()),
        env: Arc::clone(env),
    })))
}

/// `~ body` becomes a one-argument closure over `.x`; `.` is an alias.
fn make_formula(args: &[Arg], env: &Arc<Environment>) -> Result<Value, EvalError> {
    let body = match args {
        [rhs] => &rhs.value,
        _ => {
            return Err(EvalError::invalid(
                "~",
                "only one-sided formulas can be used as functions",
            ));
        }
    };
    Ok(Value::Function(Function::Closure(Closure {
        params: vec![".x".to_owned()],
        body: Box::new(body.replace_symbols(&["."], &Expr::symbol(".x"))),
        env: Arc::clone(env),
    })))
}

fn eval_namespaced(args: &[Arg], env: &Arc<Environment>) -> Result<Value, EvalError> {
    let [_, name] = args else {
        return Err(EvalError::arity("::", "2", args.len()));
    };
    let name = name
        .value
        .as_symbol()
        .ok_or_else(|| EvalError::invalid("::", "expected a name after `::`"))?;
    env.lookup(name)
        .ok_or_else(|| EvalError::UnboundVariable(name.to_owned()))
}

fn eval_access(
    op: &str,
    args: &[Arg],
    env: &Arc<Environment>,
    depth: usize,
) -> Result<Value, EvalError> {
    let [target, field] = args else {
        return Err(EvalError::arity(op, "2", args.len()));
    };
    let field = if op == "$" {
        field
            .value
            .as_symbol()
            .map(str::to_owned)
            .ok_or_else(|| EvalError::invalid(op, "expected a field name"))?
    } else {
        let key = eval_at(&field.value, env, depth)?;
        key.as_single_str()
            .map(str::to_owned)
            .ok_or_else(|| EvalError::invalid(op, "key must be a single string"))?
    };
    match target.value.as_symbol() {
        Some(".env") => env
            .lookup(&field)
            .ok_or(EvalError::UnboundVariable(field)),
        Some(".data") => Err(EvalError::DataPronoun(field)),
        _ => Err(EvalError::invalid(
            op,
            "only the `.env` pronoun supports field access locally",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fpl_types::Scalar;

    use super::{EvalError, eval};
    use crate::{Environment, Value, parse_expr};

    fn env() -> Arc<Environment> {
        Environment::global()
            .bind("year", 1980_i64)
            .bind("ids", Value::strings(["a", "b"]))
            .bind("col", "name")
            .into_shared()
    }

    fn eval_str(input: &str) -> Result<Value, EvalError> {
        eval(&parse_expr(input).expect("parse"), &env())
    }

    #[test]
    fn eval_arithmetic_and_comparison() {
        assert_eq!(eval_str("year + 1").expect("eval"), Value::from(1981_i64));
        assert_eq!(eval_str("year / 2").expect("eval"), Value::from(990.0));
        assert_eq!(eval_str("year > 1900").expect("eval"), Value::from(true));
    }

    #[test]
    fn eval_vector_building_and_membership() {
        assert_eq!(
            eval_str("c(1, 2.5)").expect("eval"),
            Value::Vector(vec![Scalar::Float64(1.0), Scalar::Float64(2.5)])
        );
        assert_eq!(
            eval_str("c(\"b\", \"z\") %in% ids").expect("eval"),
            Value::Vector(vec![Scalar::Bool(true), Scalar::Bool(false)])
        );
    }

    #[test]
    fn eval_closures_and_formulas() {
        assert_eq!(eval_str("(\\(x) x * 2)(21)").expect("eval"), Value::from(42_i64));
        assert_eq!(eval_str("(~ . + .x)(2)").expect("eval"), Value::from(4_i64));
    }

    #[test]
    fn eval_env_pronoun_and_local() {
        assert_eq!(eval_str(".env$year").expect("eval"), Value::from(1980_i64));
        assert_eq!(
            eval_str(".env[[\"year\"]]").expect("eval"),
            Value::from(1980_i64)
        );
        assert!(matches!(
            eval_str(".env[[col]]"),
            Err(EvalError::UnboundVariable(name)) if name == "name"
        ));
        assert_eq!(eval_str("local(year)").expect("eval"), Value::from(1980_i64));
    }

    #[test]
    fn eval_namespaced_lookup() {
        assert_eq!(eval_str("base::abs(-2)").expect("eval"), Value::from(2_i64));
    }

    #[test]
    fn eval_reports_unbound_and_remote_only() {
        assert_eq!(
            eval_str("missing + 1"),
            Err(EvalError::UnboundVariable("missing".to_owned()))
        );
        assert_eq!(eval_str("n()"), Err(EvalError::RemoteOnly("n".to_owned())));
        assert_eq!(
            eval_str(".data$year"),
            Err(EvalError::DataPronoun("year".to_owned()))
        );
        assert_eq!(
            eval_str("nope(1)"),
            Err(EvalError::UnknownFunction("nope".to_owned()))
        );
        assert_eq!(
            eval_str("year(1)"),
            Err(EvalError::NotAFunction("year".to_owned()))
        );
    }
}
