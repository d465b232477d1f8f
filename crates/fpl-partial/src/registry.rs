use std::collections::BTreeSet;

use fpl_expr::{Environment, Expr, Function};

/// Aggregates the remote engine translates by name.
const AGGREGATES: &[&str] = &[
    "all", "any", "cor", "cov", "first", "last", "max", "mean", "median", "min", "n",
    "n_distinct", "nth", "quantile", "sd", "str_flatten", "sum", "var",
];

/// Scalar functions and operators the remote engine translates by name.
const SCALARS: &[&str] = &[
    "!", "!=", "%%", "%/%", "%in%", "&", "&&", "*", "+", "-", "/", "<", "<=", "==", ">",
    ">=", "^", "|", "||", "abs", "acos", "as.character", "as.integer", "as.numeric", "asin",
    "atan", "between", "case_when", "ceiling", "coalesce", "cos", "cumsum", "desc", "exp",
    "floor", "if_else", "ifelse", "is.na", "lag", "lead", "log", "log10", "nchar", "paste",
    "paste0", "round", "row_number", "sign", "sin", "sqrt", "str_detect", "str_length",
    "str_to_lower", "str_to_upper", "substr", "tan", "tolower", "toupper", "trimws",
];

/// Function names the remote backend knows how to translate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRegistry {
    aggregates: BTreeSet<String>,
    scalars: BTreeSet<String>,
}

impl FunctionRegistry {
    /// A registry that knows nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            aggregates: BTreeSet::new(),
            scalars: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_aggregates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregates.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_scalars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scalars.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains(name)
    }

    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.is_aggregate(name) || self.scalars.contains(name)
    }

    /// Remote name for a function value found in call position.
    ///
    /// A closure resolves to the head of its body when the body is a single
    /// call, so `\(x) mean(x)` names `mean`. A builtin resolves to its tag when
    /// the tag is registered and `scope` still binds that name to the same
    /// builtin; a shadowed name resolves to nothing.
    #[must_use]
    pub fn resolve_function_name(&self, function: &Function, scope: &Environment) -> Option<String> {
        match function {
            Function::Closure(closure) => {
                let (head, _) = closure.body.as_call()?;
                match head {
                    Expr::Symbol { name } => Some(name.clone()),
                    _ => None,
                }
            }
            Function::Builtin(builtin) => {
                let name = builtin.name();
                if !self.is_known(name) {
                    return None;
                }
                match scope.lookup_function(name)? {
                    Function::Builtin(bound) if bound == builtin => Some(name.to_owned()),
                    _ => None,
                }
            }
            Function::ColumnFormula(_) => None,
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::empty()
            .with_aggregates(AGGREGATES.iter().copied())
            .with_scalars(SCALARS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fpl_expr::{Environment, Function, Value, eval, parse_expr};

    use super::FunctionRegistry;

    fn function_value(input: &str, env: &Arc<Environment>) -> Function {
        match eval(&parse_expr(input).expect("parse"), env).expect("eval") {
            Value::Function(function) => function,
            other => panic!("expected a function, got {other}"),
        }
    }

    #[test]
    fn default_registry_knows_common_names() {
        let registry = FunctionRegistry::default();
        assert!(registry.is_aggregate("n"));
        assert!(registry.is_known("mean"));
        assert!(registry.is_known("%in%"));
        assert!(!registry.is_aggregate("abs"));
        assert!(!registry.is_known("my_udf"));
    }

    #[test]
    fn closures_resolve_to_their_body_head() {
        let env = Environment::global().into_shared();
        let registry = FunctionRegistry::default();
        let lambda = function_value("\\(x) mean(x)", &env);
        assert_eq!(
            registry.resolve_function_name(&lambda, &env),
            Some("mean".to_owned())
        );
        let bare = function_value("\\(x) x", &env);
        assert_eq!(registry.resolve_function_name(&bare, &env), None);
    }

    #[test]
    fn builtins_resolve_only_while_their_name_is_unshadowed() {
        let env = Environment::global().into_shared();
        let registry = FunctionRegistry::default();
        let mean = function_value("mean", &env);
        assert_eq!(
            registry.resolve_function_name(&mean, &env),
            Some("mean".to_owned())
        );

        let shadowed = Environment::with_parent(Arc::clone(&env))
            .bind("mean", function_value("\\(x) x", &env))
            .into_shared();
        assert_eq!(registry.resolve_function_name(&mean, &shadowed), None);

        let identity = function_value("identity", &env);
        assert_eq!(registry.resolve_function_name(&identity, &env), None);
    }

    #[test]
    fn custom_registries_extend_the_empty_one() {
        let registry = FunctionRegistry::empty().with_scalars(["my_udf"]);
        assert!(registry.is_known("my_udf"));
        assert!(!registry.is_known("mean"));
    }
}
