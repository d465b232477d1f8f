use std::sync::Arc;

use fpl_expr::{Arg, Environment, EvalError, Expr, Function, Value, eval};
use fpl_remote::RemoteDataset;
use fpl_runtime::{ClassifyPolicy, FallbackKind, FallbackLedger};

use crate::call::{Pronoun, head_name, is_pronoun_access, namespaced, pronoun_access};
use crate::error::ClassifyError;
use crate::registry::FunctionRegistry;
use crate::select::{ColumnSelector, TidySelect};

static DEFAULT_SELECTOR: TidySelect = TidySelect;

/// Outcome of classifying one expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Single(Expr),
    /// Named expressions produced by a column expansion such as `across()`.
    FanOut(Vec<(String, Expr)>),
}

impl Classified {
    /// The single expression, or `NestedFanOut` naming `origin`.
    pub fn into_single(self, origin: &str) -> Result<Expr, ClassifyError> {
        match self {
            Self::Single(expr) => Ok(expr),
            Self::FanOut(_) => Err(ClassifyError::NestedFanOut {
                function: origin.to_owned(),
            }),
        }
    }
}

/// Splits expressions into remote references and local literals.
///
/// The classifier borrows its dataset, policy, registry and selector for the
/// pass and owns the ledger of every local-evaluation fallback it takes.
pub struct Classifier<'a> {
    dataset: &'a dyn RemoteDataset,
    policy: &'a ClassifyPolicy,
    registry: &'a FunctionRegistry,
    selector: &'a dyn ColumnSelector,
    ledger: FallbackLedger,
    depth: usize,
}

impl<'a> Classifier<'a> {
    #[must_use]
    pub fn new(
        dataset: &'a dyn RemoteDataset,
        policy: &'a ClassifyPolicy,
        registry: &'a FunctionRegistry,
    ) -> Self {
        Self {
            dataset,
            policy,
            registry,
            selector: &DEFAULT_SELECTOR,
            ledger: FallbackLedger::new(),
            depth: 0,
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: &'a dyn ColumnSelector) -> Self {
        self.selector = selector;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ClassifyPolicy {
        self.policy
    }

    #[must_use]
    pub fn ledger(&self) -> &FallbackLedger {
        &self.ledger
    }

    #[must_use]
    pub fn into_ledger(self) -> FallbackLedger {
        self.ledger
    }

    pub(crate) fn dataset(&self) -> &'a dyn RemoteDataset {
        self.dataset
    }

    pub(crate) fn selector(&self) -> &'a dyn ColumnSelector {
        self.selector
    }

    /// Run `step` one level deeper, failing once the policy's limit is hit.
    pub(crate) fn descend<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, ClassifyError>,
    ) -> Result<T, ClassifyError> {
        if self.depth >= self.policy.max_depth {
            return Err(ClassifyError::DepthExceeded {
                limit: self.policy.max_depth,
            });
        }
        self.depth += 1;
        let out = step(self);
        self.depth -= 1;
        out
    }

    pub fn classify(
        &mut self,
        expr: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Classified, ClassifyError> {
        self.descend(|this| this.classify_node(expr, env))
    }

    /// Classify an expression that must stay a single expression.
    pub fn classify_expr(
        &mut self,
        expr: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Expr, ClassifyError> {
        let origin = head_name(expr).unwrap_or("expression").to_owned();
        self.classify(expr, env)?.into_single(&origin)
    }

    fn classify_node(
        &mut self,
        expr: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Classified, ClassifyError> {
        match expr {
            Expr::Literal { .. } => Ok(Classified::Single(expr.clone())),
            Expr::Symbol { name } => self.classify_symbol(name, env).map(Classified::Single),
            Expr::Quoted(quosure) => self.classify(quosure.expr(), quosure.env()),
            Expr::Call { func, args } => match self.expansion_head(func) {
                Some(name @ ("across" | "pick")) => self
                    .expand_columns(name, args, env)
                    .map(Classified::FanOut),
                Some(name @ ("if_any" | "if_all")) => self
                    .expand_predicate(name, args, env)
                    .map(Classified::Single),
                _ => self.rewrite_call(func, args, env),
            },
        }
    }

    /// Head name of a call, looking through an allowed namespace so that
    /// `dplyr::across()` expands like `across()`.
    fn expansion_head<'e>(&self, func: &'e Expr) -> Option<&'e str> {
        match namespaced(func) {
            Some((namespace, name)) if self.policy.allows_namespace(namespace) => Some(name),
            Some(_) => None,
            None => func.as_symbol(),
        }
    }

    fn classify_symbol(&self, name: &str, env: &Environment) -> Result<Expr, ClassifyError> {
        if self.dataset.is_remote_variable(name) {
            return Ok(Expr::symbol(name));
        }
        match env.lookup(name) {
            Some(value) => Ok(Expr::Literal { value }),
            None => Err(ClassifyError::UnresolvedSymbol {
                name: name.to_owned(),
            }),
        }
    }

    /// Rewrite one call node. Column formulas are inlined, function values
    /// and namespaced heads are resolved to remote names, pronouns and
    /// `local()` / `remote()` overrides are honoured, and anything else has
    /// its arguments classified under the original head.
    pub fn classify_call(
        &mut self,
        func: &Expr,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Classified, ClassifyError> {
        self.descend(|this| this.rewrite_call(func, args, env))
    }

    fn rewrite_call(
        &mut self,
        func: &Expr,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Classified, ClassifyError> {
        if let Expr::Literal { value } = func {
            let Value::Function(function) = value else {
                return Err(ClassifyError::UnknownInputKind {
                    kind: value.kind_name().to_owned(),
                });
            };
            if let Function::ColumnFormula(formula) = function {
                let column = args.get(formula.column_arg).ok_or_else(|| {
                    ClassifyError::invalid_across("column formula called without its column")
                })?;
                // the column keeps resolving in the caller's scope
                let column = Expr::quoted(column.value.clone(), Arc::clone(env));
                return self.classify(&formula.instantiate(&column), &formula.env);
            }
            return match self.registry.resolve_function_name(function, env) {
                Some(name) => self.classify_call(&Expr::symbol(name), args, env),
                None => self.fall_back(FallbackKind::UnresolvedFunction, func, args, env),
            };
        }

        if func.as_call().is_some() {
            if let Some((namespace, name)) = namespaced(func) {
                if self.policy.allows_namespace(namespace) {
                    return self.classify_call(&Expr::symbol(name), args, env);
                }
            }
            if is_pronoun_access(func) {
                return Err(ClassifyError::invalid_override(format!(
                    "`{func}` is a pronoun field, not a function"
                )));
            }
            return self.fall_back(FallbackKind::CompoundHead, func, args, env);
        }

        if let Some(access) = pronoun_access(func, args) {
            return self.resolve_pronoun(access.pronoun, access.op, access.field, env);
        }

        match func.as_symbol() {
            Some("local") => {
                let [arg] = args else {
                    return Err(ClassifyError::invalid_override(format!(
                        "`local()` takes exactly one argument, got {}",
                        args.len()
                    )));
                };
                let value = eval(&arg.value, env).map_err(ClassifyError::LocalEvaluation)?;
                Ok(Classified::Single(Expr::Literal { value }))
            }
            Some("remote") => match args {
                [arg] => Ok(Classified::Single(arg.value.clone())),
                _ => Err(ClassifyError::invalid_override(format!(
                    "`remote()` takes exactly one argument, got {}",
                    args.len()
                ))),
            },
            _ => {
                let mut rewritten = Vec::with_capacity(args.len());
                for arg in args {
                    let origin = head_name(&arg.value)
                        .or(func.as_symbol())
                        .unwrap_or("call");
                    let value = self.classify(&arg.value, env)?.into_single(origin)?;
                    rewritten.push(Arg {
                        name: arg.name.clone(),
                        value,
                    });
                }
                Ok(Classified::Single(Expr::call_with(func.clone(), rewritten)))
            }
        }
    }

    fn resolve_pronoun(
        &mut self,
        pronoun: Pronoun,
        op: &str,
        field: &Expr,
        env: &Arc<Environment>,
    ) -> Result<Classified, ClassifyError> {
        let name = if op == "$" {
            match field {
                Expr::Symbol { name } => name.clone(),
                Expr::Literal { value } => value
                    .as_single_str()
                    .map(str::to_owned)
                    .ok_or_else(|| ClassifyError::invalid_override("`$` needs a field name"))?,
                other => {
                    return Err(ClassifyError::invalid_override(format!(
                        "`$` needs a field name, got `{other}`"
                    )));
                }
            }
        } else {
            let key = eval(field, env).map_err(ClassifyError::LocalEvaluation)?;
            key.as_single_str().map(str::to_owned).ok_or_else(|| {
                ClassifyError::invalid_override(format!(
                    "`[[` key must be a single string, got {key}"
                ))
            })?
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(field = %name, ?pronoun, "resolving pronoun access");

        match pronoun {
            Pronoun::Data => Ok(Classified::Single(Expr::symbol(name))),
            Pronoun::Env => match env.lookup(&name) {
                Some(value) => Ok(Classified::Single(Expr::Literal { value })),
                None => Err(ClassifyError::LocalEvaluation(EvalError::UnboundVariable(
                    name,
                ))),
            },
        }
    }

    /// Evaluate the whole call now. This is a heuristic: the call has no
    /// remote translation, so it is assumed to be local.
    fn fall_back(
        &mut self,
        kind: FallbackKind,
        func: &Expr,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Classified, ClassifyError> {
        let call = Expr::call_with(func.clone(), args.to_vec());
        let subject = call.to_string();
        let reason = match kind {
            FallbackKind::UnresolvedFunction => "function value has no remote name",
            FallbackKind::CompoundHead => "call head is not a translatable function",
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(call = %subject, reason, "evaluating call locally");

        self.ledger.record(kind, subject, reason);
        let value = eval(&call, env).map_err(ClassifyError::LocalEvaluation)?;
        Ok(Classified::Single(Expr::Literal { value }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fpl_expr::{Arg, ColumnFormula, Environment, EvalError, Expr, Function, Value, eval, parse_expr};
    use fpl_remote::ColumnIndex;
    use fpl_runtime::{ClassifyPolicy, FallbackKind};

    use super::{Classified, Classifier};
    use crate::{ClassifyError, FunctionRegistry};

    fn columns() -> ColumnIndex {
        ColumnIndex::new(["year", "id", "c1", "c2", "score"]).expect("columns")
    }

    fn env() -> Arc<Environment> {
        Environment::global()
            .bind("year", 1980_i64)
            .bind("cutoff", 50_i64)
            .bind("field", "score")
            .bind("ids", Value::strings(["a", "b"]))
            .bind("template", "{.fn}_of_{.col}")
            .into_shared()
    }

    fn parsed(input: &str) -> Expr {
        parse_expr(input).expect("parse")
    }

    fn classify_with(policy: &ClassifyPolicy, input: &str) -> Result<Classified, ClassifyError> {
        let columns = columns();
        let registry = FunctionRegistry::default();
        Classifier::new(&columns, policy, &registry).classify(&parsed(input), &env())
    }

    fn classify(input: &str) -> Result<Expr, ClassifyError> {
        classify_with(&ClassifyPolicy::default(), input)?.into_single("test")
    }

    fn fan_out(input: &str) -> Vec<(String, Expr)> {
        match classify_with(&ClassifyPolicy::default(), input).expect("classify") {
            Classified::FanOut(parts) => parts,
            Classified::Single(expr) => panic!("expected a fan-out, got {expr}"),
        }
    }

    #[test]
    fn symbols_split_between_remote_and_local() {
        assert_eq!(classify("year > 1980").expect("classify"), parsed("year > 1980"));
        assert_eq!(classify("score > cutoff").expect("classify"), parsed("score > 50"));
        assert_eq!(
            classify("id %in% ids").expect("classify"),
            Expr::call(
                "%in%",
                vec![Expr::symbol("id"), Expr::literal(Value::strings(["a", "b"]))]
            )
        );
        assert!(matches!(
            classify("nowhere + 1"),
            Err(ClassifyError::UnresolvedSymbol { name }) if name == "nowhere"
        ));
    }

    #[test]
    fn local_and_remote_overrides() {
        assert_eq!(
            classify("year > local(year)").expect("classify"),
            parsed("year > 1980")
        );
        assert_eq!(
            classify("remote(anything(goes))").expect("classify"),
            parsed("anything(goes)")
        );
        assert!(matches!(
            classify("local(year, id)"),
            Err(ClassifyError::InvalidOverride { .. })
        ));
        assert!(matches!(
            classify("remote()"),
            Err(ClassifyError::InvalidOverride { .. })
        ));
        assert!(matches!(
            classify("local(n())"),
            Err(ClassifyError::LocalEvaluation(EvalError::RemoteOnly(_)))
        ));
    }

    #[test]
    fn pronouns_force_the_side() {
        assert_eq!(classify(".data$id").expect("classify"), Expr::symbol("id"));
        assert_eq!(classify(".env$year").expect("classify"), Expr::literal(1980_i64));
        assert_eq!(classify(".data[[field]]").expect("classify"), Expr::symbol("score"));
        assert_eq!(
            classify(".env[[\"cutoff\"]] + 1").expect("classify"),
            parsed("50 + 1")
        );
        assert!(matches!(
            classify(".data[[1]]"),
            Err(ClassifyError::InvalidOverride { .. })
        ));
        assert!(matches!(
            classify(".env$nope"),
            Err(ClassifyError::LocalEvaluation(EvalError::UnboundVariable(name))) if name == "nope"
        ));
        assert!(matches!(
            classify(".data$f(id)"),
            Err(ClassifyError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn namespaced_heads() {
        assert_eq!(classify("dplyr::n()").expect("classify"), parsed("n()"));
        assert_eq!(
            classify("base::round(score, 2)").expect("classify"),
            parsed("round(score, 2)")
        );

        let columns = columns();
        let policy = ClassifyPolicy::default();
        let registry = FunctionRegistry::default();
        let mut classifier = Classifier::new(&columns, &policy, &registry);
        let out = classifier
            .classify_expr(&parsed("other::abs(-3)"), &env())
            .expect("classify");
        assert_eq!(out, Expr::literal(3_i64));
        assert_eq!(classifier.ledger().len(), 1);
        assert_eq!(classifier.ledger().records()[0].kind, FallbackKind::CompoundHead);
    }

    #[test]
    fn function_value_heads() {
        let env = env();
        let columns = columns();
        let policy = ClassifyPolicy::default();
        let registry = FunctionRegistry::default();
        let mean = eval(&parsed("mean"), &env).expect("mean");
        let call = Expr::call_with(Expr::literal(mean), vec![Arg::positional(Expr::symbol("score"))]);

        let mut classifier = Classifier::new(&columns, &policy, &registry);
        assert_eq!(
            classifier.classify_expr(&call, &env).expect("classify"),
            parsed("mean(score)")
        );
        assert!(classifier.ledger().is_empty());

        // a closure whose body is not a call has no remote name
        let same = eval(&parsed("\\(v) v"), &env).expect("closure");
        let call = Expr::call_with(Expr::literal(same), vec![Arg::positional(Expr::literal(4_i64))]);
        assert_eq!(
            classifier.classify_expr(&call, &env).expect("classify"),
            Expr::literal(4_i64)
        );
        assert_eq!(
            classifier.ledger().records()[0].kind,
            FallbackKind::UnresolvedFunction
        );

        let bad = Expr::call_with(Expr::literal(3_i64), Vec::new());
        assert!(matches!(
            classifier.classify_expr(&bad, &env),
            Err(ClassifyError::UnknownInputKind { .. })
        ));
    }

    #[test]
    fn across_expands_columns_and_functions() {
        assert_eq!(
            fan_out("across(c(c1, c2), f)"),
            vec![
                ("c1_f".to_owned(), parsed("f(c1)")),
                ("c2_f".to_owned(), parsed("f(c2)")),
            ]
        );
        assert_eq!(
            fan_out("across(starts_with(\"c\"), ~ .x * cutoff)"),
            vec![
                ("c1_1".to_owned(), parsed("c1 * 50")),
                ("c2_1".to_owned(), parsed("c2 * 50")),
            ]
        );
        assert_eq!(
            fan_out("across(c1, list(lo = min, hi = \\(v) max(v) + 1))"),
            vec![
                ("c1_lo".to_owned(), parsed("min(c1)")),
                ("c1_hi".to_owned(), parsed("max(c1) + 1")),
            ]
        );
        assert_eq!(
            fan_out("across(c(c1, c2), mean, na.rm = TRUE, .names = template)"),
            vec![
                ("mean_of_c1".to_owned(), parsed("mean(c1, na.rm = TRUE)")),
                ("mean_of_c2".to_owned(), parsed("mean(c2, na.rm = TRUE)")),
            ]
        );
        assert_eq!(
            fan_out("across(c(year, id))"),
            vec![
                ("year".to_owned(), Expr::symbol("year")),
                ("id".to_owned(), Expr::symbol("id")),
            ]
        );
        assert_eq!(fan_out("across(c1, dplyr::n_distinct)")[0].0, "c1_n_distinct");
        assert_eq!(fan_out("across(.fns = abs)").len(), 5);
    }

    #[test]
    fn pick_and_predicates() {
        assert_eq!(
            fan_out("pick(id, score)"),
            vec![
                ("id".to_owned(), Expr::symbol("id")),
                ("score".to_owned(), Expr::symbol("score")),
            ]
        );
        assert_eq!(
            classify("if_any(c(c1, c2), ~ .x > cutoff)").expect("classify"),
            parsed("c1 > 50 | c2 > 50")
        );
        assert_eq!(
            classify("if_all(c(c1, c2), is.na)").expect("classify"),
            parsed("is.na(c1) & is.na(c2)")
        );
        assert_eq!(
            classify("if_any(starts_with(\"zzz\"), is.na)").expect("classify"),
            Expr::literal(false)
        );
        assert_eq!(
            classify("if_all(starts_with(\"zzz\"), is.na)").expect("classify"),
            Expr::literal(true)
        );
    }

    #[test]
    fn namespaced_expansions_expand_like_bare_ones() {
        assert_eq!(
            fan_out("dplyr::across(c(c1, c2), f)"),
            vec![
                ("c1_f".to_owned(), parsed("f(c1)")),
                ("c2_f".to_owned(), parsed("f(c2)")),
            ]
        );
        assert_eq!(
            classify("dplyr::if_any(c(c1, c2), is.na)").expect("classify"),
            parsed("is.na(c1) | is.na(c2)")
        );
        assert_eq!(
            fan_out("dplyr::pick(c1)"),
            vec![("c1".to_owned(), Expr::symbol("c1"))]
        );
        // a namespace outside the allow-list is not treated as dplyr
        assert!(matches!(
            classify("other::across(c1, f)"),
            Err(ClassifyError::LocalEvaluation(_))
        ));
    }

    #[test]
    fn column_formulas_split_scopes_between_column_and_body() {
        let captured = Environment::global().bind("cutoff", 7_i64).into_shared();
        let columns = columns();
        let policy = ClassifyPolicy::default();
        let registry = FunctionRegistry::default();

        // the body sees the captured `cutoff`, the column sees the caller's
        let formula = Function::ColumnFormula(ColumnFormula {
            body: Box::new(parsed(".x + cutoff")),
            env: Arc::clone(&captured),
            column_arg: 0,
        });
        let call = Expr::call_with(
            Expr::literal(formula),
            vec![Arg::positional(Expr::symbol("cutoff"))],
        );
        let out = Classifier::new(&columns, &policy, &registry)
            .classify_expr(&call, &env())
            .expect("classify");
        assert_eq!(out, parsed("50 + 7"));

        let across = Expr::call(
            "across",
            vec![
                parsed("c(c1, c2)"),
                Expr::quoted(parsed("~ .x > cutoff"), captured),
            ],
        );
        let expanded = Classifier::new(&columns, &policy, &registry)
            .classify(&across, &env())
            .expect("classify");
        let Classified::FanOut(parts) = expanded else {
            panic!("expected a fan-out");
        };
        assert_eq!(
            parts,
            vec![
                ("c1_1".to_owned(), parsed("c1 > 7")),
                ("c2_1".to_owned(), parsed("c2 > 7")),
            ]
        );
    }

    #[test]
    fn across_rejects_bad_arguments() {
        assert!(matches!(
            classify_with(&ClassifyPolicy::default(), "across(c1, 42)"),
            Err(ClassifyError::InvalidAcross { .. })
        ));
        assert!(matches!(
            classify_with(&ClassifyPolicy::default(), "across(c1, \\(a, b) a + b)"),
            Err(ClassifyError::InvalidAcross { .. })
        ));
        assert!(matches!(
            classify_with(&ClassifyPolicy::default(), "across(nope, f)"),
            Err(ClassifyError::Selection(_))
        ));
        assert!(matches!(
            classify_with(&ClassifyPolicy::default(), "across(c(c1, c2), f, .names = \"same\")"),
            Err(ClassifyError::InvalidAcross { .. })
        ));
    }

    #[test]
    fn nested_fan_out_is_an_error() {
        assert!(matches!(
            classify("sum(across(c(c1, c2), f))"),
            Err(ClassifyError::NestedFanOut { function }) if function == "across"
        ));
        assert!(matches!(
            classify("across(c1, f)"),
            Err(ClassifyError::NestedFanOut { .. })
        ));
    }

    #[test]
    fn quosures_resolve_in_their_own_environment() {
        let inner = Environment::global().bind("cutoff", 7_i64).into_shared();
        let expr = Expr::call(
            "+",
            vec![
                Expr::quoted(parsed("cutoff"), inner),
                Expr::symbol("cutoff"),
            ],
        );
        let columns = columns();
        let policy = ClassifyPolicy::default();
        let registry = FunctionRegistry::default();
        let out = Classifier::new(&columns, &policy, &registry)
            .classify_expr(&expr, &env())
            .expect("classify");
        assert_eq!(out, parsed("7 + 50"));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let policy = ClassifyPolicy::new().with_max_depth(8);
        let deep = format!("{}score{}", "abs(".repeat(10), ")".repeat(10));
        assert!(matches!(
            classify_with(&policy, &deep),
            Err(ClassifyError::DepthExceeded { limit: 8 })
        ));
        assert!(classify_with(&policy, "abs(abs(score))").is_ok());
    }

    #[test]
    fn inputs_are_not_mutated() {
        let expr = parsed("year > local(year) & id %in% ids");
        let before = expr.clone();
        let columns = columns();
        let policy = ClassifyPolicy::default();
        let registry = FunctionRegistry::default();
        let _ = Classifier::new(&columns, &policy, &registry).classify(&expr, &env());
        assert_eq!(expr, before);
    }
}
