// Column expansion: across(), pick(), if_any(), if_all().

use std::collections::BTreeSet;
use std::sync::Arc;

use fpl_expr::{Arg, ColumnFormula, Environment, Expr, Function, Value, eval};
use fpl_types::Scalar;

use crate::call::namespaced;
use crate::classify::Classifier;
use crate::error::ClassifyError;

/// `across(.cols, .fns, ..., .names)` after argument matching.
#[derive(Debug, Default)]
struct AcrossArgs<'e> {
    cols: Option<&'e Expr>,
    fns: Option<&'e Expr>,
    names: Option<&'e Expr>,
    extra: Vec<Arg>,
}

/// Named args bind first; the first two positional args fill `.cols` and
/// `.fns`, everything else is forwarded to each function call.
fn match_args<'a>(function: &str, args: &'a [Arg]) -> Result<AcrossArgs<'a>, ClassifyError> {
    let mut matched = AcrossArgs::default();
    let mut positional = Vec::new();
    for arg in args {
        match arg.name.as_deref() {
            Some(".cols") => matched.cols = Some(&arg.value),
            Some(".fns") => matched.fns = Some(&arg.value),
            Some(".names") => matched.names = Some(&arg.value),
            Some(".unpack") => {
                return Err(ClassifyError::invalid_across(format!(
                    "`.unpack` is not supported by `{function}()`"
                )));
            }
            _ => positional.push(arg),
        }
    }
    for arg in positional {
        if arg.name.is_none() && matched.cols.is_none() {
            matched.cols = Some(&arg.value);
        } else if arg.name.is_none() && matched.fns.is_none() {
            matched.fns = Some(&arg.value);
        } else {
            matched.extra.push(arg.clone());
        }
    }
    Ok(matched)
}

/// One entry of `.fns`: the label used for `{.fn}` and the call head.
#[derive(Debug, Clone)]
struct ColumnFn {
    label: String,
    head: Expr,
}

impl Classifier<'_> {
    /// Expand `across()` / `pick()` into named per-column expressions.
    pub(crate) fn expand_columns(
        &mut self,
        function: &str,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Vec<(String, Expr)>, ClassifyError> {
        let expanded = if function == "pick" {
            self.expand_pick(args, env)?
        } else {
            self.expand_across(function, args, env)?
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(function, columns = expanded.len(), "expanded column selection");

        Ok(expanded)
    }

    /// `if_any()` / `if_all()`: per-column predicates joined with `|` / `&`.
    pub(crate) fn expand_predicate(
        &mut self,
        function: &str,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Expr, ClassifyError> {
        let (op, empty) = if function == "if_any" {
            ("|", false)
        } else {
            ("&", true)
        };
        let predicates = self.expand_across(function, args, env)?;
        Ok(predicates
            .into_iter()
            .map(|(_, predicate)| predicate)
            .reduce(|acc, next| Expr::call(op, vec![acc, next]))
            .unwrap_or_else(|| Expr::literal(empty)))
    }

    fn expand_pick(
        &mut self,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Vec<(String, Expr)>, ClassifyError> {
        if let Some(named) = args.iter().find_map(|arg| arg.name.as_deref()) {
            return Err(ClassifyError::invalid_across(format!(
                "`pick()` takes selections only, got argument `{named}`"
            )));
        }
        let selection = Expr::call("c", args.iter().map(|arg| arg.value.clone()).collect());
        let columns = self.select_columns(Some(&selection), env)?;
        Ok(columns
            .into_iter()
            .map(|column| {
                let expr = Expr::symbol(column.as_str());
                (column, expr)
            })
            .collect())
    }

    fn expand_across(
        &mut self,
        function: &str,
        args: &[Arg],
        env: &Arc<Environment>,
    ) -> Result<Vec<(String, Expr)>, ClassifyError> {
        let matched = match_args(function, args)?;
        let columns = self.select_columns(matched.cols, env)?;
        let fns = match matched.fns {
            Some(fns) => Some(self.column_fns(fns, env)?),
            None => None,
        };
        let template = match matched.names {
            Some(names) => names_template(names, env)?,
            None => None,
        };
        let template = template.unwrap_or_else(|| {
            if fns.is_some() { "{.col}_{.fn}" } else { "{.col}" }.to_owned()
        });

        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for column in &columns {
            let applied: Vec<(Option<&str>, Expr)> = match &fns {
                None => vec![(None, Expr::symbol(column.as_str()))],
                Some(fns) => {
                    let mut applied = Vec::with_capacity(fns.len());
                    for column_fn in fns {
                        let mut call_args = vec![Arg::positional(Expr::symbol(column.as_str()))];
                        call_args.extend(matched.extra.iter().cloned());
                        let expr = self
                            .classify_call(&column_fn.head, &call_args, env)?
                            .into_single(function)?;
                        applied.push((Some(column_fn.label.as_str()), expr));
                    }
                    applied
                }
            };
            for (label, expr) in applied {
                let name = render_name(&template, column, label)?;
                if !seen.insert(name.clone()) {
                    return Err(ClassifyError::invalid_across(format!(
                        "`.names` produced the duplicate name `{name}`"
                    )));
                }
                out.push((name, expr));
            }
        }
        Ok(out)
    }

    fn select_columns(
        &self,
        cols: Option<&Expr>,
        env: &Arc<Environment>,
    ) -> Result<Vec<String>, ClassifyError> {
        let everything = Expr::call("everything", Vec::new());
        let selector = cols.unwrap_or(&everything);
        Ok(self
            .selector()
            .resolve(selector, self.dataset().known_variable_names(), env)?)
    }

    /// Normalise `.fns` into call heads.
    fn column_fns(&self, fns: &Expr, env: &Arc<Environment>) -> Result<Vec<ColumnFn>, ClassifyError> {
        if let Some((func, args)) = fns.as_call() {
            if matches!(func.as_symbol(), Some("list" | "c")) {
                return args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| {
                        let mut column_fn = self.column_fn(&arg.value, i + 1, env)?;
                        if let Some(name) = &arg.name {
                            column_fn.label.clone_from(name);
                        }
                        Ok(column_fn)
                    })
                    .collect();
            }
        }
        Ok(vec![self.column_fn(fns, 1, env)?])
    }

    /// Symbols and `ns::f` are labelled by name; formulas and lambdas by
    /// their 1-based `position`.
    fn column_fn(
        &self,
        expr: &Expr,
        position: usize,
        env: &Arc<Environment>,
    ) -> Result<ColumnFn, ClassifyError> {
        match expr {
            Expr::Symbol { name } => Ok(ColumnFn {
                label: name.clone(),
                head: expr.clone(),
            }),
            Expr::Literal {
                value: Value::Function(_),
            } => Ok(ColumnFn {
                label: position.to_string(),
                head: expr.clone(),
            }),
            Expr::Quoted(quosure) => self.column_fn(quosure.expr(), position, quosure.env()),
            Expr::Call { func, args } => {
                if let Some((namespace, name)) = namespaced(expr) {
                    let head = if self.policy().allows_namespace(namespace) {
                        Expr::symbol(name)
                    } else {
                        expr.clone()
                    };
                    return Ok(ColumnFn {
                        label: name.to_owned(),
                        head,
                    });
                }
                let body = match (func.as_symbol(), args.as_slice()) {
                    (Some("~"), [body]) => body.value.clone(),
                    (Some("function"), [params, body]) => lambda_body(params, body)?,
                    _ => {
                        return Err(ClassifyError::invalid_across(format!(
                            "`.fns` must be a function, formula, or list of them; got `{expr}`"
                        )));
                    }
                };
                Ok(ColumnFn {
                    label: position.to_string(),
                    head: Expr::literal(Function::ColumnFormula(ColumnFormula {
                        body: Box::new(body),
                        env: Arc::clone(env),
                        column_arg: 0,
                    })),
                })
            }
            Expr::Literal { value } => Err(ClassifyError::invalid_across(format!(
                "`.fns` must be a function, formula, or list of them; got {}",
                value.kind_name()
            ))),
        }
    }
}

/// A one-parameter lambda becomes a formula body over `.x`.
fn lambda_body(params: &Arg, body: &Arg) -> Result<Expr, ClassifyError> {
    let names: Vec<String> = match &params.value {
        Expr::Literal { value } => value
            .elements()
            .unwrap_or_default()
            .iter()
            .map(Scalar::to_text)
            .collect(),
        _ => Vec::new(),
    };
    match names.as_slice() {
        [param] => Ok(body
            .value
            .replace_symbols(&[param.as_str()], &Expr::symbol(".x"))),
        _ => Err(ClassifyError::invalid_across(format!(
            "lambdas passed to `.fns` take exactly one argument, got {}",
            names.len()
        ))),
    }
}

/// `.names` is a literal string or anything that evaluates locally to one;
/// `NULL` keeps the default.
fn names_template(expr: &Expr, env: &Arc<Environment>) -> Result<Option<String>, ClassifyError> {
    let value = eval(expr, env).map_err(ClassifyError::LocalEvaluation)?;
    if value == Value::Null {
        return Ok(None);
    }
    value.as_single_str().map(|s| Some(s.to_owned())).ok_or_else(|| {
        ClassifyError::invalid_across(format!("`.names` must be a single string, got {value}"))
    })
}

/// Fill a glue template over `{.col}` and `{.fn}`.
fn render_name(template: &str, column: &str, function: Option<&str>) -> Result<String, ClassifyError> {
    let mut out = String::with_capacity(template.len() + column.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            ClassifyError::invalid_across(format!("unclosed `{{` in `.names` template `{template}`"))
        })?;
        match after[..close].trim() {
            ".col" | "col" => out.push_str(column),
            ".fn" | "fn" => match function {
                Some(function) => out.push_str(function),
                None => {
                    return Err(ClassifyError::invalid_across(
                        "`{.fn}` used in `.names` without `.fns`",
                    ));
                }
            },
            other => {
                return Err(ClassifyError::invalid_across(format!(
                    "unknown `.names` field `{{{other}}}`"
                )));
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::render_name;

    #[test]
    fn names_template_substitutes_fields() {
        assert_eq!(render_name("{.col}_{.fn}", "c1", Some("f")).expect("render"), "c1_f");
        assert_eq!(render_name("mean_{col}", "x", None).expect("render"), "mean_x");
        assert!(render_name("{.fn}", "x", None).is_err());
        assert!(render_name("{.col", "x", None).is_err());
        assert!(render_name("{other}", "x", None).is_err());
    }
}
