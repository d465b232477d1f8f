use std::sync::Arc;

use fpl_expr::{Environment, Expr, ParseError, Quosure, parse_args};

use crate::classify::{Classified, Classifier};
use crate::error::ClassifyError;

/// One argument of a verb such as `mutate(a = x, across(...))`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub name: Option<String>,
    pub quosure: Quosure,
}

impl BatchEntry {
    #[must_use]
    pub fn named(name: impl Into<String>, quosure: Quosure) -> Self {
        Self {
            name: Some(name.into()),
            quosure,
        }
    }

    #[must_use]
    pub fn unnamed(quosure: Quosure) -> Self {
        Self {
            name: None,
            quosure,
        }
    }

    /// Parse `a = x, across(...)` into entries that all capture `env`.
    pub fn parse_all(input: &str, env: &Arc<Environment>) -> Result<Vec<Self>, ParseError> {
        Ok(parse_args(input)?
            .into_iter()
            .map(|arg| Self {
                name: arg.name,
                quosure: Quosure::new(arg.value, Arc::clone(env)),
            })
            .collect())
    }

    /// The explicit name; an empty name counts as none.
    #[must_use]
    pub fn explicit_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    fn label(&self) -> String {
        match self.explicit_name() {
            Some(name) => name.to_owned(),
            None => self.quosure.expr().to_string(),
        }
    }
}

impl Classifier<'_> {
    /// Classify each entry in its own environment and flatten the results.
    ///
    /// Unnamed fan-outs are spliced in place. Unnamed single results are
    /// named after their deparsed expression when `default_naming` is set,
    /// and left with an empty name otherwise.
    pub fn classify_batch(
        &mut self,
        entries: &[BatchEntry],
        default_naming: bool,
    ) -> Result<Vec<(String, Expr)>, ClassifyError> {
        let mut out = Vec::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            let classified = self
                .classify(entry.quosure.expr(), entry.quosure.env())
                .map_err(|source| {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(position = position + 1, error = %source, "batch argument failed");

                    ClassifyError::Argument {
                        position: position + 1,
                        label: entry.label(),
                        source: Box::new(source),
                    }
                })?;
            match (classified, entry.explicit_name()) {
                (Classified::FanOut(_), Some(name)) => {
                    return Err(ClassifyError::NamedFanOut {
                        name: name.to_owned(),
                    });
                }
                (Classified::FanOut(parts), None) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(position = position + 1, parts = parts.len(), "splicing fan-out");

                    out.extend(parts);
                }
                (Classified::Single(expr), Some(name)) => out.push((name.to_owned(), expr)),
                (Classified::Single(expr), None) => {
                    let name = if default_naming {
                        entry.quosure.expr().to_string()
                    } else {
                        String::new()
                    };
                    out.push((name, expr));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use fpl_expr::{Environment, Expr, parse_expr};
    use fpl_remote::ColumnIndex;
    use fpl_runtime::ClassifyPolicy;

    use super::BatchEntry;
    use crate::{Classifier, ClassifyError, FunctionRegistry};

    fn run(input: &str, default_naming: bool) -> Result<Vec<(String, Expr)>, ClassifyError> {
        let columns = ColumnIndex::new(["x", "c1", "c2"]).expect("columns");
        let policy = ClassifyPolicy::default();
        let registry = FunctionRegistry::default();
        let env = Environment::global().bind("k", 2_i64).into_shared();
        let entries = BatchEntry::parse_all(input, &env).expect("parse");
        Classifier::new(&columns, &policy, &registry).classify_batch(&entries, default_naming)
    }

    fn parsed(input: &str) -> Expr {
        parse_expr(input).expect("parse")
    }

    #[test]
    fn splices_unnamed_fan_out_between_named_entries() {
        let out = run("a = x, across(c(c1, c2), f), b = x * k", true).expect("batch");
        let names: Vec<&str> = out.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["a", "c1_f", "c2_f", "b"]);
        assert_eq!(out[1].1, parsed("f(c1)"));
        assert_eq!(out[3].1, parsed("x * 2"));
    }

    #[test]
    fn default_naming_uses_the_deparsed_expression() {
        let out = run("x + k", true).expect("batch");
        assert_eq!(out[0].0, "x + k");
        let out = run("x + k", false).expect("batch");
        assert_eq!(out[0].0, "");
    }

    #[test]
    fn named_fan_out_is_rejected() {
        let err = run("z = across(c(c1, c2), f)", true).expect_err("must fail");
        assert!(matches!(err, ClassifyError::NamedFanOut { name } if name == "z"));
    }

    #[test]
    fn failures_carry_position_and_label() {
        let err = run("a = x, b = missing + 1", true).expect_err("must fail");
        match err {
            ClassifyError::Argument {
                position, label, ..
            } => {
                assert_eq!(position, 2);
                assert_eq!(label, "b");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            err_root("missing"),
            ClassifyError::UnresolvedSymbol { name } if name == "missing"
        ));
    }

    fn err_root(input: &str) -> ClassifyError {
        match run(input, true).expect_err("must fail") {
            ClassifyError::Argument { source, label, .. } => {
                assert_eq!(label, input);
                *source
            }
            other => other,
        }
    }
}
