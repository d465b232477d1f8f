// Tidyselect-style column selection against a remote column set.

use std::sync::Arc;

use fpl_expr::{Arg, Environment, Expr, Value, eval};
use fpl_remote::ColumnIndex;
use fpl_types::Scalar;
use regex::RegexBuilder;

use crate::call::negated;
use crate::error::SelectError;

/// Resolves a selection expression such as `c(a, starts_with("x"))` to
/// column names.
pub trait ColumnSelector {
    fn resolve(
        &self,
        selector: &Expr,
        columns: &ColumnIndex,
        env: &Arc<Environment>,
    ) -> Result<Vec<String>, SelectError>;
}

/// Bare names, strings, positions, `c()`, `a:b` ranges, `-`/`!` negation,
/// `|`/`&` set operations and the usual helpers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TidySelect;

impl ColumnSelector for TidySelect {
    fn resolve(
        &self,
        selector: &Expr,
        columns: &ColumnIndex,
        env: &Arc<Environment>,
    ) -> Result<Vec<String>, SelectError> {
        let scope = Scope { columns, env };
        let positions = scope.combine(std::slice::from_ref(selector))?;
        Ok(positions
            .into_iter()
            .map(|position| columns.names()[position].clone())
            .collect())
    }
}

struct Scope<'a> {
    columns: &'a ColumnIndex,
    env: &'a Arc<Environment>,
}

fn push_unique(selected: &mut Vec<usize>, positions: impl IntoIterator<Item = usize>) {
    for position in positions {
        if !selected.contains(&position) {
            selected.push(position);
        }
    }
}

impl Scope<'_> {
    fn all(&self) -> Vec<usize> {
        (0..self.columns.len()).collect()
    }

    /// Left-to-right union; a negation removes from what came before, or
    /// from every column when it comes first.
    fn combine(&self, items: &[Expr]) -> Result<Vec<usize>, SelectError> {
        let mut selected = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if let Some(dropped) = self.negation(item)? {
                if i == 0 {
                    selected = self.all();
                }
                selected.retain(|position| !dropped.contains(position));
            } else {
                push_unique(&mut selected, self.select(item)?);
            }
        }
        Ok(selected)
    }

    fn negation(&self, expr: &Expr) -> Result<Option<Vec<usize>>, SelectError> {
        if let Some(operand) = negated(expr) {
            return self.select(operand).map(Some);
        }
        // `-2` arrives as a folded literal
        if let Expr::Literal { value } = expr {
            if let Some(positions) = integer_positions(value) {
                if !positions.is_empty() && positions.iter().all(|p| *p < 0) {
                    let flipped: Vec<i64> = positions.iter().map(|p| -p).collect();
                    return self.locations(&flipped).map(Some);
                }
            }
        }
        Ok(None)
    }

    fn select(&self, expr: &Expr) -> Result<Vec<usize>, SelectError> {
        match expr {
            Expr::Symbol { name } => self.symbol(name),
            Expr::Literal { value } => self.value(value, expr),
            Expr::Quoted(quosure) => Scope {
                columns: self.columns,
                env: quosure.env(),
            }
            .select(quosure.expr()),
            Expr::Call { func, args } => {
                if let Some(dropped) = self.negation(expr)? {
                    let mut rest = self.all();
                    rest.retain(|position| !dropped.contains(position));
                    return Ok(rest);
                }
                let Some(name) = func.as_symbol() else {
                    return Err(invalid(expr, "selection helpers must be called by name"));
                };
                self.helper(name, args, expr)
            }
        }
    }

    fn symbol(&self, name: &str) -> Result<Vec<usize>, SelectError> {
        if let Some(position) = self.columns.position(name) {
            return Ok(vec![position]);
        }
        // a local variable holding column names
        match self.env.lookup(name) {
            Some(value @ (Value::Scalar(_) | Value::Vector(_))) => {
                self.value(&value, &Expr::symbol(name))
            }
            _ => Err(SelectError::UnknownColumn {
                name: name.to_owned(),
            }),
        }
    }

    fn value(&self, value: &Value, origin: &Expr) -> Result<Vec<usize>, SelectError> {
        if let Some(positions) = integer_positions(value) {
            return self.locations(&positions);
        }
        let names = string_values(value).ok_or_else(|| {
            invalid(origin, "must be column names or positions")
        })?;
        self.named(&names, true)
    }

    fn named(&self, names: &[String], strict: bool) -> Result<Vec<usize>, SelectError> {
        let mut out = Vec::new();
        for name in names {
            match self.columns.position(name) {
                Some(position) => push_unique(&mut out, [position]),
                None if strict => {
                    return Err(SelectError::UnknownColumn { name: name.clone() });
                }
                None => {}
            }
        }
        Ok(out)
    }

    fn locations(&self, positions: &[i64]) -> Result<Vec<usize>, SelectError> {
        let len = self.columns.len();
        let mut out = Vec::new();
        for &position in positions {
            if position < 1 || position as usize > len {
                return Err(SelectError::OutOfBounds { position, len });
            }
            push_unique(&mut out, [position as usize - 1]);
        }
        Ok(out)
    }

    fn evaluate(&self, expr: &Expr) -> Result<Value, SelectError> {
        eval(expr, self.env).map_err(SelectError::Evaluation)
    }

    fn helper(&self, name: &str, args: &[Arg], call: &Expr) -> Result<Vec<usize>, SelectError> {
        match name {
            "c" => {
                let items: Vec<Expr> = args.iter().map(|arg| arg.value.clone()).collect();
                self.combine(&items)
            }
            ":" => self.range(args, call),
            "|" | "&" => {
                let [left, right] = args else {
                    return Err(invalid(call, "expected two operands"));
                };
                let (left, right) = (self.select(&left.value)?, self.select(&right.value)?);
                if name == "|" {
                    let mut out = left;
                    push_unique(&mut out, right);
                    Ok(out)
                } else {
                    Ok(left.into_iter().filter(|p| right.contains(p)).collect())
                }
            }
            "everything" => Ok(self.all()),
            "last_col" => {
                let offset = match args.first() {
                    Some(arg) => first_integer(&self.evaluate(&arg.value)?)
                        .ok_or_else(|| invalid(call, "`offset` must be a whole number"))?,
                    None => 0,
                };
                let len = self.columns.len();
                let position = (len as i64).checked_sub(offset).ok_or(
                    SelectError::OutOfBounds {
                        position: offset,
                        len,
                    },
                )?;
                self.locations(&[position])
            }
            "all_of" | "any_of" => {
                let [arg] = args else {
                    return Err(invalid(call, "expected a single vector of names"));
                };
                let value = self.evaluate(&arg.value)?;
                if let Some(positions) = integer_positions(&value) {
                    return self.locations(&positions);
                }
                let names = string_values(&value)
                    .ok_or_else(|| invalid(call, "expected a character vector"))?;
                self.named(&names, name == "all_of")
            }
            "starts_with" | "ends_with" | "contains" | "matches" => {
                self.pattern(name, args, call)
            }
            other => Err(SelectError::UnsupportedHelper {
                name: other.to_owned(),
            }),
        }
    }

    fn range(&self, args: &[Arg], call: &Expr) -> Result<Vec<usize>, SelectError> {
        let [from, to] = args else {
            return Err(invalid(call, "expected `from:to`"));
        };
        let bound = |expr: &Expr| -> Result<usize, SelectError> {
            let positions = match expr {
                Expr::Symbol { name } if self.columns.contains(name) => self.symbol(name)?,
                other => {
                    let value = self.evaluate(other)?;
                    match first_integer(&value) {
                        Some(position) => self.locations(&[position])?,
                        None => self.value(&value, other)?,
                    }
                }
            };
            match positions.as_slice() {
                [position] => Ok(*position),
                _ => Err(invalid(call, "range bounds must name one column each")),
            }
        };
        let (from, to) = (bound(&from.value)?, bound(&to.value)?);
        Ok(if from <= to {
            (from..=to).collect()
        } else {
            (to..=from).rev().collect()
        })
    }

    fn pattern(&self, helper: &str, args: &[Arg], call: &Expr) -> Result<Vec<usize>, SelectError> {
        let mut needles = Vec::new();
        let mut ignore_case = true;
        for arg in args {
            let value = self.evaluate(&arg.value)?;
            match arg.name.as_deref() {
                Some("ignore.case") => {
                    ignore_case = value == Value::from(true);
                }
                Some("match") | None => needles.extend(
                    string_values(&value)
                        .ok_or_else(|| invalid(call, "patterns must be strings"))?,
                ),
                Some(other) => {
                    return Err(invalid(call, format!("unknown argument `{other}`")));
                }
            }
        }
        if needles.is_empty() {
            return Err(invalid(call, "at least one pattern is required"));
        }

        let fold = |text: &str| {
            if ignore_case {
                text.to_lowercase()
            } else {
                text.to_owned()
            }
        };
        let regexes = if helper == "matches" {
            needles
                .iter()
                .map(|needle| {
                    RegexBuilder::new(needle)
                        .case_insensitive(ignore_case)
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let hit = |column: &str| -> bool {
            let column_folded = fold(column);
            match helper {
                "starts_with" => needles.iter().any(|n| column_folded.starts_with(&fold(n))),
                "ends_with" => needles.iter().any(|n| column_folded.ends_with(&fold(n))),
                "contains" => needles.iter().any(|n| column_folded.contains(&fold(n))),
                _ => regexes.iter().any(|re| re.is_match(column)),
            }
        };
        Ok(self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| hit(*column))
            .map(|(position, _)| position)
            .collect())
    }
}

fn integer_positions(value: &Value) -> Option<Vec<i64>> {
    value
        .elements()?
        .iter()
        .map(|element| match element {
            Scalar::Int64(v) => Some(*v),
            Scalar::Float64(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        })
        .collect()
}

fn first_integer(value: &Value) -> Option<i64> {
    match integer_positions(value)?.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

fn string_values(value: &Value) -> Option<Vec<String>> {
    value
        .elements()?
        .iter()
        .map(|element| element.as_str().map(str::to_owned))
        .collect()
}

fn invalid(selector: &Expr, reason: impl Into<String>) -> SelectError {
    SelectError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}
