// Vectorised builtin library bound in `Environment::base()`.
//
// Builtins receive evaluated positional arguments; argument names are not
// forwarded, so aggregates take `(x, na.rm)` positionally.

use std::cmp::Ordering;

use fpl_types::{DType, Scalar, coerce_all};

use crate::{Builtin, Environment, EvalError, Function, Value};

pub type BuiltinFn = fn(&[Value]) -> Result<Value, EvalError>;

/// Longest vector `from:to` may build.
pub const MAX_RANGE_LEN: usize = 1 << 24;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", div),
    ("^", pow),
    ("%%", modulo),
    ("%/%", int_div),
    ("==", eq),
    ("!=", ne),
    (">", gt),
    (">=", ge),
    ("<", lt),
    ("<=", le),
    ("&", and),
    ("&&", and),
    ("|", or),
    ("||", or),
    ("!", not),
    ("%in%", is_in),
    ("c", combine),
    (":", range),
    ("length", length),
    ("sum", sum),
    ("mean", mean),
    ("min", min),
    ("max", max),
    ("n_distinct", n_distinct),
    ("abs", abs),
    ("sqrt", sqrt),
    ("exp", exp),
    ("log", log),
    ("floor", floor),
    ("ceiling", ceiling),
    ("round", round),
    ("paste", paste),
    ("paste0", paste0),
    ("toupper", toupper),
    ("tolower", tolower),
    ("nchar", nchar),
    ("is.na", is_na),
    ("ifelse", ifelse),
    ("if_else", ifelse),
    ("coalesce", coalesce),
    ("as.character", as_character),
    ("as.numeric", as_numeric),
    ("as.integer", as_integer),
    ("identity", identity),
    ("rev", rev),
    ("n", remote_only_n),
    ("row_number", remote_only_row_number),
    ("sql", remote_only_sql),
];

pub(crate) fn install(env: &mut Environment) {
    for (name, imp) in BUILTINS {
        env.define(*name, Function::Builtin(Builtin::new(*name, *imp)));
    }
}

fn atoms<'a>(function: &str, value: &'a Value) -> Result<&'a [Scalar], EvalError> {
    value
        .elements()
        .ok_or_else(|| EvalError::invalid(function, "a function cannot be used as data"))
}

fn exactly<'a, const N: usize>(
    function: &str,
    args: &'a [Value],
) -> Result<&'a [Value; N], EvalError> {
    args.try_into()
        .map_err(|_| EvalError::arity(function, N.to_string(), args.len()))
}

fn recycle(
    a: &[Scalar],
    b: &[Scalar],
    op: impl Fn(&Scalar, &Scalar) -> Result<Scalar, EvalError>,
) -> Result<Value, EvalError> {
    if a.is_empty() || b.is_empty() {
        return Ok(Value::Vector(Vec::new()));
    }
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| op(&a[i % a.len()], &b[i % b.len()]))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::from_scalars)
}

fn map_each(
    function: &str,
    args: &[Value],
    op: impl Fn(&Scalar) -> Result<Scalar, EvalError>,
) -> Result<Value, EvalError> {
    let [x] = exactly::<1>(function, args)?;
    atoms(function, x)?
        .iter()
        .map(op)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::from_scalars)
}

fn is_integral(value: &Scalar) -> bool {
    matches!(value.dtype(), DType::Bool | DType::Int64)
}

// ── Arithmetic ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    IntDiv,
}

fn arith_scalar(op: Arith, left: &Scalar, right: &Scalar) -> Result<Scalar, EvalError> {
    if left.is_missing() || right.is_missing() {
        return Ok(Scalar::na());
    }
    if is_integral(left) && is_integral(right) {
        let (a, b) = (left.to_i64()?, right.to_i64()?);
        let exact = match op {
            Arith::Add => Some(a.checked_add(b)),
            Arith::Sub => Some(a.checked_sub(b)),
            Arith::Mul => Some(a.checked_mul(b)),
            Arith::Mod if b != 0 => Some(a.checked_rem_euclid(b)),
            Arith::IntDiv if b != 0 => Some(a.checked_div_euclid(b)),
            _ => None,
        };
        if let Some(exact) = exact {
            // integer overflow yields NA rather than wrapping
            return Ok(exact.map_or_else(Scalar::na, Scalar::Int64));
        }
    }
    let (a, b) = (left.to_f64()?, right.to_f64()?);
    let out = match op {
        Arith::Add => a + b,
        Arith::Sub => a - b,
        Arith::Mul => a * b,
        Arith::Div => a / b,
        Arith::Pow => a.powf(b),
        Arith::Mod => a - b * (a / b).floor(),
        Arith::IntDiv => (a / b).floor(),
    };
    Ok(Scalar::Float64(out))
}

fn arith(function: &str, op: Arith, args: &[Value]) -> Result<Value, EvalError> {
    let [left, right] = exactly::<2>(function, args)?;
    recycle(atoms(function, left)?, atoms(function, right)?, |a, b| {
        arith_scalar(op, a, b)
    })
}

fn add(args: &[Value]) -> Result<Value, EvalError> {
    if let [only] = args {
        return Ok(only.clone());
    }
    arith("+", Arith::Add, args)
}

fn sub(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() == 1 {
        return map_each("-", args, |value| {
            arith_scalar(Arith::Sub, &Scalar::Int64(0), value)
        });
    }
    arith("-", Arith::Sub, args)
}

fn mul(args: &[Value]) -> Result<Value, EvalError> {
    arith("*", Arith::Mul, args)
}

fn div(args: &[Value]) -> Result<Value, EvalError> {
    arith("/", Arith::Div, args)
}

fn pow(args: &[Value]) -> Result<Value, EvalError> {
    arith("^", Arith::Pow, args)
}

fn modulo(args: &[Value]) -> Result<Value, EvalError> {
    arith("%%", Arith::Mod, args)
}

fn int_div(args: &[Value]) -> Result<Value, EvalError> {
    arith("%/%", Arith::IntDiv, args)
}

// ── Comparison and logic ───────────────────────────────────────────────

fn order(left: &Scalar, right: &Scalar) -> Result<Option<Ordering>, EvalError> {
    if left.is_missing() || right.is_missing() {
        return Ok(None);
    }
    if left.dtype().is_numeric() && right.dtype().is_numeric() {
        return Ok(left.to_f64()?.partial_cmp(&right.to_f64()?));
    }
    // mixed text/number comparisons compare as text
    Ok(Some(left.to_text().cmp(&right.to_text())))
}

fn compare(
    function: &str,
    args: &[Value],
    accept: fn(Ordering) -> bool,
) -> Result<Value, EvalError> {
    let [left, right] = exactly::<2>(function, args)?;
    recycle(atoms(function, left)?, atoms(function, right)?, |a, b| {
        Ok(match order(a, b)? {
            Some(ordering) => Scalar::Bool(accept(ordering)),
            None => Scalar::na(),
        })
    })
}

fn eq(args: &[Value]) -> Result<Value, EvalError> {
    compare("==", args, Ordering::is_eq)
}

fn ne(args: &[Value]) -> Result<Value, EvalError> {
    compare("!=", args, Ordering::is_ne)
}

fn gt(args: &[Value]) -> Result<Value, EvalError> {
    compare(">", args, Ordering::is_gt)
}

fn ge(args: &[Value]) -> Result<Value, EvalError> {
    compare(">=", args, Ordering::is_ge)
}

fn lt(args: &[Value]) -> Result<Value, EvalError> {
    compare("<", args, Ordering::is_lt)
}

fn le(args: &[Value]) -> Result<Value, EvalError> {
    compare("<=", args, Ordering::is_le)
}

fn logical(
    function: &str,
    args: &[Value],
    truth: fn(Option<bool>, Option<bool>) -> Option<bool>,
) -> Result<Value, EvalError> {
    let [left, right] = exactly::<2>(function, args)?;
    recycle(atoms(function, left)?, atoms(function, right)?, |a, b| {
        Ok(truth(a.to_bool()?, b.to_bool()?).map_or_else(Scalar::na, Scalar::Bool))
    })
}

// three-valued logic: FALSE & NA is FALSE, TRUE | NA is TRUE
fn and(args: &[Value]) -> Result<Value, EvalError> {
    logical("&", args, |a, b| match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    })
}

fn or(args: &[Value]) -> Result<Value, EvalError> {
    logical("|", args, |a, b| match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    })
}

fn not(args: &[Value]) -> Result<Value, EvalError> {
    map_each("!", args, |value| {
        Ok(value.to_bool()?.map_or_else(Scalar::na, |v| Scalar::Bool(!v)))
    })
}

fn same_value(left: &Scalar, right: &Scalar) -> bool {
    match (left, right) {
        (Scalar::Null(_), Scalar::Null(_)) => true,
        (Scalar::Utf8(a), Scalar::Utf8(b)) => a == b,
        (a, b) if a.dtype().is_numeric() && b.dtype().is_numeric() => {
            matches!((a.to_f64(), b.to_f64()), (Ok(x), Ok(y)) if x == y)
        }
        _ => false,
    }
}

fn is_in(args: &[Value]) -> Result<Value, EvalError> {
    let [needles, haystack] = exactly::<2>("%in%", args)?;
    let haystack = atoms("%in%", haystack)?;
    Ok(Value::from_scalars(
        atoms("%in%", needles)?
            .iter()
            .map(|needle| Scalar::Bool(haystack.iter().any(|item| same_value(needle, item))))
            .collect(),
    ))
}

// ── Vectors ────────────────────────────────────────────────────────────

fn combine(args: &[Value]) -> Result<Value, EvalError> {
    let mut values = Vec::new();
    for arg in args {
        values.extend_from_slice(atoms("c", arg)?);
    }
    if values.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::from_scalars(coerce_all(values)?))
}

fn first_f64(function: &str, value: &Value) -> Result<f64, EvalError> {
    atoms(function, value)?
        .first()
        .ok_or_else(|| EvalError::invalid(function, "argument of length 0"))?
        .to_f64()
        .map_err(EvalError::from)
}

fn range(args: &[Value]) -> Result<Value, EvalError> {
    let [from, to] = exactly::<2>(":", args)?;
    let (from, to) = (first_f64(":", from)?, first_f64(":", to)?);
    if from.fract() != 0.0 || to.fract() != 0.0 {
        return Err(EvalError::invalid(":", "only integer ranges are supported"));
    }
    if (to - from).abs() >= MAX_RANGE_LEN as f64 {
        return Err(EvalError::invalid(
            ":",
            format!("ranges are limited to {MAX_RANGE_LEN} elements"),
        ));
    }
    let (from, to) = (from as i64, to as i64);
    let values: Vec<Scalar> = if from <= to {
        (from..=to).map(Scalar::Int64).collect()
    } else {
        (to..=from).rev().map(Scalar::Int64).collect()
    };
    Ok(Value::from_scalars(values))
}

fn length(args: &[Value]) -> Result<Value, EvalError> {
    let [x] = exactly::<1>("length", args)?;
    let len = match x {
        Value::Function(_) => 1,
        other => atoms("length", other)?.len(),
    };
    Ok(Value::from(len as i64))
}

fn rev(args: &[Value]) -> Result<Value, EvalError> {
    let [x] = exactly::<1>("rev", args)?;
    let mut values = atoms("rev", x)?.to_vec();
    values.reverse();
    Ok(Value::from_scalars(values))
}

fn identity(args: &[Value]) -> Result<Value, EvalError> {
    let [x] = exactly::<1>("identity", args)?;
    Ok(x.clone())
}

// ── Aggregates ─────────────────────────────────────────────────────────

/// Data argument plus the optional positional `na.rm` flag.
fn aggregate_input(function: &str, args: &[Value]) -> Result<Option<Vec<Scalar>>, EvalError> {
    let (data, na_rm) = match args {
        [data] => (data, false),
        [data, flag] => (
            data,
            atoms(function, flag)?
                .first()
                .map(Scalar::to_bool)
                .transpose()?
                .flatten()
                .unwrap_or(false),
        ),
        _ => return Err(EvalError::arity(function, "1 or 2", args.len())),
    };
    let values = atoms(function, data)?;
    if values.iter().any(Scalar::is_missing) && !na_rm {
        return Ok(None);
    }
    Ok(Some(
        values.iter().filter(|v| !v.is_missing()).cloned().collect(),
    ))
}

fn sum(args: &[Value]) -> Result<Value, EvalError> {
    let Some(values) = aggregate_input("sum", args)? else {
        return Ok(Value::from(Scalar::na()));
    };
    if values.iter().all(is_integral) {
        let mut total: i64 = 0;
        for value in &values {
            match total.checked_add(value.to_i64()?) {
                Some(next) => total = next,
                None => return Ok(Value::from(Scalar::na())),
            }
        }
        return Ok(Value::from(total));
    }
    let total = values
        .iter()
        .map(Scalar::to_f64)
        .sum::<Result<f64, _>>()?;
    Ok(Value::from(total))
}

fn mean(args: &[Value]) -> Result<Value, EvalError> {
    let Some(values) = aggregate_input("mean", args)? else {
        return Ok(Value::from(Scalar::na()));
    };
    if values.is_empty() {
        return Ok(Value::from(Scalar::Float64(f64::NAN)));
    }
    let total = values
        .iter()
        .map(Scalar::to_f64)
        .sum::<Result<f64, _>>()?;
    Ok(Value::from(total / values.len() as f64))
}

fn extreme(function: &str, args: &[Value], wanted: Ordering) -> Result<Value, EvalError> {
    let Some(values) = aggregate_input(function, args)? else {
        return Ok(Value::from(Scalar::na()));
    };
    let mut best: Option<Scalar> = None;
    for value in values {
        best = match best {
            Some(current) if order(&value, &current)? != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    best.map(Value::from)
        .ok_or_else(|| EvalError::invalid(function, "no non-missing arguments"))
}

fn min(args: &[Value]) -> Result<Value, EvalError> {
    extreme("min", args, Ordering::Less)
}

fn max(args: &[Value]) -> Result<Value, EvalError> {
    extreme("max", args, Ordering::Greater)
}

fn n_distinct(args: &[Value]) -> Result<Value, EvalError> {
    let [x] = exactly::<1>("n_distinct", args)?;
    let mut seen: Vec<&Scalar> = Vec::new();
    for value in atoms("n_distinct", x)? {
        if !seen.iter().any(|known| same_value(known, value)) {
            seen.push(value);
        }
    }
    Ok(Value::from(seen.len() as i64))
}

// ── Elementwise math ───────────────────────────────────────────────────

fn float_map(function: &str, args: &[Value], op: fn(f64) -> f64) -> Result<Value, EvalError> {
    map_each(function, args, |value| {
        if value.is_missing() {
            return Ok(Scalar::na());
        }
        Ok(Scalar::Float64(op(value.to_f64()?)))
    })
}

fn abs(args: &[Value]) -> Result<Value, EvalError> {
    map_each("abs", args, |value| match value {
        Scalar::Int64(v) => Ok(v.checked_abs().map_or_else(Scalar::na, Scalar::Int64)),
        Scalar::Bool(v) => Ok(Scalar::Int64(i64::from(*v))),
        Scalar::Null(_) => Ok(Scalar::na()),
        other => Ok(Scalar::Float64(other.to_f64()?.abs())),
    })
}

fn sqrt(args: &[Value]) -> Result<Value, EvalError> {
    float_map("sqrt", args, f64::sqrt)
}

fn exp(args: &[Value]) -> Result<Value, EvalError> {
    float_map("exp", args, f64::exp)
}

fn log(args: &[Value]) -> Result<Value, EvalError> {
    float_map("log", args, f64::ln)
}

fn floor(args: &[Value]) -> Result<Value, EvalError> {
    float_map("floor", args, f64::floor)
}

fn ceiling(args: &[Value]) -> Result<Value, EvalError> {
    float_map("ceiling", args, f64::ceil)
}

fn round(args: &[Value]) -> Result<Value, EvalError> {
    let (x, digits) = match args {
        [x] => (x, 0.0),
        [x, digits] => (x, first_f64("round", digits)?),
        _ => return Err(EvalError::arity("round", "1 or 2", args.len())),
    };
    let scale = 10_f64.powf(digits);
    map_each("round", std::slice::from_ref(x), |value| match value {
        Scalar::Null(_) => Ok(Scalar::na()),
        Scalar::Bool(_) | Scalar::Int64(_) => Ok(value.clone()),
        // halves round to even
        other => Ok(Scalar::Float64((other.to_f64()? * scale).round_ties_even() / scale)),
    })
}

// ── Text ───────────────────────────────────────────────────────────────

fn paste_with(function: &str, args: &[Value], sep: &str) -> Result<Value, EvalError> {
    let columns = args
        .iter()
        .map(|arg| atoms(function, arg))
        .filter(|column| !matches!(column, Ok(values) if values.is_empty()))
        .collect::<Result<Vec<_>, _>>()?;
    let n = columns.iter().map(|column| column.len()).max().unwrap_or(0);
    let rows = (0..n)
        .map(|i| {
            let parts: Vec<String> = columns
                .iter()
                .map(|column| column[i % column.len()].to_text())
                .collect();
            Scalar::Utf8(parts.join(sep))
        })
        .collect();
    Ok(Value::from_scalars(rows))
}

fn paste(args: &[Value]) -> Result<Value, EvalError> {
    paste_with("paste", args, " ")
}

fn paste0(args: &[Value]) -> Result<Value, EvalError> {
    paste_with("paste0", args, "")
}

fn text_map(
    function: &'static str,
    args: &[Value],
    op: fn(&str) -> Scalar,
) -> Result<Value, EvalError> {
    map_each(function, args, |value| match value {
        Scalar::Null(_) => Ok(Scalar::na()),
        other => Ok(op(&other.to_text())),
    })
}

fn toupper(args: &[Value]) -> Result<Value, EvalError> {
    text_map("toupper", args, |text| Scalar::Utf8(text.to_uppercase()))
}

fn tolower(args: &[Value]) -> Result<Value, EvalError> {
    text_map("tolower", args, |text| Scalar::Utf8(text.to_lowercase()))
}

fn nchar(args: &[Value]) -> Result<Value, EvalError> {
    text_map("nchar", args, |text| Scalar::Int64(text.chars().count() as i64))
}

// ── Missing values and casts ───────────────────────────────────────────

fn is_na(args: &[Value]) -> Result<Value, EvalError> {
    map_each("is.na", args, |value| Ok(Scalar::Bool(value.is_missing())))
}

fn ifelse(args: &[Value]) -> Result<Value, EvalError> {
    let [test, yes, no] = exactly::<3>("ifelse", args)?;
    let (test, yes, no) = (
        atoms("ifelse", test)?,
        atoms("ifelse", yes)?,
        atoms("ifelse", no)?,
    );
    if yes.is_empty() || no.is_empty() {
        return Err(EvalError::invalid("ifelse", "branches must not be empty"));
    }
    let out = test
        .iter()
        .enumerate()
        .map(|(i, flag)| {
            Ok(match flag.to_bool()? {
                Some(true) => yes[i % yes.len()].clone(),
                Some(false) => no[i % no.len()].clone(),
                None => Scalar::na(),
            })
        })
        .collect::<Result<Vec<_>, EvalError>>()?;
    Ok(Value::from_scalars(coerce_all(out)?))
}

fn coalesce(args: &[Value]) -> Result<Value, EvalError> {
    let Some((first, rest)) = args.split_first() else {
        return Err(EvalError::arity("coalesce", "at least 1", 0));
    };
    let mut out = atoms("coalesce", first)?.to_vec();
    for fallback in rest {
        let fallback = atoms("coalesce", fallback)?;
        if fallback.is_empty() {
            continue;
        }
        for (i, value) in out.iter_mut().enumerate() {
            if value.is_missing() {
                *value = fallback[i % fallback.len()].clone();
            }
        }
    }
    Ok(Value::from_scalars(coerce_all(out)?))
}

fn as_character(args: &[Value]) -> Result<Value, EvalError> {
    map_each("as.character", args, |value| match value {
        Scalar::Null(_) => Ok(Scalar::na()),
        other => Ok(Scalar::Utf8(other.to_text())),
    })
}

fn parse_number(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Utf8(text) => text.trim().parse::<f64>().ok(),
        other => other.to_f64().ok(),
    }
}

fn as_numeric(args: &[Value]) -> Result<Value, EvalError> {
    map_each("as.numeric", args, |value| {
        Ok(parse_number(value).map_or_else(Scalar::na, Scalar::Float64))
    })
}

fn as_integer(args: &[Value]) -> Result<Value, EvalError> {
    map_each("as.integer", args, |value| {
        Ok(parse_number(value)
            .filter(|v| v.is_finite())
            .map_or_else(Scalar::na, |v| Scalar::Int64(v.trunc() as i64)))
    })
}

// ── Remote-only ────────────────────────────────────────────────────────

fn remote_only_n(_: &[Value]) -> Result<Value, EvalError> {
    Err(EvalError::RemoteOnly("n".to_owned()))
}

fn remote_only_row_number(_: &[Value]) -> Result<Value, EvalError> {
    Err(EvalError::RemoteOnly("row_number".to_owned()))
}

fn remote_only_sql(_: &[Value]) -> Result<Value, EvalError> {
    Err(EvalError::RemoteOnly("sql".to_owned()))
}
