#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int64 | Self::Float64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Na,
    NaN,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    #[must_use]
    pub fn na() -> Self {
        Self::Null(NullKind::Na)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
        }
    }

    /// Exact integer view of a logical or integer. Doubles must go through
    /// [`cast_scalar`] so lossy casts are reported.
    pub fn to_i64(&self) -> Result<i64, TypeError> {
        match self {
            Self::Bool(v) => Ok(i64::from(*v)),
            Self::Int64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            other => Err(TypeError::InvalidCast {
                from: other.dtype(),
                to: DType::Int64,
            }),
        }
    }

    /// Logical view used by `&`, `|`, `!` and `ifelse`. Missing stays missing.
    pub fn to_bool(&self) -> Result<Option<bool>, TypeError> {
        match self {
            Self::Null(_) => Ok(None),
            Self::Bool(v) => Ok(Some(*v)),
            Self::Int64(v) => Ok(Some(*v != 0)),
            Self::Float64(v) if v.is_nan() => Ok(None),
            Self::Float64(v) => Ok(Some(*v != 0.0)),
            Self::Utf8(_) => Err(TypeError::InvalidCast {
                from: DType::Utf8,
                to: DType::Bool,
            }),
        }
    }

    /// Text used when a scalar is pasted into a string (`paste`, `.names` templates).
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Utf8(v) => v.clone(),
            Self::Bool(true) => "TRUE".to_owned(),
            Self::Bool(false) => "FALSE".to_owned(),
            Self::Int64(v) => v.to_string(),
            Self::Float64(v) => format_float(*v),
            Self::Null(NullKind::Na) => "NA".to_owned(),
            Self::Null(NullKind::NaN) => "NaN".to_owned(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8(v) => {
                f.write_str("\"")?;
                for ch in v.chars() {
                    match ch {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str("\"")
            }
            other => f.write_str(&other.to_text()),
        }
    }
}

fn format_float(v: f64) -> String {
    if v.is_infinite() {
        return if v > 0.0 { "Inf" } else { "-Inf" }.to_owned();
    }
    if v.is_nan() {
        return "NaN".to_owned();
    }
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
}

/// Common dtype of two operands. Mixing text with anything but missing
/// values is rejected rather than coerced to text.
pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool, Float64) | (Float64, Bool) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    values
        .iter()
        .try_fold(DType::Null, |current, value| common_dtype(current, value.dtype()))
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    // NA stays NA whatever the target, as in an R vector
    if from == target || from == DType::Null {
        return Ok(value.clone());
    }

    match (value, target) {
        (_, DType::Null) => Ok(Scalar::na()),
        (Scalar::Int64(v), DType::Bool) => Ok(Scalar::Bool(*v != 0)),
        (Scalar::Float64(v), DType::Bool) => Ok(Scalar::Bool(*v != 0.0)),
        (Scalar::Bool(v), DType::Int64) => Ok(Scalar::Int64(i64::from(*v))),
        (Scalar::Float64(v), DType::Int64) => {
            if !v.is_finite() || *v != v.trunc() || *v < i64::MIN as f64 || *v > i64::MAX as f64 {
                return Err(TypeError::LossyFloatToInt { value: *v });
            }
            Ok(Scalar::Int64(*v as i64))
        }
        (Scalar::Bool(_) | Scalar::Int64(_), DType::Float64) => Ok(Scalar::Float64(value.to_f64()?)),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}

/// Coerce a heterogeneous run of scalars to their common dtype, as `c()` does.
pub fn coerce_all(values: Vec<Scalar>) -> Result<Vec<Scalar>, TypeError> {
    let target = infer_dtype(&values)?;
    if target == DType::Null {
        return Ok(values);
    }
    values
        .iter()
        .map(|value| cast_scalar(value, target))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{DType, Scalar, TypeError, cast_scalar, coerce_all, common_dtype, infer_dtype};

    #[test]
    fn logicals_and_integers_widen_to_double() {
        let literal = [Scalar::Bool(true), Scalar::Int64(7), Scalar::Float64(3.5)];
        assert_eq!(infer_dtype(&literal).expect("dtype"), DType::Float64);
        assert_eq!(common_dtype(DType::Null, DType::Utf8).expect("dtype"), DType::Utf8);
    }

    #[test]
    fn text_never_mixes_with_numbers() {
        assert!(matches!(
            common_dtype(DType::Float64, DType::Utf8),
            Err(TypeError::IncompatibleDtypes {
                left: DType::Float64,
                right: DType::Utf8
            })
        ));
        assert!(coerce_all(vec![Scalar::from("a"), Scalar::Bool(false)]).is_err());
    }

    #[test]
    fn coerce_all_keeps_na_in_a_double_vector() {
        let out = coerce_all(vec![Scalar::Int64(1), Scalar::Float64(2.5), Scalar::na()])
            .expect("coerces");
        assert_eq!(out, vec![Scalar::Float64(1.0), Scalar::Float64(2.5), Scalar::na()]);
    }

    #[test]
    fn whole_doubles_cast_to_integers_only_when_exact() {
        assert_eq!(
            cast_scalar(&Scalar::Float64(4.0), DType::Int64).expect("cast"),
            Scalar::Int64(4)
        );
        assert!(matches!(
            cast_scalar(&Scalar::Float64(4.5), DType::Int64),
            Err(TypeError::LossyFloatToInt { .. })
        ));
    }

    #[test]
    fn display_quotes_text_and_spells_logicals() {
        assert_eq!(Scalar::from("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Scalar::Bool(true).to_string(), "TRUE");
        assert_eq!(Scalar::Float64(1980.0).to_string(), "1980.0");
        assert_eq!(Scalar::Int64(1980).to_string(), "1980");
        assert_eq!(Scalar::na().to_string(), "NA");
    }

    #[test]
    fn to_bool_keeps_missing_as_unknown() {
        assert_eq!(Scalar::na().to_bool().expect("bool"), None);
        assert_eq!(Scalar::Int64(2).to_bool().expect("bool"), Some(true));
        assert!(Scalar::from("x").to_bool().is_err());
    }

    #[test]
    fn to_i64_is_exact_above_double_precision() {
        let big = (1_i64 << 53) + 1;
        assert_eq!(Scalar::Int64(big).to_i64().expect("int"), big);
        assert_eq!(Scalar::Bool(true).to_i64().expect("int"), 1);
        assert!(matches!(
            Scalar::Float64(1.0).to_i64(),
            Err(TypeError::InvalidCast { from: DType::Float64, to: DType::Int64 })
        ));
    }

    #[test]
    fn scalar_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Scalar::Int64(3)).expect("json");
        assert_eq!(json, r#"{"kind":"int64","value":3}"#);
    }
}
