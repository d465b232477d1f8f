use fpl_expr::EvalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("column `{name}` doesn't exist")]
    UnknownColumn { name: String },
    #[error("selection helper `{name}()` is not supported")]
    UnsupportedHelper { name: String },
    #[error("location {position} is out of bounds for {len} columns")]
    OutOfBounds { position: i64, len: usize },
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid `matches()` pattern")]
    Pattern(#[from] regex::Error),
    #[error("selector argument could not be evaluated: {0}")]
    Evaluation(#[source] EvalError),
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("object `{name}` not found in the remote table or the local environment")]
    UnresolvedSymbol { name: String },
    #[error("invalid override: {reason}")]
    InvalidOverride { reason: String },
    #[error("`{name}` cannot name a multi-column expansion; leave the argument unnamed")]
    NamedFanOut { name: String },
    #[error("`{function}()` expands to several columns and must be a top-level argument")]
    NestedFanOut { function: String },
    #[error("local evaluation failed: {0}")]
    LocalEvaluation(#[source] EvalError),
    #[error("cannot use a value of kind `{kind}` as a function")]
    UnknownInputKind { kind: String },
    #[error("invalid column expansion: {reason}")]
    InvalidAcross { reason: String },
    #[error(transparent)]
    Selection(#[from] SelectError),
    #[error("expression nesting exceeds the classification limit of {limit}")]
    DepthExceeded { limit: usize },
    #[error("problem with argument {position} (`{label}`)")]
    Argument {
        position: usize,
        label: String,
        source: Box<ClassifyError>,
    },
}

impl ClassifyError {
    pub(crate) fn invalid_override(reason: impl Into<String>) -> Self {
        Self::InvalidOverride {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_across(reason: impl Into<String>) -> Self {
        Self::InvalidAcross {
            reason: reason.into(),
        }
    }

    /// The innermost error, looking through batch argument context.
    #[must_use]
    pub fn root_cause(&self) -> &ClassifyError {
        match self {
            Self::Argument { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
