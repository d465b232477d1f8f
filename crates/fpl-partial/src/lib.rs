#![forbid(unsafe_code)]

//! Partial evaluation of mixed local/remote expressions.
//!
//! Every symbol in an expression is either a column of the remote table,
//! which stays a symbol, or a value from the caller's environment, which is
//! substituted as a literal. `local()` and `remote()` override the choice,
//! the `.data` and `.env` pronouns force it, and `across()`-style column
//! expansions fan a single argument out into several named expressions.

mod across;
mod batch;
mod call;
mod classify;
mod error;
mod registry;
mod select;

pub use batch::BatchEntry;
pub use classify::{Classified, Classifier};
pub use error::{ClassifyError, SelectError};
pub use registry::FunctionRegistry;
pub use select::{ColumnSelector, TidySelect};
