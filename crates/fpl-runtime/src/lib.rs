#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespaces whose `ns::f` prefix is stripped because the remote engine
/// translates their functions by bare name.
pub const DEFAULT_NAMESPACES: [&str; 4] = ["base", "dplyr", "stringr", "lubridate"];

/// Default bound on classifier recursion.
pub const DEFAULT_MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// A function value the registry could not name.
    UnresolvedFunction,
    /// A call whose head is itself a call outside the namespace allow-list.
    CompoundHead,
}

/// One heuristic decision: a call evaluated locally because it could not be
/// expressed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub kind: FallbackKind,
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackLedger {
    records: Vec<FallbackRecord>,
}

impl FallbackLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        kind: FallbackKind,
        subject: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.records.push(FallbackRecord {
            kind,
            subject: subject.into(),
            reason: reason.into(),
        });
    }

    #[must_use]
    pub fn records(&self) -> &[FallbackRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drain the ledger, leaving it empty.
    pub fn take(&mut self) -> Vec<FallbackRecord> {
        std::mem::take(&mut self.records)
    }

    /// One line per record, oldest first.
    #[must_use]
    pub fn render_plain(&self) -> String {
        self.records
            .iter()
            .map(|record| format!("[{:?}] {}: {}", record.kind, record.subject, record.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Knobs for a classification pass. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyPolicy {
    pub max_depth: usize,
    pub namespaces: BTreeSet<String>,
    /// Name unnamed batch entries after their deparsed expression.
    pub default_naming: bool,
}

impl ClassifyPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            namespaces: DEFAULT_NAMESPACES.iter().map(|ns| (*ns).to_owned()).collect(),
            default_naming: true,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Replace the namespace allow-list.
    #[must_use]
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_default_naming(mut self, default_naming: bool) -> Self {
        self.default_naming = default_naming;
        self
    }

    #[must_use]
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    /// Parse a policy from JSON; omitted fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(input)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn to_json_string(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_depth == 0 {
            return Err(PolicyError::ZeroDepth);
        }
        Ok(())
    }
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("max_depth must be at least 1")]
    ZeroDepth,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
