#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("column `{name}` appears more than once")]
    DuplicateColumn { name: String },
    #[error("table identifiers must not be empty")]
    EmptyIdentifier,
}

/// Ordered, duplicate-free column names of a remote table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ColumnIndex {
    names: Vec<String>,
    positions: BTreeMap<String, usize>,
}

impl ColumnIndex {
    pub fn new<I, S>(names: I) -> Result<Self, RemoteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for name in names {
            let name = name.into();
            if index.positions.contains_key(&name) {
                return Err(RemoteError::DuplicateColumn { name });
            }
            index.positions.insert(name.clone(), index.names.len());
            index.names.push(name);
        }
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for ColumnIndex {
    type Error = RemoteError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<ColumnIndex> for Vec<String> {
    fn from(index: ColumnIndex) -> Self {
        index.names
    }
}

/// Anything whose column names the classifier can consult.
pub trait RemoteDataset {
    fn known_variable_names(&self) -> &ColumnIndex;

    fn is_remote_variable(&self, name: &str) -> bool {
        self.known_variable_names().contains(name)
    }
}

impl RemoteDataset for ColumnIndex {
    fn known_variable_names(&self) -> &ColumnIndex {
        self
    }
}

/// Quotes a single identifier for a particular SQL dialect.
pub trait IdentQuoter {
    fn quote(&self, ident: &str) -> String;
}

/// Standard SQL double quotes; embedded quotes are doubled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnsiQuoter;

impl IdentQuoter for AnsiQuoter {
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// MySQL / BigQuery style backticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacktickQuoter;

impl IdentQuoter for BacktickQuoter {
    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRef {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableRef {
    Bare { table: String },
    Schema(SchemaRef),
    Catalog(CatalogRef),
}

fn non_empty(parts: &[&str]) -> Result<(), RemoteError> {
    if parts.iter().any(|part| part.is_empty()) {
        return Err(RemoteError::EmptyIdentifier);
    }
    Ok(())
}

impl TableRef {
    pub fn bare(table: impl Into<String>) -> Result<Self, RemoteError> {
        let table = table.into();
        non_empty(&[&table])?;
        Ok(Self::Bare { table })
    }

    /// `schema.table`
    pub fn in_schema(
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let (schema, table) = (schema.into(), table.into());
        non_empty(&[&schema, &table])?;
        Ok(Self::Schema(SchemaRef { schema, table }))
    }

    /// `catalog.schema.table`
    pub fn in_catalog(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let (catalog, schema, table) = (catalog.into(), schema.into(), table.into());
        non_empty(&[&catalog, &schema, &table])?;
        Ok(Self::Catalog(CatalogRef {
            catalog,
            schema,
            table,
        }))
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        match self {
            Self::Bare { table }
            | Self::Schema(SchemaRef { table, .. })
            | Self::Catalog(CatalogRef { table, .. }) => table,
        }
    }

    fn parts(&self) -> Vec<&str> {
        match self {
            Self::Bare { table } => vec![table.as_str()],
            Self::Schema(r) => vec![r.schema.as_str(), r.table.as_str()],
            Self::Catalog(r) => vec![r.catalog.as_str(), r.schema.as_str(), r.table.as_str()],
        }
    }

    /// Dotted identifier with every part quoted by `quoter`.
    #[must_use]
    pub fn render(&self, quoter: &dyn IdentQuoter) -> String {
        self.parts()
            .into_iter()
            .map(|part| quoter.quote(part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&AnsiQuoter))
    }
}

/// A remote table: where it lives and which columns it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTable {
    table: TableRef,
    columns: ColumnIndex,
}

impl RemoteTable {
    #[must_use]
    pub fn new(table: TableRef, columns: ColumnIndex) -> Self {
        Self { table, columns }
    }

    pub fn with_columns<I, S>(table: TableRef, columns: I) -> Result<Self, RemoteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::new(table, ColumnIndex::new(columns)?))
    }

    #[must_use]
    pub fn table(&self) -> &TableRef {
        &self.table
    }
}

impl RemoteDataset for RemoteTable {
    fn known_variable_names(&self) -> &ColumnIndex {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AnsiQuoter, BacktickQuoter, ColumnIndex, RemoteDataset, RemoteError, RemoteTable,
        TableRef,
    };

    #[test]
    fn column_index_keeps_order_and_rejects_duplicates() {
        let index = ColumnIndex::new(["year", "id", "score"]).expect("index");
        assert_eq!(index.names(), ["year", "id", "score"]);
        assert_eq!(index.position("score"), Some(2));
        assert!(index.contains("id"));
        assert!(!index.contains("Year"));

        assert_eq!(
            ColumnIndex::new(["a", "b", "a"]),
            Err(RemoteError::DuplicateColumn {
                name: "a".to_owned()
            })
        );
    }

    #[test]
    fn column_index_serializes_as_plain_list() {
        let index = ColumnIndex::new(["a", "b"]).expect("index");
        let json = serde_json::to_string(&index).expect("serialize");
        assert_eq!(json, r#"["a","b"]"#);
        let back: ColumnIndex = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, index);
        assert!(serde_json::from_str::<ColumnIndex>(r#"["a","a"]"#).is_err());
    }

    #[test]
    fn table_refs_render_with_dialect_quoting() {
        let table = TableRef::in_catalog("lake", "sales", "orders").expect("ref");
        assert_eq!(table.render(&AnsiQuoter), r#""lake"."sales"."orders""#);
        assert_eq!(table.render(&BacktickQuoter), "`lake`.`sales`.`orders`");

        let odd = TableRef::in_schema("my\"schema", "t").expect("ref");
        assert_eq!(odd.to_string(), r#""my""schema"."t""#);
        assert_eq!(odd.table_name(), "t");

        assert_eq!(TableRef::in_schema("", "t"), Err(RemoteError::EmptyIdentifier));
    }

    #[test]
    fn remote_table_exposes_its_columns() {
        let table = RemoteTable::with_columns(TableRef::bare("flights").expect("ref"), ["year", "id"])
            .expect("table");
        assert!(table.is_remote_variable("year"));
        assert!(!table.is_remote_variable("month"));
        assert_eq!(table.known_variable_names().len(), 2);
        assert_eq!(table.table().table_name(), "flights");
    }
}
