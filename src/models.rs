use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// A stored asset as seen by the consolidation engine. The engine never
/// writes to these rows except to remove a deleted duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AssetRecord {
    pub id: i64,
    pub content_hash: String,
    pub size_bytes: i64,
    pub location: String,
    pub in_staging: bool,
}

/// Which records feed the canonical index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetScope {
    /// Records whose location starts with the staging prefix
    Staged,
    /// Everything else
    Outside,
}

/// The two consolidation modes. Both map staged records; they differ in
/// where the canonical copy is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationMode {
    /// Duplicates among the staged records themselves
    Internal,
    /// Staged records that duplicate a record outside the staging subset
    External,
}

impl ConsolidationMode {
    pub fn index_scope(self) -> AssetScope {
        match self {
            ConsolidationMode::Internal => AssetScope::Staged,
            ConsolidationMode::External => AssetScope::Outside,
        }
    }
}

impl fmt::Display for ConsolidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidationMode::Internal => write!(f, "internal"),
            ConsolidationMode::External => write!(f, "external"),
        }
    }
}

impl FromStr for ConsolidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "internal" => Ok(ConsolidationMode::Internal),
            "external" => Ok(ConsolidationMode::External),
            _ => Err(format!("Invalid consolidation mode: {s}")),
        }
    }
}

/// Embedded reference syntaxes recognised in text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxKind {
    /// `file:<id><remainder>`
    Bare,
    /// `<link file:<id><remainder>>text</link>`
    Tagged,
}

impl fmt::Display for SyntaxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxKind::Bare => write!(f, "bare"),
            SyntaxKind::Tagged => write!(f, "tagged"),
        }
    }
}

/// A text field value that may embed file references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub owner_table: String,
    pub owner_id: i64,
    pub field_name: String,
    pub raw_content: String,
}

/// Restricts a workflow to a single `(table, field)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldFilter {
    pub table: String,
    pub field: String,
}

impl FieldFilter {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
        }
    }

    pub fn matches(&self, table: &str, field: &str) -> bool {
        self.table == table && self.field == field
    }
}

impl fmt::Display for FieldFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}

/// Per-call options shared by every workflow.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub restrict: Option<FieldFilter>,
}

impl RunOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            restrict: None,
        }
    }

    pub fn live() -> Self {
        Self::default()
    }

    pub fn restricted_to(mut self, filter: FieldFilter) -> Self {
        self.restrict = Some(filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_and_scope() {
        assert_eq!(
            "Internal".parse::<ConsolidationMode>().unwrap(),
            ConsolidationMode::Internal
        );
        assert_eq!(
            "external".parse::<ConsolidationMode>().unwrap(),
            ConsolidationMode::External
        );
        assert!("sideways".parse::<ConsolidationMode>().is_err());

        assert_eq!(ConsolidationMode::Internal.index_scope(), AssetScope::Staged);
        assert_eq!(ConsolidationMode::External.index_scope(), AssetScope::Outside);
    }

    #[test]
    fn test_field_filter_matching() {
        let filter = FieldFilter::new("content", "bodytext");
        assert!(filter.matches("content", "bodytext"));
        assert!(!filter.matches("content", "header_link"));
        assert!(!filter.matches("pages", "bodytext"));
        assert_eq!(filter.to_string(), "content.bodytext");
    }
}
