//! Discovery of text fields that can carry embedded file references.
//!
//! Table and column names found here are spliced into SQL by the Postgres
//! repository, so every name passes [`validate_identifier`] first.

use crate::config::FieldConfig;
use crate::error::{ConsolidationError, Result};
use crate::models::{FieldFilter, SyntaxKind};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const RESERVED_KEYWORDS: &[&str] = &[
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC", "BOTH",
    "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT", "CREATE", "CROSS", "DEFAULT",
    "DEFERRABLE", "DELETE", "DESC", "DISTINCT", "DO", "DROP", "ELSE", "END", "EXCEPT", "FALSE",
    "FETCH", "FOR", "FOREIGN", "FROM", "GRANT", "GROUP", "HAVING", "IN", "INITIALLY",
    "INSERT", "INTERSECT", "INTO", "LATERAL", "LEADING", "LIMIT", "NOT", "NULL", "OFFSET",
    "ON", "ONLY", "OR", "ORDER", "PLACING", "PRIMARY", "REFERENCES", "RETURNING", "SELECT",
    "SOME", "SYMMETRIC", "TABLE", "THEN", "TO", "TRAILING", "TRUE", "UNION", "UNIQUE",
    "UPDATE", "USER", "USING", "VARIADIC", "WHEN", "WHERE", "WINDOW", "WITH",
];

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .expect("Invalid regex for identifier validation")
    })
}

/// Validate a table or column name before it is interpolated into SQL.
/// PostgreSQL identifiers must start with a letter or underscore, contain
/// only letters, digits and underscores, be 1-63 characters long and not be
/// a reserved keyword.
pub fn validate_identifier(identifier: &str) -> Result<&str> {
    if identifier.is_empty() {
        return Err(ConsolidationError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if identifier.len() > 63 {
        return Err(ConsolidationError::InvalidIdentifier(format!(
            "identifier too long (max 63 characters): {}",
            identifier.len()
        )));
    }

    if !identifier_regex().is_match(identifier) {
        return Err(ConsolidationError::InvalidIdentifier(format!(
            "'{identifier}' must start with a letter or underscore and contain only letters, digits and underscores"
        )));
    }

    let upper = identifier.to_uppercase();
    if RESERVED_KEYWORDS.contains(&upper.as_str()) {
        return Err(ConsolidationError::InvalidIdentifier(format!(
            "'{identifier}' is a reserved keyword"
        )));
    }

    Ok(identifier)
}

/// Validate and double-quote an identifier for SQL interpolation.
pub fn quote_identifier(identifier: &str) -> Result<String> {
    validate_identifier(identifier).map(|id| format!("\"{id}\""))
}

/// Text fields partitioned by the reference syntax they carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceFields {
    pub bare: BTreeMap<String, Vec<String>>,
    pub tagged: BTreeMap<String, Vec<String>>,
}

impl ReferenceFields {
    /// `(table, field)` pairs carrying the given syntax, in table order.
    pub fn pairs(&self, kind: SyntaxKind) -> Vec<(String, String)> {
        let source = match kind {
            SyntaxKind::Bare => &self.bare,
            SyntaxKind::Tagged => &self.tagged,
        };

        source
            .iter()
            .flat_map(|(table, fields)| {
                fields
                    .iter()
                    .map(move |field| (table.clone(), field.clone()))
            })
            .collect()
    }

    /// Keep only the filtered pair. Without a filter this is a plain copy.
    pub fn restricted(&self, filter: Option<&FieldFilter>) -> Self {
        let Some(filter) = filter else {
            return self.clone();
        };

        let keep = |source: &BTreeMap<String, Vec<String>>| -> BTreeMap<String, Vec<String>> {
            source
                .iter()
                .filter(|(table, _)| **table == filter.table)
                .map(|(table, fields)| {
                    let kept: Vec<String> = fields
                        .iter()
                        .filter(|field| filter.matches(table, field))
                        .cloned()
                        .collect();
                    (table.clone(), kept)
                })
                .filter(|(_, fields)| !fields.is_empty())
                .collect()
        };

        Self {
            bare: keep(&self.bare),
            tagged: keep(&self.tagged),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bare.values().all(Vec::is_empty) && self.tagged.values().all(Vec::is_empty)
    }
}

/// Enumerates which structured fields may contain embedded file references.
pub trait SchemaDiscovery: Send + Sync {
    fn reference_bearing_fields(&self) -> ReferenceFields;
}

/// Field lists taken from configuration, validated once up front.
#[derive(Debug, Clone)]
pub struct ConfiguredSchema {
    fields: ReferenceFields,
}

impl ConfiguredSchema {
    pub fn from_config(config: &FieldConfig) -> Result<Self> {
        for (table, fields) in config.bare.iter().chain(config.tagged.iter()) {
            validate_identifier(table)?;
            for field in fields {
                validate_identifier(field)?;
            }
        }

        Ok(Self {
            fields: ReferenceFields {
                bare: config.bare.clone(),
                tagged: config.tagged.clone(),
            },
        })
    }
}

impl SchemaDiscovery for ConfiguredSchema {
    fn reference_bearing_fields(&self) -> ReferenceFields {
        self.fields.clone()
    }
}
