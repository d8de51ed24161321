//! Schema catalog snapshot types.
//!
//! A [`SchemaCatalog`] is a read-only snapshot of the relations visible to a
//! request. It is fetched once per request from the catalog accessor and
//! filtered through the active policy so excluded relations never reach the
//! synthesizer, the prompt builder or the fallback path.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::{ConfigError, PolicyConfig};

/// Relations visible to a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub relations: Vec<RelationSchema>,
}

impl SchemaCatalog {
    pub fn new(relations: Vec<RelationSchema>) -> Self {
        Self { relations }
    }

    /// Load a snapshot from a YAML or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a snapshot (JSON is a subset of YAML).
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Look a relation up by name, ignoring case and brackets.
    pub fn relation(&self, name: &str) -> Option<&RelationSchema> {
        let name = name.trim().trim_start_matches('[').trim_end_matches(']');
        let name = name.rsplit('.').next().unwrap_or(name);
        self.relations
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|r| r.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Drop every relation matched by the policy's exclusion patterns.
    pub fn without_excluded(mut self, policy: &PolicyConfig) -> Self {
        self.relations.retain(|r| !policy.is_excluded(&r.name));
        self
    }
}

/// A table or view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSchema {
    pub name: String,

    /// Approximate row count, if the accessor knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count_hint: Option<u64>,

    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

impl RelationSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row_count_hint: None,
            columns: Vec::new(),
        }
    }

    /// Builder-style column append.
    pub fn with_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.columns.push(ColumnSchema::new(name, data_type));
        self
    }

    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count_hint = Some(rows);
        self
    }

    /// Look a column up by name, ignoring case and brackets.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        let name = name.trim().trim_start_matches('[').trim_end_matches(']');
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,

    /// SQL data type as reported by the database.
    #[serde(rename = "type", alias = "data_type")]
    pub data_type: String,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    fn base_type(&self) -> String {
        self.data_type
            .split('(')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }

    /// Whether the column may appear in ORDER BY / GROUP BY.
    pub fn is_orderable(&self) -> bool {
        !matches!(
            self.base_type().as_str(),
            "text" | "ntext" | "image" | "xml" | "geography" | "geometry" | "varbinary"
                | "binary" | "hierarchyid" | "sql_variant"
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "int" | "bigint" | "smallint" | "tinyint" | "decimal" | "numeric" | "float"
                | "real" | "money" | "smallmoney" | "integer" | "double"
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "time"
                | "timestamp"
        )
    }
}

/// Result of the accessor's execute primitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub total_count: u64,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_lookup_ignores_case_and_brackets() {
        let catalog = SchemaCatalog::new(vec![
            RelationSchema::new("Sales").with_column("Amount", "decimal(18,2)"),
        ]);
        assert!(catalog.relation("[sales]").is_some());
        assert!(catalog.relation("dbo.Sales").is_some());
        assert!(catalog.relation("Stock").is_none());

        let sales = catalog.relation("SALES").unwrap();
        assert!(sales.has_column("[amount]"));
        assert!(sales.column("Amount").unwrap().is_numeric());
    }

    #[test]
    fn test_orderable_types() {
        assert!(ColumnSchema::new("Id", "int").is_orderable());
        assert!(!ColumnSchema::new("Doc", "xml").is_orderable());
        assert!(!ColumnSchema::new("Blob", "varbinary(max)").is_orderable());
        assert!(ColumnSchema::new("At", "datetime2(7)").is_temporal());
    }

    #[test]
    fn test_excluded_relations_are_dropped() {
        let catalog = SchemaCatalog::new(vec![
            RelationSchema::new("Sales"),
            RelationSchema::new("sysdiagrams"),
            RelationSchema::new("__migrations"),
        ]);
        let filtered = catalog.without_excluded(&PolicyConfig::default());
        let names: Vec<&str> = filtered.relation_names().collect();
        assert_eq!(names, vec!["Sales"]);
    }

    #[test]
    fn test_parse_snapshot() {
        let yaml = r#"
relations:
  - name: Sales
    row_count_hint: 1200
    columns:
      - { name: SaleId, type: int }
      - { name: SalesAmount, type: "decimal(18,2)" }
"#;
        let catalog = SchemaCatalog::from_yaml(yaml).unwrap();
        let sales = catalog.relation("Sales").unwrap();
        assert_eq!(sales.row_count_hint, Some(1200));
        assert_eq!(sales.columns.len(), 2);
    }
}
