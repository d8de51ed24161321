//! Catalog accessor backed by a schema snapshot file.
//!
//! Used for offline runs where no database is reachable. `execute` performs a
//! name-resolution check only: unknown relations and unknown bracketed column
//! names are reported with SQL Server's wording so the validation loop
//! classifies them the same way it would live errors. No rows are produced.

use async_trait::async_trait;
use quarry_core::{ConfigError, ExecutionError, ExecutionResult, SchemaCatalog};
use quarry_sql::clauses::all_relations;
use quarry_sql::text::mask_literals;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::debug;

use crate::adapter::CatalogAccessor;

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("valid bracket regex"));

static DECLARED_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bAS\s+(?:\[([^\]]+)\]|([A-Za-z_][\w]*))").expect("valid alias regex")
});

/// A [`CatalogAccessor`] over a fixed [`SchemaCatalog`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotCatalog {
    catalog: SchemaCatalog,
}

impl SnapshotCatalog {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Load a YAML or JSON snapshot.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::new(SchemaCatalog::from_file(path)?))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    fn resolve(&self, sql: &str) -> Result<(), ExecutionError> {
        let relations = all_relations(sql);
        let mut known = Vec::with_capacity(relations.len());
        for name in &relations {
            match self.catalog.relation(name) {
                Some(relation) => known.push(relation),
                None => {
                    return Err(ExecutionError::new(format!(
                        "Invalid object name '{}'.",
                        name
                    )));
                }
            }
        }

        let masked = mask_literals(sql);

        // Path segments of relation names and declared aliases are not columns.
        let mut skip: HashSet<String> = relations
            .iter()
            .flat_map(|r| r.split('.'))
            .map(str::to_lowercase)
            .collect();
        for caps in DECLARED_ALIAS.captures_iter(&masked) {
            if let Some(alias) = caps.get(1).or_else(|| caps.get(2)) {
                skip.insert(alias.as_str().to_lowercase());
            }
        }

        for m in BRACKETED.captures_iter(&masked) {
            let Some(whole) = m.get(0) else { continue };
            let name = &m[1];
            if skip.contains(&name.to_lowercase()) || masked[whole.end()..].starts_with('.') {
                continue;
            }
            if !known.iter().any(|r| r.has_column(name)) {
                return Err(ExecutionError::new(format!(
                    "Invalid column name '{}'.",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogAccessor for SnapshotCatalog {
    async fn describe(&self) -> Result<SchemaCatalog, ExecutionError> {
        Ok(self.catalog.clone())
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        self.resolve(sql)?;
        debug!("snapshot probe resolved");
        Ok(ExecutionResult {
            execution_time_ms: started.elapsed().as_millis() as u64,
            ..ExecutionResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::RelationSchema;

    fn snapshot() -> SnapshotCatalog {
        SnapshotCatalog::new(SchemaCatalog::new(vec![
            RelationSchema::new("Sales")
                .with_column("Region", "varchar(50)")
                .with_column("SalesAmount", "decimal(18,2)")
                .with_column("TenantId", "int"),
        ]))
    }

    #[tokio::test]
    async fn test_known_names_resolve() {
        let result = snapshot()
            .execute("SELECT [Region], SUM([SalesAmount]) AS [Total] FROM [dbo].[Sales] WHERE 1 = 0 GROUP BY [Region] ORDER BY [Total];")
            .await
            .unwrap();
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_relation() {
        let err = snapshot().execute("SELECT * FROM [Stock];").await.unwrap_err();
        assert_eq!(err.message, "Invalid object name 'Stock'.");
    }

    #[tokio::test]
    async fn test_unknown_column_ignores_literals() {
        let err = snapshot()
            .execute("SELECT SUM([SalesAmt]) FROM [Sales] WHERE [Region] = '[Nope]';")
            .await
            .unwrap_err();
        assert_eq!(err.message, "Invalid column name 'SalesAmt'.");
    }

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{"relations": [{"name": "Stock", "columns": [{"name": "ItemNo", "type": "varchar(20)"}]}]}"#,
        )
        .unwrap();

        let snapshot = SnapshotCatalog::from_file(&path).unwrap();
        let described = snapshot.describe().await.unwrap();
        assert_eq!(described.relations.len(), 1);
        assert!(snapshot.execute("SELECT [ItemNo] FROM [Stock];").await.is_ok());
    }
}
