//! `quarry synthesize`, `quarry rewrite`, `quarry build` and `quarry repair`.

use anyhow::{Context, Result};
use quarry_core::{CanonicalRequest, QuarryConfig};
use quarry_runtime::{FuzzyMatcher, QueryEngine, SnapshotCatalog};
use quarry_sql::{Rewriter, StatementGuard, synthesize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Arguments of `quarry build`.
#[derive(Debug)]
pub struct BuildInput {
    pub schema: PathBuf,
    pub request: Option<PathBuf>,
    pub text: Option<String>,
    pub model: Option<String>,
    pub json: bool,
}

/// Parse a request file (JSON is a subset of YAML).
pub fn load_request(path: &Path) -> Result<CanonicalRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse request {}", path.display()))
}

pub fn run_synthesize(config: &QuarryConfig, request: &Path, raw: bool) -> Result<()> {
    let request = load_request(request)?;
    let sql = synthesize(&request, &config.policy)?;
    if raw {
        println!("{}", sql);
        return Ok(());
    }
    println!(
        "{}",
        Rewriter::new(config.validation.top_cap).rewrite(&sql, &config.policy)
    );
    Ok(())
}

pub fn run_rewrite(config: &QuarryConfig, sql: Option<String>, file: Option<&Path>) -> Result<()> {
    let sql = match (sql, file) {
        (Some(sql), _) => sql,
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read SQL from stdin")?;
            buf
        }
    };

    let rewritten = Rewriter::new(config.validation.top_cap).rewrite(&sql, &config.policy);
    println!("{}", rewritten);
    StatementGuard::new().check(&rewritten, &config.policy)?;
    Ok(())
}

pub async fn run_build(config: &QuarryConfig, input: BuildInput) -> Result<()> {
    let catalog = SnapshotCatalog::from_file(&input.schema)
        .with_context(|| format!("failed to load schema snapshot {}", input.schema.display()))?;

    let mut request = match (&input.request, &input.text) {
        (Some(path), _) => load_request(path)?,
        (None, Some(text)) => CanonicalRequest::from_free_text(text.clone()),
        (None, None) => anyhow::bail!("either --request or --text is required"),
    };
    if input.model.is_some() {
        request.model = input.model;
    }

    let engine = QueryEngine::from_config(catalog, config)?;
    let result = engine.build_query(request).await?;

    if input.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for warning in &result.warnings {
            eprintln!("warning: {}", warning);
        }
        println!("{}", result.sql);
    }
    Ok(())
}

pub fn run_repair(name: &str, relation: &str, schema: &Path) -> Result<()> {
    let snapshot = SnapshotCatalog::from_file(schema)
        .with_context(|| format!("failed to load schema snapshot {}", schema.display()))?;
    if snapshot.catalog().relation(relation).is_none() {
        anyhow::bail!("relation '{}' is not in the snapshot", relation);
    }

    match FuzzyMatcher::default().repair(name, relation, snapshot.catalog()) {
        Some(hit) => println!("{} ({} match)", hit.column, hit.strategy),
        None => anyhow::bail!("no column of '{}' resembles '{}'", relation, name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_request_from_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let json = dir.path().join("request.json");
        fs::write(
            &json,
            r#"{"relations": ["Sales"], "aggregations": [{"column": "Amount", "function": "SUM"}]}"#,
        )
        .unwrap();
        let request = load_request(&json).unwrap();
        assert_eq!(request.relations, vec!["Sales"]);
        assert_eq!(request.aggregations.len(), 1);

        let yaml = dir.path().join("request.yaml");
        fs::write(&yaml, "free_text: top customers this month\n").unwrap();
        assert!(load_request(&yaml).unwrap().is_ai_request());
    }

    #[test]
    fn test_repair_against_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.yaml");
        fs::write(
            &schema,
            "relations:\n  - name: Sales\n    columns:\n      - { name: SalesAmount, type: decimal }\n",
        )
        .unwrap();

        assert!(run_repair("SalesAmt", "Sales", &schema).is_ok());
        assert!(run_repair("Warehouse", "Sales", &schema).is_err());
        assert!(run_repair("SalesAmt", "Stock", &schema).is_err());
    }

    #[tokio::test]
    async fn test_build_against_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.yaml");
        fs::write(
            &schema,
            "relations:\n  - name: Sales\n    columns:\n      - { name: Amount, type: decimal }\n      - { name: TenantId, type: int }\n",
        )
        .unwrap();

        let input = BuildInput {
            schema,
            request: None,
            text: Some("total sales".to_string()),
            model: None,
            json: true,
        };
        run_build(&QuarryConfig::default(), input).await.unwrap();
    }
}
