//! `quarry check` command implementation.
//!
//! Validates the configuration, the policy and (optionally) a schema
//! snapshot against each other:
//! - configuration load and budget errors
//! - policy findings (missing tenant scoping, empty exclusions)
//! - relations the policy names but the snapshot lacks
//! - relations without the tenant column

use anyhow::{Result, bail};
use quarry_core::{QuarryConfig, SchemaCatalog};
use std::path::Path;

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Which check produced the finding.
    pub category: &'static str,
    pub message: String,
}

impl CheckFinding {
    fn new(severity: Severity, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
        }
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn push(&mut self, severity: Severity, category: &'static str, message: impl Into<String>) {
        self.findings.push(CheckFinding::new(severity, category, message));
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// Load the configuration and run every check.
pub fn run_check(config_path: Option<&Path>, schema: Option<&Path>) -> Result<()> {
    let results = match crate::load_config(config_path) {
        Ok(config) => check_config(&config, schema),
        Err(e) => {
            let mut results = CheckResults::default();
            results.push(Severity::Error, "config", format!("{:#}", e));
            results
        }
    };
    report(&results)
}

/// Checks for an already-loaded configuration.
pub fn check_config(config: &QuarryConfig, schema: Option<&Path>) -> CheckResults {
    let mut results = CheckResults::default();

    if let Err(e) = config.check() {
        results.push(Severity::Error, "config", e.to_string());
    }

    for warning in config.policy.validate() {
        results.push(Severity::Warning, "policy", warning);
    }

    if config.ai.models.is_empty() {
        results.push(
            Severity::Info,
            "ai",
            "no models configured; free-text requests use local templates",
        );
    }
    for model in &config.ai.models {
        if let Some(var) = model.key_env() {
            if std::env::var(var).is_err() {
                results.push(
                    Severity::Warning,
                    "ai",
                    format!("model '{}': environment variable {} is not set", model.id, var),
                );
            }
        }
    }

    if let Some(path) = schema {
        match SchemaCatalog::from_file(path) {
            Ok(catalog) => check_schema(config, &catalog, &mut results),
            Err(e) => results.push(
                Severity::Error,
                "schema",
                format!("failed to load {}: {}", path.display(), e),
            ),
        }
    }

    results
}

fn check_schema(config: &QuarryConfig, catalog: &SchemaCatalog, results: &mut CheckResults) {
    let policy = &config.policy;

    let excluded = catalog
        .relation_names()
        .filter(|name| policy.is_excluded(name))
        .count();
    if excluded > 0 {
        results.push(
            Severity::Info,
            "schema",
            format!("{} relation(s) hidden by exclusion patterns", excluded),
        );
    }

    for relation in policy.relation_conditions.keys() {
        if catalog.relation(relation).is_none() {
            results.push(
                Severity::Warning,
                "schema",
                format!("policy has conditions for '{}' which is not in the snapshot", relation),
            );
        }
    }

    for relation in catalog.relations.iter().filter(|r| !policy.is_excluded(&r.name)) {
        if !relation.has_column(&policy.tenant_column) {
            results.push(
                Severity::Warning,
                "schema",
                format!(
                    "relation '{}' has no tenant column '{}'; mandatory conditions will fail there",
                    relation.name, policy.tenant_column
                ),
            );
        }
        if !relation.columns.iter().any(|c| c.is_orderable()) {
            results.push(
                Severity::Warning,
                "schema",
                format!("relation '{}' has no orderable columns; no fallback query possible", relation.name),
            );
        }
    }
}

/// Print findings and fail when any is an error.
pub fn report(results: &CheckResults) -> Result<()> {
    for finding in &results.findings {
        println!("[{}] {}: {}", finding.severity, finding.category, finding.message);
    }
    println!(
        "{} error(s), {} warning(s)",
        results.count(Severity::Error),
        results.count(Severity::Warning)
    );
    if results.has_errors() {
        bail!("configuration check failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_has_no_errors() {
        let results = check_config(&QuarryConfig::default(), None);
        assert!(!results.has_errors());
        assert_eq!(results.count(Severity::Info), 1);
    }

    #[test]
    fn test_schema_findings() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.yaml");
        fs::write(
            &schema,
            r#"
relations:
  - name: Sales
    columns:
      - { name: TenantId, type: int }
      - { name: Amount, type: decimal }
  - name: Notes
    columns:
      - { name: Body, type: ntext }
  - name: sysdiagrams
    columns:
      - { name: name, type: sysname }
"#,
        )
        .unwrap();

        let mut config = QuarryConfig::default();
        config
            .policy
            .relation_conditions
            .insert("Stock".to_string(), vec!["Status = {status}".to_string()]);

        let results = check_config(&config, Some(&schema));
        let messages: Vec<&str> = results.findings.iter().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("1 relation(s) hidden")));
        assert!(messages.iter().any(|m| m.contains("'Stock' which is not in the snapshot")));
        assert!(messages.iter().any(|m| m.contains("'Notes' has no tenant column")));
        assert!(messages.iter().any(|m| m.contains("'Notes' has no orderable columns")));
        assert!(!results.has_errors());
    }

    #[test]
    fn test_bad_budget_is_an_error() {
        let mut config = QuarryConfig::default();
        config.validation.probe_timeout_ms = 0;
        assert!(check_config(&config, None).has_errors());
        assert!(report(&check_config(&config, None)).is_err());
    }
}
