//! The validation loop.
//!
//! A rewritten candidate is probed against the database in a zero-row form.
//! Failures are classified and repaired, at most once per error class; a
//! timeout, an unrecognized error, a repeated class or a repair that cannot
//! change the text escalates to the safe fallback query.
//!
//! ```text
//!   Probing ──ok──────────────────────────────▶ Done(Valid | Corrected)
//!      │ error                                     ▲
//!      ▼                                           │
//!   Repairing ──repaired──▶ Probing                │
//!      │ repeated / none / guard failure           │
//!      ▼                                           │
//!   FallingBack ────────────────────────────▶ Done(Fallback)
//! ```

use quarry_core::{
    CanonicalRequest, PolicyConfig, QueryError, SchemaCatalog, ValidationConfig,
    ValidationOutcome, ValidationStatus,
};
use quarry_sql::text::splice;
use quarry_sql::{SelectLayout, StatementGuard};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapter::CatalogAccessor;
use crate::fallback::safe_query;
use crate::fuzzy::FuzzyMatcher;
use crate::repair::{ErrorClass, apply, classify};

/// Where the loop currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    /// Submit the current text as a zero-row probe.
    Probing,
    /// The last probe failed with this class.
    Repairing(ErrorClass),
    /// Give up on the candidate.
    FallingBack { reason: String },
    /// Terminal.
    Done(ValidationStatus),
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Passed,
    Failed(String),
    TimedOut,
}

/// The zero-row form of a statement: `1 = 0` ANDed ahead of any existing
/// WHERE condition.
pub fn probe_form(sql: &str) -> String {
    let Some(layout) = SelectLayout::parse(sql) else {
        return sql.to_string();
    };
    match &layout.where_ {
        Some(where_) => {
            let body = sql[where_.body.clone()].trim();
            let trailing = &sql[where_.body.end..];
            let sep = if trailing.starts_with(';') || trailing.is_empty() { "" } else { " " };
            format!(
                "{} 1 = 0 AND ({}){}{}",
                sql[..where_.keyword.end].trim_end(),
                body,
                sep,
                trailing.trim_start()
            )
        }
        None => splice(sql, layout.where_insert_point(), "WHERE 1 = 0"),
    }
}

/// Runs the probe/repair/fallback state machine for one candidate.
pub struct Validator<'a, C: CatalogAccessor> {
    accessor: &'a C,
    catalog: &'a SchemaCatalog,
    policy: &'a PolicyConfig,
    config: &'a ValidationConfig,
    guard: StatementGuard,
    matcher: FuzzyMatcher,
}

impl<'a, C: CatalogAccessor> Validator<'a, C> {
    pub fn new(
        accessor: &'a C,
        catalog: &'a SchemaCatalog,
        policy: &'a PolicyConfig,
        config: &'a ValidationConfig,
    ) -> Self {
        Self {
            accessor,
            catalog,
            policy,
            config,
            guard: StatementGuard::new(),
            matcher: FuzzyMatcher::default(),
        }
    }

    /// Replace the identifier matcher (threshold tuning).
    pub fn with_matcher(mut self, matcher: FuzzyMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    async fn probe(&self, sql: &str) -> ProbeResult {
        let probe = probe_form(sql);
        debug!(sql = %probe, "probing candidate");
        let budget = Duration::from_millis(self.config.probe_timeout_ms);
        match tokio::time::timeout(budget, self.accessor.execute(&probe)).await {
            Ok(Ok(_)) => ProbeResult::Passed,
            Ok(Err(e)) => ProbeResult::Failed(e.message),
            Err(_) => ProbeResult::TimedOut,
        }
    }

    /// Validate `candidate`, repairing or replacing it as needed.
    ///
    /// The only error is [`QueryError::UnrepairableQuery`], when not even a
    /// fallback query can be built.
    pub async fn validate(
        &self,
        candidate: &str,
        request: &CanonicalRequest,
    ) -> Result<ValidationOutcome, QueryError> {
        let mut current = candidate.to_string();
        let mut warnings: Vec<String> = Vec::new();
        let mut repaired: HashSet<&'static str> = HashSet::new();
        let mut state = ValidationState::Probing;

        loop {
            state = match state {
                ValidationState::Probing => match self.probe(&current).await {
                    ProbeResult::Passed if repaired.is_empty() => {
                        ValidationState::Done(ValidationStatus::Valid)
                    }
                    ProbeResult::Passed => ValidationState::Done(ValidationStatus::Corrected),
                    ProbeResult::TimedOut => ValidationState::FallingBack {
                        reason: format!("probe timed out after {}ms", self.config.probe_timeout_ms),
                    },
                    ProbeResult::Failed(message) => {
                        let class = classify(&message);
                        debug!(class = class.kind(), error = %message, "probe failed");
                        ValidationState::Repairing(class)
                    }
                },

                ValidationState::Repairing(class) => {
                    if !class.is_repairable() {
                        ValidationState::FallingBack {
                            reason: format!("no repair for {}", class),
                        }
                    } else if repaired.contains(class.kind()) {
                        ValidationState::FallingBack {
                            reason: format!("{} persisted after repair", class.kind()),
                        }
                    } else {
                        match apply(&current, &class, self.catalog, &self.matcher) {
                            Some(fix) if self.guard.check(&fix.sql, self.policy).is_ok() => {
                                warn!(class = class.kind(), note = %fix.note, "repaired candidate");
                                repaired.insert(class.kind());
                                warnings.push(fix.note);
                                current = fix.sql;
                                ValidationState::Probing
                            }
                            Some(_) => ValidationState::FallingBack {
                                reason: format!("repair for {} broke the policy guard", class.kind()),
                            },
                            None => ValidationState::FallingBack {
                                reason: format!("could not repair {}", class),
                            },
                        }
                    }
                }

                ValidationState::FallingBack { reason } => {
                    warn!(reason = %reason, "using safe fallback query");
                    let sql = safe_query(&current, request, self.catalog, self.policy, self.config)?;
                    warnings.push(format!("fallback query used: {}", reason));
                    return Ok(ValidationOutcome {
                        status: ValidationStatus::Fallback,
                        sql,
                        warnings,
                    });
                }

                ValidationState::Done(status) => {
                    return Ok(ValidationOutcome {
                        status,
                        sql: current,
                        warnings,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use quarry_core::{ExecutionError, ExecutionResult, RelationSchema};
    use std::sync::Mutex;

    /// Replays scripted probe outcomes and records what it was sent.
    struct Scripted {
        outcomes: Mutex<Vec<Result<(), String>>>,
        seen: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<(), &str>>) -> Self {
            Self {
                outcomes: Mutex::new(
                    outcomes
                        .into_iter()
                        .rev()
                        .map(|o| o.map_err(str::to_string))
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn probes(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CatalogAccessor for Scripted {
        async fn describe(&self) -> Result<SchemaCatalog, ExecutionError> {
            Ok(catalog())
        }

        async fn execute(&self, sql: &str) -> Result<ExecutionResult, ExecutionError> {
            self.seen.lock().unwrap().push(sql.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.outcomes.lock().unwrap().pop().unwrap_or(Ok(()));
            next.map(|_| ExecutionResult::default()).map_err(ExecutionError::new)
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            RelationSchema::new("Sales")
                .with_column("SaleId", "int")
                .with_column("Region", "varchar(50)")
                .with_column("SalesAmount", "decimal(18,2)"),
        ])
    }

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            relations: vec!["Sales".to_string()],
            ..CanonicalRequest::default()
        }
    }

    async fn run(accessor: &Scripted, sql: &str) -> ValidationOutcome {
        let catalog = catalog();
        let policy = PolicyConfig::default();
        let config = ValidationConfig {
            probe_timeout_ms: 50,
            ..ValidationConfig::default()
        };
        Validator::new(accessor, &catalog, &policy, &config)
            .validate(sql, &request())
            .await
            .unwrap()
    }

    #[test]
    fn test_probe_form() {
        assert_eq!(
            probe_form("SELECT [Region] FROM [Sales] WHERE TenantId = 1 OR x = 2 ORDER BY [Region];"),
            "SELECT [Region] FROM [Sales] WHERE 1 = 0 AND (TenantId = 1 OR x = 2) ORDER BY [Region];"
        );
        assert_eq!(
            probe_form("SELECT [Region] FROM [Sales] GROUP BY [Region];"),
            "SELECT [Region] FROM [Sales] WHERE 1 = 0 GROUP BY [Region];"
        );
        assert_eq!(
            probe_form("SELECT COUNT(*) FROM [Sales] WHERE TenantId = 1;"),
            "SELECT COUNT(*) FROM [Sales] WHERE 1 = 0 AND (TenantId = 1);"
        );
    }

    #[tokio::test]
    async fn test_valid_on_first_probe() {
        let accessor = Scripted::new(vec![Ok(())]);
        let sql = "SELECT [Region] FROM [Sales] WHERE TenantId = 1;";
        let outcome = run(&accessor, sql).await;
        assert_eq!(outcome.status, ValidationStatus::Valid);
        assert_eq!(outcome.sql, sql);
        assert!(outcome.warnings.is_empty());
        assert_eq!(accessor.probes().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_column_is_corrected() {
        let accessor = Scripted::new(vec![Err("Invalid column name 'SalesAmt'."), Ok(())]);
        let outcome = run(&accessor, "SELECT SUM([SalesAmt]) FROM [Sales] WHERE TenantId = 1;").await;
        assert_eq!(outcome.status, ValidationStatus::Corrected);
        assert_eq!(outcome.sql, "SELECT SUM([SalesAmount]) FROM [Sales] WHERE TenantId = 1;");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(accessor.probes().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_class_falls_back() {
        let accessor = Scripted::new(vec![
            Err("Invalid column name 'SalesAmt'."),
            Err("Invalid column name 'Regoin'."),
        ]);
        let outcome = run(
            &accessor,
            "SELECT [Regoin], SUM([SalesAmt]) FROM [Sales] WHERE TenantId = 1 GROUP BY [Regoin];",
        )
        .await;
        assert_eq!(outcome.status, ValidationStatus::Fallback);
        assert!(outcome.sql.starts_with("SELECT TOP 100 [SaleId], [Region], [SalesAmount] FROM [Sales] WHERE TenantId = 1"));
        assert_eq!(accessor.probes().len(), 2);
    }

    #[tokio::test]
    async fn test_distinct_classes_bound_probe_count() {
        let accessor = Scripted::new(vec![
            Err("The multi-part identifier \"s.SalesAmt\" could not be bound."),
            Err("Invalid column name 'SalesAmt'."),
            Ok(()),
        ]);
        let outcome = run(
            &accessor,
            "SELECT SUM(s.SalesAmt) FROM [Sales] AS s WHERE s.TenantId = 1;",
        )
        .await;
        assert_eq!(outcome.status, ValidationStatus::Corrected);
        assert_eq!(outcome.sql, "SELECT SUM(SalesAmount) FROM [Sales] WHERE TenantId = 1;");
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(accessor.probes().len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_goes_straight_to_fallback() {
        let mut accessor = Scripted::new(vec![Ok(())]);
        accessor.delay = Some(Duration::from_secs(5));
        let outcome = run(&accessor, "SELECT [Region] FROM [Sales] WHERE TenantId = 1;").await;
        assert_eq!(outcome.status, ValidationStatus::Fallback);
        assert!(outcome.warnings[0].contains("timed out"));
        assert_eq!(accessor.probes().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_error_falls_back() {
        let accessor = Scripted::new(vec![Err("Transaction was deadlocked")]);
        let outcome = run(&accessor, "SELECT [Region] FROM [Sales] WHERE TenantId = 1;").await;
        assert_eq!(outcome.status, ValidationStatus::Fallback);
        assert!(outcome.sql.ends_with("ORDER BY [SaleId];"));
    }

    #[tokio::test]
    async fn test_repair_that_drops_policy_condition_falls_back() {
        let accessor = Scripted::new(vec![Err("Invalid column name 'TenantId'.")]);
        let catalog = SchemaCatalog::new(vec![
            RelationSchema::new("Sales")
                .with_column("SaleId", "int")
                .with_column("TenantKey", "int"),
        ]);
        let policy = PolicyConfig::default();
        let config = ValidationConfig::default();
        let outcome = Validator::new(&accessor, &catalog, &policy, &config)
            .validate("SELECT [SaleId] FROM [Sales] WHERE TenantId = 1;", &request())
            .await
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Fallback);
        assert!(outcome.sql.contains("WHERE TenantId = 1"));
    }
}
