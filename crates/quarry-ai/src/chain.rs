//! The AI provider chain: model first, local templates on any failure.

use quarry_core::{
    AiConfig, PolicyConfig, ProviderError, QueryError, QueryOrigin, SchemaCatalog,
};
use quarry_sql::text::{mask_literals, strip_code_fences};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::prompt::build_prompt;
use crate::provider::ProviderRegistry;
use crate::templates::LocalTemplateGenerator;

static SELECT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").expect("valid select regex"));

/// Statement keywords that open a line. Mid-sentence they are ordinary words.
static STATEMENT_LINE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(WITH|INSERT|UPDATE|DELETE|MERGE|DROP|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|GRANT|REVOKE)\b",
    )
    .expect("valid statement regex")
});

/// Mutating statement heads anywhere in the text.
static MUTATION_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(DELETE\s+FROM|INSERT\s+INTO|UPDATE\s+[\w\[\].]+\s+SET|MERGE\s+INTO|DROP\s+TABLE|TRUNCATE\s+TABLE|ALTER\s+TABLE)\b",
    )
    .expect("valid mutation regex")
});

/// Candidate SQL produced from free text. Not yet rewritten or validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub sql: String,
    pub origin: QueryOrigin,
    pub warnings: Vec<String>,
}

/// Dispatches free text to a model and falls back to local templates.
#[derive(Debug, Clone)]
pub struct ProviderChain {
    registry: ProviderRegistry,
    templates: LocalTemplateGenerator,
    config: AiConfig,
}

impl ProviderChain {
    pub fn new(registry: ProviderRegistry, config: AiConfig) -> Self {
        Self {
            registry,
            templates: LocalTemplateGenerator::new(),
            config,
        }
    }

    /// Build providers for every configured model.
    pub fn from_config(config: AiConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(ProviderRegistry::from_config(&config)?, config))
    }

    /// Produce a candidate for `free_text`.
    ///
    /// Provider failures never escape: they become a warning and the local
    /// template generator answers instead. Only an empty catalog, which
    /// leaves the templates nothing to select from, is an error.
    pub async fn generate(
        &self,
        free_text: &str,
        catalog: &SchemaCatalog,
        policy: &PolicyConfig,
        model: Option<&str>,
    ) -> Result<Candidate, QueryError> {
        let mut warnings = Vec::new();

        match self.config.resolve_model_id(model) {
            Some(id) => match self.ask_model(&id, free_text, catalog, policy).await {
                Ok(sql) => {
                    info!(model = %id, "model produced candidate");
                    return Ok(Candidate {
                        sql,
                        origin: QueryOrigin::Model { id },
                        warnings,
                    });
                }
                Err(e) => {
                    warn!(model = %id, error = %e, "model provider failed, using local template");
                    warnings.push(format!(
                        "model '{}' unavailable ({}); answered with a local template",
                        id, e
                    ));
                }
            },
            None => {
                warnings.push("no model configured; answered with a local template".to_string());
            }
        }

        let template = self
            .templates
            .generate(free_text, catalog, policy)
            .ok_or_else(|| QueryError::unrepairable("no relations available for a local template"))?;
        info!(template = %template.kind, "local template produced candidate");

        Ok(Candidate {
            sql: template.sql,
            origin: QueryOrigin::LocalTemplate {
                kind: template.kind.to_string(),
            },
            warnings,
        })
    }

    async fn ask_model(
        &self,
        id: &str,
        free_text: &str,
        catalog: &SchemaCatalog,
        policy: &PolicyConfig,
    ) -> Result<String, ProviderError> {
        let provider = self.registry.get(id)?;
        let prompt = build_prompt(free_text, catalog, policy);

        let secs = self.config.timeout_secs;
        let raw = tokio::time::timeout(
            Duration::from_secs(secs),
            provider.complete(&prompt.system, &prompt.user),
        )
        .await
        .map_err(|_| ProviderError::Timeout { secs })??;

        extract_sql(&raw).ok_or_else(|| {
            ProviderError::InvalidResponse("response contains no SQL statement".to_string())
        })
    }
}

/// The SQL statement inside a model response: fences removed, leading prose
/// dropped up to the first statement keyword.
///
/// A statement that opens with anything other than `SELECT` (a mutation, a
/// CTE, DDL) is returned whole, so the read-only guard sees its real leading
/// keyword instead of a nested `SELECT`.
pub fn extract_sql(response: &str) -> Option<String> {
    let body = strip_code_fences(response);
    let masked = mask_literals(&body);
    let start = [&SELECT_START, &STATEMENT_LINE_START, &MUTATION_START]
        .iter()
        .filter_map(|re| re.find(&masked).map(|m| m.start()))
        .min()?;
    let sql = body[start..].trim();
    (!sql.is_empty()).then(|| sql.to_string())
}
