//! The query engine: canonical request in, validated SQL out.

use chrono::{DateTime, Utc};
use quarry_ai::ProviderChain;
use quarry_core::{
    CanonicalRequest, PolicyHandle, ProviderError, QuarryConfig, QueryError, QueryOrigin,
    ValidationConfig, ValidationStatus,
};
use quarry_sql::{Rewriter, StatementGuard, synthesize};
use serde::Serialize;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::adapter::CatalogAccessor;
use crate::validator::Validator;

/// What a build hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub request_id: Uuid,
    pub sql: String,
    pub warnings: Vec<String>,
    pub used_fallback: bool,
    pub status: ValidationStatus,
    pub origin: QueryOrigin,
    pub generated_at: DateTime<Utc>,
}

/// Synthesizes, rewrites, guards and validates queries for one catalog.
pub struct QueryEngine<C: CatalogAccessor> {
    accessor: C,
    policy: PolicyHandle,
    chain: ProviderChain,
    rewriter: Rewriter,
    guard: StatementGuard,
    validation: ValidationConfig,
}

impl<C: CatalogAccessor> QueryEngine<C> {
    pub fn new(
        accessor: C,
        policy: PolicyHandle,
        chain: ProviderChain,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            accessor,
            policy,
            chain,
            rewriter: Rewriter::new(validation.top_cap),
            guard: StatementGuard::new(),
            validation,
        }
    }

    /// Wire an engine from a loaded configuration.
    pub fn from_config(accessor: C, config: &QuarryConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(
            accessor,
            PolicyHandle::new(config.policy.clone()),
            ProviderChain::from_config(config.ai.clone())?,
            config.validation.clone(),
        ))
    }

    /// Handle for replacing the policy between requests.
    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    pub fn accessor(&self) -> &C {
        &self.accessor
    }

    /// Turn a request into a single validated SELECT.
    ///
    /// Structured requests are synthesized; free-text requests go through
    /// the provider chain. Either candidate is rewritten, checked by the
    /// statement guard and validated. The policy snapshot taken at the start
    /// is used for the whole build.
    pub async fn build_query(&self, request: CanonicalRequest) -> Result<BuildResult, QueryError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("build_query", %request_id);
        self.build(request_id, request).instrument(span).await
    }

    async fn build(&self, request_id: Uuid, request: CanonicalRequest) -> Result<BuildResult, QueryError> {
        let policy = self.policy.current();
        request.validate()?;

        let catalog = self.accessor.describe().await?.without_excluded(&policy);
        debug!(relations = catalog.relations.len(), "catalog snapshot loaded");

        let (candidate, origin, mut warnings) = if request.is_ai_request() {
            let generated = self
                .chain
                .generate(&request.free_text, &catalog, &policy, request.model.as_deref())
                .await?;
            (generated.sql, generated.origin, generated.warnings)
        } else {
            (synthesize(&request, &policy)?, QueryOrigin::Synthesized, Vec::new())
        };
        debug!(origin = %origin, sql = %candidate, "candidate produced");

        let rewritten = self.rewriter.rewrite(&candidate, &policy);
        self.guard.check(&rewritten, &policy)?;

        let outcome = Validator::new(&self.accessor, &catalog, &policy, &self.validation)
            .validate(&rewritten, &request)
            .await?;
        warnings.extend(outcome.warnings);

        let used_fallback = outcome.status == ValidationStatus::Fallback;
        info!(
            origin = %origin,
            status = ?outcome.status,
            used_fallback,
            "query built"
        );

        Ok(BuildResult {
            request_id,
            sql: outcome.sql,
            warnings,
            used_fallback,
            status: outcome.status,
            origin,
            generated_at: Utc::now(),
        })
    }
}
