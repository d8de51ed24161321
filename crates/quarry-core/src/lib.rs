//! # quarry-core
//!
//! Shared types for the Quarry query synthesis and validation engine:
//!
//! - the canonical request model ([`CanonicalRequest`] and friends)
//! - schema catalog snapshots ([`SchemaCatalog`])
//! - the hot-reloadable tenancy policy ([`PolicyConfig`], [`PolicyHandle`])
//! - configuration loading ([`QuarryConfig`])
//! - the error taxonomy ([`QueryError`])

pub mod catalog;
pub mod config;
pub mod error;
pub mod request;

pub use catalog::{ColumnSchema, ExecutionResult, RelationSchema, SchemaCatalog};
pub use config::{
    AiConfig, ConfigError, LoggingConfig, ModelConfig, PolicyConfig, PolicyHandle, ProviderKind,
    QuarryConfig, ValidationConfig,
};
pub use error::{ExecutionError, ProviderError, QueryError};
pub use request::{
    AggregateFunction, Aggregation, CanonicalRequest, ColumnRef, Connector, FilterOperator,
    FilterPredicate, SortDirection, SortKey,
};

/// How a validated query ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// The candidate passed its first probe unchanged.
    Valid,
    /// One or more repairs were applied before the probe passed.
    Corrected,
    /// The safe fallback query replaced the candidate.
    Fallback,
}

/// Final product of the validation loop. Immutable once returned.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub sql: String,
    pub warnings: Vec<String>,
}

/// Where a candidate query came from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryOrigin {
    /// Compiled from structured selections.
    Synthesized,
    /// Returned by an external model.
    Model { id: String },
    /// Produced by the local template generator.
    LocalTemplate { kind: String },
}

impl std::fmt::Display for QueryOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synthesized => f.write_str("synthesized"),
            Self::Model { id } => write!(f, "model:{}", id),
            Self::LocalTemplate { kind } => write!(f, "template:{}", kind),
        }
    }
}
