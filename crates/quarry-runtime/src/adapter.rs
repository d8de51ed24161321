use async_trait::async_trait;
use quarry_core::{ExecutionError, ExecutionResult, SchemaCatalog};
use std::sync::Arc;

/// Boundary to the database that owns the schema.
///
/// Implementations report every failure, transport or semantic, as an
/// [`ExecutionError`] whose message carries the database's wording; the
/// validation loop classifies errors by that text.
#[async_trait]
pub trait CatalogAccessor: Send + Sync {
    /// Relations and columns currently visible.
    async fn describe(&self) -> Result<SchemaCatalog, ExecutionError>;

    /// Execute a statement. The engine only ever submits zero-row probes.
    async fn execute(&self, sql: &str) -> Result<ExecutionResult, ExecutionError>;
}

#[async_trait]
impl<T: CatalogAccessor + ?Sized> CatalogAccessor for Arc<T> {
    async fn describe(&self) -> Result<SchemaCatalog, ExecutionError> {
        (**self).describe().await
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionResult, ExecutionError> {
        (**self).execute(sql).await
    }
}
