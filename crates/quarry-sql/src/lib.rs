//! # quarry-sql
//!
//! Text-level SQL handling for Quarry. Nothing here builds an AST: queries
//! are manipulated as text with literal-aware, regex-level clause
//! recognition, and every transform is a pure function.
//!
//! - [`synthesize`]: canonical request to a single T-SQL SELECT
//! - [`Rewriter`]: the five safety and policy passes
//! - [`StatementGuard`]: fail-closed read-only and policy check
//!
//! # Example
//!
//! ```
//! use quarry_core::PolicyConfig;
//! use quarry_sql::rewrite;
//!
//! let sql = rewrite("select Revenue/Target from Sales", &PolicyConfig::default());
//! assert_eq!(
//!     sql,
//!     "SELECT ISNULL(Revenue / NULLIF(Target, 0), 0) FROM Sales WHERE TenantId = 1;"
//! );
//! ```

pub mod clauses;
pub mod guard;
pub mod literal;
pub mod rewriter;
pub mod synthesizer;
pub mod text;

pub use clauses::SelectLayout;
pub use guard::StatementGuard;
pub use rewriter::{DEFAULT_TOP_CAP, Rewriter, rewrite};
pub use synthesizer::synthesize;
