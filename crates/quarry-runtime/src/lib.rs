//! # quarry-runtime
//!
//! Turns a [`CanonicalRequest`](quarry_core::CanonicalRequest) into validated
//! SQL. The [`QueryEngine`] routes structured requests to the synthesizer and
//! free text to the provider chain, applies the rewrite passes and the
//! statement guard, then runs the [`Validator`] against a [`CatalogAccessor`].

pub mod adapter;
pub mod engine;
pub mod fallback;
pub mod fuzzy;
pub mod repair;
pub mod snapshot;
pub mod validator;

pub use adapter::CatalogAccessor;
pub use engine::{BuildResult, QueryEngine};
pub use fallback::safe_query;
pub use fuzzy::{FuzzyMatcher, IdentifierMatch, MatchStrategy};
pub use repair::{ErrorClass, classify};
pub use snapshot::SnapshotCatalog;
pub use validator::{ValidationState, Validator, probe_form};
