//! # quarry-ai
//!
//! Free-text requests become candidate SQL here. A schema- and policy-aware
//! prompt goes to the model registered for the request's model id; any
//! provider failure (network, credentials, quota, timeout, unusable answer)
//! switches to the [`LocalTemplateGenerator`]. Candidates from either path
//! are untrusted and still go through rewriting and validation.

pub mod chain;
pub mod prompt;
pub mod provider;
pub mod templates;

pub use chain::{Candidate, ProviderChain, extract_sql};
pub use prompt::{Prompt, build_prompt};
pub use provider::{HttpProvider, ProviderRegistry, TextCompletion};
pub use templates::{LocalTemplateGenerator, TemplateKind, TemplateQuery};
