//! CLI command implementations for Quarry.

pub mod check;
pub mod query;
