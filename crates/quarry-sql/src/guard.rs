//! Read-only statement guard.
//!
//! Runs on rewritten candidates before any probe reaches the database. It
//! fails closed: anything it cannot positively recognize as a single,
//! policy-scoped SELECT is a [`QueryError::PolicyViolation`].

use quarry_core::{PolicyConfig, QueryError};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::clauses::{SelectLayout, all_relations};
use crate::text::{normalize_fragment, squash};

/// Checks that a candidate is a single, read-only, policy-compliant SELECT.
pub struct StatementGuard {
    dialect: MsSqlDialect,
}

impl Clone for StatementGuard {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for StatementGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementGuard {
    pub fn new() -> Self {
        Self {
            dialect: MsSqlDialect {},
        }
    }

    /// Reject anything other than one SELECT that reads only permitted
    /// relations and carries every required condition.
    pub fn check(&self, sql: &str, policy: &PolicyConfig) -> Result<(), QueryError> {
        self.check_read_only(sql)?;
        check_relations(sql, policy)?;
        check_conditions(sql, policy)
    }

    /// Leading keyword must be SELECT; no second statement and no `INTO`.
    pub fn check_read_only(&self, sql: &str) -> Result<(), QueryError> {
        let tokens = Tokenizer::new(&self.dialect, sql)
            .tokenize()
            .map_err(|e| QueryError::policy(format!("statement could not be tokenized: {}", e)))?;

        let mut significant = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)));

        match significant.next() {
            Some(Token::Word(word)) if word.quote_style.is_none() && word.keyword == Keyword::SELECT => {}
            Some(other) => {
                return Err(QueryError::policy(format!(
                    "only SELECT statements are allowed, found '{}'",
                    other
                )));
            }
            None => return Err(QueryError::policy("empty statement")),
        }

        let mut terminated = false;
        for token in significant {
            if terminated {
                return Err(QueryError::policy(
                    "multiple statements are not allowed",
                ));
            }
            match token {
                Token::SemiColon => terminated = true,
                Token::Word(word) if word.quote_style.is_none() && word.keyword == Keyword::INTO => {
                    return Err(QueryError::policy("SELECT ... INTO is not allowed"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// No FROM/JOIN target, including inside subqueries, may be excluded.
fn check_relations(sql: &str, policy: &PolicyConfig) -> Result<(), QueryError> {
    match all_relations(sql).into_iter().find(|r| policy.is_excluded(r)) {
        Some(relation) => Err(QueryError::policy(format!(
            "relation '{}' is excluded by policy",
            relation
        ))),
        None => Ok(()),
    }
}

/// The WHERE clause must contain every condition required for the
/// statement's FROM targets.
fn check_conditions(sql: &str, policy: &PolicyConfig) -> Result<(), QueryError> {
    let layout = SelectLayout::parse(sql).ok_or_else(|| {
        QueryError::policy("statement structure not recognized; policy conditions cannot be verified")
    })?;

    let required = policy.conditions_for(&layout.from_relations(sql));
    if required.is_empty() {
        return Ok(());
    }

    let present = layout
        .where_
        .as_ref()
        .map(|c| squash(&sql[c.body.clone()]))
        .unwrap_or_default();
    for condition in required {
        if !present.contains(&squash(&normalize_fragment(&condition))) {
            return Err(QueryError::policy(format!(
                "required condition '{}' is missing",
                condition
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> StatementGuard {
        StatementGuard::new()
    }

    #[test]
    fn test_accepts_scoped_select() {
        let sql = "SELECT [Amount] FROM [Sales] WHERE TenantId = 1;";
        assert!(guard().check(sql, &PolicyConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_mutations() {
        let policy = PolicyConfig::default();
        for sql in [
            "DELETE FROM Sales WHERE TenantId = 1;",
            "UPDATE Sales SET Amount = 0 WHERE TenantId = 1;",
            "WITH x AS (SELECT 1 AS a) DELETE FROM Sales;",
            "SELECT * INTO Backup FROM Sales WHERE TenantId = 1;",
            "SELECT * FROM Sales WHERE TenantId = 1; DROP TABLE Sales;",
            "",
        ] {
            let err = guard().check(sql, &policy).unwrap_err();
            assert!(matches!(err, QueryError::PolicyViolation { .. }), "{}", sql);
        }
    }

    #[test]
    fn test_keywords_in_literals_and_identifiers_are_fine() {
        let sql = "SELECT [Into], 'DROP TABLE x; DELETE' FROM Notes WHERE TenantId = 1;";
        assert!(guard().check(sql, &PolicyConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_excluded_relations() {
        let sql = "SELECT name FROM Sales WHERE TenantId = 1 AND id IN (SELECT id FROM sys.objects);";
        let err = guard().check(sql, &PolicyConfig::default()).unwrap_err();
        assert!(err.to_string().contains("sys.objects"));
    }

    #[test]
    fn test_rejects_missing_condition() {
        let sql = "SELECT a FROM Sales;";
        assert!(guard().check(sql, &PolicyConfig::default()).is_err());
        let union = "SELECT a FROM Sales WHERE TenantId = 1 UNION SELECT a FROM Archive WHERE TenantId = 1;";
        assert!(guard().check(union, &PolicyConfig::default()).is_err());
    }
}
