//! The safe fallback query.
//!
//! Built straight from the catalog when a candidate cannot be repaired:
//! `TOP k` over a handful of known orderable columns of one relation, with
//! every required condition and a deterministic ORDER BY. It bypasses the
//! rewriter and is not probed.

use quarry_core::{CanonicalRequest, PolicyConfig, QueryError, RelationSchema, SchemaCatalog, ValidationConfig};
use quarry_sql::SelectLayout;
use quarry_sql::synthesizer::quote_path;
use quarry_sql::text::{normalize_fragment, quote_ident};

/// Pick the relation the fallback reads.
///
/// The request's first relation wins, then the candidate's FROM targets. Only
/// free-text requests may fall through to the first catalog relation.
pub fn fallback_relation<'a>(
    candidate: &str,
    request: &CanonicalRequest,
    catalog: &'a SchemaCatalog,
) -> Option<&'a RelationSchema> {
    if let Some(first) = request.relations.first() {
        return catalog.relation(first);
    }

    let from_candidate = SelectLayout::parse(candidate)
        .map(|layout| layout.from_relations(candidate))
        .unwrap_or_default();
    if let Some(relation) = from_candidate.iter().find_map(|name| catalog.relation(name)) {
        return Some(relation);
    }

    if request.is_ai_request() {
        return catalog
            .relations
            .iter()
            .find(|r| r.columns.iter().any(|c| c.is_orderable()));
    }
    None
}

/// Build the fallback statement.
pub fn safe_query(
    candidate: &str,
    request: &CanonicalRequest,
    catalog: &SchemaCatalog,
    policy: &PolicyConfig,
    config: &ValidationConfig,
) -> Result<String, QueryError> {
    let relation = fallback_relation(candidate, request, catalog)
        .ok_or_else(|| QueryError::unrepairable("no known relation to build a fallback query from"))?;

    let columns: Vec<String> = relation
        .columns
        .iter()
        .filter(|c| c.is_orderable())
        .take(config.fallback_column_count.max(1))
        .map(|c| quote_ident(&c.name))
        .collect();
    let Some(first) = columns.first() else {
        return Err(QueryError::unrepairable(format!(
            "relation '{}' has no orderable columns",
            relation.name
        )));
    };

    let mut sql = format!(
        "SELECT TOP {} {} FROM {}",
        config.fallback_row_limit,
        columns.join(", "),
        quote_path(&relation.name)
    );

    let conditions: Vec<String> = policy
        .conditions_for(&[relation.name.as_str()])
        .iter()
        .map(|c| normalize_fragment(c))
        .collect();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(first);
    sql.push(';');
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            RelationSchema::new("Notes").with_column("Body", "ntext"),
            RelationSchema::new("Sales")
                .with_column("Notes", "xml")
                .with_column("SaleId", "int")
                .with_column("Region", "varchar(50)")
                .with_column("SalesAmount", "decimal(18,2)"),
        ])
    }

    fn policy() -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy
            .relation_conditions
            .insert("Sales".to_string(), vec!["Status = {status}".to_string()]);
        policy
    }

    fn config(columns: usize) -> ValidationConfig {
        ValidationConfig {
            fallback_row_limit: 25,
            fallback_column_count: columns,
            ..ValidationConfig::default()
        }
    }

    #[test]
    fn test_structured_fallback_uses_request_relation() {
        let request = CanonicalRequest {
            relations: vec!["Sales".to_string()],
            ..CanonicalRequest::default()
        };
        let sql = safe_query("SELECT nonsense", &request, &catalog(), &policy(), &config(2)).unwrap();
        assert_eq!(
            sql,
            "SELECT TOP 25 [SaleId], [Region] FROM [Sales] WHERE TenantId = 1 AND Status = 1 ORDER BY [SaleId];"
        );
    }

    #[test]
    fn test_ai_fallback_prefers_candidate_relation() {
        let request = CanonicalRequest::from_free_text("anything");
        let sql = safe_query(
            "SELECT [Bogus] FROM [Sales] WHERE TenantId = 1;",
            &request,
            &catalog(),
            &policy(),
            &config(1),
        )
        .unwrap();
        assert!(sql.starts_with("SELECT TOP 25 [SaleId] FROM [Sales]"));

        // Unknown candidate relation: first catalog relation with orderable columns.
        let sql = safe_query("SELECT x FROM Nowhere", &request, &catalog(), &policy(), &config(1)).unwrap();
        assert!(sql.contains("FROM [Sales]"));
    }

    #[test]
    fn test_structured_request_without_known_relation_is_unrepairable() {
        let request = CanonicalRequest {
            relations: vec!["Stock".to_string()],
            ..CanonicalRequest::default()
        };
        let err = safe_query("SELECT 1", &request, &catalog(), &policy(), &config(3)).unwrap_err();
        assert!(matches!(err, QueryError::UnrepairableQuery { .. }));

        let request = CanonicalRequest {
            relations: vec!["Notes".to_string()],
            ..CanonicalRequest::default()
        };
        let err = safe_query("SELECT 1", &request, &catalog(), &policy(), &config(3)).unwrap_err();
        assert!(err.to_string().contains("no orderable columns"));
    }
}
