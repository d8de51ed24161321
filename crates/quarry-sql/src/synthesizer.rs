//! Deterministic compilation of a [`CanonicalRequest`] into one SELECT.

use quarry_core::{
    AggregateFunction, Aggregation, CanonicalRequest, ColumnRef, Connector, FilterOperator,
    FilterPredicate, PolicyConfig, QueryError,
};
use tracing::{debug, warn};

use crate::literal::{render_in_list, render_like, render_value};
use crate::text::{normalize_fragment, quote_ident};

/// Compile a structured request into T-SQL.
///
/// The output has no statement terminator; the rewriter adds one. Multiple
/// relations are joined with `INNER JOIN ... ON 1=1`, which is a cross join
/// unless the caller's own filters relate the relations. No join keys are
/// inferred.
pub fn synthesize(request: &CanonicalRequest, policy: &PolicyConfig) -> Result<String, QueryError> {
    if request.relations.is_empty() {
        return Err(QueryError::invalid(
            "structured synthesis requires at least one relation",
        ));
    }
    request.validate()?;

    for relation in &request.relations {
        if policy.is_excluded(relation) {
            return Err(QueryError::policy(format!(
                "relation '{}' is excluded by policy",
                relation
            )));
        }
    }

    let qualify = request.relations.len() > 1;
    if qualify {
        warn!(
            relations = ?request.relations,
            "multi-relation request joined with ON 1=1; results are a cross join unless filters relate them"
        );
    }

    let mut sql = String::from("SELECT");
    if request.distinct {
        sql.push_str(" DISTINCT");
    }
    if let Some(limit) = request.limit.filter(|n| *n > 0) {
        sql.push_str(&format!(" TOP {}", limit));
    }

    let columns = column_list(request, qualify);
    sql.push(' ');
    sql.push_str(&if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    });

    sql.push_str(&format!(" FROM {}", quote_path(&request.relations[0])));
    for relation in &request.relations[1..] {
        sql.push_str(&format!(" INNER JOIN {} ON 1=1", quote_path(relation)));
    }

    if let Some(where_clause) = where_clause(request, policy) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause);
    }

    if !request.group_by.is_empty() {
        let keys: Vec<String> = request
            .group_by
            .iter()
            .map(|c| quote_ident(c.column()))
            .collect();
        sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
    }

    if !request.sort.is_empty() {
        let keys: Vec<String> = request
            .sort
            .iter()
            .map(|s| format!("{} {}", quote_ident(s.column.column()), s.direction.as_sql()))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
    }

    debug!(sql = %sql, "synthesized query");
    Ok(sql)
}

/// Aggregations first, then projections not already aggregated.
fn column_list(request: &CanonicalRequest, qualify: bool) -> Vec<String> {
    let mut columns: Vec<String> = request.aggregations.iter().map(render_aggregation).collect();

    for relation in &request.relations {
        let projected = request
            .projections
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(relation))
            .flat_map(|(_, cols)| cols.iter());

        for column in projected {
            let bare = ColumnRef::new(column.as_str());
            let covered = request
                .aggregations
                .iter()
                .any(|a| a.column.column().eq_ignore_ascii_case(bare.column()));
            if covered {
                continue;
            }
            let rendered = if qualify {
                format!("{}.{}", quote_path(relation), quote_ident(bare.column()))
            } else {
                quote_ident(bare.column())
            };
            if !columns.contains(&rendered) {
                columns.push(rendered);
            }
        }
    }
    columns
}

fn render_aggregation(aggregation: &Aggregation) -> String {
    let function = aggregation.function.sql_name();
    let expr = match aggregation.function {
        AggregateFunction::Count if aggregation.column.is_empty() => "COUNT(*)".to_string(),
        AggregateFunction::CountDistinct => {
            format!("{}(DISTINCT {})", function, render_column(&aggregation.column))
        }
        _ => format!("{}({})", function, render_column(&aggregation.column)),
    };
    match &aggregation.alias {
        Some(alias) if !alias.trim().is_empty() => format!("{} AS {}", expr, quote_ident(alias)),
        _ => expr,
    }
}

/// Policy conditions first, then the request's filters.
fn where_clause(request: &CanonicalRequest, policy: &PolicyConfig) -> Option<String> {
    let mut parts: Vec<String> = policy
        .conditions_for(&request.relations)
        .iter()
        .map(|c| normalize_fragment(c))
        .collect();

    if !request.filters.is_empty() {
        let mut filters = String::new();
        for (i, filter) in request.filters.iter().enumerate() {
            if i > 0 {
                filters.push(' ');
                filters.push_str(filter.join.as_sql());
                filters.push(' ');
            }
            filters.push_str(&render_filter(filter));
        }
        let has_or = request.filters.iter().skip(1).any(|f| f.join == Connector::Or);
        if has_or && !parts.is_empty() {
            parts.push(format!("({})", filters));
        } else {
            parts.push(filters);
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" AND "))
    }
}

/// Render one predicate with operator-specific formatting.
pub fn render_filter(filter: &FilterPredicate) -> String {
    let column = render_column(&filter.column);
    match filter.operator {
        FilterOperator::IsNull | FilterOperator::IsNotNull => {
            format!("{} {}", column, filter.operator.as_sql())
        }
        FilterOperator::Between => {
            let high = filter
                .value2
                .as_ref()
                .map(render_value)
                .unwrap_or_else(|| "NULL".to_string());
            format!("{} BETWEEN {} AND {}", column, render_value(&filter.value), high)
        }
        FilterOperator::In | FilterOperator::NotIn => {
            format!(
                "{} {} {}",
                column,
                filter.operator.as_sql(),
                render_in_list(&filter.value)
            )
        }
        FilterOperator::Like => format!("{} LIKE {}", column, render_like(&filter.value)),
        _ => format!(
            "{} {} {}",
            column,
            filter.operator.as_sql(),
            render_value(&filter.value)
        ),
    }
}

/// `[Column]` or `[Relation].[Column]` when the reference is qualified.
fn render_column(column: &ColumnRef) -> String {
    match column.relation() {
        Some(relation) => format!("{}.{}", quote_path(relation), quote_ident(column.column())),
        None => quote_ident(column.column()),
    }
}

/// `dbo.Sales` -> `[dbo].[Sales]`.
pub fn quote_path(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_core::{SortDirection, SortKey};
    use serde_json::json;

    fn sales_policy() -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy
            .relation_conditions
            .insert("Sales".to_string(), vec!["Status = {status}".to_string()]);
        policy
    }

    fn sales_request() -> CanonicalRequest {
        CanonicalRequest {
            relations: vec!["Sales".to_string()],
            ..CanonicalRequest::default()
        }
    }

    #[test]
    fn test_aggregation_only_request() {
        let mut request = sales_request();
        request
            .aggregations
            .push(Aggregation::new("Amount", AggregateFunction::Sum));

        let sql = synthesize(&request, &sales_policy()).unwrap();
        assert_eq!(
            sql,
            "SELECT SUM([Amount]) FROM [Sales] WHERE TenantId = 1 AND Status = 1"
        );
    }

    #[test]
    fn test_projection_order_and_coverage() {
        let mut request = sales_request();
        request.projections.insert(
            "Sales".to_string(),
            vec!["Region".to_string(), "Amount".to_string()],
        );
        request.aggregations.push(
            Aggregation::new("Amount", AggregateFunction::Sum).with_alias("Total"),
        );
        request.group_by.push(ColumnRef::new("Sales.Region"));
        request.sort.push(SortKey::new("Sales.Region", SortDirection::Desc));
        request.limit = Some(10);
        request.distinct = true;

        let sql = synthesize(&request, &PolicyConfig::default()).unwrap();
        assert_eq!(
            sql,
            "SELECT DISTINCT TOP 10 SUM([Amount]) AS [Total], [Region] FROM [Sales] \
             WHERE TenantId = 1 GROUP BY [Region] ORDER BY [Region] DESC"
        );
    }

    #[test]
    fn test_empty_projection_selects_star() {
        let sql = synthesize(&sales_request(), &PolicyConfig::default()).unwrap();
        assert_eq!(sql, "SELECT * FROM [Sales] WHERE TenantId = 1");
    }

    #[test]
    fn test_count_forms() {
        let mut request = sales_request();
        request.aggregations.push(Aggregation::new("", AggregateFunction::Count));
        request
            .aggregations
            .push(Aggregation::new("CustomerId", AggregateFunction::CountDistinct));
        let sql = synthesize(&request, &PolicyConfig::default()).unwrap();
        assert!(sql.starts_with("SELECT COUNT(*), COUNT(DISTINCT [CustomerId]) FROM"));
    }

    #[test]
    fn test_filter_rendering() {
        let between = FilterPredicate::between("Price", json!(10), json!(100));
        assert_eq!(render_filter(&between), "[Price] BETWEEN 10 AND 100");

        let within = FilterPredicate::new("Region", FilterOperator::In, json!(["North", "South"]));
        assert_eq!(render_filter(&within), "[Region] IN ('North', 'South')");

        let like = FilterPredicate::new("Name", FilterOperator::Like, json!("Ltd"));
        assert_eq!(render_filter(&like), "[Name] LIKE '%Ltd%'");

        let null = FilterPredicate::new("ClosedAt", FilterOperator::IsNull, json!(null));
        assert_eq!(render_filter(&null), "[ClosedAt] IS NULL");

        let active = FilterPredicate::new("IsActive", FilterOperator::Eq, json!("true"));
        assert_eq!(render_filter(&active), "[IsActive] = 1");
    }

    #[test]
    fn test_or_filters_are_parenthesized() {
        let mut request = sales_request();
        request
            .filters
            .push(FilterPredicate::new("Region", FilterOperator::Eq, json!("North")));
        request
            .filters
            .push(FilterPredicate::new("Region", FilterOperator::Eq, json!("South")).or());

        let sql = synthesize(&request, &PolicyConfig::default()).unwrap();
        assert!(sql.ends_with("WHERE TenantId = 1 AND ([Region] = 'North' OR [Region] = 'South')"));
    }

    #[test]
    fn test_multi_relation_join_is_naive() {
        let mut request = sales_request();
        request.relations.push("Customers".to_string());
        request
            .projections
            .insert("Customers".to_string(), vec!["Name".to_string()]);

        let sql = synthesize(&request, &PolicyConfig::default()).unwrap();
        assert_eq!(
            sql,
            "SELECT [Customers].[Name] FROM [Sales] INNER JOIN [Customers] ON 1=1 WHERE TenantId = 1"
        );
    }

    #[test]
    fn test_rejections() {
        let empty = CanonicalRequest::from_free_text("sales by region");
        assert!(matches!(
            synthesize(&empty, &PolicyConfig::default()),
            Err(QueryError::InvalidRequest(_))
        ));

        let mut system = sales_request();
        system.relations = vec!["sysobjects".to_string()];
        assert!(matches!(
            synthesize(&system, &PolicyConfig::default()),
            Err(QueryError::PolicyViolation { .. })
        ));
    }

    #[test]
    fn test_deterministic() {
        let mut request = sales_request();
        request
            .filters
            .push(FilterPredicate::new("Amount", FilterOperator::Gt, json!(5)));
        let policy = sales_policy();
        assert_eq!(
            synthesize(&request, &policy).unwrap(),
            synthesize(&request, &policy).unwrap()
        );
    }
}
