//! Prompt construction for model-generated queries.
//!
//! One template serves every provider. It carries the live schema, the
//! active policy conditions and a worked example of guarded division.

use quarry_core::{PolicyConfig, SchemaCatalog};
use std::fmt::Write;

/// Columns listed per relation before the listing is truncated.
const MAX_COLUMNS_PER_RELATION: usize = 40;

/// A system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the prompt for a free-text request.
pub fn build_prompt(free_text: &str, catalog: &SchemaCatalog, policy: &PolicyConfig) -> Prompt {
    Prompt {
        system: system_prompt(catalog, policy),
        user: format!(
            "Request: {}\n\nReturn a single T-SQL SELECT statement.",
            free_text.trim()
        ),
    }
}

fn system_prompt(catalog: &SchemaCatalog, policy: &PolicyConfig) -> String {
    let mut out = String::new();

    out.push_str(
        "You translate business questions into Microsoft SQL Server (T-SQL) queries.\n\n\
         Rules:\n\
         - Output exactly one SELECT statement and nothing else. No explanations.\n\
         - Never write INSERT, UPDATE, DELETE, MERGE, DROP, ALTER, EXEC or SELECT ... INTO.\n\
         - Use TOP n instead of LIMIT. Quote identifiers with [brackets].\n\
         - Use only the relations and columns listed below.\n\
         - Every aggregate query must GROUP BY all non-aggregated columns.\n\
         - Guard every division against zero denominators.\n",
    );

    out.push_str("\nMandatory conditions (AND all of them into the WHERE clause):\n");
    for condition in &policy.mandatory_conditions {
        let _ = writeln!(out, "- {}", condition);
    }
    for relation in policy.relation_conditions.keys() {
        let conditions = policy.relation_conditions_for(relation);
        if !conditions.is_empty() {
            let _ = writeln!(out, "- when querying {}: {}", relation, conditions.join(" AND "));
        }
    }

    out.push_str("\nExample of a guarded division:\n");
    out.push_str(
        "SELECT [Region], ISNULL(SUM([Profit]) * 100.0 / NULLIF(SUM([Revenue]), 0), 0) AS [MarginPct]\n\
         FROM [Sales] WHERE ",
    );
    out.push_str(&example_where(policy));
    out.push_str("\nGROUP BY [Region];\n");

    out.push_str("\nSchema:\n");
    for relation in &catalog.relations {
        let columns: Vec<String> = relation
            .columns
            .iter()
            .take(MAX_COLUMNS_PER_RELATION)
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        let more = relation.columns.len().saturating_sub(MAX_COLUMNS_PER_RELATION);
        let _ = write!(out, "- {} ({}", relation.name, columns.join(", "));
        if more > 0 {
            let _ = write!(out, ", ... {} more", more);
        }
        out.push(')');
        if let Some(rows) = relation.row_count_hint {
            let _ = write!(out, " ~{} rows", rows);
        }
        out.push('\n');
    }

    out
}

fn example_where(policy: &PolicyConfig) -> String {
    let conditions = policy.conditions_for(&["Sales"]);
    if conditions.is_empty() {
        "1 = 1".to_string()
    } else {
        conditions.join(" AND ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::RelationSchema;

    #[test]
    fn test_prompt_carries_schema_and_policy() {
        let catalog = SchemaCatalog::new(vec![
            RelationSchema::new("Sales")
                .with_column("Amount", "decimal")
                .with_column("TenantId", "int")
                .with_row_count(1200),
        ]);
        let mut policy = PolicyConfig::default();
        policy
            .relation_conditions
            .insert("Sales".to_string(), vec!["Status = {status}".to_string()]);

        let prompt = build_prompt("  revenue by month ", &catalog, &policy);
        assert!(prompt.user.starts_with("Request: revenue by month\n"));
        assert!(prompt.system.contains("- TenantId = 1"));
        assert!(prompt.system.contains("when querying Sales: Status = 1"));
        assert!(prompt.system.contains("- Sales (Amount decimal, TenantId int) ~1200 rows"));
        assert!(prompt.system.contains("NULLIF(SUM([Revenue]), 0)"));
    }
}
