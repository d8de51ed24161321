//! Error classification and the targeted repairs applied by the validation loop.
//!
//! Database messages are matched by text. Each class has exactly one repair;
//! a repair that cannot change the statement returns `None` so the loop
//! escalates to the fallback instead of probing the same text again.

use quarry_core::SchemaCatalog;
use quarry_sql::SelectLayout;
use quarry_sql::clauses::{
    is_aggregate_expr, select_alias, split_top_level, strip_alias, strip_direction,
};
use quarry_sql::text::{bare_ident, map_code, quote_ident, squash};
use regex::Regex;
use std::sync::LazyLock;

use crate::fuzzy::{FuzzyMatcher, IdentifierMatch};

static QUOTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).expect("valid quoted name regex"));

static INVALID_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)invalid column name\s+'([^']+)'").expect("valid invalid column regex")
});

/// `s.`, `[s].` qualifiers whose alias is a single letter.
static SHORT_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[^\w\].])(?:\[[A-Za-z]\]|[A-Za-z])\.(\[|[A-Za-z_])")
        .expect("valid qualifier regex")
});

/// `FROM [Sales] AS s`, `JOIN Stock s` alias declarations.
static SHORT_ALIAS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(FROM|JOIN)(\s+(?:\[[^\]]+\]|[A-Za-z_][\w$]*)(?:\.(?:\[[^\]]+\]|[A-Za-z_][\w$]*))*)\s+(?:AS\s+)?(?:\[[A-Za-z]\]|[A-Za-z])\b",
    )
    .expect("valid alias declaration regex")
});

/// What kind of failure a probe reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// An ORDER BY expression is neither grouped nor aggregated.
    OrderByNotInGroupBy,
    /// A select-list column is neither grouped nor aggregated.
    SelectNotInGroupBy { column: Option<String> },
    /// A qualified or short-aliased identifier could not be resolved.
    AmbiguousIdentifier,
    /// The named column does not exist.
    InvalidColumn { name: String },
    /// The probe ran out of time.
    Timeout,
    /// Anything else.
    Unrecognized,
}

impl ErrorClass {
    /// Stable name used to bound repairs to one per class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderByNotInGroupBy => "order_by_not_grouped",
            Self::SelectNotInGroupBy { .. } => "select_not_grouped",
            Self::AmbiguousIdentifier => "ambiguous_identifier",
            Self::InvalidColumn { .. } => "invalid_column",
            Self::Timeout => "timeout",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Whether a targeted repair exists for this class.
    pub fn is_repairable(&self) -> bool {
        !matches!(self, Self::Timeout | Self::Unrecognized)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidColumn { name } => write!(f, "invalid column '{}'", name),
            Self::SelectNotInGroupBy { column: Some(c) } => {
                write!(f, "select column '{}' not grouped", c)
            }
            other => f.write_str(other.kind()),
        }
    }
}

/// Classify a database error message.
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    let not_grouped = lower.contains("not contained in")
        || lower.contains("must appear in the group by")
        || lower.contains("neither an aggregate nor grouped");

    if lower.contains("order by clause") && not_grouped {
        return ErrorClass::OrderByNotInGroupBy;
    }
    if lower.contains("select list") && not_grouped {
        return ErrorClass::SelectNotInGroupBy {
            column: QUOTED_NAME.captures(message).map(|c| c[1].to_string()),
        };
    }
    if (lower.contains("multi-part identifier") && lower.contains("could not be bound"))
        || lower.contains("ambiguous column name")
    {
        return ErrorClass::AmbiguousIdentifier;
    }
    if let Some(caps) = INVALID_COLUMN.captures(message) {
        return ErrorClass::InvalidColumn {
            name: caps[1].to_string(),
        };
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorClass::Timeout;
    }
    ErrorClass::Unrecognized
}

/// Repair applied for one error class: the new statement plus a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub sql: String,
    pub note: String,
}

/// Apply the repair for `class`, or `None` when no change is possible.
pub fn apply(sql: &str, class: &ErrorClass, catalog: &SchemaCatalog, matcher: &FuzzyMatcher) -> Option<Repair> {
    match class {
        ErrorClass::OrderByNotInGroupBy => promote_order_by(sql),
        ErrorClass::SelectNotInGroupBy { column } => column
            .as_deref()
            .and_then(|c| group_by_column(sql, c)),
        ErrorClass::AmbiguousIdentifier => strip_short_aliases(sql).map(|sql| Repair {
            sql,
            note: "removed short table aliases".to_string(),
        }),
        ErrorClass::InvalidColumn { name } => repair_column(sql, name, catalog, matcher),
        ErrorClass::Timeout | ErrorClass::Unrecognized => None,
    }
}

/// Move unaggregated ORDER BY expressions into GROUP BY, or drop the
/// ORDER BY when the statement has no grouping to extend.
pub fn promote_order_by(sql: &str) -> Option<Repair> {
    let layout = SelectLayout::parse(sql)?;
    let order_by = layout.order_by.as_ref()?;

    let Some(group_by) = &layout.group_by else {
        let mut out = String::with_capacity(sql.len());
        out.push_str(sql[..order_by.keyword.start].trim_end());
        out.push_str(&sql[order_by.body.end..]);
        return Some(Repair {
            sql: out,
            note: "dropped ORDER BY that conflicted with aggregation".to_string(),
        });
    };

    let grouped: Vec<String> = split_top_level(&sql[group_by.body.clone()])
        .into_iter()
        .map(squash)
        .collect();
    let aliases: Vec<String> = layout
        .select_items(sql)
        .into_iter()
        .filter_map(select_alias)
        .map(squash)
        .collect();

    let mut added: Vec<String> = Vec::new();
    for item in split_top_level(&sql[order_by.body.clone()]) {
        let expr = strip_direction(item).trim();
        let key = squash(expr);
        if expr.is_empty()
            || is_aggregate_expr(expr)
            || expr.chars().all(|c| c.is_ascii_digit())
            || grouped.contains(&key)
            || aliases.contains(&key)
            || added.iter().any(|a| squash(a) == key)
        {
            continue;
        }
        added.push(expr.to_string());
    }
    if added.is_empty() {
        return None;
    }

    let body = sql[group_by.body.clone()].trim_end();
    let mut out = String::with_capacity(sql.len() + 32);
    out.push_str(&sql[..group_by.body.start]);
    out.push_str(body);
    out.push_str(", ");
    out.push_str(&added.join(", "));
    out.push_str(&sql[group_by.body.start + body.len()..]);
    Some(Repair {
        sql: out,
        note: format!("added {} to GROUP BY", added.join(", ")),
    })
}

/// Add the named select-list column to GROUP BY, creating the clause if needed.
pub fn group_by_column(sql: &str, column: &str) -> Option<Repair> {
    let layout = SelectLayout::parse(sql)?;
    let wanted = bare_ident(column).to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    // Prefer the select-list spelling so qualifiers stay consistent.
    let expr = layout
        .select_items(sql)
        .into_iter()
        .map(strip_alias)
        .find(|e| !is_aggregate_expr(e) && bare_ident(e).eq_ignore_ascii_case(&wanted))
        .map(|e| e.trim().to_string())
        .unwrap_or_else(|| quote_ident(bare_ident(column)));

    let sql = match &layout.group_by {
        Some(group_by) => {
            let body = &sql[group_by.body.clone()];
            let already = split_top_level(body).into_iter().any(|g| squash(g) == squash(&expr));
            if already {
                return None;
            }
            let trimmed = body.trim_end();
            format!(
                "{}{}, {}{}",
                &sql[..group_by.body.start],
                trimmed,
                expr,
                &sql[group_by.body.start + trimmed.len()..]
            )
        }
        None => quarry_sql::text::splice(
            sql,
            layout.group_by_insert_point(),
            &format!("GROUP BY {}", expr),
        ),
    };

    Some(Repair {
        note: format!("added {} to GROUP BY", expr),
        sql,
    })
}

/// Remove single-letter table aliases and the qualifiers that use them.
pub fn strip_short_aliases(sql: &str) -> Option<String> {
    let out = map_code(sql, |code| {
        let code = SHORT_ALIAS_DECL.replace_all(code, "$1$2");
        SHORT_QUALIFIER.replace_all(&code, "$1$2").into_owned()
    });
    (out != sql).then_some(out)
}

/// Replace every whole-word occurrence of `from` outside literals with `to`.
///
/// Bracketed occurrences stay bracketed.
pub fn replace_identifier(sql: &str, from: &str, to: &str) -> String {
    let escaped = regex::escape(bare_ident(from));
    let Ok(pattern) = Regex::new(&format!(r"(?i)\[{0}\]|\b{0}\b", escaped)) else {
        return sql.to_string();
    };
    map_code(sql, |code| {
        pattern
            .replace_all(code, |caps: &regex::Captures| {
                if caps[0].starts_with('[') {
                    quote_ident(to)
                } else {
                    to.to_string()
                }
            })
            .into_owned()
    })
}

fn repair_column(sql: &str, invalid: &str, catalog: &SchemaCatalog, matcher: &FuzzyMatcher) -> Option<Repair> {
    let layout = SelectLayout::parse(sql)?;
    let IdentifierMatch { column, strategy } = layout
        .from_relations(sql)
        .iter()
        .find_map(|relation| matcher.repair(invalid, relation, catalog))?;

    let fixed = replace_identifier(sql, invalid, &column);
    (fixed != sql).then(|| Repair {
        sql: fixed,
        note: format!("replaced column '{}' with '{}' ({} match)", invalid, column, strategy),
    })
}
