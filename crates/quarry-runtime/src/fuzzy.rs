//! Fuzzy identifier repair.
//!
//! Maps an identifier the database rejected onto a column that actually
//! exists. Strategies run in a fixed order and the first hit wins:
//!
//! 1. case-insensitive exact match
//! 2. substring containment in either direction
//! 3. known alias families (`Status`/`IsActive`, `ItemCode`/`ItemNo`, ...)
//! 4. normalized Levenshtein similarity above the threshold

use quarry_core::{RelationSchema, SchemaCatalog};
use strsim::normalized_levenshtein;

/// Similarity a Levenshtein match must exceed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Shortest identifier considered for substring matching.
const MIN_SUBSTRING_LEN: usize = 3;

/// Interchangeable column-name stems. Matched against whole names and suffixes.
const ALIAS_FAMILIES: &[&[&str]] = &[
    &["status", "state", "flag", "isactive", "active"],
    &["code", "id", "key", "number", "num", "no"],
];

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    Substring,
    Alias,
    EditDistance,
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Substring => "substring",
            Self::Alias => "alias",
            Self::EditDistance => "edit distance",
        })
    }
}

/// A repaired identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierMatch {
    pub column: String,
    pub strategy: MatchStrategy,
}

/// Matches rejected identifiers against known columns.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Similarity (0.0-1.0) a Levenshtein candidate must exceed.
    pub similarity_threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Lower case, brackets and qualifier stripped.
    fn normalize(name: &str) -> String {
        quarry_sql::text::bare_ident(name).to_lowercase()
    }

    /// Levenshtein similarity relative to the longer name.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        normalized_levenshtein(&Self::normalize(a), &Self::normalize(b))
    }

    /// Best column of `relation` for `invalid`, if any strategy matches.
    pub fn find_best_match(&self, invalid: &str, relation: &RelationSchema) -> Option<IdentifierMatch> {
        let wanted = Self::normalize(invalid);
        if wanted.is_empty() {
            return None;
        }
        let columns: Vec<(&str, String)> = relation
            .column_names()
            .map(|name| (name, Self::normalize(name)))
            .collect();

        let hit = |column: &str, strategy| {
            Some(IdentifierMatch {
                column: column.to_string(),
                strategy,
            })
        };

        if let Some((name, _)) = columns.iter().find(|(_, norm)| *norm == wanted) {
            return hit(name, MatchStrategy::Exact);
        }

        if let Some(name) = substring_match(&wanted, &columns) {
            return hit(name, MatchStrategy::Substring);
        }

        if let Some(name) = alias_match(&wanted, &columns) {
            return hit(name, MatchStrategy::Alias);
        }

        let mut best: Option<(&str, f64)> = None;
        for (name, norm) in &columns {
            let score = normalized_levenshtein(&wanted, norm);
            if score > self.similarity_threshold && best.is_none_or(|(_, top)| score > top) {
                best = Some((name, score));
            }
        }
        best.and_then(|(name, _)| hit(name, MatchStrategy::EditDistance))
    }

    /// Repair `invalid` against the named relation in `catalog`.
    pub fn repair(&self, invalid: &str, relation: &str, catalog: &SchemaCatalog) -> Option<IdentifierMatch> {
        self.find_best_match(invalid, catalog.relation(relation)?)
    }
}

/// Closest-length column containing, or contained in, the wanted name.
fn substring_match<'a>(wanted: &str, columns: &[(&'a str, String)]) -> Option<&'a str> {
    if wanted.len() < MIN_SUBSTRING_LEN {
        return None;
    }
    columns
        .iter()
        .filter(|(_, norm)| {
            norm.len() >= MIN_SUBSTRING_LEN && (norm.contains(wanted) || wanted.contains(norm.as_str()))
        })
        .min_by_key(|(_, norm)| norm.len().abs_diff(wanted.len()))
        .map(|(name, _)| *name)
}

fn alias_match<'a>(wanted: &str, columns: &[(&'a str, String)]) -> Option<&'a str> {
    for family in ALIAS_FAMILIES {
        // Longest alias first so `isactive` wins over its `active` suffix.
        let mut aliases: Vec<&str> = family.to_vec();
        aliases.sort_by_key(|a| std::cmp::Reverse(a.len()));

        for alias in &aliases {
            let Some(stem) = wanted.strip_suffix(alias) else {
                continue;
            };
            for other in family.iter().filter(|o| *o != alias) {
                let candidate = format!("{}{}", stem, other);
                if let Some((name, _)) = columns.iter().find(|(_, norm)| *norm == candidate) {
                    return Some(name);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> RelationSchema {
        RelationSchema::new("Products")
            .with_column("ItemNo", "varchar(20)")
            .with_column("Description", "nvarchar(200)")
            .with_column("IsActive", "bit")
            .with_column("UnitPrice", "money")
    }

    fn matched(invalid: &str) -> Option<(String, MatchStrategy)> {
        FuzzyMatcher::default()
            .find_best_match(invalid, &products())
            .map(|m| (m.column, m.strategy))
    }

    #[test]
    fn test_exact_match_ignores_case_and_brackets() {
        assert_eq!(
            matched("[unitprice]"),
            Some(("UnitPrice".to_string(), MatchStrategy::Exact))
        );
    }

    #[test]
    fn test_substring_match() {
        assert_eq!(
            matched("Price"),
            Some(("UnitPrice".to_string(), MatchStrategy::Substring))
        );
        assert_eq!(
            matched("ItemDescription"),
            Some(("Description".to_string(), MatchStrategy::Substring))
        );
    }

    #[test]
    fn test_alias_families() {
        assert_eq!(
            matched("ItemCode"),
            Some(("ItemNo".to_string(), MatchStrategy::Alias))
        );
        assert_eq!(
            matched("Status"),
            Some(("IsActive".to_string(), MatchStrategy::Alias))
        );
    }

    #[test]
    fn test_edit_distance_match() {
        let sales = RelationSchema::new("Sales")
            .with_column("Region", "varchar(50)")
            .with_column("SalesAmount", "decimal(18,2)");
        let hit = FuzzyMatcher::default()
            .find_best_match("SalesAmt", &sales)
            .unwrap();
        assert_eq!(hit.column, "SalesAmount");
        assert_eq!(hit.strategy, MatchStrategy::EditDistance);
    }

    #[test]
    fn test_no_match_below_threshold() {
        assert_eq!(matched("Warehouse"), None);
        assert_eq!(matched(""), None);
    }

    #[test]
    fn test_repair_against_catalog() {
        let catalog = SchemaCatalog::new(vec![products()]);
        let matcher = FuzzyMatcher::default();
        assert_eq!(
            matcher.repair("Descripton", "[dbo].[Products]", &catalog).map(|m| m.column),
            Some("Description".to_string())
        );
        assert!(matcher.repair("Descripton", "Orders", &catalog).is_none());
    }
}
