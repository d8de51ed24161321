//! Regex-level clause recognition for single SELECT statements.
//!
//! [`SelectLayout`] records where the top-level clauses of a statement start
//! and end. Keywords inside parentheses, string literals or bracketed
//! identifiers are ignored. Statements with a top-level set operator
//! (`UNION`, `INTERSECT`, `EXCEPT`) or that do not start with `SELECT` have no
//! layout; passes leave such text unchanged.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

use crate::text::{bare_ident, mask_literals};

static AGGREGATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(COUNT|COUNT_BIG|SUM|AVG|MIN|MAX|STDEV|STDEVP|VAR|VARP|STRING_AGG)\s*\(")
        .expect("valid aggregate regex")
});

static TRAILING_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*?)\s+AS\s+(\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_]*|'[^']*')$")
        .expect("valid alias regex")
});

static SORT_DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(ASC|DESC)$").expect("valid direction regex"));

static RELATION_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\bJOIN\s+)((?:\[[^\]]+\]|[A-Za-z_#@][\w#@$]*)(?:\.(?:\[[^\]]+\]|[A-Za-z_][\w$]*))*)")
        .expect("valid relation regex")
});

static ANY_RELATION_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+((?:\[[^\]]+\]|[A-Za-z_#@][\w#@$]*)(?:\.(?:\[[^\]]+\]|[A-Za-z_][\w$]*))*)")
        .expect("valid relation regex")
});

static WINDOW_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bOVER\s*\(").expect("valid window regex"));

static SUBQUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*SELECT\b").expect("valid subquery regex"));

const SET_OPERATORS: [&[&str]; 3] = [&["UNION"], &["INTERSECT"], &["EXCEPT"]];

const CLAUSE_KEYWORDS: [&[&str]; 5] = [
    &["FROM"],
    &["WHERE"],
    &["GROUP", "BY"],
    &["HAVING"],
    &["ORDER", "BY"],
];

/// A top-level clause: its keyword span and body span (byte offsets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub keyword: Range<usize>,
    pub body: Range<usize>,
}

impl Clause {
    /// Keyword start through body end.
    pub fn span(&self) -> Range<usize> {
        self.keyword.start..self.body.end
    }
}

/// Top-level clause positions of a SELECT statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectLayout {
    /// Everything between `SELECT` and `FROM` (modifiers and select list).
    pub select: Clause,
    pub from: Option<Clause>,
    pub where_: Option<Clause>,
    pub group_by: Option<Clause>,
    pub having: Option<Clause>,
    pub order_by: Option<Clause>,
    /// Byte offset of the trailing `;` (or the text length).
    pub end: usize,
}

impl SelectLayout {
    /// Recognize the clauses of `sql`, or `None` if it is not a plain SELECT.
    pub fn parse(sql: &str) -> Option<Self> {
        let masked = mask_literals(sql);
        let lead = masked.len() - masked.trim_start().len();
        let select_kw = match_words(masked.as_bytes(), lead, &["SELECT"])?;

        for op in SET_OPERATORS {
            if find_top_level(&masked, op, 0).is_some() {
                return None;
            }
        }

        let trimmed_end = masked.trim_end().len();
        let end = if masked[..trimmed_end].ends_with(';') {
            trimmed_end - 1
        } else {
            trimmed_end
        };
        // A `;` before the end means more than one statement.
        if find_top_level(&masked[..end], &[";"], 0).is_some() {
            return None;
        }

        let mut starts: Vec<usize> = Vec::new();
        let mut cursor = select_kw.end;
        let mut found: [Option<Range<usize>>; 5] = [None, None, None, None, None];
        for (slot, words) in CLAUSE_KEYWORDS.into_iter().enumerate() {
            if let Some(kw) = find_top_level(&masked[..end], words, cursor) {
                cursor = kw.end;
                starts.push(kw.start);
                found[slot] = Some(kw);
            }
        }

        // Keywords must appear in clause order.
        for (slot, words) in CLAUSE_KEYWORDS.into_iter().enumerate() {
            if found[slot].is_none() && find_top_level(&masked[..end], words, select_kw.end).is_some() {
                return None;
            }
        }

        let body_end = |from: usize| -> usize {
            starts
                .iter()
                .copied()
                .filter(|s| *s > from)
                .min()
                .unwrap_or(end)
        };

        let select = Clause {
            keyword: select_kw.clone(),
            body: select_kw.end..body_end(select_kw.end),
        };
        let clause = |slot: usize| {
            found[slot].clone().map(|kw| Clause {
                body: kw.end..body_end(kw.end),
                keyword: kw,
            })
        };

        Some(Self {
            select,
            from: clause(0),
            where_: clause(1),
            group_by: clause(2),
            having: clause(3),
            order_by: clause(4),
            end,
        })
    }

    /// Position where a new WHERE clause would go.
    pub fn where_insert_point(&self) -> usize {
        [&self.group_by, &self.having, &self.order_by]
            .into_iter()
            .flatten()
            .map(|c| c.keyword.start)
            .min()
            .unwrap_or(self.end)
    }

    /// Position where a new GROUP BY clause would go.
    pub fn group_by_insert_point(&self) -> usize {
        [&self.having, &self.order_by]
            .into_iter()
            .flatten()
            .map(|c| c.keyword.start)
            .min()
            .unwrap_or(self.end)
    }

    /// Modifiers at the head of the select body.
    pub fn modifiers(&self, sql: &str) -> SelectModifiers {
        SelectModifiers::parse(sql, self.select.body.clone())
    }

    /// Top-level items of the select list.
    pub fn select_items<'a>(&self, sql: &'a str) -> Vec<&'a str> {
        let mods = self.modifiers(sql);
        split_top_level(&sql[mods.list_start..self.select.body.end])
    }

    /// Relations named in the top-level FROM clause, brackets stripped.
    pub fn from_relations(&self, sql: &str) -> Vec<String> {
        let Some(from) = &self.from else {
            return Vec::new();
        };
        let masked = mask_literals(sql);
        let mut out: Vec<String> = Vec::new();
        for part in split_top_level(&masked[from.body.clone()]) {
            for caps in RELATION_TARGET.captures_iter(part) {
                let name = unbracket_path(&caps[1]);
                if !out.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
                    out.push(name);
                }
            }
        }
        out
    }
}

/// `DISTINCT` / `TOP` recognized at the start of the select body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectModifiers {
    pub distinct: Option<Range<usize>>,
    pub top: Option<Range<usize>>,
    /// Where the column list begins.
    pub list_start: usize,
}

static TOP_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*TOP\s*(?:\(\s*\d+\s*\)|\d+)(?:\s+PERCENT)?(?:\s+WITH\s+TIES)?")
        .expect("valid top regex")
});

static DISTINCT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:DISTINCT|ALL)\b").expect("valid distinct regex"));

impl SelectModifiers {
    fn parse(sql: &str, body: Range<usize>) -> Self {
        let mut pos = body.start;
        let mut distinct = None;
        let mut top = None;

        if let Some(m) = DISTINCT_CLAUSE.find(&sql[pos..body.end]) {
            distinct = Some(pos + m.start()..pos + m.end());
            pos += m.end();
        }
        if let Some(m) = TOP_CLAUSE.find(&sql[pos..body.end]) {
            top = Some(pos + m.start()..pos + m.end());
            pos += m.end();
        }

        Self {
            distinct,
            top,
            list_start: pos,
        }
    }

    /// Where a `TOP n` should be inserted (after `DISTINCT` when present).
    pub fn top_insert_point(&self, select_kw_end: usize) -> usize {
        self.distinct
            .as_ref()
            .map(|d| d.end)
            .unwrap_or(select_kw_end)
    }
}

/// Find the first top-level occurrence of a (possibly multi-word) keyword at
/// or after `from`. Returns the keyword's byte span.
pub fn find_top_level(sql: &str, words: &[&str], from: usize) -> Option<Range<usize>> {
    let bytes = sql.as_bytes();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += 1;
                }
            }
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && i >= from => {
                if let Some(span) = match_words(bytes, i, words) {
                    return Some(span);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Match `words` (separated by whitespace) case-insensitively at `at`, with
/// identifier boundaries on both sides.
fn match_words(bytes: &[u8], at: usize, words: &[&str]) -> Option<Range<usize>> {
    let is_word = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'@' | b'#' | b'$');
    let first_is_word = words
        .first()
        .and_then(|w| w.as_bytes().first())
        .is_some_and(|b| is_word(*b));
    if first_is_word && at > 0 && (is_word(bytes[at - 1]) || bytes[at - 1] == b'.') {
        return None;
    }

    let mut pos = at;
    for (n, word) in words.iter().enumerate() {
        if n > 0 {
            let ws_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == ws_start {
                return None;
            }
        }
        let w = word.as_bytes();
        if pos + w.len() > bytes.len() || !bytes[pos..pos + w.len()].eq_ignore_ascii_case(w) {
            return None;
        }
        pos += w.len();
    }

    let last_is_word = words
        .last()
        .and_then(|w| w.as_bytes().last())
        .is_some_and(|b| is_word(*b));
    if last_is_word && pos < bytes.len() && is_word(bytes[pos]) {
        return None;
    }
    Some(at..pos)
}

/// Split on top-level commas, trimming each item.
pub fn split_top_level(list: &str) -> Vec<&str> {
    let bytes = list.as_bytes();
    let mut out = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                out.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    let last = list[start.min(list.len())..].trim();
    if !last.is_empty() {
        out.push(last);
    }
    out.retain(|item| !item.is_empty());
    out
}

/// Whether a select item contains a non-windowed aggregate call.
pub fn is_aggregate_expr(item: &str) -> bool {
    let masked = mask_literals(item);
    AGGREGATE_CALL.is_match(&masked) && !WINDOW_CALL.is_match(&masked) && !is_subquery(&masked)
}

/// Whether an expression is a window function call.
pub fn is_windowed(expr: &str) -> bool {
    WINDOW_CALL.is_match(&mask_literals(expr))
}

/// Whether an expression contains a parenthesized SELECT.
pub fn is_subquery(expr: &str) -> bool {
    SUBQUERY.is_match(expr)
}

/// Whether the select list contains any aggregate.
pub fn has_aggregate(items: &[&str]) -> bool {
    items.iter().any(|item| is_aggregate_expr(item))
}

/// Strip a trailing `AS alias` from a select item.
pub fn strip_alias(item: &str) -> &str {
    match TRAILING_ALIAS.captures(item) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim()).unwrap_or(item),
        None => item.trim(),
    }
}

/// The alias of a select item (`AS [Total]` gives `[Total]`), if any.
pub fn select_alias(item: &str) -> Option<&str> {
    TRAILING_ALIAS
        .captures(item.trim())
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

/// Strip a trailing `ASC` / `DESC` from a sort item.
pub fn strip_direction(item: &str) -> &str {
    match SORT_DIRECTION.find(item) {
        Some(m) => item[..m.start()].trim(),
        None => item.trim(),
    }
}

/// Whether an expression is a literal (number, string, NULL) or a star.
pub fn is_literal_or_star(expr: &str) -> bool {
    let e = expr.trim();
    e == "*"
        || e.ends_with(".*")
        || e.eq_ignore_ascii_case("NULL")
        || (e.starts_with('\'') && e.ends_with('\''))
        || (e.starts_with("N'") && e.ends_with('\''))
        || e.parse::<f64>().is_ok()
}

/// Every relation named after FROM or JOIN anywhere in the text, including
/// subqueries, brackets stripped.
pub fn all_relations(sql: &str) -> Vec<String> {
    let masked = mask_literals(sql);
    let mut out: Vec<String> = Vec::new();
    for caps in ANY_RELATION_TARGET.captures_iter(&masked) {
        let name = unbracket_path(&caps[1]);
        if !out.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            out.push(name);
        }
    }
    out
}

fn unbracket_path(path: &str) -> String {
    path.replace(['[', ']'], "")
}

/// Bare column names referenced by sort or group items.
pub fn item_columns(items: &[&str]) -> Vec<String> {
    items
        .iter()
        .map(|item| bare_ident(strip_direction(item)).to_string())
        .collect()
}
