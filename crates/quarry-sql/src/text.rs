//! Literal-aware text helpers.
//!
//! Every rewrite in this crate works on SQL text, never on an AST. The helpers
//! here keep those rewrites away from the inside of string literals and
//! bracketed identifiers.

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static WORD_OR_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[[^\]]*\]|"[^"]*"|[@#]*[A-Za-z_][A-Za-z0-9_]*"#).expect("valid word regex")
});

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid fence regex")
});

/// Keywords and built-in functions rendered in upper case.
const KEYWORDS: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "AVG", "BETWEEN", "BY", "CASE", "CAST", "COALESCE", "CONVERT",
    "COUNT", "COUNT_BIG", "CROSS", "DESC", "DISTINCT", "ELSE", "END", "EXCEPT", "EXISTS", "FETCH",
    "FROM", "FULL", "GROUP", "HAVING", "IN", "INNER", "INTERSECT", "IS", "ISNULL", "JOIN", "LEFT",
    "LIKE", "LIMIT", "MAX", "MIN", "NEXT", "NOT", "NULL", "NULLIF", "OFFSET", "ON", "ONLY", "OR",
    "ORDER", "OUTER", "OVER", "PARTITION", "PERCENT", "RIGHT", "ROWS", "SELECT", "SUM", "THEN",
    "TIES", "TOP", "UNION", "WHEN", "WHERE", "WITH",
];

/// A run of SQL text that is either code or a single-quoted literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Code(&'a str),
    Literal(&'a str),
}

/// Split SQL into code and string-literal runs.
///
/// `''` inside a literal is an escaped quote. Bracketed identifiers stay in
/// code runs even when they contain a quote. An unterminated literal runs to
/// the end of the input.
pub fn segments(sql: &str) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                i += 1;
            }
            b'\'' => {
                if start < i {
                    out.push(Segment::Code(&sql[start..i]));
                }
                let lit_start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                let end = i.min(bytes.len());
                out.push(Segment::Literal(&sql[lit_start..end]));
                start = end;
            }
            _ => i += 1,
        }
    }

    if start < bytes.len() {
        out.push(Segment::Code(&sql[start.min(bytes.len())..]));
    }
    out
}

/// Apply `f` to code runs only, copying literals through unchanged.
pub fn map_code(sql: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    for segment in segments(sql) {
        match segment {
            Segment::Code(code) => out.push_str(&f(code)),
            Segment::Literal(lit) => out.push_str(lit),
        }
    }
    out
}

/// The code with every literal's content blanked out, same byte length.
///
/// Lets callers run position-based searches without matching inside strings.
pub fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for segment in segments(sql) {
        match segment {
            Segment::Code(code) => out.push_str(code),
            Segment::Literal(lit) => {
                out.push('\'');
                out.extend(std::iter::repeat_n(' ', lit.len().saturating_sub(2)));
                if lit.len() > 1 {
                    out.push('\'');
                }
            }
        }
    }
    out
}

/// Remove the body of a markdown code fence, or stray backticks.
pub fn strip_code_fences(text: &str) -> String {
    if let Some(caps) = FENCE.captures(text) {
        return caps[1].to_string();
    }
    text.replace("```", "").replace('`', "")
}

/// Drop `--` line comments and `/* */` block comments outside literals.
pub fn strip_comments(sql: &str) -> String {
    map_code(sql, |code| {
        let bytes = code.as_bytes();
        let mut out = String::with_capacity(code.len());
        let mut i = 0;
        let mut copied = 0;
        while i < bytes.len() {
            if bytes[i] == b'[' {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                i += 1;
                continue;
            }
            if bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'-') {
                out.push_str(&code[copied..i]);
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                copied = i;
                continue;
            }
            if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                out.push_str(&code[copied..i]);
                out.push(' ');
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                copied = i;
                continue;
            }
            i += 1;
        }
        if copied < code.len() {
            out.push_str(&code[copied.min(code.len())..]);
        }
        out
    })
}

/// Collapse whitespace runs outside literals into single spaces.
pub fn collapse_whitespace(sql: &str) -> String {
    map_code(sql, |code| WHITESPACE.replace_all(code, " ").into_owned())
        .trim()
        .to_string()
}

/// Upper-case SQL keywords outside literals and quoted identifiers.
pub fn canonicalize_keywords(sql: &str) -> String {
    map_code(sql, |code| {
        WORD_OR_QUOTED
            .replace_all(code, |caps: &regex::Captures<'_>| {
                let token = &caps[0];
                if token.starts_with(['[', '"', '@', '#']) {
                    return token.to_string();
                }
                let upper = token.to_ascii_uppercase();
                if KEYWORDS.binary_search(&upper.as_str()).is_ok() {
                    upper
                } else {
                    token.to_string()
                }
            })
            .into_owned()
    })
}

/// Normalize a SQL fragment (condition, expression) the way the rewriter
/// normalizes whole statements, without adding a terminator.
pub fn normalize_fragment(fragment: &str) -> String {
    canonicalize_keywords(&collapse_whitespace(&strip_comments(fragment)))
}

/// Comparison key: lower case, no whitespace, no identifier brackets.
pub fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != '[' && *c != ']')
        .flat_map(char::to_lowercase)
        .collect()
}

/// `[name]`, escaping embedded closing brackets.
pub fn quote_ident(name: &str) -> String {
    let name = name.trim();
    if name == "*" {
        return name.to_string();
    }
    let bare = name
        .strip_prefix('[')
        .and_then(|n| n.strip_suffix(']'))
        .unwrap_or(name);
    format!("[{}]", bare.replace(']', "]]"))
}

/// Strip identifier brackets and any qualifier: `[s].[Amount]` -> `Amount`.
pub fn bare_ident(name: &str) -> &str {
    let name = name.trim();
    let last = match name.rfind("].") {
        Some(pos) => &name[pos + 2..],
        None if !name.starts_with('[') => name.rsplit('.').next().unwrap_or(name),
        None => name,
    };
    last.trim_start_matches('[').trim_end_matches(']')
}

/// Insert `text` at byte offset `at`, keeping single-space separation and
/// never placing a space before a terminator.
pub fn splice(sql: &str, at: usize, text: &str) -> String {
    let before = sql[..at].trim_end();
    let after = sql[at..].trim_start();
    let sep = if after.is_empty() || after.starts_with(';') || after.starts_with(')') {
        ""
    } else {
        " "
    };
    if before.is_empty() {
        format!("{}{}{}", text, sep, after)
    } else {
        format!("{} {}{}{}", before, text, sep, after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keyword_table_is_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS.to_vec());
    }

    #[test]
    fn test_segments_handle_escaped_quotes_and_brackets() {
        let segs = segments("SELECT 'It''s' AS [O'Brien] FROM t");
        assert_eq!(
            segs,
            vec![
                Segment::Code("SELECT "),
                Segment::Literal("'It''s'"),
                Segment::Code(" AS [O'Brien] FROM t"),
            ]
        );
    }

    #[test]
    fn test_mask_literals_keeps_length() {
        let sql = "SELECT 'a / b' FROM t";
        let masked = mask_literals(sql);
        assert_eq!(masked.len(), sql.len());
        assert!(!masked.contains('/'));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1\n");
        assert_eq!(strip_code_fences("`SELECT 1`"), "SELECT 1");
    }

    #[test]
    fn test_strip_comments_outside_literals() {
        let sql = "SELECT a -- note\nFROM t /* x */ WHERE b = '--keep'";
        assert_eq!(
            collapse_whitespace(&strip_comments(sql)),
            "SELECT a FROM t WHERE b = '--keep'"
        );
    }

    #[test]
    fn test_canonicalize_keywords_skips_literals_and_identifiers() {
        assert_eq!(
            canonicalize_keywords("select [from], 'select' from t where x is not null"),
            "SELECT [from], 'select' FROM t WHERE x IS NOT NULL"
        );
    }

    #[test]
    fn test_bare_ident() {
        assert_eq!(bare_ident("[s].[Amount]"), "Amount");
        assert_eq!(bare_ident("s.Amount"), "Amount");
        assert_eq!(bare_ident("[Sales Amount]"), "Sales Amount");
        assert_eq!(bare_ident("Amount"), "Amount");
    }

    #[test]
    fn test_splice_spacing() {
        assert_eq!(splice("SELECT a FROM t;", 15, "WHERE x = 1"), "SELECT a FROM t WHERE x = 1;");
        assert_eq!(splice("SELECT a FROM t", 15, "WHERE x = 1"), "SELECT a FROM t WHERE x = 1");
    }
}
