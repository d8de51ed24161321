//! The canonical request model.
//!
//! A [`CanonicalRequest`] is the structured representation of a query intent
//! before any SQL text exists. It either carries structured selections
//! (relations, projections, aggregations, filters...) or only free-form text,
//! never both paths at once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::QueryError;

/// A structured query intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Selected relations; the first one is the FROM target.
    #[serde(default)]
    pub relations: Vec<String>,

    /// Projected columns keyed by relation.
    #[serde(default)]
    pub projections: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub aggregations: Vec<Aggregation>,

    #[serde(default)]
    pub group_by: Vec<ColumnRef>,

    #[serde(default)]
    pub filters: Vec<FilterPredicate>,

    #[serde(default)]
    pub sort: Vec<SortKey>,

    /// Row cap rendered as `TOP n` when positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default)]
    pub distinct: bool,

    /// Natural-language request, used only when no relation is selected.
    #[serde(default)]
    pub free_text: String,

    /// Model id for the AI path. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CanonicalRequest {
    /// Build a free-text (AI path) request.
    pub fn from_free_text(text: impl Into<String>) -> Self {
        Self {
            free_text: text.into(),
            ..Self::default()
        }
    }

    /// True when the request must go through the AI provider chain.
    pub fn is_ai_request(&self) -> bool {
        self.relations.is_empty() && !self.free_text.trim().is_empty()
    }

    /// True when any structured selection is present.
    pub fn has_structured_intent(&self) -> bool {
        !self.relations.is_empty()
            || self.projections.values().any(|cols| !cols.is_empty())
            || !self.aggregations.is_empty()
            || !self.group_by.is_empty()
            || !self.filters.is_empty()
            || !self.sort.is_empty()
    }

    /// Check the structural invariants of the request.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.relations.is_empty() {
            if self.has_structured_intent() {
                return Err(QueryError::invalid(
                    "structured selections require at least one relation",
                ));
            }
            if self.free_text.trim().is_empty() {
                return Err(QueryError::invalid(
                    "request has neither relations nor free text",
                ));
            }
            return Ok(());
        }

        if self.relations.iter().any(|r| r.trim().is_empty()) {
            return Err(QueryError::invalid("relation names must not be empty"));
        }

        for relation in self.projections.keys() {
            if !self.relations.iter().any(|r| r.eq_ignore_ascii_case(relation)) {
                return Err(QueryError::invalid(format!(
                    "projection references relation '{}' which is not selected",
                    relation
                )));
            }
        }

        for aggregation in &self.aggregations {
            aggregation.validate()?;
        }

        for filter in &self.filters {
            filter.validate()?;
        }

        if self.group_by.iter().any(ColumnRef::is_empty) || self.sort.iter().any(|s| s.column.is_empty()) {
            return Err(QueryError::invalid(
                "group-by and sort keys must name a column",
            ));
        }

        Ok(())
    }
}

/// A column reference, optionally relation-qualified (`Sales.Amount`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnRef(pub String);

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The relation prefix, if any.
    pub fn relation(&self) -> Option<&str> {
        self.0
            .trim()
            .rsplit_once('.')
            .map(|(rel, _)| strip_brackets(rel))
    }

    /// The bare column name with any relation prefix and brackets removed.
    pub fn column(&self) -> &str {
        let raw = self.0.trim();
        let name = raw.rsplit_once('.').map(|(_, col)| col).unwrap_or(raw);
        strip_brackets(name)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn strip_brackets(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(s)
}

/// Aggregate function applied to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Max,
    Min,
    CountDistinct,
}

impl AggregateFunction {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Count | Self::CountDistinct => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    /// May be empty only for `COUNT`, which renders as `COUNT(*)`.
    #[serde(default)]
    pub column: ColumnRef,
    pub function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn new(column: impl Into<String>, function: AggregateFunction) -> Self {
        Self {
            column: ColumnRef::new(column),
            function,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn validate(&self) -> Result<(), QueryError> {
        if self.column.is_empty() && self.function != AggregateFunction::Count {
            return Err(QueryError::invalid(format!(
                "{:?} aggregation requires a column",
                self.function
            )));
        }
        Ok(())
    }
}

/// Comparison operator of a filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=", alias = "<>")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "LIKE", alias = "like")]
    Like,
    #[serde(rename = "IN", alias = "in")]
    In,
    #[serde(rename = "NOT IN", alias = "not in")]
    NotIn,
    #[serde(rename = "IS NULL", alias = "is null")]
    IsNull,
    #[serde(rename = "IS NOT NULL", alias = "is not null")]
    IsNotNull,
    #[serde(rename = "BETWEEN", alias = "between")]
    Between,
}

impl FilterOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::Between => "BETWEEN",
        }
    }

    pub fn is_null_check(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }

    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

/// How a predicate joins the one before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: ColumnRef,
    pub operator: FilterOperator,
    /// Scalar, or a list for `IN` / `NOT IN`.
    #[serde(default)]
    pub value: Value,
    /// Upper bound for `BETWEEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
    #[serde(default)]
    pub join: Connector,
}

impl FilterPredicate {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            column: ColumnRef::new(column),
            operator,
            value,
            value2: None,
            join: Connector::And,
        }
    }

    pub fn between(column: impl Into<String>, low: Value, high: Value) -> Self {
        Self {
            value2: Some(high),
            ..Self::new(column, FilterOperator::Between, low)
        }
    }

    pub fn or(mut self) -> Self {
        self.join = Connector::Or;
        self
    }

    fn validate(&self) -> Result<(), QueryError> {
        if self.column.is_empty() {
            return Err(QueryError::invalid("filter requires a column"));
        }

        let op = self.operator.as_sql();
        if self.operator.is_null_check() {
            return Ok(());
        }

        match (&self.value, self.operator.takes_list()) {
            (Value::Null, _) => {
                return Err(QueryError::invalid(format!(
                    "filter on '{}' with {} requires a value",
                    self.column, op
                )));
            }
            (Value::Array(items), true) if items.is_empty() => {
                return Err(QueryError::invalid(format!(
                    "{} filter on '{}' requires a non-empty list",
                    op, self.column
                )));
            }
            (Value::Array(items), true) if items.iter().any(|v| !is_scalar(v)) => {
                return Err(QueryError::invalid(format!(
                    "{} filter on '{}' accepts only scalar list items",
                    op, self.column
                )));
            }
            (Value::Array(_), true) => {}
            (v, true) if !is_scalar(v) => {
                return Err(QueryError::invalid(format!(
                    "{} filter on '{}' requires a list",
                    op, self.column
                )));
            }
            (v, false) if !is_scalar(v) => {
                return Err(QueryError::invalid(format!(
                    "filter on '{}' with {} requires a scalar value",
                    self.column, op
                )));
            }
            _ => {}
        }

        if self.operator == FilterOperator::Between {
            match &self.value2 {
                Some(v) if is_scalar(v) && !v.is_null() => {}
                _ => {
                    return Err(QueryError::invalid(format!(
                        "BETWEEN filter on '{}' requires an upper bound",
                        self.column
                    )));
                }
            }
        }

        Ok(())
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortKey {
    pub column: ColumnRef,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: ColumnRef::new(column),
            direction,
        }
    }
}
