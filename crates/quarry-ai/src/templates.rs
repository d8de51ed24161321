//! Rule-based local query templates.
//!
//! Used when no model is reachable. A template is chosen by keyword matching
//! on the free text and filled from the live catalog, so it only names
//! relations and columns that exist. Every template carries the policy
//! conditions of its relation.

use quarry_core::{ColumnSchema, PolicyConfig, RelationSchema, SchemaCatalog};
use std::fmt;

use quarry_sql::synthesizer::quote_path;
use quarry_sql::text::quote_ident;

const SALES_WORDS: &[&str] = &["sales", "revenue", "turnover", "sold", "umsatz"];
const STOCK_WORDS: &[&str] = &["stock", "inventory", "on hand", "warehouse", "bestand"];
const CUSTOMER_WORDS: &[&str] = &["customer", "client", "buyer", "kunde"];
const COLOR_WORDS: &[&str] = &["color", "colour", "farbe"];

const SALES_RELATIONS: &[&str] = &["sale", "order", "invoice", "revenue", "transaction"];
const STOCK_RELATIONS: &[&str] = &["stock", "inventory", "warehouse"];
const CUSTOMER_RELATIONS: &[&str] = &["customer", "client"];

const AMOUNT_COLUMNS: &[&str] = &["amount", "revenue", "total", "net", "price", "value"];
const QUANTITY_COLUMNS: &[&str] = &["quantity", "qty", "onhand", "stock", "available"];
const ITEM_COLUMNS: &[&str] = &["item", "product", "article", "sku"];
const CUSTOMER_COLUMNS: &[&str] = &["customer", "client"];

const RECENT_ROWS: u32 = 50;
const RECENT_COLUMNS: usize = 8;

/// Which canned shape produced a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Sales,
    Inventory,
    Customers,
    RecentRows,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sales => "sales",
            Self::Inventory => "inventory",
            Self::Customers => "customers",
            Self::RecentRows => "recent_rows",
        };
        f.write_str(name)
    }
}

/// A filled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateQuery {
    pub kind: TemplateKind,
    pub sql: String,
}

/// Keyword-triggered query shapes.
#[derive(Debug, Clone, Default)]
pub struct LocalTemplateGenerator;

impl LocalTemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    /// The template for `free_text`, or `None` when the catalog is empty.
    pub fn generate(
        &self,
        free_text: &str,
        catalog: &SchemaCatalog,
        policy: &PolicyConfig,
    ) -> Option<TemplateQuery> {
        let text = free_text.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

        let attempt = if mentions(SALES_WORDS) {
            sales(catalog, policy, mentions(CUSTOMER_WORDS))
        } else if mentions(STOCK_WORDS) {
            inventory(catalog, policy, &text, mentions(COLOR_WORDS))
        } else if mentions(CUSTOMER_WORDS) {
            customers(catalog, policy)
        } else {
            None
        };

        attempt.or_else(|| recent_rows(catalog, policy, &text))
    }
}

fn sales(catalog: &SchemaCatalog, policy: &PolicyConfig, by_customer: bool) -> Option<TemplateQuery> {
    let relation = find_relation(catalog, SALES_RELATIONS)?;
    let amount = find_column(relation, AMOUNT_COLUMNS, ColumnSchema::is_numeric)?;

    if by_customer {
        if let Some(customer) = find_column(relation, CUSTOMER_COLUMNS, |_| true) {
            return Some(customer_ranking(relation, customer, amount, policy));
        }
    }

    let sql = match relation.columns.iter().find(|c| c.is_temporal()) {
        Some(date) => format!(
            "SELECT TOP 30 CAST({d} AS DATE) AS [Day], SUM({a}) AS [Revenue], COUNT(*) AS [Transactions] \
             FROM {r}{w} GROUP BY CAST({d} AS DATE) ORDER BY [Day] DESC",
            d = quote_ident(&date.name),
            a = quote_ident(&amount.name),
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
        ),
        None => format!(
            "SELECT SUM({a}) AS [Revenue], COUNT(*) AS [Transactions] FROM {r}{w}",
            a = quote_ident(&amount.name),
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
        ),
    };
    Some(TemplateQuery {
        kind: TemplateKind::Sales,
        sql,
    })
}

fn inventory(
    catalog: &SchemaCatalog,
    policy: &PolicyConfig,
    text: &str,
    by_color: bool,
) -> Option<TemplateQuery> {
    let relation = find_relation(catalog, STOCK_RELATIONS)?;
    let quantity = find_column(relation, QUANTITY_COLUMNS, ColumnSchema::is_numeric)?;

    let mut keys: Vec<&ColumnSchema> = Vec::new();
    let by_item = text.contains("item") || text.contains("product") || text.contains("article");
    if by_item || by_color {
        if let Some(item) = find_column(relation, ITEM_COLUMNS, |_| true) {
            keys.push(item);
        }
    }
    if by_color {
        if let Some(color) = find_column(relation, &["color", "colour"], |_| true) {
            keys.push(color);
        }
    }

    let sql = if keys.is_empty() {
        format!(
            "SELECT SUM({q}) AS [Quantity] FROM {r}{w}",
            q = quote_ident(&quantity.name),
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
        )
    } else {
        let keys: Vec<String> = keys.iter().map(|c| quote_ident(&c.name)).collect();
        format!(
            "SELECT TOP 100 {k}, SUM({q}) AS [Quantity] FROM {r}{w} GROUP BY {k} ORDER BY [Quantity] DESC",
            k = keys.join(", "),
            q = quote_ident(&quantity.name),
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
        )
    };
    Some(TemplateQuery {
        kind: TemplateKind::Inventory,
        sql,
    })
}

fn customers(catalog: &SchemaCatalog, policy: &PolicyConfig) -> Option<TemplateQuery> {
    // Prefer revenue per customer when a sales relation references customers.
    if let Some(relation) = find_relation(catalog, SALES_RELATIONS) {
        let customer = find_column(relation, CUSTOMER_COLUMNS, |_| true);
        let amount = find_column(relation, AMOUNT_COLUMNS, ColumnSchema::is_numeric);
        if let (Some(customer), Some(amount)) = (customer, amount) {
            return Some(customer_ranking(relation, customer, amount, policy));
        }
    }

    let relation = find_relation(catalog, CUSTOMER_RELATIONS)?;
    Some(TemplateQuery {
        kind: TemplateKind::Customers,
        sql: format!(
            "SELECT COUNT(*) AS [Customers] FROM {r}{w}",
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
        ),
    })
}

fn customer_ranking(
    relation: &RelationSchema,
    customer: &ColumnSchema,
    amount: &ColumnSchema,
    policy: &PolicyConfig,
) -> TemplateQuery {
    TemplateQuery {
        kind: TemplateKind::Customers,
        sql: format!(
            "SELECT TOP 20 {c}, SUM({a}) AS [Revenue], COUNT(*) AS [Orders] FROM {r}{w} \
             GROUP BY {c} ORDER BY [Revenue] DESC",
            c = quote_ident(&customer.name),
            a = quote_ident(&amount.name),
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
        ),
    }
}

fn recent_rows(catalog: &SchemaCatalog, policy: &PolicyConfig, text: &str) -> Option<TemplateQuery> {
    // A relation named in the text wins over the first one in the catalog.
    let relation = catalog
        .relations
        .iter()
        .find(|r| {
            let bare = r.name.rsplit('.').next().unwrap_or(&r.name).to_lowercase();
            bare.len() >= 3 && text.contains(&bare)
        })
        .or_else(|| catalog.relations.iter().find(|r| !r.columns.is_empty()))?;

    let columns: Vec<String> = relation
        .columns
        .iter()
        .filter(|c| c.is_orderable())
        .take(RECENT_COLUMNS)
        .map(|c| quote_ident(&c.name))
        .collect();
    if columns.is_empty() {
        return None;
    }

    let order = relation
        .columns
        .iter()
        .find(|c| c.is_temporal())
        .map(|c| quote_ident(&c.name))
        .unwrap_or_else(|| columns[0].clone());

    Some(TemplateQuery {
        kind: TemplateKind::RecentRows,
        sql: format!(
            "SELECT TOP {n} {cols} FROM {r}{w} ORDER BY {o} DESC",
            n = RECENT_ROWS,
            cols = columns.join(", "),
            r = quote_path(&relation.name),
            w = where_clause(relation, policy),
            o = order,
        ),
    })
}

fn where_clause(relation: &RelationSchema, policy: &PolicyConfig) -> String {
    let conditions = policy.conditions_for(&[relation.name.as_str()]);
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn find_relation<'a>(catalog: &'a SchemaCatalog, hints: &[&str]) -> Option<&'a RelationSchema> {
    hints.iter().find_map(|hint| {
        catalog
            .relations
            .iter()
            .find(|r| r.name.to_lowercase().contains(hint))
    })
}

fn find_column<'a>(
    relation: &'a RelationSchema,
    hints: &[&str],
    accept: impl Fn(&ColumnSchema) -> bool,
) -> Option<&'a ColumnSchema> {
    hints.iter().find_map(|hint| {
        relation
            .columns
            .iter()
            .find(|c| c.name.to_lowercase().contains(hint) && accept(c))
    })
}
