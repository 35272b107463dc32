//! Declarative description of the schema the application expects.
//!
//! A spec list is authored in code (see the `haven-schema` crate) or loaded
//! from JSON:
//!
//! ```json
//! [
//!   {
//!     "name": "discussion_posts",
//!     "createStatement": "CREATE TABLE discussion_posts(id SERIAL PRIMARY KEY, title TEXT)",
//!     "requiredColumns": [{ "name": "is_pinned", "type": "BOOLEAN", "default": "FALSE" }]
//!   }
//! ]
//! ```
//!
//! The order of the list is the order tables get created in. A table that
//! references another through a foreign key must come after it; the
//! reconciler does not sort, but [`validate`] reports violations.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sql::{Ident, qualified};

/// A column that must exist on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Raw column type, e.g. `TEXT` or `TIMESTAMPTZ NOT NULL`.
    #[serde(rename = "type", alias = "sql_type")]
    pub sql_type: String,
    /// Raw SQL literal or expression, e.g. `FALSE` or `now()`.
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Render the guarded, additive statement that adds this column.
    pub fn add_column_sql(&self, schema: &str, table: &str) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            qualified(schema, table),
            Ident(&self.name),
            self.sql_type
        );
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A table that must exist, with the columns it must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub name: String,
    /// Executed verbatim when the table is missing.
    #[serde(alias = "create_statement")]
    pub create_statement: String,
    #[serde(default, alias = "required_columns")]
    pub required_columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, create_statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_statement: create_statement.into(),
            required_columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.required_columns.push(column);
        self
    }

    /// The table `create_statement` actually creates, if it parses as a
    /// `CREATE TABLE`.
    pub fn created_table_name(&self) -> Option<String> {
        created_table(&self.create_statement)
    }

    /// Columns defined inline by `create_statement`, in order.
    pub fn declared_columns(&self) -> Vec<String> {
        declared_columns(&self.create_statement)
    }

    /// Required columns the create statement does not already define.
    pub fn columns_missing_from_create(&self) -> impl Iterator<Item = &ColumnSpec> {
        let declared = self.declared_columns();
        self.required_columns
            .iter()
            .filter(move |column| !declared.contains(&column.name))
    }
}

/// Parse a JSON array of table specs.
pub fn parse_specs(json: &str) -> crate::Result<Vec<TableSpec>> {
    Ok(serde_json::from_str(json)?)
}

/// Read and parse a JSON spec file.
pub fn load_specs(path: impl AsRef<Path>) -> crate::Result<Vec<TableSpec>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| crate::Error::SpecIo {
        path: path.to_path_buf(),
        source,
    })?;
    parse_specs(&json)
}

/// A problem found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecIssue {
    #[error("table {table:?} is declared more than once")]
    DuplicateTable { table: String },

    #[error("column {column:?} is declared more than once on table {table:?}")]
    DuplicateColumn { table: String, column: String },

    #[error("create statement for {table:?} creates {found:?}")]
    NameMismatch {
        table: String,
        found: Option<String>,
    },

    #[error("table {table:?} references {references:?}, which is declared after it")]
    ForwardReference { table: String, references: String },
}

/// Check a spec list without touching a database.
///
/// Schema-qualified references (`REFERENCES auth.users`) point at tables
/// managed elsewhere and are not checked.
pub fn validate(specs: &[TableSpec]) -> Vec<SpecIssue> {
    let mut issues = Vec::new();

    for (idx, spec) in specs.iter().enumerate() {
        if specs[..idx].iter().any(|other| other.name == spec.name) {
            issues.push(SpecIssue::DuplicateTable {
                table: spec.name.clone(),
            });
        }

        for (col_idx, column) in spec.required_columns.iter().enumerate() {
            if spec.required_columns[..col_idx]
                .iter()
                .any(|other| other.name == column.name)
            {
                issues.push(SpecIssue::DuplicateColumn {
                    table: spec.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let found = created_table(&spec.create_statement);
        if found.as_deref() != Some(spec.name.as_str()) {
            issues.push(SpecIssue::NameMismatch {
                table: spec.name.clone(),
                found,
            });
        }

        for reference in referenced_tables(&spec.create_statement) {
            if reference == spec.name {
                continue;
            }
            let declared_later = specs[idx + 1..].iter().any(|other| other.name == reference);
            let declared_before = specs[..idx].iter().any(|other| other.name == reference);
            if declared_later && !declared_before {
                issues.push(SpecIssue::ForwardReference {
                    table: spec.name.clone(),
                    references: reference,
                });
            }
        }
    }

    issues
}

/// Name of the table a `CREATE TABLE` statement creates, folded the way
/// Postgres folds unquoted identifiers.
pub(crate) fn created_table(statement: &str) -> Option<String> {
    let mut rest = strip_keyword(statement, "create")?;
    for modifier in ["temporary", "temp", "unlogged"] {
        if let Some(after) = strip_keyword(rest, modifier) {
            rest = after;
            break;
        }
    }
    rest = strip_keyword(rest, "table")?;
    if let Some(after) = strip_keyword(rest, "if")
        .and_then(|r| strip_keyword(r, "not"))
        .and_then(|r| strip_keyword(r, "exists"))
    {
        rest = after;
    }
    let (mut parts, _) = parse_qualified_name(rest)?;
    parts.pop()
}

const TABLE_CONSTRAINT_KEYWORDS: &[&str] = &[
    "constraint",
    "primary",
    "unique",
    "foreign",
    "check",
    "exclude",
    "like",
];

/// Column names from the top-level element list of a `CREATE TABLE`.
fn declared_columns(statement: &str) -> Vec<String> {
    let Some(open) = statement.find('(') else {
        return Vec::new();
    };
    let body = &statement[open + 1..];

    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' if depth == 0 => {
                elements.push(&body[start..i]);
                break;
            }
            ')' => depth -= 1,
            ',' if depth == 0 => {
                elements.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    elements
        .into_iter()
        .filter(|element| {
            !TABLE_CONSTRAINT_KEYWORDS
                .iter()
                .any(|kw| strip_keyword(element, kw).is_some())
        })
        .filter_map(|element| parse_ident(element.trim_start()).map(|(name, _)| name))
        .collect()
}

/// Unqualified table names named in `REFERENCES` clauses.
pub(crate) fn referenced_tables(statement: &str) -> Vec<String> {
    const KEYWORD: &str = "references";

    let lower = statement.to_ascii_lowercase();
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(pos) = lower[from..].find(KEYWORD) {
        let start = from + pos;
        let end = start + KEYWORD.len();
        from = end;

        let before_ok = lower[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_ident_char(c));
        let after_ok = lower[end..].chars().next().is_none_or(|c| !is_ident_char(c));
        if !(before_ok && after_ok) {
            continue;
        }

        if let Some((parts, _)) = parse_qualified_name(&statement[end..])
            && parts.len() == 1
        {
            found.extend(parts);
        }
    }

    found
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let input = input.trim_start();
    let head = input.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let tail = &input[keyword.len()..];
    if tail.starts_with(is_ident_char) {
        return None;
    }
    Some(tail)
}

fn parse_qualified_name(input: &str) -> Option<(Vec<String>, &str)> {
    let mut parts = Vec::new();
    let mut rest = input.trim_start();
    loop {
        let (part, after) = parse_ident(rest)?;
        parts.push(part);
        rest = after;
        match rest.strip_prefix('.') {
            Some(after_dot) => rest = after_dot,
            None => break,
        }
    }
    Some((parts, rest))
}

fn parse_ident(input: &str) -> Option<(String, &str)> {
    if let Some(body) = input.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = body.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '"' {
                out.push(c);
                continue;
            }
            if let Some((_, '"')) = chars.peek() {
                out.push('"');
                chars.next();
            } else {
                return Some((out, &body[i + 1..]));
            }
        }
        return None;
    }

    let end = input
        .find(|c: char| !is_ident_char(c))
        .unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    Some((input[..end].to_lowercase(), &input[end..]))
}
