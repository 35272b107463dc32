//! Human-readable rendering for `plan`, `check` and `tables`.
//!
//! `reconcile` prints JSON instead; see [`fatal_json`] for the shape used
//! when a run cannot start at all.

use std::fmt::Display;

use haven_reconcile::{OperationKind, ReconciliationResult, SpecIssue, TableSpec};
use owo_colors::OwoColorize;

/// Colors on or off; off when stdout is not a terminal.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    pub color: bool,
}

impl Painter {
    fn green(&self, text: impl Display) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    fn red(&self, text: impl Display) -> String {
        if self.color {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    fn yellow(&self, text: impl Display) -> String {
        if self.color {
            text.yellow().to_string()
        } else {
            text.to_string()
        }
    }

    fn dim(&self, text: impl Display) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: impl Display) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }
}

fn column_type<'a>(specs: &'a [TableSpec], table: &str, column: &str) -> Option<&'a str> {
    specs
        .iter()
        .find(|spec| spec.name == table)?
        .required_columns
        .iter()
        .find(|c| c.name == column)
        .map(|c| c.sql_type.as_str())
}

pub fn render_plan(result: &ReconciliationResult, specs: &[TableSpec], p: Painter) -> String {
    let mut out = String::new();

    if result.operations.is_empty() && result.errors.is_empty() {
        out.push_str(&format!(
            "{} schema {} is up to date\n",
            p.green("✓"),
            p.bold(&result.schema)
        ));
        return out;
    }

    out.push_str(&format!(
        "Plan for schema {} ({} changes):\n",
        p.bold(&result.schema),
        result.operations.len()
    ));
    for op in &result.operations {
        match (op.operation, op.column.as_deref()) {
            (OperationKind::CreateTable, _) => {
                out.push_str(&format!("  {} table {}\n", p.green("+"), op.table));
            }
            (OperationKind::AddColumn, Some(column)) => {
                let ty = column_type(specs, &op.table, column).unwrap_or("?");
                out.push_str(&format!(
                    "  {} column {}.{} {}\n",
                    p.green("+"),
                    op.table,
                    column,
                    p.dim(ty)
                ));
            }
            _ => {}
        }
    }

    for error in &result.errors {
        let target = match &error.column {
            Some(column) => format!("{}.{}", error.table, column),
            None => error.table.clone(),
        };
        out.push_str(&format!(
            "  {} {}: {}\n",
            p.red("!"),
            target,
            error.error
        ));
    }

    out
}

pub fn render_issues(specs: &[TableSpec], issues: &[SpecIssue], p: Painter) -> String {
    if issues.is_empty() {
        return format!(
            "{} {} tables, no issues\n",
            p.green("✓"),
            specs.len()
        );
    }

    let mut out = format!("{} {} issue(s):\n", p.red("✗"), issues.len());
    for issue in issues {
        out.push_str(&format!("  {} {}\n", p.yellow("-"), issue));
    }
    out
}

pub fn render_tables(specs: &[TableSpec], p: Painter) -> String {
    let mut out = format!("Declared schema ({} tables):\n\n", specs.len());
    for spec in specs {
        out.push_str(&format!(
            "  {} ({} required columns)\n",
            p.bold(&spec.name),
            spec.required_columns.len()
        ));
        for column in &spec.required_columns {
            let default = column
                .default
                .as_ref()
                .map(|d| format!(" [DEFAULT {d}]"))
                .unwrap_or_default();
            out.push_str(&format!(
                "    {}: {}{}\n",
                column.name,
                column.sql_type,
                p.dim(default)
            ));
        }
        out.push('\n');
    }
    out
}

/// The JSON printed when a run aborts before touching any table.
pub fn fatal_json(err: &dyn Display) -> String {
    let value = serde_json::json!({
        "success": false,
        "operations": [],
        "errors": [],
        "error": err.to_string(),
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}
