//! What a reconciliation run did, in the shape the CLI prints as JSON.

use serde::Serialize;

use crate::DbError;

/// The kind of step an [`Operation`] or [`OperationError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    InspectTable,
    CreateTable,
    InspectColumn,
    AddColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// The DDL ran and changed the schema.
    Applied,
    /// The DDL lost a race with a concurrent run; the object is there.
    AlreadyExists,
    /// Dry run: the DDL would have run.
    Planned,
}

/// One schema change, attempted and successful (or planned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub operation: OperationKind,
    pub status: OperationStatus,
}

/// One failed step. The run carried on past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationError {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub operation: OperationKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub success: bool,
    pub schema: String,
    pub operations: Vec<Operation>,
    pub errors: Vec<OperationError>,
}

impl ReconciliationResult {
    pub(crate) fn new(schema: impl Into<String>) -> Self {
        Self {
            success: true,
            schema: schema.into(),
            operations: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        table: &str,
        column: Option<&str>,
        operation: OperationKind,
        status: OperationStatus,
    ) {
        self.operations.push(Operation {
            table: table.to_owned(),
            column: column.map(str::to_owned),
            operation,
            status,
        });
    }

    pub(crate) fn record_error(
        &mut self,
        table: &str,
        column: Option<&str>,
        operation: OperationKind,
        err: DbError,
    ) {
        self.success = false;
        self.errors.push(OperationError {
            table: table.to_owned(),
            column: column.map(str::to_owned),
            operation,
            error: err.message,
            code: err.code,
        });
    }

    /// True when the live schema already matched and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.success && self.operations.is_empty()
    }

    /// Tables this run created (or found created by a concurrent run).
    pub fn created_tables(&self) -> impl Iterator<Item = &str> {
        self.operations
            .iter()
            .filter(|op| op.operation == OperationKind::CreateTable)
            .map(|op| op.table.as_str())
    }

    pub fn to_json(&self) -> String {
        // Serializing plain strings and enums cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
