//! The reconciliation loop.
//!
//! Walks the spec list in order and issues only additive DDL: `CREATE TABLE`
//! for missing tables, `ADD COLUMN IF NOT EXISTS` for missing columns.
//! Nothing is ever dropped, renamed or altered in place.
//!
//! A failed statement is recorded in the result and the loop moves on, so
//! one broken table never blocks the others. The only early exit is when the
//! catalog cannot be queried at all at the start of a run.

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, PgCatalog};
use crate::conn::Connection;
use crate::result::{OperationKind, OperationStatus, ReconciliationResult};
use crate::{DbError, Error, Result, TableSpec};

/// SQLSTATE `duplicate_table`.
const DUPLICATE_TABLE: &str = "42P07";
/// SQLSTATE `duplicate_column`.
const DUPLICATE_COLUMN: &str = "42701";
/// SQLSTATE `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Reconcile `specs` against the session's current schema.
///
/// ```ignore
/// let (client, connection) = tokio_postgres::connect(&url, NoTls).await?;
/// tokio::spawn(connection);
/// let result = haven_reconcile::reconcile(&client, &haven_schema::tables()).await?;
/// assert!(result.success);
/// ```
pub async fn reconcile<C: Connection>(
    conn: &C,
    specs: &[TableSpec],
) -> Result<ReconciliationResult> {
    let catalog = PgCatalog::new(conn);
    Reconciler::new(&catalog).run(specs).await
}

/// Configurable reconciliation run over any [`Catalog`].
pub struct Reconciler<'a, K: Catalog + ?Sized> {
    catalog: &'a K,
    schema: Option<String>,
    dry_run: bool,
}

impl<'a, K: Catalog + ?Sized> Reconciler<'a, K> {
    pub fn new(catalog: &'a K) -> Self {
        Self {
            catalog,
            schema: None,
            dry_run: false,
        }
    }

    /// Target schema. Defaults to the session's `current_schema()`.
    ///
    /// Create statements still run verbatim, with this schema put first on
    /// the search path so unqualified names are created in it.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Only inspect; record what would change as [`OperationStatus::Planned`].
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self, specs: &[TableSpec]) -> Result<ReconciliationResult> {
        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => self
                .catalog
                .current_schema()
                .await
                .map_err(Error::CatalogUnreachable)?,
        };

        match self.catalog.schema_exists(&schema).await {
            Ok(true) => {}
            Ok(false) => return Err(Error::UnknownSchema { schema }),
            Err(err) => return Err(Error::CatalogUnreachable(err)),
        }

        info!(
            schema = %schema,
            tables = specs.len(),
            dry_run = self.dry_run,
            "reconciling schema"
        );

        let mut result = ReconciliationResult::new(schema);
        for spec in specs {
            self.reconcile_table(spec, &mut result).await;
        }

        info!(
            success = result.success,
            operations = result.operations.len(),
            errors = result.errors.len(),
            "reconciliation finished"
        );
        Ok(result)
    }

    async fn reconcile_table(&self, spec: &TableSpec, result: &mut ReconciliationResult) {
        let schema = result.schema.clone();
        let table = spec.name.as_str();

        let exists = match self.catalog.table_exists(&schema, table).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(table, error = %err, "table check failed");
                result.record_error(table, None, OperationKind::InspectTable, err);
                return;
            }
        };

        if !exists {
            if self.dry_run {
                result.record(
                    table,
                    None,
                    OperationKind::CreateTable,
                    OperationStatus::Planned,
                );
                for column in spec.columns_missing_from_create() {
                    result.record(
                        table,
                        Some(&column.name),
                        OperationKind::AddColumn,
                        OperationStatus::Planned,
                    );
                }
                return;
            }

            let created = match &self.schema {
                Some(_) => self.catalog.apply_in(&schema, &spec.create_statement).await,
                None => self.catalog.apply(&spec.create_statement).await,
            };
            match created {
                Ok(()) => {
                    info!(table, "created table");
                    result.record(
                        table,
                        None,
                        OperationKind::CreateTable,
                        OperationStatus::Applied,
                    );
                }
                Err(err) if is_duplicate_table(&err) => {
                    debug!(table, "table created concurrently");
                    result.record(
                        table,
                        None,
                        OperationKind::CreateTable,
                        OperationStatus::AlreadyExists,
                    );
                }
                Err(err) => {
                    warn!(table, error = %err, "create table failed");
                    result.record_error(table, None, OperationKind::CreateTable, err);
                    return;
                }
            }
        }

        for column in &spec.required_columns {
            let name = column.name.as_str();

            match self.catalog.column_exists(&schema, table, name).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(table, column = name, error = %err, "column check failed");
                    result.record_error(table, Some(name), OperationKind::InspectColumn, err);
                    continue;
                }
            }

            if self.dry_run {
                result.record(
                    table,
                    Some(name),
                    OperationKind::AddColumn,
                    OperationStatus::Planned,
                );
                continue;
            }

            let sql = column.add_column_sql(&schema, table);
            match self.catalog.apply(&sql).await {
                Ok(()) => {
                    info!(table, column = name, "added column");
                    result.record(
                        table,
                        Some(name),
                        OperationKind::AddColumn,
                        OperationStatus::Applied,
                    );
                }
                Err(err) if err.code() == Some(DUPLICATE_COLUMN) => {
                    debug!(table, column = name, "column added concurrently");
                    result.record(
                        table,
                        Some(name),
                        OperationKind::AddColumn,
                        OperationStatus::AlreadyExists,
                    );
                }
                Err(err) => {
                    warn!(table, column = name, error = %err, "add column failed");
                    result.record_error(table, Some(name), OperationKind::AddColumn, err);
                }
            }
        }
    }
}

/// Another session created the table between our check and our create.
///
/// Postgres reports that either as `duplicate_table` or, when both
/// transactions insert the row type at once, as a unique violation on the
/// `pg_type` name index.
fn is_duplicate_table(err: &DbError) -> bool {
    match err.code() {
        Some(DUPLICATE_TABLE) => true,
        Some(UNIQUE_VIOLATION) => err.message.contains("pg_type_typname_nsp_index"),
        _ => false,
    }
}
