//! Reactive schema repair: when an ordinary query fails because a table or
//! column is missing, reconcile the tables involved and retry once.
//!
//! ```ignore
//! let catalog = PgCatalog::new(&client);
//! let posts = with_schema_recovery(&catalog, &haven_schema::tables(), || async {
//!     client
//!         .query("SELECT id, title, is_pinned FROM discussion_posts", &[])
//!         .await
//!         .map_err(DbError::from)
//! })
//! .await?;
//! ```
//!
//! The retry happens at most once. If the repair itself fails, the caller
//! gets the original error back; if the retry fails, the caller gets that.

use std::future::Future;

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::reconcile::Reconciler;
use crate::spec::referenced_tables;
use crate::{DbError, TableSpec};

/// SQLSTATEs (and REST gateway codes) meaning "the schema is not what the
/// query expected".
const SCHEMA_MISSING_CODES: &[&str] = &[
    "42P01",    // undefined_table
    "42703",    // undefined_column
    "3F000",    // invalid_schema_name
    "PGRST200", // relationship not found in the schema cache
    "PGRST204", // column not found in the schema cache
    "PGRST205", // table not found in the schema cache
];

/// Message fragments used when an error carries no code at all.
const SCHEMA_MISSING_PHRASES: &[&str] = &["does not exist", "schema cache", "relationship"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    SchemaMissing,
    Other,
}

/// Decide whether an error looks like missing schema.
///
/// Codes win. Message matching is only a fallback for errors that arrive
/// without one, and is best effort.
pub fn classify(err: &DbError) -> ErrorClass {
    if let Some(code) = err.code() {
        return if SCHEMA_MISSING_CODES.contains(&code) {
            ErrorClass::SchemaMissing
        } else {
            ErrorClass::Other
        };
    }

    if err.is_connection() {
        return ErrorClass::Other;
    }

    let message = err.message.to_lowercase();
    if SCHEMA_MISSING_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
    {
        ErrorClass::SchemaMissing
    } else {
        ErrorClass::Other
    }
}

/// The result of a database operation, split by whether a schema repair
/// could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOutcome<T> {
    Ok(T),
    SchemaMissing(DbError),
    Other(DbError),
}

impl<T> From<Result<T, DbError>> for SchemaOutcome<T> {
    fn from(result: Result<T, DbError>) -> Self {
        match result {
            Ok(value) => SchemaOutcome::Ok(value),
            Err(err) => match classify(&err) {
                ErrorClass::SchemaMissing => SchemaOutcome::SchemaMissing(err),
                ErrorClass::Other => SchemaOutcome::Other(err),
            },
        }
    }
}

/// The specs worth reconciling for `err`: tables it names, plus the tables
/// those reference, in their original order. Falls back to every spec when
/// the error names none of them.
pub fn relevant_specs(err: &DbError, specs: &[TableSpec]) -> Vec<TableSpec> {
    let mut wanted: Vec<&str> = specs
        .iter()
        .map(|spec| spec.name.as_str())
        .filter(|name| err.table.as_deref() == Some(*name) || mentions(&err.message, name))
        .collect();

    if wanted.is_empty() {
        return specs.to_vec();
    }

    // Pull in dependencies so a missing parent gets created first.
    let mut idx = 0;
    while idx < wanted.len() {
        let name = wanted[idx];
        if let Some(spec) = specs.iter().find(|spec| spec.name == name) {
            for reference in referenced_tables(&spec.create_statement) {
                if let Some(dep) = specs.iter().find(|s| s.name == reference)
                    && !wanted.contains(&dep.name.as_str())
                {
                    wanted.push(dep.name.as_str());
                }
            }
        }
        idx += 1;
    }

    specs
        .iter()
        .filter(|spec| wanted.contains(&spec.name.as_str()))
        .cloned()
        .collect()
}

/// Does `message` contain `name` as a whole identifier?
fn mentions(message: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    message.match_indices(name).any(|(start, _)| {
        let end = start + name.len();
        let before = message[..start].chars().next_back().is_none_or(|c| !is_ident(c));
        let after = message[end..].chars().next().is_none_or(|c| !is_ident(c));
        before && after
    })
}

/// Run `op`; if it fails for lack of schema, reconcile and run it once more.
pub async fn with_schema_recovery<K, T, F, Fut>(
    catalog: &K,
    specs: &[TableSpec],
    mut op: F,
) -> Result<T, DbError>
where
    K: Catalog + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let original = match SchemaOutcome::from(op().await) {
        SchemaOutcome::Ok(value) => return Ok(value),
        SchemaOutcome::Other(err) => return Err(err),
        SchemaOutcome::SchemaMissing(err) => err,
    };

    let targets = relevant_specs(&original, specs);
    warn!(
        error = %original,
        tables = targets.len(),
        "query hit missing schema, reconciling"
    );

    match Reconciler::new(catalog).run(&targets).await {
        Ok(result) if result.success => {
            info!(
                operations = result.operations.len(),
                "schema repaired, retrying"
            );
        }
        Ok(result) => {
            warn!(errors = result.errors.len(), "schema repair incomplete");
            return Err(original);
        }
        Err(err) => {
            warn!(error = %err, "schema repair failed");
            return Err(original);
        }
    }

    op().await
}
