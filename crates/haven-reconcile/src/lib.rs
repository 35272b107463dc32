//! Additive schema reconciliation for Postgres.
//!
//! Given an ordered list of [`TableSpec`]s, the reconciler checks the live
//! catalog and creates whatever tables and columns are missing. It never
//! drops, renames or alters anything that is already there, and running it
//! twice in a row is a no-op the second time.
//!
//! Three ways in:
//!
//! - [`reconcile`] with a connection the caller already owns (startup hook,
//!   standalone CLI);
//! - [`Reconciler`] for a non-default schema or a dry run;
//! - [`with_schema_recovery`] to repair and retry once when an ordinary query
//!   trips over a missing table or column.
//!
//! ```ignore
//! let result = haven_reconcile::reconcile(&client, &specs).await?;
//! println!("{}", result.to_json());
//! ```

pub mod catalog;
pub mod conn;
mod error;
mod reconcile;
pub mod recovery;
mod result;
pub mod spec;
pub mod sql;

pub use catalog::{Catalog, PgCatalog};
pub use conn::{Connection, ConnectionExt, TracedConn};
pub use error::{DbError, DbErrorKind, Error};
pub use reconcile::{Reconciler, reconcile};
pub use recovery::{ErrorClass, SchemaOutcome, classify, with_schema_recovery};
pub use result::{Operation, OperationError, OperationKind, OperationStatus, ReconciliationResult};
pub use spec::{ColumnSpec, SpecIssue, TableSpec, load_specs, parse_specs, validate};

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;
