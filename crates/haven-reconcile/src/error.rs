use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop a reconciliation run (or spec loading) outright.
///
/// Per-statement DDL failures are not represented here: they are recorded in
/// [`ReconciliationResult::errors`](crate::ReconciliationResult) and the run
/// keeps going.
#[derive(Debug, Error)]
pub enum Error {
    #[error("catalog unreachable: {0}")]
    CatalogUnreachable(DbError),

    #[error("schema {schema:?} does not exist")]
    UnknownSchema { schema: String },

    #[error("failed to read spec file {path}: {source}")]
    SpecIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid spec file: {0}")]
    SpecParse(#[from] serde_json::Error),
}

/// Broad category of a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The connection is gone or never came up; nothing else will work either.
    Connection,
    /// The server rejected one statement.
    Statement,
}

/// A database failure, flattened so it can be cloned, compared and reported.
///
/// `code` is the SQLSTATE (or a REST gateway code such as `PGRST204`) when
/// the driver exposes one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub code: Option<String>,
    pub message: String,
    pub table: Option<String>,
}

impl DbError {
    pub fn new(kind: DbErrorKind, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.map(str::to_owned),
            message: message.into(),
            table: None,
        }
    }

    /// A statement-level error carrying a SQLSTATE.
    pub fn statement(code: &str, message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Statement, Some(code), message)
    }

    /// A connectivity error (no SQLSTATE).
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Connection, None, message)
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn is_connection(&self) -> bool {
        self.kind == DbErrorKind::Connection
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return Self {
                kind: DbErrorKind::Statement,
                code: Some(db.code().code().to_owned()),
                message: db.message().to_owned(),
                table: db.table().map(str::to_owned),
            };
        }

        let io = std::error::Error::source(&err)
            .is_some_and(|source| source.downcast_ref::<std::io::Error>().is_some());
        let kind = if err.is_closed() || io {
            DbErrorKind::Connection
        } else {
            DbErrorKind::Statement
        };

        Self {
            kind,
            code: err.code().map(|c| c.code().to_owned()),
            message: err.to_string(),
            table: None,
        }
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(err) => err.into(),
            other => DbError::connection(other.to_string()),
        }
    }
}
