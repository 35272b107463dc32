//! Catalog introspection.
//!
//! [`Catalog`] is everything the reconciler needs from a database: existence
//! checks against the system catalog and a way to run DDL. [`PgCatalog`]
//! answers them from `pg_catalog` over any [`Connection`].

use std::future::Future;
use std::pin::Pin;

use tokio_postgres::Row;

use crate::DbError;
use crate::conn::{Connection, ConnectionExt, TracedConn};
use crate::sql::Ident;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read access to the live schema, plus DDL execution.
pub trait Catalog: Send + Sync {
    /// The first schema on the session's search path.
    fn current_schema(&self) -> BoxFuture<'_, Result<String, DbError>>;

    fn schema_exists<'a>(&'a self, schema: &'a str) -> BoxFuture<'a, Result<bool, DbError>>;

    /// Ordinary and partitioned tables count. Any other relation under the
    /// same name (a view, say) is an error with SQLSTATE `42809`, since no
    /// amount of `ALTER TABLE` will fix it.
    fn table_exists<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool, DbError>>;

    fn column_exists<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<bool, DbError>>;

    /// Run one DDL statement (or several, separated by `;`).
    fn apply<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>>;

    /// Like [`apply`](Catalog::apply), with `schema` put first on the search
    /// path for the duration, so unqualified names are created there.
    fn apply_in<'a>(
        &'a self,
        schema: &'a str,
        sql: &'a str,
    ) -> BoxFuture<'a, Result<(), DbError>>;
}

const CURRENT_SCHEMA_SQL: &str = "SELECT current_schema()";

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)";

// Tables, indexes, sequences, views and the rest share one namespace, so
// look at whatever relation holds the name.
const RELKIND_SQL: &str = "SELECT (
    SELECT c.relkind::text
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relname = $2
)";

const COLUMN_EXISTS_SQL: &str = "SELECT EXISTS (
    SELECT 1
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relname = $2
      AND a.attname = $3
      AND a.attnum > 0
      AND NOT a.attisdropped
)";

const SHOW_SEARCH_PATH_SQL: &str = "SELECT pg_catalog.current_setting('search_path')";

const SET_SEARCH_PATH_SQL: &str = "SELECT pg_catalog.set_config('search_path', $1, false)";

/// SQLSTATE `wrong_object_type`.
const WRONG_OBJECT_TYPE: &str = "42809";

/// [`Catalog`] backed by a Postgres connection the caller already owns.
pub struct PgCatalog<'a, C: Connection> {
    conn: TracedConn<'a, C>,
}

impl<'a, C: Connection> PgCatalog<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn: conn.traced(),
        }
    }
}

fn first_bool(row: Row) -> Result<bool, DbError> {
    Ok(row.try_get::<_, bool>(0)?)
}

/// Interpret `pg_class.relkind` for a declared table.
fn relation_is_table(schema: &str, table: &str, relkind: Option<&str>) -> Result<bool, DbError> {
    let kind = match relkind {
        None => return Ok(false),
        Some("r" | "p") => return Ok(true),
        Some("v") => "a view",
        Some("m") => "a materialized view",
        Some("f") => "a foreign table",
        Some("i" | "I") => "an index",
        Some("S") => "a sequence",
        Some("c") => "a composite type",
        Some(_) => "another kind of relation",
    };
    Err(DbError::statement(
        WRONG_OBJECT_TYPE,
        format!("\"{schema}\".\"{table}\" is {kind}, not a table"),
    )
    .with_table(table))
}

impl<C: Connection> Catalog for PgCatalog<'_, C> {
    fn current_schema(&self) -> BoxFuture<'_, Result<String, DbError>> {
        Box::pin(async move {
            let row = self.conn.query_one(CURRENT_SCHEMA_SQL, &[]).await?;
            row.try_get::<_, Option<String>>(0)?
                .ok_or_else(|| DbError::statement("3F000", "search_path has no usable schema"))
        })
    }

    fn schema_exists<'a>(&'a self, schema: &'a str) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            let row = self.conn.query_one(SCHEMA_EXISTS_SQL, &[&schema]).await?;
            first_bool(row)
        })
    }

    fn table_exists<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            let row = self.conn.query_one(RELKIND_SQL, &[&schema, &table]).await?;
            let relkind: Option<String> = row.try_get(0)?;
            relation_is_table(schema, table, relkind.as_deref())
        })
    }

    fn column_exists<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            let row = self
                .conn
                .query_one(COLUMN_EXISTS_SQL, &[&schema, &table, &column])
                .await?;
            first_bool(row)
        })
    }

    fn apply<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move { Ok(self.conn.batch_execute(sql).await?) })
    }

    fn apply_in<'a>(
        &'a self,
        schema: &'a str,
        sql: &'a str,
    ) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            let previous: String = self
                .conn
                .query_one(SHOW_SEARCH_PATH_SQL, &[])
                .await?
                .try_get(0)?;
            let pinned = if previous.trim().is_empty() {
                Ident(schema).to_string()
            } else {
                format!("{}, {}", Ident(schema), previous)
            };
            self.conn
                .query_one(SET_SEARCH_PATH_SQL, &[&pinned])
                .await?;

            let applied = self.conn.batch_execute(sql).await.map_err(DbError::from);

            // The caller's session must come back unchanged either way.
            let restored = self
                .conn
                .query_one(SET_SEARCH_PATH_SQL, &[&previous])
                .await
                .map(drop)
                .map_err(DbError::from);
            if let Err(err) = &restored {
                tracing::warn!(error = %err, "failed to restore search_path");
            }

            applied.and(restored)
        })
    }
}
