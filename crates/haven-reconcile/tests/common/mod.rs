//! In-memory catalog for driving the reconciler without a database.
//!
//! Understands exactly the DDL the reconciler issues: verbatim
//! `CREATE TABLE` statements and the quoted `ALTER TABLE ... ADD COLUMN IF NOT
//! EXISTS` it renders. Unqualified creates land in the current schema, or in
//! the pinned one for [`Catalog::apply_in`]. Every call yields once before
//! touching state, so two runs joined on one task interleave step by step.

#![allow(dead_code)]

use std::sync::Mutex;

use haven_reconcile::catalog::BoxFuture;
use haven_reconcile::{Catalog, ColumnSpec, DbError, TableSpec};
use indexmap::IndexMap;

#[derive(Default)]
struct State {
    current: String,
    schemas: IndexMap<String, IndexMap<String, Vec<String>>>,
    unreachable: bool,
    failing_ddl: Vec<String>,
    failing_checks: Vec<String>,
    views: Vec<String>,
    executed: Vec<String>,
}

pub struct FakeCatalog {
    state: Mutex<State>,
}

impl FakeCatalog {
    /// An empty database whose search path starts at `public`.
    pub fn new() -> Self {
        let mut schemas = IndexMap::new();
        schemas.insert("public".to_owned(), IndexMap::new());
        Self {
            state: Mutex::new(State {
                current: "public".to_owned(),
                schemas,
                ..State::default()
            }),
        }
    }

    pub fn with_table(self, table: &str, columns: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let current = state.current.clone();
            state.schemas[&current].insert(
                table.to_owned(),
                columns.iter().map(|c| c.to_string()).collect(),
            );
        }
        self
    }

    pub fn with_schema(self, schema: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .schemas
            .insert(schema.to_owned(), IndexMap::new());
        self
    }

    /// Every call fails as if the server were down.
    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    /// DDL containing `fragment` fails with a permission error.
    pub fn fail_ddl(self, fragment: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_ddl
            .push(fragment.to_owned());
        self
    }

    /// A view named `view` sits in the current schema.
    pub fn with_view(self, view: &str) -> Self {
        self.state.lock().unwrap().views.push(view.to_owned());
        self
    }

    /// Existence checks on `table` fail.
    pub fn fail_checks(self, table: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_checks
            .push(table.to_owned());
        self
    }

    pub fn has_table(&self, table: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.schemas[&state.current].contains_key(table)
    }

    pub fn has_table_in(&self, schema: &str, table: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .schemas
            .get(schema)
            .is_some_and(|tables| tables.contains_key(table))
    }

    pub fn columns_in(&self, schema: &str, table: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .schemas
            .get(schema)
            .and_then(|tables| tables.get(table))
            .cloned()
            .unwrap_or_default()
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.schemas[&state.current]
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// DDL that ran successfully, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    fn exec(&self, sql: &str, pinned: Option<&str>) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(DbError::connection("connection refused"));
        }
        if state.failing_ddl.iter().any(|f| sql.contains(f.as_str())) {
            return Err(DbError::statement("42501", "permission denied for schema public"));
        }

        let spec = TableSpec::new("", sql);
        if let Some(table) = spec.created_table_name() {
            let target = pinned.map_or_else(|| state.current.clone(), str::to_owned);
            let tables = &mut state.schemas[&target];
            if tables.contains_key(&table) {
                if sql.to_ascii_lowercase().contains("if not exists") {
                    return Ok(());
                }
                return Err(DbError::statement(
                    "42P07",
                    format!("relation \"{table}\" already exists"),
                ));
            }
            tables.insert(table, spec.declared_columns());
            state.executed.push(sql.to_owned());
            return Ok(());
        }

        if sql.starts_with("ALTER TABLE") && sql.contains("ADD COLUMN IF NOT EXISTS") {
            let parts = quoted_parts(sql);
            let [schema, table, column] = &parts[..] else {
                panic!("unexpected ALTER: {sql}");
            };
            let Some(columns) = state
                .schemas
                .get_mut(schema)
                .and_then(|tables| tables.get_mut(table))
            else {
                return Err(DbError::statement(
                    "42P01",
                    format!("relation \"{schema}.{table}\" does not exist"),
                ));
            };
            if !columns.contains(column) {
                columns.push(column.clone());
            }
            state.executed.push(sql.to_owned());
            return Ok(());
        }

        panic!("fake catalog cannot run: {sql}");
    }

    fn check(&self, schema: &str, table: &str, column: Option<&str>) -> Result<bool, DbError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(DbError::connection("connection refused"));
        }
        if state.failing_checks.iter().any(|t| t == table) {
            return Err(DbError::statement("42501", "permission denied for pg_class"));
        }
        if schema == state.current && state.views.iter().any(|v| v == table) {
            return Err(DbError::statement(
                "42809",
                format!("\"{schema}\".\"{table}\" is a view, not a table"),
            )
            .with_table(table));
        }
        let Some(columns) = state.schemas.get(schema).and_then(|t| t.get(table)) else {
            return Ok(false);
        };
        Ok(column.is_none_or(|c| columns.iter().any(|existing| existing == c)))
    }
}

fn quoted_parts(sql: &str) -> Vec<String> {
    sql.split('"')
        .skip(1)
        .step_by(2)
        .map(str::to_owned)
        .collect()
}

impl Catalog for FakeCatalog {
    fn current_schema(&self) -> BoxFuture<'_, Result<String, DbError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let state = self.state.lock().unwrap();
            if state.unreachable {
                return Err(DbError::connection("connection refused"));
            }
            Ok(state.current.clone())
        })
    }

    fn schema_exists<'a>(&'a self, schema: &'a str) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let state = self.state.lock().unwrap();
            if state.unreachable {
                return Err(DbError::connection("connection refused"));
            }
            Ok(state.schemas.contains_key(schema))
        })
    }

    fn table_exists<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.check(schema, table, None)
        })
    }

    fn column_exists<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.check(schema, table, Some(column))
        })
    }

    fn apply<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.exec(sql, None)
        })
    }

    fn apply_in<'a>(
        &'a self,
        schema: &'a str,
        sql: &'a str,
    ) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.exec(sql, Some(schema))
        })
    }
}

pub fn posts() -> TableSpec {
    TableSpec::new(
        "discussion_posts",
        "CREATE TABLE discussion_posts(id SERIAL PRIMARY KEY, title TEXT)",
    )
    .column(ColumnSpec::new("is_pinned", "BOOLEAN").with_default("FALSE"))
}

pub fn comments() -> TableSpec {
    TableSpec::new(
        "discussion_comments",
        "CREATE TABLE discussion_comments(
            id SERIAL PRIMARY KEY,
            post_id INTEGER NOT NULL REFERENCES discussion_posts(id),
            body TEXT NOT NULL
        )",
    )
    .column(ColumnSpec::new("is_flagged", "BOOLEAN").with_default("FALSE"))
}

pub fn mood_checkins() -> TableSpec {
    TableSpec::new(
        "mood_checkins",
        "CREATE TABLE mood_checkins(id SERIAL PRIMARY KEY, mood SMALLINT NOT NULL)",
    )
    .column(ColumnSpec::new("note", "TEXT"))
    .column(ColumnSpec::new("energy", "SMALLINT"))
}
