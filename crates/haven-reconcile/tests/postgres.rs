//! Integration tests against a real PostgreSQL.
//!
//! Run with: cargo test -p haven-reconcile --features test-postgres --test postgres
//!
//! Note: Requires Docker to be running.

#![cfg(feature = "test-postgres")]

use haven_reconcile::{
    ColumnSpec, DbError, OperationKind, OperationStatus, PgCatalog, Reconciler, TableSpec,
    reconcile, with_schema_recovery,
};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_postgres::{Client, NoTls};

async fn setup_postgres() -> (ContainerAsync<Postgres>, String) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start postgres container");
    let host = container.get_host().await.expect("no container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("postgres port not available");

    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
    (container, url)
}

async fn connect(url: &str) -> Client {
    let (client, connection) = tokio_postgres::connect(url, NoTls)
        .await
        .expect("failed to connect to postgres");

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });

    client
}

fn forum() -> Vec<TableSpec> {
    vec![
        TableSpec::new(
            "discussion_posts",
            "CREATE TABLE discussion_posts(id SERIAL PRIMARY KEY, title TEXT)",
        )
        .column(ColumnSpec::new("is_pinned", "BOOLEAN").with_default("FALSE")),
        TableSpec::new(
            "discussion_comments",
            "CREATE TABLE discussion_comments(
                id SERIAL PRIMARY KEY,
                post_id INTEGER NOT NULL REFERENCES discussion_posts(id) ON DELETE CASCADE,
                body TEXT NOT NULL
            )",
        )
        .column(ColumnSpec::new("created_at", "TIMESTAMPTZ").with_default("now()")),
    ]
}

#[tokio::test]
async fn creates_then_converges() {
    let (_container, url) = setup_postgres().await;
    let client = connect(&url).await;

    let first = reconcile(&client, &forum()).await.unwrap();
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(first.schema, "public");
    let kinds: Vec<_> = first
        .operations
        .iter()
        .map(|op| (op.table.as_str(), op.column.as_deref(), op.operation))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("discussion_posts", None, OperationKind::CreateTable),
            ("discussion_posts", Some("is_pinned"), OperationKind::AddColumn),
            ("discussion_comments", None, OperationKind::CreateTable),
            ("discussion_comments", Some("created_at"), OperationKind::AddColumn),
        ]
    );

    let second = reconcile(&client, &forum()).await.unwrap();
    assert!(second.is_noop(), "{:?}", second.operations);
}

#[tokio::test]
async fn existing_rows_survive() {
    let (_container, url) = setup_postgres().await;
    let client = connect(&url).await;

    client
        .batch_execute(
            "CREATE TABLE discussion_posts(id SERIAL PRIMARY KEY, title TEXT, legacy TEXT);
             INSERT INTO discussion_posts (title, legacy) VALUES ('hello', 'keep me');",
        )
        .await
        .unwrap();

    let result = reconcile(&client, &forum()[..1]).await.unwrap();
    assert!(result.success);
    assert_eq!(result.operations.len(), 1);

    let row = client
        .query_one("SELECT title, legacy, is_pinned FROM discussion_posts", &[])
        .await
        .unwrap();
    assert_eq!(row.get::<_, String>(0), "hello");
    assert_eq!(row.get::<_, String>(1), "keep me");
    assert!(!row.get::<_, bool>(2));
}

#[tokio::test]
async fn ddl_failure_is_isolated() {
    let (_container, url) = setup_postgres().await;
    let client = connect(&url).await;

    let specs = vec![
        TableSpec::new("mood_checkins", "CREATE TABLE mood_checkins(id SERIAL PRIMARY KEY)"),
        TableSpec::new("broken", "CREATE TABLE broken(id NOT_A_TYPE)"),
        TableSpec::new("profiles", "CREATE TABLE profiles(id UUID PRIMARY KEY)"),
    ];

    let result = reconcile(&client, &specs).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].table, "broken");
    assert_eq!(result.errors[0].code.as_deref(), Some("42704"));
    assert_eq!(
        result.created_tables().collect::<Vec<_>>(),
        vec!["mood_checkins", "profiles"]
    );
}

#[tokio::test]
async fn explicit_schema_converges_and_restores_search_path() {
    let (_container, url) = setup_postgres().await;
    let client = connect(&url).await;
    client.batch_execute("CREATE SCHEMA care").await.unwrap();

    let catalog = PgCatalog::new(&client);
    let reconciler = Reconciler::new(&catalog).schema("care");

    let first = reconciler.run(&forum()).await.unwrap();
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(first.created_tables().count(), 2);

    let second = reconciler.run(&forum()).await.unwrap();
    assert!(second.is_noop(), "{:?} {:?}", second.operations, second.errors);

    let row = client
        .query_one(
            "SELECT to_regclass('care.discussion_comments') IS NOT NULL,
                    to_regclass('public.discussion_posts') IS NULL,
                    current_setting('search_path')",
            &[],
        )
        .await
        .unwrap();
    assert!(row.get::<_, bool>(0));
    assert!(row.get::<_, bool>(1));
    assert_eq!(row.get::<_, String>(2), "\"$user\", public");
}

#[tokio::test]
async fn view_named_like_a_table_is_reported() {
    let (_container, url) = setup_postgres().await;
    let client = connect(&url).await;
    client
        .batch_execute("CREATE VIEW discussion_posts AS SELECT 1 AS id")
        .await
        .unwrap();

    let result = reconcile(&client, &forum()[..1]).await.unwrap();
    assert!(!result.success);
    assert!(result.operations.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].operation, OperationKind::InspectTable);
    assert_eq!(result.errors[0].code.as_deref(), Some("42809"));
}

#[tokio::test]
async fn concurrent_runs_on_separate_connections() {
    let (_container, url) = setup_postgres().await;
    let a = connect(&url).await;
    let b = connect(&url).await;
    let specs = forum();

    let (ra, rb) = tokio::join!(reconcile(&a, &specs), reconcile(&b, &specs));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert!(ra.success, "{:?}", ra.errors);
    assert!(rb.success, "{:?}", rb.errors);

    let applied = ra
        .operations
        .iter()
        .chain(&rb.operations)
        .filter(|op| {
            op.table == "discussion_posts"
                && op.operation == OperationKind::CreateTable
                && op.status == OperationStatus::Applied
        })
        .count();
    assert_eq!(applied, 1);
}

#[tokio::test]
async fn pooled_connection_and_recovery() {
    let (_container, url) = setup_postgres().await;

    let pg_config: tokio_postgres::Config = url.parse().unwrap();
    let manager = deadpool_postgres::Manager::new(pg_config, NoTls);
    let pool = deadpool_postgres::Pool::builder(manager)
        .max_size(2)
        .build()
        .unwrap();
    let conn = pool.get().await.unwrap();

    let catalog = PgCatalog::new(&conn);
    let specs = forum();
    let client: &Client = &conn;

    let count = with_schema_recovery(&catalog, &specs, move || async move {
        let row = client
            .query_one("SELECT count(*) FROM discussion_comments", &[])
            .await?;
        Ok::<_, DbError>(row.get::<_, i64>(0))
    })
    .await
    .unwrap();

    assert_eq!(count, 0);
    let result = reconcile(&conn, &specs).await.unwrap();
    assert!(result.is_noop());
}
