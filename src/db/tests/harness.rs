//! Test harness for metadata store testing
//!
//! Provides utilities for setting up test databases:
//! - SQLite: Fast in-memory databases with an orchestrator-like schema
//! - PostgreSQL: Testcontainers-based instances with the same schema
//!
//! The schema deliberately leaves out `task_fail` so that the missing-table
//! path is exercised by the default category list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Inserts fixture rows and inspects table sizes, independent of the backend.
#[async_trait]
pub trait MetadataFixture: Send + Sync {
    /// Insert a row into a table shaped `(dag_id, <age_column>)`.
    async fn insert_row(
        &self,
        table: &str,
        age_column: &str,
        dag_id: Option<&str>,
        age: DateTime<Utc>,
    );

    /// Like `insert_row`, with the age given as the literal text the
    /// orchestrator writes, e.g. `2024-05-02 18:00:00.000000` (UTC).
    async fn insert_row_text(
        &self,
        table: &str,
        age_column: &str,
        dag_id: Option<&str>,
        age: &str,
    );

    async fn insert_dag_run(&self, dag_id: &str, execution_date: DateTime<Utc>, external: bool);

    async fn insert_import_error(&self, filename: &str, timestamp: DateTime<Utc>);

    async fn row_count(&self, table: &str) -> i64;
}

#[cfg(feature = "database-sqlite")]
pub use sqlite::*;

#[cfg(feature = "database-sqlite")]
mod sqlite {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::SqlitePool;

    use super::MetadataFixture;

    const SCHEMA: &[&str] = &[
        r#"CREATE TABLE job (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dag_id TEXT,
            state TEXT,
            latest_heartbeat TEXT
        )"#,
        r#"CREATE TABLE dag_run (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dag_id TEXT,
            execution_date TEXT NOT NULL,
            external_trigger INTEGER NOT NULL DEFAULT 0
        )"#,
        r#"CREATE TABLE log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dag_id TEXT,
            event TEXT,
            dttm TEXT
        )"#,
        r#"CREATE TABLE sla_miss (
            task_id TEXT NOT NULL DEFAULT 'task',
            dag_id TEXT,
            execution_date TEXT NOT NULL
        )"#,
        r#"CREATE TABLE dag (
            dag_id TEXT,
            last_parsed_time TEXT
        )"#,
        r#"CREATE TABLE import_error (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT,
            "timestamp" TEXT,
            stacktrace TEXT
        )"#,
    ];

    /// Create an in-memory SQLite pool for testing
    pub async fn create_sqlite_pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    /// Create the orchestrator metadata tables used by the tests
    pub async fn create_sqlite_metadata_schema(pool: &SqlitePool) {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(pool)
                .await
                .expect("Failed to create SQLite test schema");
        }
    }

    #[async_trait]
    impl MetadataFixture for SqlitePool {
        async fn insert_row(
            &self,
            table: &str,
            age_column: &str,
            dag_id: Option<&str>,
            age: DateTime<Utc>,
        ) {
            sqlx::query(&format!(
                "INSERT INTO \"{table}\" (dag_id, \"{age_column}\") VALUES (?, ?)"
            ))
            .bind(dag_id)
            .bind(age)
            .execute(self)
            .await
            .expect("Failed to insert fixture row");
        }

        async fn insert_row_text(
            &self,
            table: &str,
            age_column: &str,
            dag_id: Option<&str>,
            age: &str,
        ) {
            sqlx::query(&format!(
                "INSERT INTO \"{table}\" (dag_id, \"{age_column}\") VALUES (?, ?)"
            ))
            .bind(dag_id)
            .bind(age)
            .execute(self)
            .await
            .expect("Failed to insert fixture row");
        }

        async fn insert_dag_run(
            &self,
            dag_id: &str,
            execution_date: DateTime<Utc>,
            external: bool,
        ) {
            sqlx::query(
                "INSERT INTO dag_run (dag_id, execution_date, external_trigger) VALUES (?, ?, ?)",
            )
            .bind(dag_id)
            .bind(execution_date)
            .bind(external)
            .execute(self)
            .await
            .expect("Failed to insert dag_run");
        }

        async fn insert_import_error(&self, filename: &str, timestamp: DateTime<Utc>) {
            sqlx::query("INSERT INTO import_error (filename, \"timestamp\") VALUES (?, ?)")
                .bind(filename)
                .bind(timestamp)
                .execute(self)
                .await
                .expect("Failed to insert import_error");
        }

        async fn row_count(&self, table: &str) -> i64 {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
                .fetch_one(self)
                .await
                .expect("Failed to count rows")
        }
    }
}

/// PostgreSQL test harness using testcontainers
#[cfg(all(test, feature = "database-postgres"))]
pub mod postgres {
    use std::sync::OnceLock;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    use super::MetadataFixture;

    const SCHEMA: &[&str] = &[
        r#"CREATE TABLE job (
            id SERIAL PRIMARY KEY,
            dag_id VARCHAR(250),
            state VARCHAR(20),
            latest_heartbeat TIMESTAMPTZ
        )"#,
        r#"CREATE TABLE dag_run (
            id SERIAL PRIMARY KEY,
            dag_id VARCHAR(250),
            execution_date TIMESTAMPTZ NOT NULL,
            external_trigger BOOLEAN NOT NULL DEFAULT FALSE
        )"#,
        r#"CREATE TABLE log (
            id SERIAL PRIMARY KEY,
            dag_id VARCHAR(250),
            event VARCHAR(30),
            dttm TIMESTAMPTZ
        )"#,
        r#"CREATE TABLE sla_miss (
            task_id VARCHAR(250) NOT NULL DEFAULT 'task',
            dag_id VARCHAR(250),
            execution_date TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE dag (
            dag_id VARCHAR(250),
            last_parsed_time TIMESTAMPTZ
        )"#,
        r#"CREATE TABLE import_error (
            id SERIAL PRIMARY KEY,
            filename VARCHAR(1024),
            "timestamp" TIMESTAMPTZ,
            stacktrace TEXT
        )"#,
    ];

    /// Shared container state - initialized once per test run
    struct SharedContainer {
        #[allow(dead_code)] // Test infrastructure: keeps container alive
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("18-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            SharedContainer {
                container,
                connection_string,
            }
        })
        .await
    }

    /// Create an isolated database schema for a single test
    ///
    /// Each test gets its own schema in a shared container, so tables never
    /// leak between tests.
    pub async fn create_isolated_postgres_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("test_{}", uuid::Uuid::new_v4().simple());

        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema_name))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema")
    }

    /// Create the orchestrator metadata tables used by the tests
    pub async fn create_postgres_metadata_schema(pool: &PgPool) {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(pool)
                .await
                .expect("Failed to create PostgreSQL test schema");
        }
    }

    #[async_trait]
    impl MetadataFixture for PgPool {
        async fn insert_row(
            &self,
            table: &str,
            age_column: &str,
            dag_id: Option<&str>,
            age: DateTime<Utc>,
        ) {
            sqlx::query(&format!(
                "INSERT INTO \"{table}\" (dag_id, \"{age_column}\") VALUES ($1, $2)"
            ))
            .bind(dag_id)
            .bind(age)
            .execute(self)
            .await
            .expect("Failed to insert fixture row");
        }

        async fn insert_row_text(
            &self,
            table: &str,
            age_column: &str,
            dag_id: Option<&str>,
            age: &str,
        ) {
            sqlx::query(&format!(
                "INSERT INTO \"{table}\" (dag_id, \"{age_column}\") \
                 VALUES ($1, $2::timestamp AT TIME ZONE 'UTC')"
            ))
            .bind(dag_id)
            .bind(age)
            .execute(self)
            .await
            .expect("Failed to insert fixture row");
        }

        async fn insert_dag_run(
            &self,
            dag_id: &str,
            execution_date: DateTime<Utc>,
            external: bool,
        ) {
            sqlx::query(
                "INSERT INTO dag_run (dag_id, execution_date, external_trigger) VALUES ($1, $2, $3)",
            )
            .bind(dag_id)
            .bind(execution_date)
            .bind(external)
            .execute(self)
            .await
            .expect("Failed to insert dag_run");
        }

        async fn insert_import_error(&self, filename: &str, timestamp: DateTime<Utc>) {
            sqlx::query("INSERT INTO import_error (filename, \"timestamp\") VALUES ($1, $2)")
                .bind(filename)
                .bind(timestamp)
                .execute(self)
                .await
                .expect("Failed to insert import_error");
        }

        async fn row_count(&self, table: &str) -> i64 {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
                .fetch_one(self)
                .await
                .expect("Failed to count rows")
        }
    }
}
