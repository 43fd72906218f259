use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, query::Query, sqlite::SqliteArguments};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::MetadataStore,
    },
    models::EligibleRow,
    retention::{BindValue, DeletionFilter, Dialect, SqlFragment, distinct_owners_sql},
};

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn bind_all<'q>(
    fragment: &'q SqlFragment,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    fragment
        .binds
        .iter()
        .fold(sqlx::query(&fragment.sql), |query, value| match value {
            BindValue::Timestamp(ts) => query.bind(*ts),
            BindValue::Bool(b) => query.bind(*b),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Text(s) => query.bind(s.as_str()),
        })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn distinct_owners(&self, table: &str, owner_column: &str) -> DbResult<Vec<String>> {
        let rows = sqlx::query(&distinct_owners_sql(table, owner_column))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::for_table(e, table))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("owner_value").map_err(DbError::from))
            .collect()
    }

    async fn select_eligible(&self, filter: &DeletionFilter) -> DbResult<Vec<EligibleRow>> {
        let fragment = filter.select_sql(Dialect::Sqlite);
        let rows = bind_all(&fragment)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::for_table(e, &filter.table))?;

        rows.iter()
            .map(|row| -> DbResult<EligibleRow> {
                Ok(EligibleRow {
                    owner: row.try_get::<Option<String>, _>("owner_value")?,
                    age: row.try_get::<Option<DateTime<Utc>>, _>("age_value")?,
                })
            })
            .collect()
    }

    async fn count_eligible(&self, filter: &DeletionFilter) -> DbResult<u64> {
        let fragment = filter.count_sql(Dialect::Sqlite);
        let row = bind_all(&fragment)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::for_table(e, &filter.table))?;

        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn delete_eligible(&self, filter: &DeletionFilter) -> DbResult<u64> {
        let fragment = filter.delete_sql(Dialect::Sqlite);
        let mut tx = self.pool.begin().await?;

        let result = bind_all(&fragment)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::for_table(e, &filter.table))?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn analyze(&self) -> DbResult<()> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        Ok(())
    }
}
