use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    /// The table backing a record category does not exist in this deployment.
    #[error("Table '{0}' is not present in the metadata database")]
    MissingTable(String),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    pub fn is_missing_table(&self) -> bool {
        matches!(self, DbError::MissingTable(_))
    }

    /// Convert a driver error raised while touching `table`, recognising the
    /// "undefined table" errors of SQLite and PostgreSQL.
    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    pub(crate) fn for_table(err: sqlx::Error, table: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && is_undefined_table(db_err.as_ref())
        {
            return DbError::MissingTable(table.to_string());
        }
        DbError::Sqlx(err)
    }
}

#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
fn is_undefined_table(err: &dyn sqlx::error::DatabaseError) -> bool {
    // 42P01 is PostgreSQL's undefined_table; SQLite only reports a message.
    err.code().as_deref() == Some("42P01") || err.message().starts_with("no such table")
}

pub type DbResult<T> = Result<T, DbError>;
