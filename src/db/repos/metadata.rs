use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::EligibleRow,
    retention::DeletionFilter,
};

/// Storage operations the retention planner needs from the metadata database.
///
/// Implementations never manage the schema; a table that does not exist is
/// reported as [`DbError::MissingTable`](crate::db::DbError::MissingTable).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Distinct non-null values of `owner_column`, sorted.
    async fn distinct_owners(&self, table: &str, owner_column: &str) -> DbResult<Vec<String>>;

    /// Fetch the owner and age of every row matching the filter, oldest first.
    async fn select_eligible(&self, filter: &DeletionFilter) -> DbResult<Vec<EligibleRow>>;

    /// Count the rows matching the filter.
    async fn count_eligible(&self, filter: &DeletionFilter) -> DbResult<u64>;

    // ==================== Mutations ====================

    /// Delete every row matching the filter with a single statement inside
    /// its own transaction, committed before returning.
    ///
    /// Returns the number of rows deleted.
    async fn delete_eligible(&self, filter: &DeletionFilter) -> DbResult<u64>;

    /// Refresh the query planner's statistics.
    async fn analyze(&self) -> DbResult<()>;
}
