use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A subset of a category's rows processed and committed on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "owner", rename_all = "snake_case")]
pub enum PartitionKey {
    /// The whole category, for categories that are not partition-scoped.
    Global,
    /// Rows owned by one workflow.
    Owner(String),
    /// Rows with no owning workflow.
    Unowned,
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Global => f.write_str("<global>"),
            PartitionKey::Owner(owner) => f.write_str(owner),
            PartitionKey::Unowned => f.write_str("<unowned>"),
        }
    }
}

/// Projection of a row matched for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleRow {
    pub owner: Option<String>,
    pub age: Option<DateTime<Utc>>,
}

/// Run-level retention settings, resolved once before any category runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Age in days the cutoff was derived from.
    pub max_age_days: u32,
    /// Rows at or before this instant are old enough to delete.
    pub cutoff: DateTime<Utc>,
    /// When false the run only reports.
    pub deletion_enabled: bool,
    /// Fetch and log the matched rows instead of only counting them.
    pub print_deletes: bool,
}

/// Outcome of planning (and possibly deleting) one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub partition: PartitionKey,
    pub rows_matched: u64,
    pub rows_deleted: u64,
    /// Present only when the policy asks for row reporting.
    pub rows: Option<Vec<EligibleRow>>,
}
