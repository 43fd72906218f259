//! Retention of orchestrator metadata.
//!
//! A retention run:
//! 1. Resolves the age cutoff from the run parameters or the configured default
//! 2. Enumerates the partitions (owning workflows) of every record category
//! 3. Deletes the rows older than the cutoff, one committed transaction per partition
//! 4. Refreshes database statistics
//!
//! Categories with a keep-last rule never lose the newest row of each group,
//! and deletion can be disabled to only report what would be removed.

mod planner;
mod predicate;
mod worker;

pub use planner::{
    build_eligibility_predicate, deletion_filter, enumerate_partitions, plan_deletion,
    resolve_cutoff, resolve_max_age_days,
};
pub use predicate::{
    BindValue, DeletionFilter, Dialect, EligibilityPredicate, KeepLastRule, SqlFragment,
    distinct_owners_sql,
};
pub use worker::{
    CategoryOutcome, CategoryResult, MAX_AGE_CONF_KEY, PartitionFailure, RetentionRunResult,
    RunParams, run_maintenance, start_retention_worker,
};
