//! Retention planning: cutoff resolution, eligibility predicates, partition
//! discovery and per-partition deletion.

use chrono::{DateTime, Duration, Utc};

use super::predicate::{DeletionFilter, EligibilityPredicate, KeepLastRule};
use crate::{
    config::{RecordCategory, RetentionConfig},
    db::{DbResult, MetadataStore},
    models::{PartitionKey, PartitionOutcome, RetentionPolicy},
    observability::metrics,
};

/// Pick the age in days to use for a run.
///
/// A missing or non-positive request falls back to the configured default.
pub fn resolve_max_age_days(requested_age_days: Option<i64>, default_age_days: u32) -> u32 {
    match requested_age_days {
        Some(days) if days >= 1 => u32::try_from(days).unwrap_or(u32::MAX),
        _ => default_age_days,
    }
}

/// Absolute cutoff for a run: `now` minus the resolved age.
pub fn resolve_cutoff(
    requested_age_days: Option<i64>,
    default_age_days: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let days = resolve_max_age_days(requested_age_days, default_age_days);
    now - Duration::days(i64::from(days))
}

impl RetentionPolicy {
    /// Resolve the run-level policy once, before any category is processed.
    pub fn resolve(
        config: &RetentionConfig,
        requested_age_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        if !matches!(requested_age_days, Some(days) if days >= 1) {
            tracing::info!(
                requested = ?requested_age_days,
                default = config.default_max_age_days,
                "Max age not provided or less than 1 day, using default"
            );
        }

        let max_age_days = resolve_max_age_days(requested_age_days, config.default_max_age_days);
        Self {
            max_age_days,
            cutoff: resolve_cutoff(requested_age_days, config.default_max_age_days, now),
            deletion_enabled: config.enable_delete,
            print_deletes: config.print_deletes,
        }
    }
}

/// Build the predicate selecting the category's rows that may be deleted.
pub fn build_eligibility_predicate(
    category: &RecordCategory,
    cutoff: DateTime<Utc>,
) -> EligibilityPredicate {
    EligibilityPredicate {
        age_column: category.age_column.clone(),
        cutoff,
        keep_last: category.keep_last.then(|| KeepLastRule {
            filters: category.keep_last_filters.clone(),
            group_by: category.keep_last_group_by.clone(),
        }),
    }
}

/// Restrict a category's predicate to one partition.
pub fn deletion_filter(
    category: &RecordCategory,
    cutoff: DateTime<Utc>,
    partition: PartitionKey,
) -> DeletionFilter {
    DeletionFilter {
        table: category.table().to_string(),
        owner_column: category
            .partition_scoped
            .then(|| category.owner_column.clone()),
        predicate: build_eligibility_predicate(category, cutoff),
        partition,
    }
}

/// Partitions to process for a category, discovered from live data.
///
/// Owner partitions come first in sorted order, followed by the unowned
/// partition. Categories that are not partition-scoped get one global
/// partition without touching the database.
pub async fn enumerate_partitions(
    store: &dyn MetadataStore,
    category: &RecordCategory,
) -> DbResult<Vec<PartitionKey>> {
    if !category.partition_scoped {
        return Ok(vec![PartitionKey::Global]);
    }

    let owners = store
        .distinct_owners(category.table(), &category.owner_column)
        .await?;

    let mut partitions: Vec<PartitionKey> = owners.into_iter().map(PartitionKey::Owner).collect();
    partitions.push(PartitionKey::Unowned);
    Ok(partitions)
}

/// Report, and when enabled delete, the eligible rows of one partition.
///
/// The delete is a single statement committed on its own, so an error here
/// leaves earlier partitions' deletions in place.
pub async fn plan_deletion(
    store: &dyn MetadataStore,
    category: &RecordCategory,
    policy: &RetentionPolicy,
    partition: PartitionKey,
) -> DbResult<PartitionOutcome> {
    let filter = deletion_filter(category, policy.cutoff, partition);

    let (rows_matched, rows) = if policy.print_deletes {
        let rows = store.select_eligible(&filter).await?;
        tracing::info!(
            category = %category.name,
            partition = %filter.partition,
            "Process will be deleting the following {}(s):",
            category.name
        );
        for row in &rows {
            tracing::info!(
                category = %category.name,
                owner = row.owner.as_deref().unwrap_or("<none>"),
                age = ?row.age,
                "\tEntry"
            );
        }
        (rows.len() as u64, Some(rows))
    } else {
        (store.count_eligible(&filter).await?, None)
    };

    tracing::debug!(
        category = %category.name,
        partition = %filter.partition,
        rows_matched,
        "Process will be deleting {} {}(s)",
        rows_matched,
        category.name
    );

    let rows_deleted = if policy.deletion_enabled && rows_matched > 0 {
        let deleted = store.delete_eligible(&filter).await?;
        if deleted > 0 {
            tracing::debug!(
                category = %category.name,
                partition = %filter.partition,
                deleted,
                "Deleted rows"
            );
            metrics::record_retention_deletion(&category.name, deleted);
        }
        deleted
    } else {
        0
    };

    Ok(PartitionOutcome {
        partition: filter.partition,
        rows_matched,
        rows_deleted,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::{ColumnFilter, FilterValue};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cutoff_falls_back_to_default() {
        for requested in [None, Some(0), Some(-5)] {
            assert_eq!(
                resolve_cutoff(requested, 30, now()),
                now() - Duration::days(30),
                "requested = {requested:?}"
            );
        }
    }

    #[test]
    fn test_cutoff_uses_valid_request() {
        assert_eq!(resolve_cutoff(Some(45), 30, now()), now() - Duration::days(45));
        assert_eq!(resolve_cutoff(Some(1), 30, now()), now() - Duration::days(1));
    }

    #[test]
    fn test_max_age_saturates() {
        assert_eq!(resolve_max_age_days(Some(i64::MAX), 30), u32::MAX);
    }

    #[test]
    fn test_policy_resolve() {
        let config = RetentionConfig {
            enable_delete: false,
            print_deletes: true,
            ..Default::default()
        };
        let policy = RetentionPolicy::resolve(&config, Some(7), now());
        assert_eq!(policy.max_age_days, 7);
        assert_eq!(policy.cutoff, now() - Duration::days(7));
        assert!(!policy.deletion_enabled);
        assert!(policy.print_deletes);

        let policy = RetentionPolicy::resolve(&config, None, now());
        assert_eq!(policy.max_age_days, 30);
    }

    #[test]
    fn test_predicate_without_keep_last() {
        let category = RecordCategory::new("log", "dttm");
        let predicate = build_eligibility_predicate(&category, now());
        assert_eq!(predicate.age_column, "dttm");
        assert_eq!(predicate.cutoff, now());
        assert!(predicate.keep_last.is_none());
    }

    #[test]
    fn test_predicate_with_keep_last() {
        let category = RecordCategory {
            keep_last: true,
            keep_last_filters: vec![ColumnFilter::eq(
                "external_trigger",
                FilterValue::Bool(false),
            )],
            keep_last_group_by: Some("dag_id".into()),
            ..RecordCategory::new("dag_run", "execution_date")
        };
        let predicate = build_eligibility_predicate(&category, now());
        let rule = predicate.keep_last.expect("keep-last rule");
        assert_eq!(rule.group_by.as_deref(), Some("dag_id"));
        assert_eq!(rule.filters.len(), 1);
    }

    #[test]
    fn test_deletion_filter_scoping() {
        let scoped = RecordCategory::new("log", "dttm");
        let filter = deletion_filter(&scoped, now(), PartitionKey::Unowned);
        assert_eq!(filter.owner_column.as_deref(), Some("dag_id"));

        let global = RecordCategory {
            partition_scoped: false,
            table: Some("import_error".into()),
            ..RecordCategory::new("parse_failures", "timestamp")
        };
        let filter = deletion_filter(&global, now(), PartitionKey::Global);
        assert_eq!(filter.table, "import_error");
        assert!(filter.owner_column.is_none());
    }
}
