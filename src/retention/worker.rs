//! Retention runner and worker.
//!
//! A run resolves the policy once, then walks every configured category and
//! each of its partitions in order. Every partition is committed on its own,
//! so a failure in one partition never rolls back another. The worker repeats
//! runs at the configured interval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::planner::{enumerate_partitions, plan_deletion};
use crate::{
    config::{MetricsConfig, RecordCategory, RetentionConfig},
    db::MetadataStore,
    models::{PartitionKey, RetentionPolicy},
    observability::metrics,
};

/// Run-configuration key carrying the max age override.
pub const MAX_AGE_CONF_KEY: &str = "maxDBEntryAgeInDays";

/// Per-run trigger parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunParams {
    /// Requested max age in days. Values below 1 fall back to the default.
    pub max_age_days: Option<i64>,
}

impl RunParams {
    /// Parse a JSON run configuration such as `{"maxDBEntryAgeInDays": 45}`.
    ///
    /// A missing key or a non-integer value leaves the override unset.
    pub fn from_conf_json(conf: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Map<String, serde_json::Value> = serde_json::from_str(conf)?;
        let max_age_days = value.get(MAX_AGE_CONF_KEY).and_then(|v| v.as_i64());
        if max_age_days.is_none() && value.contains_key(MAX_AGE_CONF_KEY) {
            tracing::warn!(
                key = MAX_AGE_CONF_KEY,
                value = %value[MAX_AGE_CONF_KEY],
                "Ignoring non-integer max age in run configuration"
            );
        }
        Ok(Self { max_age_days })
    }
}

/// A partition that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionFailure {
    pub partition: PartitionKey,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryOutcome {
    /// Every partition was attempted. Some may still have failed.
    Completed {
        matched: u64,
        deleted: u64,
        partitions: usize,
        failed_partitions: Vec<PartitionFailure>,
    },
    /// The category's table does not exist.
    Skipped { reason: String },
    /// Partitions could not be enumerated.
    Failed { error: String },
}

impl CategoryOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            CategoryOutcome::Completed {
                failed_partitions, ..
            } => failed_partitions.is_empty(),
            CategoryOutcome::Skipped { .. } => true,
            CategoryOutcome::Failed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryResult {
    pub category: String,
    #[serde(flatten)]
    pub outcome: CategoryOutcome,
}

/// Results from a single retention run.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionRunResult {
    pub run_id: Uuid,
    pub max_age_days: u32,
    pub cutoff: DateTime<Utc>,
    /// True when deletion was disabled and the run only reported.
    pub dry_run: bool,
    pub categories: Vec<CategoryResult>,
    /// Whether the statistics refresh ran successfully.
    pub analyzed: bool,
}

impl RetentionRunResult {
    /// Total number of rows deleted across all categories.
    pub fn total(&self) -> u64 {
        self.categories
            .iter()
            .map(|c| match &c.outcome {
                CategoryOutcome::Completed { deleted, .. } => *deleted,
                _ => 0,
            })
            .sum()
    }

    /// Total number of rows matched across all categories.
    pub fn total_matched(&self) -> u64 {
        self.categories
            .iter()
            .map(|c| match &c.outcome {
                CategoryOutcome::Completed { matched, .. } => *matched,
                _ => 0,
            })
            .sum()
    }

    /// Check if any rows were deleted.
    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }

    /// False if any category or partition failed.
    pub fn is_success(&self) -> bool {
        self.categories.iter().all(|c| c.outcome.is_success())
    }

    #[cfg(test)]
    pub fn outcome(&self, category: &str) -> Option<&CategoryOutcome> {
        self.categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| &c.outcome)
    }
}

/// Starts the retention worker.
///
/// The worker runs in a loop, purging old rows at the configured interval.
/// It will run indefinitely until the task is cancelled. Metrics are written
/// to the configured textfile after every run.
pub async fn start_retention_worker(
    store: Arc<dyn MetadataStore>,
    config: RetentionConfig,
    metrics_config: MetricsConfig,
) {
    if !config.enabled {
        tracing::info!("Retention worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.enable_delete {
        ""
    } else {
        " (DRY RUN)"
    };

    tracing::info!(
        interval_hours = config.interval_hours,
        default_max_age_days = config.default_max_age_days,
        categories = config.categories.len(),
        dry_run = !config.enable_delete,
        "Starting retention worker{}",
        dry_run_msg
    );

    let interval = config.interval();
    let params = RunParams::default();

    loop {
        let result = run_maintenance(store.as_ref(), &config, &params, Utc::now()).await;
        if !result.is_success() {
            tracing::error!(run_id = %result.run_id, "Retention run finished with failures");
        }
        if let Err(e) = metrics::write_textfile(&metrics_config) {
            tracing::warn!(error = %e, "Failed to write metrics textfile");
        }

        tokio::time::sleep(interval).await;
    }
}

/// Run a single retention pass over every configured category.
pub async fn run_maintenance(
    store: &dyn MetadataStore,
    config: &RetentionConfig,
    params: &RunParams,
    now: DateTime<Utc>,
) -> RetentionRunResult {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("retention_run", %run_id);
    run_categories(store, config, params, now, run_id)
        .instrument(span)
        .await
}

async fn run_categories(
    store: &dyn MetadataStore,
    config: &RetentionConfig,
    params: &RunParams,
    now: DateTime<Utc>,
    run_id: Uuid,
) -> RetentionRunResult {
    let policy = RetentionPolicy::resolve(config, params.max_age_days, now);

    tracing::info!(
        max_age_days = policy.max_age_days,
        cutoff = %policy.cutoff,
        enable_delete = policy.deletion_enabled,
        print_deletes = policy.print_deletes,
        categories = config.categories.len(),
        "Starting retention run"
    );
    if !policy.deletion_enabled {
        tracing::warn!(
            "Deletion is disabled, matched rows are only reported. \
             Set retention.enable_delete = true to delete them"
        );
    }

    let mut categories = Vec::with_capacity(config.categories.len());
    for category in &config.categories {
        let outcome = run_category(store, category, &policy, config).await;
        categories.push(CategoryResult {
            category: category.name.clone(),
            outcome,
        });
    }

    let analyzed = if config.analyze {
        match store.analyze().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to refresh database statistics");
                false
            }
        }
    } else {
        false
    };

    let result = RetentionRunResult {
        run_id,
        max_age_days: policy.max_age_days,
        cutoff: policy.cutoff,
        dry_run: !policy.deletion_enabled,
        categories,
        analyzed,
    };

    let dry_run_msg = if result.dry_run { " (DRY RUN)" } else { "" };
    if result.has_deletions() || result.total_matched() > 0 {
        tracing::info!(
            matched = result.total_matched(),
            deleted = result.total(),
            analyzed = result.analyzed,
            success = result.is_success(),
            "Retention run complete{}",
            dry_run_msg
        );
    } else {
        tracing::info!(
            success = result.is_success(),
            "Retention run complete, no rows to delete{}",
            dry_run_msg
        );
    }

    result
}

async fn run_category(
    store: &dyn MetadataStore,
    category: &RecordCategory,
    policy: &RetentionPolicy,
    config: &RetentionConfig,
) -> CategoryOutcome {
    let mut attempt = 0;
    let partitions = loop {
        match enumerate_partitions(store, category).await {
            Ok(partitions) => break partitions,
            Err(e) if e.is_missing_table() => return skipped(category, e.to_string()),
            Err(e) if attempt < config.retries => {
                attempt += 1;
                tracing::warn!(
                    category = %category.name,
                    error = %e,
                    attempt,
                    retries = config.retries,
                    "Failed to enumerate partitions, retrying"
                );
                tokio::time::sleep(config.retry_delay()).await;
            }
            Err(e) => {
                tracing::error!(
                    category = %category.name,
                    error = %e,
                    "Failed to enumerate partitions"
                );
                return CategoryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }
    };

    let partition_count = partitions.len();
    let mut matched = 0;
    let mut deleted = 0;
    let mut pending = partitions;
    let mut attempt = 0;

    loop {
        let mut failed = Vec::new();
        for partition in pending {
            match plan_deletion(store, category, policy, partition.clone()).await {
                Ok(outcome) => {
                    matched += outcome.rows_matched;
                    deleted += outcome.rows_deleted;
                }
                Err(e) if e.is_missing_table() => return skipped(category, e.to_string()),
                Err(e) => {
                    tracing::error!(
                        category = %category.name,
                        partition = %partition,
                        error = %e,
                        "Failed to process partition"
                    );
                    failed.push(PartitionFailure {
                        partition,
                        error: e.to_string(),
                    });
                }
            }
        }

        if failed.is_empty() || attempt >= config.retries {
            tracing::info!(
                category = %category.name,
                partitions = partition_count,
                failed = failed.len(),
                matched,
                deleted,
                "Processed category"
            );
            return CategoryOutcome::Completed {
                matched,
                deleted,
                partitions: partition_count,
                failed_partitions: failed,
            };
        }

        attempt += 1;
        tracing::warn!(
            category = %category.name,
            failed = failed.len(),
            attempt,
            retries = config.retries,
            "Retrying failed partitions"
        );
        tokio::time::sleep(config.retry_delay()).await;
        pending = failed.into_iter().map(|f| f.partition).collect();
    }
}

fn skipped(category: &RecordCategory, reason: String) -> CategoryOutcome {
    tracing::warn!(
        category = %category.name,
        table = category.table(),
        "Table does not exist, skipping category. This is expected for tables that \
         only exist in some orchestrator versions"
    );
    metrics::record_category_skipped(&category.name);
    CategoryOutcome::Skipped { reason }
}
