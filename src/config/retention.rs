//! Data retention configuration.
//!
//! Configures which metadata tables are purged and how old a row must be
//! before it becomes eligible for deletion.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! default_max_age_days = 30
//! enable_delete = true
//! print_deletes = false
//!
//! [[retention.categories]]
//! name = "dag_run"
//! age_column = "execution_date"
//! keep_last = true
//! keep_last_group_by = "dag_id"
//! keep_last_filters = [{ column = "external_trigger", op = "eq", value = false }]
//!
//! [[retention.categories]]
//! name = "import_error"
//! age_column = "timestamp"
//! partition_scoped = false
//! ```

use std::{collections::HashSet, sync::LazyLock};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Data retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Enable the retention job. When false, `run` and `worker` exit
    /// without touching the database.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often the `worker` command runs a retention pass (in hours).
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Age in days after which rows become eligible for deletion, used when
    /// the run is not given a valid override.
    /// Default: 30
    #[serde(default = "default_max_age_days")]
    pub default_max_age_days: u32,

    /// Whether matched rows are actually deleted. When false the run only
    /// reports what it would delete.
    /// Default: true
    #[serde(default = "default_true")]
    pub enable_delete: bool,

    /// Log every row that is about to be deleted. Slow on large tables.
    /// Default: false
    #[serde(default)]
    pub print_deletes: bool,

    /// Refresh planner statistics (`ANALYZE`) after all categories ran.
    /// Default: true
    #[serde(default = "default_true")]
    pub analyze: bool,

    /// How many times a category is retried after a storage failure.
    /// Default: 1
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fixed delay between category retries (in seconds).
    /// Default: 60
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Record categories to purge, processed in order.
    #[serde(default = "default_categories")]
    pub categories: Vec<RecordCategory>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: default_interval_hours(),
            default_max_age_days: default_max_age_days(),
            enable_delete: true,
            print_deletes: false,
            analyze: true,
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            categories: default_categories(),
        }
    }
}

fn default_interval_hours() -> u64 {
    24
}

fn default_max_age_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    1
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_owner_column() -> String {
    "dag_id".to_string()
}

impl RetentionConfig {
    /// Get the worker interval as a Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_hours * 3600)
    }

    /// Get the retry delay as a Duration.
    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_delay_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_age_days < 1 {
            return Err(ConfigError::Validation(
                "retention.default_max_age_days must be at least 1".into(),
            ));
        }
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "retention.interval_hours must be at least 1".into(),
            ));
        }

        let mut names = HashSet::new();
        for category in &self.categories {
            if !names.insert(category.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate retention category name '{}'",
                    category.name
                )));
            }
            category.validate()?;
        }

        Ok(())
    }
}

/// A class of metadata rows considered together for deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RecordCategory {
    /// Display name, unique within a run.
    pub name: String,

    /// Table holding the rows. Defaults to `name`.
    #[serde(default)]
    pub table: Option<String>,

    /// Timestamp column compared against the cutoff.
    pub age_column: String,

    /// Preserve the newest row (per `keep_last_group_by` group) from deletion.
    #[serde(default)]
    pub keep_last: bool,

    /// Only rows matching all of these filters are considered when finding
    /// the newest row to keep.
    #[serde(default)]
    pub keep_last_filters: Vec<ColumnFilter>,

    /// Column grouping rows for the keep-last rule. Without it the whole
    /// category is one group.
    #[serde(default)]
    pub keep_last_group_by: Option<String>,

    /// Process each owning workflow separately (one commit per owner).
    #[serde(default = "default_true")]
    pub partition_scoped: bool,

    /// Column holding the owning workflow identifier.
    #[serde(default = "default_owner_column")]
    pub owner_column: String,
}

impl RecordCategory {
    /// A plain age-based category: no keep-last rule, partitioned by `dag_id`.
    pub fn new(name: impl Into<String>, age_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            age_column: age_column.into(),
            keep_last: false,
            keep_last_filters: Vec::new(),
            keep_last_group_by: None,
            partition_scoped: true,
            owner_column: default_owner_column(),
        }
    }

    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let context = |field: &str| format!("retention category '{}': {}", self.name, field);

        check_identifier(self.table(), &context("table"))?;
        check_identifier(&self.age_column, &context("age_column"))?;
        check_identifier(&self.owner_column, &context("owner_column"))?;
        if let Some(group_by) = &self.keep_last_group_by {
            check_identifier(group_by, &context("keep_last_group_by"))?;
        }

        if !self.keep_last
            && (!self.keep_last_filters.is_empty() || self.keep_last_group_by.is_some())
        {
            return Err(ConfigError::Validation(context(
                "keep_last_filters and keep_last_group_by require keep_last = true",
            )));
        }

        for filter in &self.keep_last_filters {
            check_identifier(&filter.column, &context("keep_last_filters.column"))?;
            match (filter.op.takes_value(), &filter.value) {
                (true, None) => {
                    return Err(ConfigError::Validation(context(&format!(
                        "filter on '{}' needs a value",
                        filter.column
                    ))));
                }
                (false, Some(_)) => {
                    return Err(ConfigError::Validation(context(&format!(
                        "filter on '{}' does not take a value",
                        filter.column
                    ))));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Filter applied when selecting the rows protected by the keep-last rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ColumnFilter {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Option<FilterValue>,
}

impl ColumnFilter {
    pub fn eq(column: impl Into<String>, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    pub fn takes_value(self) -> bool {
        matches!(self, FilterOp::Eq | FilterOp::Ne)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

static IDENTIFIER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Table and column names are spliced into SQL, so only plain identifiers
/// are accepted.
fn check_identifier(name: &str, context: &str) -> Result<(), ConfigError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{context}: '{name}' is not a valid SQL identifier"
        )))
    }
}

/// The orchestrator tables purged out of the box.
///
/// `task_fail` and `import_error` only exist in some orchestrator versions;
/// a missing table is skipped at run time.
pub fn default_categories() -> Vec<RecordCategory> {
    vec![
        RecordCategory::new("job", "latest_heartbeat"),
        RecordCategory {
            keep_last: true,
            keep_last_filters: vec![ColumnFilter::eq(
                "external_trigger",
                FilterValue::Bool(false),
            )],
            keep_last_group_by: Some("dag_id".to_string()),
            ..RecordCategory::new("dag_run", "execution_date")
        },
        RecordCategory::new("log", "dttm"),
        RecordCategory::new("sla_miss", "execution_date"),
        RecordCategory::new("dag", "last_parsed_time"),
        RecordCategory::new("task_fail", "start_date"),
        RecordCategory {
            partition_scoped: false,
            ..RecordCategory::new("import_error", "timestamp")
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_hours, 24);
        assert_eq!(config.default_max_age_days, 30);
        assert!(config.enable_delete);
        assert!(!config.print_deletes);
        assert!(config.analyze);
        assert_eq!(config.retries, 1);
        assert_eq!(config.retry_delay_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_categories() {
        let categories = default_categories();
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "job",
                "dag_run",
                "log",
                "sla_miss",
                "dag",
                "task_fail",
                "import_error"
            ]
        );

        let dag_run = &categories[1];
        assert!(dag_run.keep_last);
        assert_eq!(dag_run.keep_last_group_by.as_deref(), Some("dag_id"));
        assert_eq!(dag_run.keep_last_filters.len(), 1);

        let import_error = &categories[6];
        assert!(!import_error.partition_scoped);
        assert_eq!(import_error.table(), "import_error");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = false
            interval_hours = 12
            default_max_age_days = 45
            enable_delete = false
            print_deletes = true
            analyze = false
            retries = 3
            retry_delay_secs = 5

            [[categories]]
            name = "runs"
            table = "dag_run"
            age_column = "execution_date"
            keep_last = true
            keep_last_group_by = "dag_id"
            keep_last_filters = [
                { column = "external_trigger", op = "eq", value = false },
                { column = "end_date", op = "is_not_null" },
            ]

            [[categories]]
            name = "import_error"
            age_column = "timestamp"
            partition_scoped = false
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval(), std::time::Duration::from_secs(12 * 3600));
        assert_eq!(config.retry_delay(), std::time::Duration::from_secs(5));
        assert_eq!(config.categories.len(), 2);

        let runs = &config.categories[0];
        assert_eq!(runs.table(), "dag_run");
        assert_eq!(
            runs.keep_last_filters[0].value,
            Some(FilterValue::Bool(false))
        );
        assert_eq!(runs.keep_last_filters[1].op, FilterOp::IsNotNull);
        assert_eq!(runs.owner_column, "dag_id");
    }

    #[test]
    fn test_filter_value_variants() {
        let filter: ColumnFilter = toml::from_str(r#"column = "state"
op = "ne"
value = "running""#)
        .unwrap();
        assert_eq!(filter.value, Some(FilterValue::Text("running".into())));

        let filter: ColumnFilter = toml::from_str(r#"column = "try_number"
op = "eq"
value = 3"#)
        .unwrap();
        assert_eq!(filter.value, Some(FilterValue::Int(3)));
    }

    #[test]
    fn test_duplicate_category_names_rejected() {
        let config = RetentionConfig {
            categories: vec![
                RecordCategory::new("log", "dttm"),
                RecordCategory::new("log", "dttm"),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let config = RetentionConfig {
            categories: vec![RecordCategory::new("log", "dttm; DROP TABLE log")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keep_last_options_require_keep_last() {
        let config = RetentionConfig {
            categories: vec![RecordCategory {
                keep_last_group_by: Some("dag_id".into()),
                ..RecordCategory::new("dag_run", "execution_date")
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_value_presence_checked() {
        let missing_value = ColumnFilter {
            column: "external_trigger".into(),
            op: FilterOp::Eq,
            value: None,
        };
        let config = RetentionConfig {
            categories: vec![RecordCategory {
                keep_last: true,
                keep_last_filters: vec![missing_value],
                ..RecordCategory::new("dag_run", "execution_date")
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_default_age_rejected() {
        let config = RetentionConfig {
            default_max_age_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
