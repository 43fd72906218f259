//! Prometheus metrics for retention runs.
//!
//! Provides metrics for:
//! - Rows deleted per record category
//! - Categories skipped because their table is missing

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Write the current metric values to the configured textfile.
///
/// Writes to a temporary sibling first and renames it into place, so the
/// collector never reads a partial file.
pub fn write_textfile(config: &MetricsConfig) -> Result<(), MetricsError> {
    let Some(path) = &config.textfile_path else {
        return Ok(());
    };

    #[cfg(feature = "prometheus")]
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, handle.render())
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| MetricsError::Write(e, path.clone()))?;
    }
    #[cfg(not(feature = "prometheus"))]
    let _ = path;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows deleted by a retention run.
///
/// # Arguments
/// * `category` - The record category the rows belong to (e.g., "dag_run", "log")
/// * `count` - The number of rows deleted
pub fn record_retention_deletion(category: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "category" => category.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (category, count);
    }
}

/// Record a category skipped because its table does not exist.
pub fn record_category_skipped(category: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_categories_skipped_total",
            "category" => category.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = category;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Failed to write metrics to {1}: {0}")]
    Write(std::io::Error, std::path::PathBuf),
}
