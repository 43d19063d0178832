// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the log subscriber and the Prometheus recorder.
pub fn init_telemetry() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "popstore_node=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("prometheus handle already set");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot install prometheus recorder, metrics disabled");
            return;
        }
    }

    metrics::describe_counter!("popstore_links_created_total", "Links stored, by backend");
    metrics::describe_counter!("popstore_evidences_added_total", "Evidences attached, by backend");
    metrics::describe_counter!("popstore_validation_failures_total", "Links rejected by validation, by kind");
    metrics::describe_counter!("popstore_governance_reloads_total", "Validation rules reloads, by result");
    metrics::describe_counter!("popstore_batch_writes_total", "Batches flushed to a backend");
    metrics::describe_counter!("popstore_blocks_committed_total", "Blocks committed by the replicated engine");
    metrics::describe_counter!("popstore_txs_rejected_total", "Transactions rejected, by phase");
    metrics::describe_histogram!("popstore_block_commit_duration_seconds", "Time taken to commit a block");
    metrics::describe_gauge!("popstore_last_block_height", "Height of the last committed block");

    metrics::gauge!("popstore_node_up", 1.0);
}

/// Prometheus text exposition of every recorded metric.
pub fn get_metrics() -> String {
    match PROM_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# metrics not initialized".to_string(),
    }
}
