//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::{debug, info};

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter
///
/// Does nothing unless `config.enabled` is set. Otherwise it must be called
/// from within a Tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        debug!("Metrics exporter disabled");
        return Ok(());
    }

    // Register metric descriptions
    describe_counter!("bufpool_allocations_total", "Successful allocations by size class");
    describe_counter!("bufpool_allocation_failures_total", "Allocations the arena could not satisfy");
    describe_counter!("bufpool_deallocations_total", "Leases returned to the arena");
    describe_counter!("bufpool_resizes_in_place_total", "Capacity changes served without copying");
    describe_counter!("bufpool_reallocations_total", "Capacity changes that moved the buffer");
    describe_counter!("bufpool_chunks_created_total", "Chunks carved from the system allocator");
    describe_counter!("bufpool_chunks_destroyed_total", "Idle chunks released");
    describe_counter!("bufpool_subpages_retired_total", "Idle subpages whose page went back to its chunk");
    describe_counter!("bufpool_recycler_hits_total", "Handle objects served from the recycler");
    describe_counter!("bufpool_recycler_misses_total", "Handle objects freshly allocated");
    describe_gauge!("bufpool_live_leases", "Leases currently held by callers");

    // Build and install the Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Start background task to sync atomic counters to metrics crate
    tokio::spawn(sync_metrics_task(Duration::from_millis(config.sync_interval_ms)));
    info!(addr = %config.bind_addr, "Metrics exporter listening");

    Ok(())
}

/// Background task that periodically syncs our atomic counters to the metrics crate
async fn sync_metrics_task(period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;

        let snapshot = METRICS.snapshot();
        publish_deltas(&last, &snapshot);
        last = snapshot;
    }
}

/// Push the difference between two snapshots to the metrics recorder
pub fn publish_deltas(last: &MetricsSnapshot, now: &MetricsSnapshot) {
    let classes = [
        ("tiny", last.allocations_tiny, now.allocations_tiny),
        ("small", last.allocations_small, now.allocations_small),
        ("normal", last.allocations_normal, now.allocations_normal),
        ("huge", last.allocations_huge, now.allocations_huge),
    ];
    for (class, before, after) in classes {
        let delta = after.saturating_sub(before);
        if delta > 0 {
            counter!("bufpool_allocations_total", "class" => class).increment(delta);
        }
    }

    let dealloc = [
        ("pooled", last.deallocations_pooled, now.deallocations_pooled),
        ("unpooled", last.deallocations_unpooled, now.deallocations_unpooled),
    ];
    for (kind, before, after) in dealloc {
        let delta = after.saturating_sub(before);
        if delta > 0 {
            counter!("bufpool_deallocations_total", "kind" => kind).increment(delta);
        }
    }

    let totals = [
        ("bufpool_allocation_failures_total", last.allocation_failures, now.allocation_failures),
        ("bufpool_resizes_in_place_total", last.resizes_in_place, now.resizes_in_place),
        ("bufpool_reallocations_total", last.reallocations, now.reallocations),
        ("bufpool_chunks_created_total", last.chunks_created, now.chunks_created),
        ("bufpool_chunks_destroyed_total", last.chunks_destroyed, now.chunks_destroyed),
        ("bufpool_subpages_retired_total", last.subpages_retired, now.subpages_retired),
        ("bufpool_recycler_hits_total", last.recycler_hits, now.recycler_hits),
        ("bufpool_recycler_misses_total", last.recycler_misses, now.recycler_misses),
    ];
    for (name, before, after) in totals {
        let delta = after.saturating_sub(before);
        if delta > 0 {
            counter!(name).increment(delta);
        }
    }

    gauge!("bufpool_live_leases").set(now.live_leases() as f64);
}
