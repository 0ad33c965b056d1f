//! Demo binary: runs the spotting pipeline on the default input device with
//! the energy-heuristic classifier and logs every event until Ctrl-C.
//!
//! Usage: `kwspot [config.json]`

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kwspot::{
    AggregatorEvent, BoundedHistoryLog, CpalBackend, DisplayState, EnergyHeuristicLoader,
    ServiceEvent, SpotterConfig, SpotterService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kwspot=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SpotterConfig::load_from_file(Path::new(&path))?,
        None => SpotterConfig::default(),
    };

    let foreground_capacity = config.foreground_history_capacity;
    let grouping_window_ms = config.grouping_window_ms;
    let service = Arc::new(SpotterService::new(
        config,
        Arc::new(EnergyHeuristicLoader),
        Arc::new(CpalBackend::new()),
    ));
    let events = service.subscribe();

    service.start()?;

    // Event drain on a blocking thread; the foreground log mirrors what a
    // small on-screen recent-commands list would show.
    let drain = tokio::task::spawn_blocking(move || {
        let mut foreground = BoundedHistoryLog::new(foreground_capacity);
        while let Ok(event) = events.recv() {
            match event {
                ServiceEvent::Aggregator(AggregatorEvent::DisplayUpdate {
                    state,
                    inference_time_ms,
                }) => match state {
                    DisplayState::Command { label, confidence } => {
                        info!(%label, confidence, inference_time_ms, "command");
                    }
                    DisplayState::NoCommand => {
                        info!(inference_time_ms, "listening");
                    }
                },
                ServiceEvent::Aggregator(AggregatorEvent::HistoryEntry {
                    label,
                    confidence,
                    timestamp_ms,
                }) => {
                    foreground.record(&label, confidence, timestamp_ms, grouping_window_ms);
                    info!(%label, confidence, entries = foreground.len(), "history");
                }
                ServiceEvent::Aggregator(AggregatorEvent::SensitiveAlert { label, confidence }) => {
                    warn!(%label, confidence, "sensitive word detected");
                }
                ServiceEvent::Lifecycle(lifecycle) => {
                    info!(?lifecycle, "lifecycle");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    service.stop();

    for (name, summary) in service.metrics_summary() {
        info!(
            metric = %name,
            p50_us = summary.p50_us,
            p95_us = summary.p95_us,
            p99_us = summary.p99_us,
            samples = summary.count,
            "timing"
        );
    }

    drain.abort();
    Ok(())
}
