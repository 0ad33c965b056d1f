//! Always-on keyword spotting.
//!
//! A fixed-cadence inference loop pulls the most recent audio window from a
//! capture source, runs it through a pluggable classifier, and hands each
//! result batch to an aggregation engine that debounces display updates,
//! maintains a bounded history log, and raises sensitive-word alerts.
//! [`SpotterService`] wires the pieces together behind a start/stop facade
//! and fans everything out over one ordered event stream.

pub mod aggregator;
pub mod audio;
pub mod classify;
pub mod config;
pub mod history;
pub mod lifecycle;
pub mod metrics;
pub mod resource;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{AggregatorEvent, DisplayState, ResultAggregator};
pub use audio::{AudioBackend, AudioOpenError, AudioSource, CpalBackend};
pub use classify::{
    AudioFormat, ClassificationResult, Classifier, ClassifierLoader, EnergyHeuristicLoader,
    LabelScore, ModelLoadError, RawBatch,
};
pub use config::{ConfigError, SpotterConfig};
pub use history::{BoundedHistoryLog, HistoryEntry};
pub use lifecycle::{LifecycleEvent, LifecycleState};
pub use metrics::{MetricSummary, MetricsRegistry};
pub use resource::{CaptureError, ClassifierResource, InitError};
pub use scheduler::InferenceScheduler;
pub use service::{ServiceEvent, SpotterService};
