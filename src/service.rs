//! Top-level spotting service: owns the resource, scheduler, aggregator,
//! history log, and lifecycle, and fans every event out over one ordered
//! channel. External collaborators subscribe, pattern-match, and render;
//! nothing inside the pipeline blocks on them.

use std::sync::Arc;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::aggregator::{AggregatorEvent, ResultAggregator};
use crate::audio::AudioBackend;
use crate::classify::ClassifierLoader;
use crate::config::SpotterConfig;
use crate::history::{BoundedHistoryLog, HistoryEntry};
use crate::lifecycle::{LifecycleEvent, LifecycleState, ServiceLifecycle};
use crate::metrics::{metric_names, MetricSummary, MetricsRegistry};
use crate::resource::{ClassifierResource, InitError};
use crate::scheduler::InferenceScheduler;

/// Everything a subscriber can observe, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ServiceEvent {
    Aggregator(AggregatorEvent),
    Lifecycle(LifecycleEvent),
}

pub struct SpotterService {
    config: Arc<SpotterConfig>,
    lifecycle: Arc<ServiceLifecycle>,
    resource: Arc<ClassifierResource>,
    history: Arc<Mutex<BoundedHistoryLog>>,
    metrics: Arc<MetricsRegistry>,
    loader: Arc<dyn ClassifierLoader>,
    backend: Arc<dyn AudioBackend>,
    scheduler: Mutex<Option<InferenceScheduler>>,
    events_tx: cb::Sender<ServiceEvent>,
    events_rx: cb::Receiver<ServiceEvent>,
}

impl SpotterService {
    pub fn new(
        config: SpotterConfig,
        loader: Arc<dyn ClassifierLoader>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        let (events_tx, events_rx) = cb::unbounded();
        let history = Arc::new(Mutex::new(BoundedHistoryLog::new(config.history_capacity)));
        Self {
            config: Arc::new(config),
            lifecycle: Arc::new(ServiceLifecycle::new()),
            resource: Arc::new(ClassifierResource::new()),
            history,
            metrics: Arc::new(MetricsRegistry::new()),
            loader,
            backend,
            scheduler: Mutex::new(None),
            events_tx,
            events_rx,
        }
    }

    /// Bring the pipeline up: initialize the classifier/source pair, then
    /// start ticking. A no-op when already starting or running. Any
    /// initialization failure is surfaced both as the returned error and as
    /// a lifecycle `Error` event, and leaves the service fully stopped.
    pub fn start(&self) -> Result<(), InitError> {
        if self.lifecycle.transition(LifecycleState::Starting).is_err() {
            debug!(state = %self.lifecycle.current(), "start ignored");
            return Ok(());
        }

        // A scheduler handle may linger from a faulted run; its worker has
        // already exited.
        self.scheduler.lock().take();

        if let Err(err) = self
            .resource
            .initialize(&self.config, self.loader.as_ref(), self.backend.as_ref())
        {
            error!(error = %err, "initialization failed");
            self.fail_and_settle(&err.to_string());
            return Err(err);
        }

        // Running marks "resources ready"; ticking begins right after, so
        // the first batch already sees the Running state.
        let _ = self.lifecycle.transition(LifecycleState::Running);
        self.emit(LifecycleEvent::Initialized);

        // Fresh debounce state on every start.
        let mut aggregator =
            ResultAggregator::new(Arc::clone(&self.config), Arc::clone(&self.history));

        let batch_lifecycle = Arc::clone(&self.lifecycle);
        let batch_metrics = Arc::clone(&self.metrics);
        let batch_tx = self.events_tx.clone();
        let on_batch = move |batch| {
            if batch_lifecycle.current() != LifecycleState::Running {
                // Benign race: delivery of a tick that was already in
                // flight when stop() was requested.
                return;
            }
            let span = batch_metrics.span(metric_names::T_AGGREGATE);
            for event in aggregator.ingest(&batch) {
                let _ = batch_tx.send(ServiceEvent::Aggregator(event));
            }
            span.finish();
        };

        let fatal_lifecycle = Arc::clone(&self.lifecycle);
        let fatal_resource = Arc::clone(&self.resource);
        let fatal_history = Arc::clone(&self.history);
        let fatal_tx = self.events_tx.clone();
        let on_fatal = move |err: crate::resource::CaptureError| {
            if fatal_lifecycle.transition(LifecycleState::Failed).is_err() {
                // The service is already stopping; teardown owns cleanup.
                debug!(error = %err, "capture fault during shutdown ignored");
                return;
            }
            error!(error = %err, "capture fault, shutting the service down");
            fatal_resource.release();
            fatal_history.lock().clear();
            let _ = fatal_tx.send(ServiceEvent::Lifecycle(LifecycleEvent::Error {
                message: err.to_string(),
            }));
            let _ = fatal_lifecycle.transition(LifecycleState::Stopped);
            let _ = fatal_tx.send(ServiceEvent::Lifecycle(LifecycleEvent::Stopped));
        };

        match InferenceScheduler::start(
            Arc::clone(&self.resource),
            self.config.tick_period(),
            Arc::clone(&self.metrics),
            on_batch,
            on_fatal,
        ) {
            Ok(scheduler) => {
                *self.scheduler.lock() = Some(scheduler);
                info!("spotter service running");
                Ok(())
            }
            Err(e) => {
                let err = InitError::RuntimeFault(format!("worker spawn failed: {e}"));
                self.resource.release();
                let _ = self.lifecycle.transition(LifecycleState::Failed);
                self.emit(LifecycleEvent::Error {
                    message: err.to_string(),
                });
                let _ = self.lifecycle.transition(LifecycleState::Stopped);
                self.emit(LifecycleEvent::Stopped);
                Err(err)
            }
        }
    }

    /// Tear the pipeline down: cancel future ticks, release the resource,
    /// clear the history log. A no-op unless running. An in-flight tick
    /// runs to completion; its late batch is dropped by the batch handler.
    pub fn stop(&self) {
        if self.lifecycle.transition(LifecycleState::Stopping).is_err() {
            debug!(state = %self.lifecycle.current(), "stop ignored");
            return;
        }

        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
            drop(scheduler); // joins the worker
        }
        self.resource.release();
        self.history.lock().clear();

        let _ = self.lifecycle.transition(LifecycleState::Stopped);
        self.emit(LifecycleEvent::Stopped);
        info!("spotter service stopped");
    }

    /// Ordered history snapshot, newest first.
    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        self.history.lock().snapshot()
    }

    /// Subscription point for the single ordered event stream. Hand the
    /// receiver to one consumer; cloning it shares (steals from) the queue.
    pub fn subscribe(&self) -> cb::Receiver<ServiceEvent> {
        self.events_rx.clone()
    }

    /// Reactive lifecycle-state subscription.
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    pub fn config(&self) -> &SpotterConfig {
        &self.config
    }

    pub fn metrics_summary(&self) -> std::collections::HashMap<String, MetricSummary> {
        self.metrics.summary()
    }

    /// Failed-start path: Failed, surface the error, settle in Stopped.
    fn fail_and_settle(&self, message: &str) {
        self.resource.release();
        let _ = self.lifecycle.transition(LifecycleState::Failed);
        self.emit(LifecycleEvent::Error {
            message: message.to_string(),
        });
        let _ = self.lifecycle.transition(LifecycleState::Stopped);
        self.emit(LifecycleEvent::Stopped);
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events_tx.send(ServiceEvent::Lifecycle(event));
    }
}

impl Drop for SpotterService {
    fn drop(&mut self) {
        self.stop();
    }
}
