//! Fixed-cadence inference scheduler. One dedicated worker thread drives
//! `classify_once` at the configured period; ticks never overlap, and a tick
//! that outruns the period pushes the next slot out instead of piling up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::classify::RawBatch;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::resource::{CaptureError, ClassifierResource};

/// Sleep slice while waiting for the next tick, so a stop request is
/// observed promptly without busy-waiting.
const WAIT_SLICE: Duration = Duration::from_millis(20);

pub struct InferenceScheduler {
    stop_flag: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl InferenceScheduler {
    /// Begin capture and start ticking at `period`, first tick immediately.
    /// Each successful tick forwards its batch to `on_batch`; a capture
    /// fault is forwarded to `on_fatal` once and terminates the loop. The
    /// caller releases resources in response to a fault.
    pub fn start(
        resource: Arc<ClassifierResource>,
        period: Duration,
        metrics: Arc<MetricsRegistry>,
        mut on_batch: impl FnMut(RawBatch) + Send + 'static,
        on_fatal: impl FnOnce(CaptureError) + Send + 'static,
    ) -> Result<Self, std::io::Error> {
        resource.start_capture();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop_flag);
        let mut on_fatal = Some(on_fatal);

        let worker = std::thread::Builder::new()
            .name("inference-tick".into())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "inference loop started");
                let mut next_tick = Instant::now();

                loop {
                    // Wait out the remainder of the period in short slices.
                    while Instant::now() < next_tick {
                        if flag.load(Ordering::Relaxed) {
                            break;
                        }
                        let remaining = next_tick.saturating_duration_since(Instant::now());
                        std::thread::sleep(remaining.min(WAIT_SLICE));
                    }
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }

                    let fired_at = Instant::now();
                    metrics.record(
                        metric_names::TICK_LAG,
                        fired_at.saturating_duration_since(next_tick).as_micros() as f64,
                    );

                    if !resource.is_initialized() {
                        // Races with a concurrent stop(); not an error.
                        debug!("skipping tick: resource not ready");
                    } else {
                        match resource.classify_once() {
                            Ok(batch) => {
                                metrics.record(
                                    metric_names::T_INFERENCE,
                                    (batch.inference_time_ms * 1000) as f64,
                                );
                                if !flag.load(Ordering::Relaxed) {
                                    on_batch(batch);
                                }
                            }
                            Err(err) => {
                                if flag.load(Ordering::Relaxed) {
                                    // Teardown race during stop; the caller
                                    // is already releasing resources.
                                    debug!(error = %err, "capture fault during shutdown");
                                } else {
                                    warn!(error = %err, "capture fault, terminating inference loop");
                                    if let Some(fatal) = on_fatal.take() {
                                        fatal(err);
                                    }
                                }
                                break;
                            }
                        }
                    }
                    metrics.record(
                        metric_names::T_TICK,
                        fired_at.elapsed().as_micros() as f64,
                    );

                    // Fixed-rate cadence: a long tick delays the next slot
                    // rather than overlapping it.
                    next_tick += period;
                    let now = Instant::now();
                    if next_tick < now {
                        next_tick = now + period;
                    }
                }

                resource.stop_capture();
                info!("inference loop stopped");
            })?;

        Ok(Self {
            stop_flag,
            worker: Some(worker),
        })
    }

    /// Cancel all future ticks. Idempotent; does not wait for an in-flight
    /// tick — a batch already being delivered is the caller's benign race to
    /// drop. Capture stops as soon as the worker observes the flag.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
