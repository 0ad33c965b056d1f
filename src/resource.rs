//! Classifier + audio source lifecycle as one atomic unit. The pair is
//! either fully initialized (classifier, source, and input frame all live)
//! or fully released; no partial state is observable from outside.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioOpenError, AudioSource};
use crate::classify::{Classifier, ClassifierLoader, RawBatch};
use crate::config::SpotterConfig;

/// Initialization-time faults. All fatal to the start attempt; the resource
/// is fully released before any of these is returned.
#[derive(Debug)]
pub enum InitError {
    /// The platform cannot report a valid capture buffer size.
    AudioConfigUnavailable,
    /// The audio source failed to reach a ready state.
    AudioSourceUnready,
    ModelLoadFailed(String),
    RuntimeFault(String),
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitError::AudioConfigUnavailable => write!(f, "audio configuration unavailable"),
            InitError::AudioSourceUnready => write!(f, "audio source failed to become ready"),
            InitError::ModelLoadFailed(msg) => write!(f, "model load failed: {msg}"),
            InitError::RuntimeFault(msg) => write!(f, "initialization fault: {msg}"),
        }
    }
}

impl std::error::Error for InitError {}

/// Capture-time faults. Fatal to the running scheduler only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// The source cannot supply a frame, e.g. it was concurrently released.
    SourceUnavailable,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::SourceUnavailable => write!(f, "audio source unavailable"),
        }
    }
}

struct Inner {
    classifier: Box<dyn Classifier>,
    source: Box<dyn AudioSource>,
    frame: Vec<i16>,
}

/// Owns the classifier/microphone pair. All inference calls come from the
/// single scheduler worker; `release` may race in from a controlling thread
/// and blocks until any in-flight pass finishes, after which the next
/// `classify_once` observes the teardown.
pub struct ClassifierResource {
    inner: Mutex<Option<Inner>>,
}

impl ClassifierResource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Load the model, derive the source format from it, open the source
    /// with the platform's minimum buffer size, and verify readiness. On any
    /// failure every partially acquired resource is released first.
    pub fn initialize(
        &self,
        config: &SpotterConfig,
        loader: &dyn ClassifierLoader,
        backend: &dyn AudioBackend,
    ) -> Result<(), InitError> {
        // Always tear down any previous acquisition first; the microphone
        // has single-owner semantics.
        self.release();

        let classifier = loader
            .load(config)
            .map_err(|e| InitError::ModelLoadFailed(e.to_string()))?;
        let format = classifier.required_format();

        let buffer_size = backend
            .minimum_buffer_size(&format)
            .ok_or(InitError::AudioConfigUnavailable)?;

        let mut source = backend.open(&format, buffer_size).map_err(|e| match e {
            AudioOpenError::ConfigUnavailable => InitError::AudioConfigUnavailable,
            AudioOpenError::BuildFailed(msg) => InitError::RuntimeFault(msg),
        })?;

        if !source.is_ready() {
            warn!("audio source not ready after open, releasing");
            source.release();
            return Err(InitError::AudioSourceUnready);
        }

        let frame = vec![0i16; classifier.input_frame_len()];
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            frame_len = frame.len(),
            buffer_size,
            "classifier resource initialized"
        );

        *self.inner.lock() = Some(Inner {
            classifier,
            source,
            frame,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Enter the active-recording state. No-op when released.
    pub fn start_capture(&self) {
        if let Some(inner) = self.inner.lock().as_mut() {
            inner.source.start_capture();
        }
    }

    /// Leave the active-recording state. No-op when released.
    pub fn stop_capture(&self) {
        if let Some(inner) = self.inner.lock().as_mut() {
            inner.source.stop_capture();
        }
    }

    /// Pull the most recent audio frame and run one inference pass,
    /// measuring wall-clock inference duration.
    pub fn classify_once(&self) -> Result<RawBatch, CaptureError> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(CaptureError::SourceUnavailable)?;

        inner
            .source
            .load_into(&mut inner.frame)
            .map_err(|_| CaptureError::SourceUnavailable)?;

        let started = std::time::Instant::now();
        let results = inner.classifier.classify(&inner.frame);
        let inference_time_ms = started.elapsed().as_millis() as u64;

        Ok(RawBatch {
            results,
            inference_time_ms,
            captured_at_ms: now_ms(),
        })
    }

    /// Idempotent teardown: stops capture, releases the source, drops the
    /// classifier, clears all handles. Safe to call from the failure path of
    /// `initialize` and from a different thread than the tick loop.
    pub fn release(&self) {
        let mut guard = self.inner.lock();
        if let Some(mut inner) = guard.take() {
            inner.source.stop_capture();
            inner.source.release();
            debug!("classifier resource released");
        }
    }
}

impl Default for ClassifierResource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClassifierResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Current time as unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
