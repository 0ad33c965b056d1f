//! In-memory classifier and audio-source doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::{AudioBackend, AudioOpenError, AudioSource, SourceGone};
use crate::classify::{
    AudioFormat, ClassificationResult, Classifier, ClassifierLoader, ModelLoadError,
    SampleEncoding,
};
use crate::config::SpotterConfig;

const TEST_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 16_000,
    channels: 1,
    encoding: SampleEncoding::PcmI16,
};

enum Script {
    /// Pop batches in order, empty results once exhausted.
    Sequence(Mutex<VecDeque<ClassificationResult>>),
    /// The same result for every pass.
    Repeating(ClassificationResult),
}

/// Classifier whose outputs are scripted by the test.
pub(crate) struct ScriptedClassifier {
    script: Arc<Script>,
    classify_delay: Duration,
}

impl Classifier for ScriptedClassifier {
    fn required_format(&self) -> AudioFormat {
        TEST_FORMAT
    }

    fn input_frame_len(&self) -> usize {
        64
    }

    fn classify(&mut self, _frame: &[i16]) -> ClassificationResult {
        if !self.classify_delay.is_zero() {
            std::thread::sleep(self.classify_delay);
        }
        match self.script.as_ref() {
            Script::Sequence(queue) => queue.lock().pop_front().unwrap_or_default(),
            Script::Repeating(result) => result.clone(),
        }
    }
}

/// Loader handing out `ScriptedClassifier`s, or failing on demand.
pub(crate) struct ScriptedLoader {
    script: Arc<Script>,
    classify_delay: Duration,
    fail_with: Option<String>,
}

impl ScriptedLoader {
    pub(crate) fn with_batches(batches: Vec<ClassificationResult>) -> Self {
        Self {
            script: Arc::new(Script::Sequence(Mutex::new(batches.into()))),
            classify_delay: Duration::ZERO,
            fail_with: None,
        }
    }

    pub(crate) fn repeating(result: ClassificationResult) -> Self {
        Self {
            script: Arc::new(Script::Repeating(result)),
            classify_delay: Duration::ZERO,
            fail_with: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            script: Arc::new(Script::Repeating(Vec::new())),
            classify_delay: Duration::ZERO,
            fail_with: Some(message.to_string()),
        }
    }

    pub(crate) fn with_classify_delay(mut self, delay: Duration) -> Self {
        self.classify_delay = delay;
        self
    }
}

impl ClassifierLoader for ScriptedLoader {
    fn load(&self, _config: &SpotterConfig) -> Result<Box<dyn Classifier>, ModelLoadError> {
        if let Some(message) = &self.fail_with {
            return Err(ModelLoadError::Invalid(message.clone()));
        }
        Ok(Box::new(ScriptedClassifier {
            script: Arc::clone(&self.script),
            classify_delay: self.classify_delay,
        }))
    }
}

/// Audio source double: zero-filled frames, scripted failure point, shared
/// release flag so tests can observe teardown.
pub(crate) struct MemorySource {
    ready: bool,
    released: Arc<AtomicBool>,
    loads: AtomicUsize,
    fail_loads_after: Option<usize>,
}

impl AudioSource for MemorySource {
    fn is_ready(&self) -> bool {
        self.ready && !self.released.load(Ordering::SeqCst)
    }

    fn start_capture(&mut self) {}

    fn stop_capture(&mut self) {}

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn load_into(&mut self, frame: &mut [i16]) -> Result<usize, SourceGone> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SourceGone);
        }
        let done = self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_loads_after {
            if done >= limit {
                return Err(SourceGone);
            }
        }
        frame.fill(0);
        Ok(frame.len())
    }
}

/// Backend double producing `MemorySource`s.
pub(crate) struct MemoryBackend {
    buffer_size: Option<usize>,
    source_ready: bool,
    fail_loads_after: Option<usize>,
    last_released: Mutex<Option<Arc<AtomicBool>>>,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self {
            buffer_size: Some(1024),
            source_ready: true,
            fail_loads_after: None,
            last_released: Mutex::new(None),
        }
    }

    /// Platform cannot report a buffer configuration.
    pub(crate) fn without_buffer_config(mut self) -> Self {
        self.buffer_size = None;
        self
    }

    /// Sources open but never reach ready state.
    pub(crate) fn unready(mut self) -> Self {
        self.source_ready = false;
        self
    }

    /// Sources fail `load_into` after `n` successful loads.
    pub(crate) fn failing_loads_after(mut self, n: usize) -> Self {
        self.fail_loads_after = Some(n);
        self
    }

    /// Whether the most recently opened source has been released.
    pub(crate) fn last_source_released(&self) -> bool {
        self.last_released
            .lock()
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Release flag of the most recently opened source.
    pub(crate) fn release_probe(&self) -> Arc<AtomicBool> {
        self.last_released
            .lock()
            .clone()
            .expect("no source opened yet")
    }
}

impl AudioBackend for MemoryBackend {
    fn minimum_buffer_size(&self, _format: &AudioFormat) -> Option<usize> {
        self.buffer_size
    }

    fn open(
        &self,
        _format: &AudioFormat,
        _buffer_size: usize,
    ) -> Result<Box<dyn AudioSource>, AudioOpenError> {
        let released = Arc::new(AtomicBool::new(false));
        *self.last_released.lock() = Some(Arc::clone(&released));
        Ok(Box::new(MemorySource {
            ready: self.source_ready,
            released,
            loads: AtomicUsize::new(0),
            fail_loads_after: self.fail_loads_after,
        }))
    }
}
