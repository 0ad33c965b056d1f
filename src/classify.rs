//! Classifier seam: the opaque model behind a trait, plus the data shapes
//! that flow out of it. A real deployment plugs in a keyword-spotting model
//! here; the crate ships an energy-heuristic placeholder so the pipeline
//! runs end-to-end without a model file.

use serde::Serialize;
use std::path::PathBuf;

use crate::config::SpotterConfig;

/// Sample encoding the audio source must deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleEncoding {
    PcmI16,
}

/// Audio format the classifier requires at its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

/// One labeled confidence score from a classification pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Unordered output of one classification pass. Multiple model heads are
/// flattened into a single list; the aggregator sorts when it needs a top pick.
pub type ClassificationResult = Vec<LabelScore>;

/// One tick's worth of classifier output plus timing.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub results: ClassificationResult,
    pub inference_time_ms: u64,
    /// Unix millis at which the frame was pulled; all aggregation gating
    /// uses this timestamp, never the wall clock at consumption time.
    pub captured_at_ms: u64,
}

/// Opaque classifier adapter. Implementations own their model state and are
/// driven from the single scheduler worker, never concurrently.
pub trait Classifier: Send {
    /// Input format the audio source must be opened with.
    fn required_format(&self) -> AudioFormat;

    /// Samples per inference pass (the fixed-length input frame).
    fn input_frame_len(&self) -> usize;

    /// Run one inference pass over a frame of PCM samples.
    fn classify(&mut self, frame: &[i16]) -> ClassificationResult;
}

/// Loads a classifier from the configured model path.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self, config: &SpotterConfig) -> Result<Box<dyn Classifier>, ModelLoadError>;
}

#[derive(Debug)]
pub enum ModelLoadError {
    NotFound(PathBuf),
    Invalid(String),
}

impl std::fmt::Display for ModelLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelLoadError::NotFound(path) => {
                write!(f, "model file not found: {}", path.display())
            }
            ModelLoadError::Invalid(msg) => write!(f, "model invalid: {msg}"),
        }
    }
}

/// RMS energy over a frame of PCM samples.
#[inline]
pub fn compute_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let f = s as f64;
            f * f
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Placeholder classifier: scores only the sentinel labels from frame energy.
/// It cannot recognize words, but it exercises the full pipeline (display
/// sentinel churn, history grouping) without any model file.
pub struct EnergyHeuristicClassifier {
    format: AudioFormat,
    frame_len: usize,
    /// Exponential moving average of frame energy.
    prev_energy: f32,
    /// Raw i16 RMS below which a frame counts as silence (~-40 dB).
    silence_threshold: f32,
}

impl EnergyHeuristicClassifier {
    pub fn new() -> Self {
        let format = AudioFormat {
            sample_rate: 16_000,
            channels: 1,
            encoding: SampleEncoding::PcmI16,
        };
        Self {
            format,
            frame_len: format.sample_rate as usize,
            prev_energy: 0.0,
            silence_threshold: 300.0,
        }
    }
}

impl Default for EnergyHeuristicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for EnergyHeuristicClassifier {
    fn required_format(&self) -> AudioFormat {
        self.format
    }

    fn input_frame_len(&self) -> usize {
        self.frame_len
    }

    fn classify(&mut self, frame: &[i16]) -> ClassificationResult {
        let rms = compute_rms(frame);
        self.prev_energy = self.prev_energy * 0.9 + rms * 0.1;

        // Map energy into sentinel scores: quiet frames lean "silence",
        // energetic frames lean "_background_noise_".
        let activity = (rms / (self.silence_threshold * 4.0)).clamp(0.0, 1.0);
        vec![
            LabelScore::new("silence", 1.0 - activity),
            LabelScore::new("_background_noise_", activity),
        ]
    }
}

/// Loader for the placeholder classifier. Ignores the model path; never fails.
pub struct EnergyHeuristicLoader;

impl ClassifierLoader for EnergyHeuristicLoader {
    fn load(&self, _config: &SpotterConfig) -> Result<Box<dyn Classifier>, ModelLoadError> {
        Ok(Box::new(EnergyHeuristicClassifier::new()))
    }
}
