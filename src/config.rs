//! Pipeline configuration: cadence, thresholds, grouping windows, label sets.
//! All values carry defaults matching the shipped tuning; a JSON file can
//! override any subset of them.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for the spotting pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpotterConfig {
    /// Path to the classifier model file (handed to the `ClassifierLoader`).
    pub model_path: PathBuf,
    /// Threads granted to the classifier backend.
    pub classifier_threads: usize,
    /// Maximum labels retained per classification pass.
    pub max_results: usize,
    /// Inference tick period in milliseconds.
    pub tick_period_ms: u64,
    /// Minimum top score for a label to count as a recognized command.
    pub display_threshold: f32,
    /// Minimum top score for a sentinel label to reach the history log.
    pub recent_log_threshold: f32,
    /// Minimum top score for a sensitive-word alert.
    pub sensitive_threshold: f32,
    /// Capacity of the long-lived background history log.
    pub history_capacity: usize,
    /// Capacity of a foreground-only history log maintained by a consumer.
    pub foreground_history_capacity: usize,
    /// Same-label observations inside this window merge into one log entry.
    pub grouping_window_ms: u64,
    /// Re-emit interval for the no-command display state.
    pub silence_reemit_delay_ms: u64,
    /// Confidence delta required to re-emit the same recognized command.
    pub hysteresis: f32,
    /// Labels that raise an alert when scored above `sensitive_threshold`.
    pub sensitive_words: Vec<String>,
    /// Reserved non-command labels (background noise, silence).
    pub sentinel_labels: Vec<String>,
}

impl Default for SpotterConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("speech_commands.tflite"),
            classifier_threads: 2,
            max_results: 5,
            tick_period_ms: 200,
            display_threshold: 0.90,
            recent_log_threshold: 0.20,
            sensitive_threshold: 0.20,
            history_capacity: 50,
            foreground_history_capacity: 10,
            grouping_window_ms: 1000,
            silence_reemit_delay_ms: 1500,
            hysteresis: 0.05,
            sensitive_words: vec!["stop".to_string(), "off".to_string()],
            sentinel_labels: vec!["_background_noise_".to_string(), "silence".to_string()],
        }
    }
}

impl SpotterConfig {
    /// Load configuration from a JSON file. Missing fields fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SpotterConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Whether `label` is a reserved non-command label. Matched on the
    /// normalized form so classifier head casing cannot defeat the check.
    pub fn is_sentinel(&self, label: &str) -> bool {
        let normalized = normalize_label(label);
        self.sentinel_labels
            .iter()
            .any(|s| normalize_label(s) == normalized)
    }

    /// Whether `label` is in the configured sensitive-word set.
    pub fn is_sensitive(&self, label: &str) -> bool {
        let normalized = normalize_label(label);
        self.sensitive_words
            .iter()
            .any(|s| normalize_label(s) == normalized)
    }
}

/// Canonical label form used for set membership: lower-cased and trimmed.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_tuning() {
        let cfg = SpotterConfig::default();
        assert_eq!(cfg.tick_period_ms, 200);
        assert!((cfg.display_threshold - 0.90).abs() < 1e-6);
        assert!((cfg.recent_log_threshold - 0.20).abs() < 1e-6);
        assert_eq!(cfg.history_capacity, 50);
        assert_eq!(cfg.foreground_history_capacity, 10);
        assert_eq!(cfg.grouping_window_ms, 1000);
        assert_eq!(cfg.silence_reemit_delay_ms, 1500);
    }

    #[test]
    fn label_sets_match_normalized() {
        let cfg = SpotterConfig::default();
        assert!(cfg.is_sentinel("_background_noise_"));
        assert!(cfg.is_sentinel("  Silence "));
        assert!(!cfg.is_sentinel("stop"));
        assert!(cfg.is_sensitive("STOP"));
        assert!(cfg.is_sensitive(" off"));
        assert!(!cfg.is_sensitive("go"));
    }

    #[test]
    fn partial_json_overrides_keep_defaults() {
        let cfg: SpotterConfig =
            serde_json::from_str(r#"{"tick_period_ms": 100, "sensitive_words": ["help"]}"#)
                .unwrap();
        assert_eq!(cfg.tick_period_ms, 100);
        assert!(cfg.is_sensitive("help"));
        assert!(!cfg.is_sensitive("stop"));
        assert!((cfg.display_threshold - 0.90).abs() < 1e-6);
    }
}
