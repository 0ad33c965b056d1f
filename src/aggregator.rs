//! Result aggregation: turns each raw classification batch into zero or
//! more discrete events for three independently gated consumers — the live
//! display (threshold + hysteresis + silence re-emit debounce), the history
//! log (grouping-window merge), and sensitive-word alerting (every
//! qualifying tick). All time gating uses the batch's capture timestamp.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::classify::{LabelScore, RawBatch};
use crate::config::{normalize_label, SpotterConfig};
use crate::history::{BoundedHistoryLog, RecordOutcome};

/// Live display state. `NoCommand` is the sentinel shown while nothing
/// passes the display gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DisplayState {
    Command { label: String, confidence: f32 },
    NoCommand,
}

impl DisplayState {
    fn label(&self) -> Option<&str> {
        match self {
            DisplayState::Command { label, .. } => Some(label),
            DisplayState::NoCommand => None,
        }
    }

    fn confidence(&self) -> f32 {
        match self {
            DisplayState::Command { confidence, .. } => *confidence,
            DisplayState::NoCommand => 0.0,
        }
    }
}

/// Discrete events emitted by the aggregator. Immutable once emitted;
/// consumers pattern-match on the variant they care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AggregatorEvent {
    DisplayUpdate {
        state: DisplayState,
        inference_time_ms: u64,
    },
    HistoryEntry {
        label: String,
        confidence: f32,
        timestamp_ms: u64,
    },
    SensitiveAlert {
        label: String,
        confidence: f32,
    },
}

/// Display-channel debounce memory. `last: None` is the fresh state after a
/// (re)start and differs from every candidate, so the first batch always
/// emits.
struct DebounceState {
    last: Option<DisplayState>,
    last_confidence: f32,
    last_update_ms: u64,
}

impl DebounceState {
    fn new() -> Self {
        Self {
            last: None,
            last_confidence: 0.0,
            last_update_ms: 0,
        }
    }

    fn commit(&mut self, state: DisplayState, now_ms: u64) {
        self.last_confidence = state.confidence();
        self.last = Some(state);
        // Monotonic: batches arrive in capture order.
        self.last_update_ms = self.last_update_ms.max(now_ms);
    }
}

pub struct ResultAggregator {
    config: Arc<SpotterConfig>,
    display: DebounceState,
    history: Arc<Mutex<BoundedHistoryLog>>,
}

impl ResultAggregator {
    /// Fresh aggregator with empty debounce state. Built anew on every
    /// scheduler start.
    pub fn new(config: Arc<SpotterConfig>, history: Arc<Mutex<BoundedHistoryLog>>) -> Self {
        Self {
            config,
            display: DebounceState::new(),
            history,
        }
    }

    /// Consume one batch and return the events it produced, in channel
    /// order: display, history, sensitive.
    pub fn ingest(&mut self, batch: &RawBatch) -> Vec<AggregatorEvent> {
        let now = batch.captured_at_ms;
        let mut events = Vec::new();

        // Stable descending sort; NaN scores never qualify anywhere, so they
        // are dropped up front rather than compared.
        let mut ranked: Vec<&LabelScore> =
            batch.results.iter().filter(|r| !r.score.is_nan()).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let top = ranked.first().copied();

        let candidate = self.display_candidate(top);
        let recognized = matches!(candidate, DisplayState::Command { .. });

        if self.should_update_display(&candidate, now) {
            self.display.commit(candidate.clone(), now);
            events.push(AggregatorEvent::DisplayUpdate {
                state: candidate,
                inference_time_ms: batch.inference_time_ms,
            });
        }

        if let Some(top) = top {
            self.ingest_history(top, recognized, now, &mut events);
            self.ingest_sensitive(top, &mut events);
        }

        trace!(events = events.len(), captured_at_ms = now, "batch aggregated");
        events
    }

    /// Display gate: top score over the display threshold and not a
    /// reserved sentinel label.
    fn display_candidate(&self, top: Option<&LabelScore>) -> DisplayState {
        match top {
            Some(t)
                if t.score >= self.config.display_threshold
                    && !self.config.is_sentinel(&t.label) =>
            {
                DisplayState::Command {
                    label: t.label.clone(),
                    confidence: t.score,
                }
            }
            _ => DisplayState::NoCommand,
        }
    }

    fn should_update_display(&self, candidate: &DisplayState, now_ms: u64) -> bool {
        let Some(last) = &self.display.last else {
            // Fresh state: always surface the first observation.
            return true;
        };
        match (candidate, last) {
            (DisplayState::Command { label, confidence }, DisplayState::Command { .. }) => {
                last.label() != Some(label.as_str())
                    || *confidence > self.display.last_confidence + self.config.hysteresis
            }
            // Command appearing or disappearing: emit immediately.
            (DisplayState::Command { .. }, DisplayState::NoCommand) => true,
            (DisplayState::NoCommand, DisplayState::Command { .. }) => true,
            // Sustained silence: re-emit only after the delay, no hysteresis.
            (DisplayState::NoCommand, DisplayState::NoCommand) => {
                now_ms.saturating_sub(self.display.last_update_ms)
                    > self.config.silence_reemit_delay_ms
            }
        }
    }

    /// History gate: display-qualified labels, or sentinel labels above the
    /// recent-log threshold. Anything else stays out of the log.
    fn ingest_history(
        &mut self,
        top: &LabelScore,
        recognized: bool,
        now_ms: u64,
        events: &mut Vec<AggregatorEvent>,
    ) {
        let qualifies = recognized
            || (self.config.is_sentinel(&top.label)
                && top.score >= self.config.recent_log_threshold);
        if !qualifies {
            return;
        }

        let outcome = self.history.lock().record(
            &top.label,
            top.score,
            now_ms,
            self.config.grouping_window_ms,
        );
        match outcome {
            RecordOutcome::Inserted(entry) | RecordOutcome::Merged(entry) => {
                events.push(AggregatorEvent::HistoryEntry {
                    label: entry.label,
                    confidence: entry.confidence,
                    timestamp_ms: entry.timestamp_ms,
                });
            }
            RecordOutcome::Unchanged => {}
        }
    }

    /// Sensitive gate: normalized top label in the sensitive set above its
    /// own threshold. One alert per qualifying batch, no debounce.
    fn ingest_sensitive(&self, top: &LabelScore, events: &mut Vec<AggregatorEvent>) {
        if top.score >= self.config.sensitive_threshold && self.config.is_sensitive(&top.label) {
            events.push(AggregatorEvent::SensitiveAlert {
                label: normalize_label(&top.label),
                confidence: top.score,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LabelScore;

    fn aggregator() -> (ResultAggregator, Arc<Mutex<BoundedHistoryLog>>) {
        let config = Arc::new(SpotterConfig::default());
        let history = Arc::new(Mutex::new(BoundedHistoryLog::new(config.history_capacity)));
        (
            ResultAggregator::new(config, Arc::clone(&history)),
            history,
        )
    }

    fn batch(results: Vec<LabelScore>, at_ms: u64) -> RawBatch {
        RawBatch {
            results,
            inference_time_ms: 7,
            captured_at_ms: at_ms,
        }
    }

    fn display_updates(events: &[AggregatorEvent]) -> Vec<&DisplayState> {
        events
            .iter()
            .filter_map(|e| match e {
                AggregatorEvent::DisplayUpdate { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_batches_emit_only_the_initial_sentinel_then_delayed_reemits() {
        let (mut agg, history) = aggregator();

        // First empty batch: fresh state surfaces the sentinel once.
        let events = agg.ingest(&batch(vec![], 1_000));
        assert_eq!(events.len(), 1);
        assert_eq!(display_updates(&events), vec![&DisplayState::NoCommand]);

        // Within the silence re-emit delay: nothing.
        assert!(agg.ingest(&batch(vec![], 1_200)).is_empty());
        assert!(agg.ingest(&batch(vec![], 2_400)).is_empty());

        // Past the delay: the sentinel re-emits.
        let events = agg.ingest(&batch(vec![], 2_600));
        assert_eq!(display_updates(&events), vec![&DisplayState::NoCommand]);

        // Never any history or alerts from empty batches.
        assert!(history.lock().is_empty());
    }

    #[test]
    fn recognized_command_emits_display_and_history() {
        let (mut agg, history) = aggregator();
        let events = agg.ingest(&batch(vec![LabelScore::new("go", 0.95)], 1_000));

        assert!(events.contains(&AggregatorEvent::DisplayUpdate {
            state: DisplayState::Command {
                label: "go".to_string(),
                confidence: 0.95,
            },
            inference_time_ms: 7,
        }));
        assert!(events.contains(&AggregatorEvent::HistoryEntry {
            label: "go".to_string(),
            confidence: 0.95,
            timestamp_ms: 1_000,
        }));
        assert_eq!(history.lock().len(), 1);
    }

    #[test]
    fn hysteresis_suppresses_small_confidence_bumps() {
        let (mut agg, _) = aggregator();

        let first = agg.ingest(&batch(vec![LabelScore::new("stop", 0.90)], 0));
        assert_eq!(display_updates(&first).len(), 1);

        // +0.01 is inside the 0.05 margin: no display update.
        let second = agg.ingest(&batch(vec![LabelScore::new("stop", 0.91)], 200));
        assert!(display_updates(&second).is_empty());

        // So is +0.04, measured against the last *emitted* confidence.
        let third = agg.ingest(&batch(vec![LabelScore::new("stop", 0.94)], 400));
        assert!(display_updates(&third).is_empty());

        // Clearing the margin re-emits the same command.
        let fourth = agg.ingest(&batch(vec![LabelScore::new("stop", 0.97)], 600));
        assert_eq!(display_updates(&fourth).len(), 1);
    }

    #[test]
    fn command_to_silence_emits_immediately() {
        let (mut agg, _) = aggregator();
        agg.ingest(&batch(vec![LabelScore::new("up", 0.95)], 0));

        // Silence right after a recognized command: no delay applies.
        let events = agg.ingest(&batch(vec![], 100));
        assert_eq!(display_updates(&events), vec![&DisplayState::NoCommand]);
    }

    #[test]
    fn channels_are_independently_gated() {
        // "off" at 0.85: below the display gate, not a sentinel so no
        // history entry, but the sensitive channel fires.
        let (mut agg, history) = aggregator();
        let events = agg.ingest(&batch(
            vec![LabelScore::new("off", 0.85), LabelScore::new("on", 0.10)],
            1_000,
        ));

        assert!(display_updates(&events)
            .iter()
            .all(|s| **s == DisplayState::NoCommand));
        assert!(history.lock().is_empty());
        assert!(events.contains(&AggregatorEvent::SensitiveAlert {
            label: "off".to_string(),
            confidence: 0.85,
        }));
    }

    #[test]
    fn sensitive_alerts_fire_every_qualifying_tick() {
        let (mut agg, _) = aggregator();
        for i in 0..3u64 {
            let events = agg.ingest(&batch(vec![LabelScore::new("stop", 0.30)], i * 200));
            assert_eq!(
                events
                    .iter()
                    .filter(|e| matches!(e, AggregatorEvent::SensitiveAlert { .. }))
                    .count(),
                1,
                "tick {i}"
            );
        }
    }

    #[test]
    fn repeated_background_noise_merges_into_one_entry() {
        let (mut agg, history) = aggregator();
        agg.ingest(&batch(vec![LabelScore::new("_background_noise_", 0.30)], 0));
        agg.ingest(&batch(vec![LabelScore::new("_background_noise_", 0.25)], 500));
        agg.ingest(&batch(
            vec![LabelScore::new("_background_noise_", 0.35)],
            1_000,
        ));

        let snap = history.lock().snapshot();
        assert_eq!(snap.len(), 1);
        assert!((snap[0].confidence - 0.35).abs() < 1e-6);
        assert_eq!(snap[0].timestamp_ms, 1_000);
    }

    #[test]
    fn history_event_is_silent_when_merge_does_not_improve() {
        let (mut agg, _) = aggregator();
        let first = agg.ingest(&batch(vec![LabelScore::new("silence", 0.40)], 0));
        assert!(first
            .iter()
            .any(|e| matches!(e, AggregatorEvent::HistoryEntry { .. })));

        let second = agg.ingest(&batch(vec![LabelScore::new("silence", 0.30)], 300));
        assert!(!second
            .iter()
            .any(|e| matches!(e, AggregatorEvent::HistoryEntry { .. })));
    }

    #[test]
    fn sentinel_below_recent_log_threshold_stays_out_of_history() {
        let (mut agg, history) = aggregator();
        agg.ingest(&batch(vec![LabelScore::new("silence", 0.15)], 0));
        assert!(history.lock().is_empty());
    }

    #[test]
    fn sentinel_above_display_threshold_is_not_a_command() {
        let (mut agg, history) = aggregator();
        let events = agg.ingest(&batch(vec![LabelScore::new("silence", 0.97)], 0));
        assert_eq!(display_updates(&events), vec![&DisplayState::NoCommand]);
        // It still reaches the history log via the sentinel path.
        assert_eq!(history.lock().len(), 1);
    }

    #[test]
    fn equal_top_scores_keep_emission_order() {
        let (mut agg, _) = aggregator();
        let events = agg.ingest(&batch(
            vec![
                LabelScore::new("left", 0.95),
                LabelScore::new("right", 0.95),
            ],
            0,
        ));
        match display_updates(&events).as_slice() {
            [DisplayState::Command { label, .. }] => assert_eq!(label, "left"),
            other => panic!("expected one command update, got {other:?}"),
        }
    }

    #[test]
    fn nan_scores_never_qualify_and_never_panic() {
        let (mut agg, history) = aggregator();
        let events = agg.ingest(&batch(
            vec![
                LabelScore::new("stop", f32::NAN),
                LabelScore::new("go", 0.95),
            ],
            0,
        ));

        // The NaN entry is ignored; "go" is the deterministic top.
        match display_updates(&events).as_slice() {
            [DisplayState::Command { label, .. }] => assert_eq!(label, "go"),
            other => panic!("expected one command update, got {other:?}"),
        }
        assert!(!events
            .iter()
            .any(|e| matches!(e, AggregatorEvent::SensitiveAlert { .. })));
        assert_eq!(history.lock().len(), 1);

        // All-NaN batch behaves like an empty one.
        let events = agg.ingest(&batch(vec![LabelScore::new("stop", f32::NAN)], 200));
        assert!(events.is_empty());
    }

    #[test]
    fn different_command_switches_display_without_hysteresis() {
        let (mut agg, _) = aggregator();
        agg.ingest(&batch(vec![LabelScore::new("up", 0.95)], 0));
        let events = agg.ingest(&batch(vec![LabelScore::new("down", 0.91)], 200));
        match display_updates(&events).as_slice() {
            [DisplayState::Command { label, .. }] => assert_eq!(label, "down"),
            other => panic!("expected one command update, got {other:?}"),
        }
    }
}
