//! Default stage quality scorer.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use domain::contracts::Scorer;
use domain::plan::StageKind;

/// Heuristic scorer for validation stages.
///
/// Contract: scores in `[0, 1]` from three cheap signals: non-emptiness,
/// output length relative to the prompt, and stage-appropriate content
/// markers (reviews should mention findings, tests should mention checks).
/// It never calls a provider and is fully deterministic.
#[derive(Debug, Default)]
pub struct HeuristicScorer;

const REVIEW_MARKERS: &[&str] = &["issue", "correct", "improve", "looks good", "suggest", "fix"];
const TEST_MARKERS: &[&str] = &["test", "case", "assert", "pass", "fail", "edge"];

#[async_trait]
impl Scorer for HeuristicScorer {
    async fn score(&self, stage: StageKind, prompt: &str, output: &str) -> f64 {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return 0.0;
        }

        // Substance: very short answers to long prompts score poorly.
        let ratio = trimmed.chars().count() as f64 / (prompt.chars().count().max(40) as f64);
        let substance = ratio.min(1.0).max(0.2);

        let lowered = trimmed.to_lowercase();
        let markers: &[&str] = match stage {
            StageKind::Review => REVIEW_MARKERS,
            StageKind::Test => TEST_MARKERS,
            StageKind::Generate | StageKind::Optimize => &[],
        };
        let marker_score = if markers.is_empty() {
            0.8
        } else {
            let hits = markers.iter().filter(|m| lowered.contains(**m)).count();
            (0.4 + 0.2 * hits as f64).min(1.0)
        };

        (0.5 * substance + 0.5 * marker_score).clamp(0.0, 1.0)
    }
}

/// Scorer that plays back a fixed score sequence; test fixture.
#[derive(Debug, Default)]
pub struct ScriptedScorer {
    scores: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedScorer {
    pub fn new(scores: Vec<f64>, fallback: f64) -> Self {
        Self {
            scores: Mutex::new(scores.into()),
            fallback,
        }
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn score(&self, _stage: StageKind, _prompt: &str, _output: &str) -> f64 {
        self.scores
            .lock()
            .expect("scores lock poisoned")
            .pop_front()
            .unwrap_or(self.fallback)
    }
}
