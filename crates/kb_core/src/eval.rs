use std::fs::File;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::embed::EmbeddingProvider;
use crate::error::{ResolverError, Result};
use crate::policy::{ConfidenceTier, ResolutionOutcome, Resolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    DirectAnswer,
    Clarify,
    Fallback,
    /// No reply at all (empty input).
    Silent,
}

impl OutcomeKind {
    pub fn of(outcome: Option<&ResolutionOutcome>) -> Self {
        match outcome {
            Some(ResolutionOutcome::DirectAnswer { .. }) => OutcomeKind::DirectAnswer,
            Some(ResolutionOutcome::Clarify { .. }) => OutcomeKind::Clarify,
            Some(ResolutionOutcome::Fallback { .. }) => OutcomeKind::Fallback,
            None => OutcomeKind::Silent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub case_id: String,
    #[serde(default)]
    pub utterance: Option<String>,
    pub expected_outcome: OutcomeKind,
    #[serde(default)]
    pub expected_topic_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub case_id: String,
    pub passed: bool,
    pub actual_outcome: OutcomeKind,
    pub actual_topic_id: Option<String>,
    pub tier: Option<ConfidenceTier>,
    pub top_score: Option<f32>,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f32,
    pub outcomes: Vec<EvalOutcome>,
}

impl EvalSummary {
    pub fn meets(&self, required_pass_rate: f32) -> bool {
        self.pass_rate >= required_pass_rate
    }
}

pub fn load_cases_json(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path).map_err(|e| {
        ResolverError::Configuration(format!("open eval cases {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_reader(file)?)
}

fn matches(case: &EvalCase, kind: OutcomeKind, topic_id: Option<&str>) -> bool {
    if case.expected_outcome != kind {
        return false;
    }
    match case.expected_topic_id.as_deref() {
        Some(expected) => topic_id == Some(expected),
        None => true,
    }
}

pub fn evaluate_cases<E: EmbeddingProvider>(
    resolver: &Resolver<E>,
    cases: &[EvalCase],
) -> EvalSummary {
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let start = Instant::now();
        let resolution = resolver.resolve_detailed(case.utterance.as_deref());
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let kind = OutcomeKind::of(resolution.as_ref().map(|r| &r.outcome));
        let topic_id = resolution
            .as_ref()
            .and_then(|r| r.outcome.topic_id())
            .map(str::to_string);

        outcomes.push(EvalOutcome {
            case_id: case.case_id.clone(),
            passed: matches(case, kind, topic_id.as_deref()),
            actual_outcome: kind,
            actual_topic_id: topic_id,
            tier: resolution.as_ref().map(|r| r.tier),
            top_score: resolution.as_ref().and_then(|r| r.top_score),
            latency_ms,
        });
    }

    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = total.saturating_sub(passed);
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f32 / total as f32
    };

    EvalSummary {
        total,
        passed,
        failed,
        pass_rate,
        outcomes,
    }
}
