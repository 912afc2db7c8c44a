//! Tiered resolution: semantic high → semantic medium → lexical assist →
//! fallback. The first tier that matches decides; nothing is re-ranked across
//! tiers and nothing is remembered between requests.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::embed::EmbeddingProvider;
use crate::error::Result;
use crate::fuzzy;
use crate::index::{EmbeddingIndex, MatchCandidate};
use crate::knowledge::KnowledgeBase;

/// Hard cap on clarification suggestions, independent of `top_k`.
pub const MAX_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    DirectAnswer { topic_id: String, answer: String },
    Clarify { suggestions: Vec<String> },
    Fallback { message: String },
}

impl ResolutionOutcome {
    pub fn topic_id(&self) -> Option<&str> {
        match self {
            ResolutionOutcome::DirectAnswer { topic_id, .. } => Some(topic_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    LexicalAssist,
    Fallback,
}

/// An outcome plus the evidence that produced it, for logs and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: ResolutionOutcome,
    pub tier: ConfidenceTier,
    pub top_score: Option<f32>,
    pub candidates: Vec<MatchCandidate>,
}

/// Owns the knowledge base and its embedding index. Built once at startup and
/// only read afterwards, so a single instance can be shared across threads.
pub struct Resolver<E> {
    kb: KnowledgeBase,
    index: EmbeddingIndex<E>,
    questions: Vec<String>,
    config: ResolverConfig,
}

impl<E: EmbeddingProvider> Resolver<E> {
    pub fn new(kb: KnowledgeBase, embedder: E, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        let index = EmbeddingIndex::build(&kb, embedder)?;
        let questions = index.entries().iter().map(|e| e.question.clone()).collect();

        Ok(Self {
            kb,
            index,
            questions,
            config,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// `None` for an absent or blank utterance: no reply at all.
    pub fn resolve(&self, utterance: Option<&str>) -> Option<ResolutionOutcome> {
        self.resolve_detailed(utterance).map(|r| r.outcome)
    }

    pub fn resolve_detailed(&self, utterance: Option<&str>) -> Option<Resolution> {
        let Some(text) = utterance.map(str::trim).filter(|t| !t.is_empty()) else {
            debug!("Empty utterance, nothing to resolve");
            return None;
        };

        let candidates = match self.index.query(text, self.config.top_k) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "Semantic lookup failed, replying with fallback");
                return Some(self.fallback(None, Vec::new()));
            }
        };

        let Some((top_topic, top_score)) = candidates.first().map(|c| (c.topic_id.clone(), c.score))
        else {
            debug!(tier = "fallback", "No candidates, resolved");
            return Some(self.fallback(None, candidates));
        };

        if top_score > self.config.high_threshold {
            if let Some(topic) = self.kb.topic(&top_topic) {
                debug!(tier = "high", score = top_score, topic = %topic.id, "Resolved");
                return Some(Resolution {
                    outcome: ResolutionOutcome::DirectAnswer {
                        topic_id: topic.id.clone(),
                        answer: topic.answer.clone(),
                    },
                    tier: ConfidenceTier::High,
                    top_score: Some(top_score),
                    candidates,
                });
            }
        }

        if top_score > self.config.medium_threshold {
            let suggestions = ranked_suggestions(&candidates);
            debug!(tier = "medium", score = top_score, suggestions = suggestions.len(), "Resolved");
            return Some(Resolution {
                outcome: ResolutionOutcome::Clarify { suggestions },
                tier: ConfidenceTier::Medium,
                top_score: Some(top_score),
                candidates,
            });
        }

        if self.config.lexical_assist_enabled {
            if let Some(outcome) = self.lexical_assist(text) {
                debug!(tier = "lexical_assist", score = top_score, "Resolved");
                return Some(Resolution {
                    outcome,
                    tier: ConfidenceTier::LexicalAssist,
                    top_score: Some(top_score),
                    candidates,
                });
            }
        }

        debug!(tier = "fallback", score = top_score, "Resolved");
        Some(self.fallback(Some(top_score), candidates))
    }

    fn lexical_assist(&self, text: &str) -> Option<ResolutionOutcome> {
        let best = fuzzy::best_match(text, &self.questions)?;
        if best.score <= self.config.fuzzy_threshold {
            return None;
        }

        let entry = self.index.entries().get(best.index)?;
        let topic = self.kb.topic(&entry.topic_id)?;
        Some(ResolutionOutcome::DirectAnswer {
            topic_id: topic.id.clone(),
            answer: format!("I think you meant \"{}\". {}", best.text, topic.answer),
        })
    }

    fn fallback(&self, top_score: Option<f32>, candidates: Vec<MatchCandidate>) -> Resolution {
        Resolution {
            outcome: ResolutionOutcome::Fallback {
                message: self.config.fallback_message.clone(),
            },
            tier: ConfidenceTier::Fallback,
            top_score,
            candidates,
        }
    }
}

/// Candidate questions in score order, duplicates dropped, at most
/// [`MAX_SUGGESTIONS`].
fn ranked_suggestions(candidates: &[MatchCandidate]) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.question.to_lowercase()))
        .take(MAX_SUGGESTIONS)
        .map(|c| c.question.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_FALLBACK_MESSAGE, DEFAULT_MODEL_NAME};
    use crate::embed::{load_embedder, HashEmbeddingProvider};

    const HOURS_ANSWER: &str = "We are open from 9 AM to 6 PM, Monday through Saturday.";

    fn resolver(config: ResolverConfig) -> Resolver<HashEmbeddingProvider> {
        Resolver::new(
            KnowledgeBase::builtin(),
            HashEmbeddingProvider::default(),
            config,
        )
        .expect("resolver")
    }

    fn default_resolver() -> Resolver<HashEmbeddingProvider> {
        resolver(ResolverConfig::default())
    }

    struct FlakyEmbedder {
        inner: HashEmbeddingProvider,
    }

    impl EmbeddingProvider for FlakyEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if text.contains("boom") {
                anyhow::bail!("inference crashed");
            }
            self.inner.embed(text)
        }
    }

    fn candidate(question: &str, score: f32) -> MatchCandidate {
        MatchCandidate {
            topic_id: "t".to_string(),
            question: question.to_string(),
            score,
        }
    }

    #[test]
    fn canonical_question_gets_direct_answer() {
        let outcome = default_resolver().resolve(Some("What are your hours?"));
        assert_eq!(
            outcome,
            Some(ResolutionOutcome::DirectAnswer {
                topic_id: "ask_hours".to_string(),
                answer: HOURS_ANSWER.to_string(),
            })
        );
    }

    #[test]
    fn every_surface_question_answers_its_own_topic() {
        let resolver = default_resolver();
        for topic in KnowledgeBase::builtin().topics() {
            for question in &topic.surface_questions {
                match resolver.resolve(Some(question)) {
                    Some(ResolutionOutcome::DirectAnswer { topic_id, answer }) => {
                        assert_eq!(topic_id, topic.id, "question {question}");
                        assert_eq!(answer, topic.answer);
                    }
                    other => panic!("{question}: expected direct answer, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn location_answer_carries_map_link() {
        let outcome = default_resolver().resolve(Some("Where is your office?"));
        match outcome {
            Some(ResolutionOutcome::DirectAnswer { topic_id, answer }) => {
                assert_eq!(topic_id, "ask_location");
                assert!(answer.contains("https://"));
            }
            other => panic!("expected direct answer, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_text_falls_back() {
        let resolver = default_resolver();
        for text in ["tell me a joke", "asdkjfh qwoe"] {
            assert_eq!(
                resolver.resolve(Some(text)),
                Some(ResolutionOutcome::Fallback {
                    message: DEFAULT_FALLBACK_MESSAGE.to_string()
                }),
                "{text}"
            );
        }
    }

    #[test]
    fn empty_or_absent_utterance_yields_nothing() {
        let resolver = default_resolver();
        assert_eq!(resolver.resolve(None), None);
        assert_eq!(resolver.resolve(Some("")), None);
        assert_eq!(resolver.resolve(Some("   \n")), None);
    }

    #[test]
    fn medium_confidence_asks_for_clarification() {
        let resolution = default_resolver()
            .resolve_detailed(Some("your office hours"))
            .unwrap();

        assert_eq!(resolution.tier, ConfidenceTier::Medium);
        assert_eq!(
            resolution.outcome,
            ResolutionOutcome::Clarify {
                suggestions: vec![
                    "What are your hours?".to_string(),
                    "Where is your office?".to_string(),
                    "What are your opening hours?".to_string(),
                ]
            }
        );
    }

    #[test]
    fn score_equal_to_high_threshold_is_not_high_confidence() {
        // Three of four tokens shared: cosine is exactly 0.75.
        let resolution = default_resolver()
            .resolve_detailed(Some("What are your hourz?"))
            .unwrap();

        assert_eq!(resolution.top_score, Some(0.75));
        match resolution.outcome {
            ResolutionOutcome::Clarify { suggestions } => {
                assert_eq!(suggestions[0], "What are your hours?");
            }
            other => panic!("expected clarify, got {other:?}"),
        }
    }

    #[test]
    fn suggestions_never_exceed_three() {
        let resolver = resolver(ResolverConfig {
            top_k: 8,
            ..ResolverConfig::default()
        });
        match resolver.resolve(Some("your office hours")) {
            Some(ResolutionOutcome::Clarify { suggestions }) => {
                assert_eq!(suggestions.len(), MAX_SUGGESTIONS);
            }
            other => panic!("expected clarify, got {other:?}"),
        }
    }

    #[test]
    fn ranked_suggestions_drop_duplicates_and_keep_order() {
        let candidates = vec![
            candidate("Where is your office?", 0.7),
            candidate("where is your office?", 0.7),
            candidate("What are your hours?", 0.6),
            candidate("When are you open?", 0.5),
            candidate("What is your address?", 0.4),
        ];
        assert_eq!(
            ranked_suggestions(&candidates),
            vec![
                "Where is your office?",
                "What are your hours?",
                "When are you open?"
            ]
        );
    }

    #[test]
    fn lexical_assist_corrects_typos_only_when_enabled() {
        let typo = Some("wher is your ofice");

        let plain = default_resolver().resolve_detailed(typo).unwrap();
        assert_eq!(plain.tier, ConfidenceTier::Fallback);

        let assisted = resolver(ResolverConfig {
            lexical_assist_enabled: true,
            ..ResolverConfig::default()
        })
        .resolve_detailed(typo)
        .unwrap();
        assert_eq!(assisted.tier, ConfidenceTier::LexicalAssist);
        match assisted.outcome {
            ResolutionOutcome::DirectAnswer { topic_id, answer } => {
                assert_eq!(topic_id, "ask_location");
                assert!(answer.starts_with("I think you meant \"Where is your office?\"."));
            }
            other => panic!("expected direct answer, got {other:?}"),
        }
    }

    #[test]
    fn lexical_assist_respects_its_threshold() {
        let resolver = resolver(ResolverConfig {
            lexical_assist_enabled: true,
            fuzzy_threshold: 90,
            ..ResolverConfig::default()
        });
        let resolution = resolver.resolve_detailed(Some("wher is your ofice")).unwrap();
        assert_eq!(resolution.tier, ConfidenceTier::Fallback);
    }

    #[test]
    fn raising_high_threshold_never_adds_direct_answers() {
        let utterances = [
            "What are your hours?",
            "are you open",
            "where is the office",
            "your office hours",
            "What are your hourz?",
            "tell me a joke",
        ];
        let direct = |high: f32| -> Vec<&'static str> {
            let resolver = resolver(ResolverConfig {
                high_threshold: high,
                ..ResolverConfig::default()
            });
            utterances
                .iter()
                .copied()
                .filter(|u| {
                    matches!(
                        resolver.resolve(Some(*u)),
                        Some(ResolutionOutcome::DirectAnswer { .. })
                    )
                })
                .collect()
        };

        let loose = direct(0.75);
        let strict = direct(0.9);
        assert!(strict.iter().all(|u| loose.contains(u)));
        assert!(strict.len() < loose.len());
    }

    #[test]
    fn identical_inputs_resolve_identically() {
        let resolver = default_resolver();
        for text in ["your office hours", "are you open", "tell me a joke"] {
            assert_eq!(
                resolver.resolve_detailed(Some(text)),
                resolver.resolve_detailed(Some(text))
            );
        }
    }

    #[test]
    fn inference_failure_degrades_to_fallback() {
        let resolver = Resolver::new(
            KnowledgeBase::builtin(),
            FlakyEmbedder {
                inner: HashEmbeddingProvider::default(),
            },
            ResolverConfig::default(),
        )
        .unwrap();

        let resolution = resolver.resolve_detailed(Some("boom")).unwrap();
        assert_eq!(resolution.tier, ConfidenceTier::Fallback);
        assert_eq!(resolution.top_score, None);
        assert!(matches!(
            resolution.outcome,
            ResolutionOutcome::Fallback { .. }
        ));
    }

    #[test]
    fn empty_index_falls_back_without_a_score() {
        let resolver = Resolver {
            kb: KnowledgeBase::builtin(),
            index: EmbeddingIndex::empty(HashEmbeddingProvider::default()),
            questions: Vec::new(),
            config: ResolverConfig::default(),
        };

        let resolution = resolver.resolve_detailed(Some("What are your hours?")).unwrap();
        assert_eq!(resolution.tier, ConfidenceTier::Fallback);
        assert_eq!(resolution.top_score, None);
        assert!(resolution.candidates.is_empty());
    }

    #[test]
    fn invalid_config_refuses_to_build() {
        let result = Resolver::new(
            KnowledgeBase::builtin(),
            HashEmbeddingProvider::default(),
            ResolverConfig {
                medium_threshold: 0.9,
                ..ResolverConfig::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn pretrained_model_scenarios() {
        let config = ResolverConfig {
            model_dir: std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models"),
            ..ResolverConfig::default()
        };
        let embedder = match load_embedder(&config) {
            Ok(embedder) => embedder,
            Err(_) => {
                eprintln!("Skipping: {DEFAULT_MODEL_NAME} model or tokenizer not found");
                return;
            }
        };
        let resolver = Resolver::new(KnowledgeBase::builtin(), embedder, config).unwrap();

        assert_eq!(
            resolver.resolve(Some("What are your hours?")),
            Some(ResolutionOutcome::DirectAnswer {
                topic_id: "ask_hours".to_string(),
                answer: HOURS_ANSWER.to_string(),
            })
        );
        assert_eq!(
            resolver.resolve(Some("Where is your office?")).as_ref().and_then(|o| o.topic_id()),
            Some("ask_location")
        );
        assert!(matches!(
            resolver.resolve(Some("tell me a joke")),
            Some(ResolutionOutcome::Fallback { .. })
        ));
        assert_eq!(resolver.resolve(Some("")), None);

        let kb = KnowledgeBase::builtin();
        let hours = kb.topic("ask_hours").unwrap();
        match resolver.resolve(Some("wat r ur hourz")) {
            Some(ResolutionOutcome::Clarify { suggestions }) => {
                assert!(suggestions.len() <= MAX_SUGGESTIONS);
                assert!(hours.surface_questions.contains(&suggestions[0]));
            }
            other => panic!("expected clarify led by an hours phrasing, got {other:?}"),
        }
    }
}
