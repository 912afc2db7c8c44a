use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embed::EmbeddingProvider;
use crate::error::{ResolverError, Result};
use crate::knowledge::KnowledgeBase;

/// One surface question with its precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedQuestion {
    pub topic_id: String,
    pub question: String,
    pub embedding: Vec<f32>,
}

/// A scored hit against one surface question. Semantic scores are cosine
/// similarities; fuzzy scores live on a 0..=100 scale in [`crate::fuzzy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub topic_id: String,
    pub question: String,
    pub score: f32,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, aa, bb), (x, y)| {
            (d + (x * y), aa + (x * x), bb + (y * y))
        });

    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// Highest-scoring `k` entries, descending. `sort_by` is stable, so equal
/// scores keep index order.
pub fn top_k<'a>(
    query_embedding: &[f32],
    entries: &'a [IndexedQuestion],
    k: usize,
) -> Vec<(&'a IndexedQuestion, f32)> {
    let mut scored: Vec<(&IndexedQuestion, f32)> = entries
        .iter()
        .map(|entry| (entry, cosine_similarity(query_embedding, &entry.embedding)))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().take(k).collect()
}

/// Every surface question of the knowledge base, embedded once at startup
/// together with the provider used for queries.
pub struct EmbeddingIndex<E> {
    embedder: E,
    entries: Vec<IndexedQuestion>,
}

impl<E: EmbeddingProvider> EmbeddingIndex<E> {
    /// Embeds all surface questions. Any failure here is fatal: an index with
    /// holes would silently never match some phrasings.
    pub fn build(kb: &KnowledgeBase, embedder: E) -> Result<Self> {
        let flattened: Vec<(&str, &str)> = kb
            .topics()
            .iter()
            .flat_map(|t| {
                t.surface_questions
                    .iter()
                    .map(move |q| (t.id.as_str(), q.as_str()))
            })
            .collect();

        // Indexed collect keeps the flattened order.
        let entries = flattened
            .par_iter()
            .map(|(topic_id, question)| {
                let embedding = embedder.embed(question).map_err(|e| {
                    ResolverError::ModelLoad(format!("embed surface question '{question}': {e:#}"))
                })?;
                Ok(IndexedQuestion {
                    topic_id: topic_id.to_string(),
                    question: question.to_string(),
                    embedding,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            questions = entries.len(),
            dim = entries.first().map(|e| e.embedding.len()).unwrap_or(0),
            "Embedding index built"
        );
        Ok(Self { embedder, entries })
    }

    /// Top-`k` surface questions by cosine similarity to `utterance`.
    pub fn query(&self, utterance: &str, k: usize) -> Result<Vec<MatchCandidate>> {
        let query_embedding = self
            .embedder
            .embed(utterance)
            .map_err(|e| ResolverError::Inference(format!("{e:#}")))?;

        Ok(top_k(&query_embedding, &self.entries, k)
            .into_iter()
            .map(|(entry, score)| MatchCandidate {
                topic_id: entry.topic_id.clone(),
                question: entry.question.clone(),
                score,
            })
            .collect())
    }

    #[cfg(test)]
    pub(crate) fn empty(embedder: E) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[IndexedQuestion] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbeddingProvider;
    use crate::knowledge::Topic;

    fn mk_entry(id: &str, emb: Vec<f32>) -> IndexedQuestion {
        IndexedQuestion {
            topic_id: id.to_string(),
            question: format!("question-{id}"),
            embedding: emb,
        }
    }

    struct FailingEmbedder;

    impl EmbeddingProvider for FailingEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("device lost")
        }
    }

    #[test]
    fn cosine_works_for_unit_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn top_k_orders_descending_and_keeps_insertion_order_on_ties() {
        let entries = vec![
            mk_entry("low", vec![0.0, 1.0]),
            mk_entry("tie_a", vec![1.0, 0.0]),
            mk_entry("tie_b", vec![1.0, 0.0]),
            mk_entry("mid", vec![1.0, 1.0]),
        ];
        let ranked = top_k(&[1.0, 0.0], &entries, 3);
        let ids: Vec<&str> = ranked.iter().map(|(e, _)| e.topic_id.as_str()).collect();

        assert_eq!(ids, vec!["tie_a", "tie_b", "mid"]);
    }

    #[test]
    fn build_flattens_every_surface_question_in_order() {
        let kb = KnowledgeBase::builtin();
        let index = EmbeddingIndex::build(&kb, HashEmbeddingProvider::default()).unwrap();

        assert_eq!(index.len(), kb.question_count());
        let expected: Vec<&str> = kb
            .topics()
            .iter()
            .flat_map(|t| t.surface_questions.iter().map(String::as_str))
            .collect();
        let actual: Vec<&str> = index.entries().iter().map(|e| e.question.as_str()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn query_matches_verbatim_question_with_full_score() {
        let kb = KnowledgeBase::builtin();
        let index = EmbeddingIndex::build(&kb, HashEmbeddingProvider::default()).unwrap();

        let hits = index.query("Where is your office?", 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].topic_id, "ask_location");
        assert_eq!(hits[0].question, "Where is your office?");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn failing_embedder_is_fatal_at_build_and_transient_at_query() {
        let kb = KnowledgeBase::load(vec![Topic::new("t", &["hi?"], "hello")]).unwrap();
        let err = EmbeddingIndex::build(&kb, FailingEmbedder).err().unwrap();
        assert!(err.is_fatal());

        let index = EmbeddingIndex {
            embedder: FailingEmbedder,
            entries: Vec::new(),
        };
        let err = index.query("hi", 3).unwrap_err();
        assert!(matches!(err, ResolverError::Inference(_)));
        assert!(!err.is_fatal());
    }
}
