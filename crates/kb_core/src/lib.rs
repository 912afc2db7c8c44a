pub mod config;
pub mod embed;
pub mod error;
pub mod eval;
pub mod fuzzy;
pub mod index;
pub mod knowledge;
pub mod policy;
pub mod reply;
pub mod sentence_embed;

pub use config::{
    ResolverConfig, DEFAULT_EMBEDDING_DIM, DEFAULT_FALLBACK_MESSAGE, DEFAULT_FUZZY_THRESHOLD,
    DEFAULT_HIGH_THRESHOLD, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MEDIUM_THRESHOLD,
    DEFAULT_MODEL_DIR, DEFAULT_MODEL_NAME, DEFAULT_TOP_K,
};
pub use embed::{load_embedder, EmbeddingProvider, HashEmbeddingProvider, HASH_MODEL_NAME};
pub use error::{ResolverError, Result};
pub use eval::{evaluate_cases, load_cases_json, EvalCase, EvalOutcome, EvalSummary, OutcomeKind};
pub use fuzzy::{best_match, FuzzyMatch};
pub use index::{cosine_similarity, top_k, EmbeddingIndex, IndexedQuestion, MatchCandidate};
pub use knowledge::{KnowledgeBase, Topic};
pub use policy::{ConfidenceTier, Resolution, ResolutionOutcome, Resolver, MAX_SUGGESTIONS};
pub use reply::{render, respond, InboundMessage, OutboundMessage};
pub use sentence_embed::SentenceEmbeddingProvider;
