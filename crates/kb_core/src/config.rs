use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ResolverError, Result};

pub const DEFAULT_HIGH_THRESHOLD: f32 = 0.75;
pub const DEFAULT_MEDIUM_THRESHOLD: f32 = 0.55;
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 85;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_MODEL_DIR: &str = "./models";
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm sorry, that question is outside of my current business knowledge. I can assist with our hours and location.";

/// Tunables for the resolver. Every field has a default so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub embedding_model_name: String,
    pub model_dir: PathBuf,
    pub high_threshold: f32,
    pub medium_threshold: f32,
    pub fuzzy_threshold: u8,
    pub top_k: usize,
    pub lexical_assist_enabled: bool,
    pub fallback_message: String,
    pub max_concurrent_requests: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            embedding_model_name: DEFAULT_MODEL_NAME.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            medium_threshold: DEFAULT_MEDIUM_THRESHOLD,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            lexical_assist_enabled: false,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl ResolverConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            ResolverError::Configuration(format!("open {}: {e}", path.display()))
        })?;
        let config: ResolverConfig = serde_json::from_reader(file).map_err(|e| {
            ResolverError::Configuration(format!("parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.high_threshold) {
            return Err(invalid(format!(
                "high_threshold must be in [0, 1], got {}",
                self.high_threshold
            )));
        }
        if !unit.contains(&self.medium_threshold) {
            return Err(invalid(format!(
                "medium_threshold must be in [0, 1], got {}",
                self.medium_threshold
            )));
        }
        if self.medium_threshold > self.high_threshold {
            return Err(invalid(format!(
                "medium_threshold ({}) must not exceed high_threshold ({})",
                self.medium_threshold, self.high_threshold
            )));
        }
        if self.fuzzy_threshold > 100 {
            return Err(invalid(format!(
                "fuzzy_threshold must be in [0, 100], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k must be >= 1".to_string()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(invalid("max_concurrent_requests must be >= 1".to_string()));
        }
        if self.embedding_model_name.trim().is_empty() {
            return Err(invalid("embedding_model_name must not be blank".to_string()));
        }
        if self.fallback_message.trim().is_empty() {
            return Err(invalid("fallback_message must not be blank".to_string()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ResolverError {
    ResolverError::Configuration(msg)
}
