use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ResolverError, Result};

/// One knowledge-base subject: a fixed answer and the phrasings that ask for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub surface_questions: Vec<String>,
    pub answer: String,
}

impl Topic {
    pub fn new(id: &str, surface_questions: &[&str], answer: &str) -> Self {
        Self {
            id: id.to_string(),
            surface_questions: surface_questions.iter().map(|q| q.to_string()).collect(),
            answer: answer.to_string(),
        }
    }
}

/// Validated, immutable topic catalogue. There is no update operation; new
/// knowledge means a new load.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    topics: Vec<Topic>,
}

#[derive(Debug, Deserialize)]
struct RawKnowledgeBase {
    topics: Vec<Topic>,
}

impl KnowledgeBase {
    pub fn load(topics: Vec<Topic>) -> Result<Self> {
        if topics.is_empty() {
            return Err(malformed("knowledge base has no topics".to_string()));
        }

        let mut ids = HashSet::new();
        let mut questions = HashSet::new();

        for topic in &topics {
            if topic.id.trim().is_empty() {
                return Err(malformed("topic with blank id".to_string()));
            }
            if !ids.insert(topic.id.as_str()) {
                return Err(malformed(format!("duplicate topic id '{}'", topic.id)));
            }
            if topic.surface_questions.is_empty() {
                return Err(malformed(format!(
                    "topic '{}' has no surface questions",
                    topic.id
                )));
            }
            if topic.answer.trim().is_empty() {
                return Err(malformed(format!("topic '{}' has a blank answer", topic.id)));
            }
            for question in &topic.surface_questions {
                if question.trim().is_empty() {
                    return Err(malformed(format!(
                        "topic '{}' has a blank surface question",
                        topic.id
                    )));
                }
                // A phrasing may only ever point at one topic.
                if !questions.insert(question.trim().to_lowercase()) {
                    return Err(malformed(format!(
                        "surface question '{}' appears more than once",
                        question
                    )));
                }
            }
        }

        info!(
            topics = topics.len(),
            questions = questions.len(),
            "Knowledge base loaded"
        );
        Ok(Self { topics })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| malformed(format!("open {}: {e}", path.display())))?;
        let raw: RawKnowledgeBase = serde_json::from_reader(file)
            .map_err(|e| malformed(format!("parse {}: {e}", path.display())))?;
        Self::load(raw.topics)
    }

    /// The default catalogue: business hours and location.
    pub fn builtin() -> Self {
        Self {
            topics: vec![
                Topic::new(
                    "ask_hours",
                    &[
                        "What are your hours?",
                        "When are you open?",
                        "What time do you open?",
                        "What are your opening hours?",
                    ],
                    "We are open from 9 AM to 6 PM, Monday through Saturday.",
                ),
                Topic::new(
                    "ask_location",
                    &[
                        "Where are you located?",
                        "Where is your office?",
                        "What is your address?",
                        "How do I get to your office?",
                    ],
                    "Our office is at 123 Market Street, Springfield. Find us on the map: https://maps.google.com/?q=123+Market+Street+Springfield",
                ),
            ],
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn question_count(&self) -> usize {
        self.topics.iter().map(|t| t.surface_questions.len()).sum()
    }
}

fn malformed(msg: String) -> ResolverError {
    ResolverError::Configuration(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_passes_validation() {
        let kb = KnowledgeBase::builtin();
        let reloaded = KnowledgeBase::load(kb.topics().to_vec()).expect("valid");

        assert_eq!(reloaded.topics().len(), 2);
        assert_eq!(reloaded.question_count(), 8);
        assert!(reloaded.topic("ask_hours").is_some());
        assert!(reloaded.topic("ask_location").is_some());
    }

    #[test]
    fn rejects_topic_without_questions() {
        let err = KnowledgeBase::load(vec![Topic::new("empty", &[], "answer")]).unwrap_err();
        assert!(err.to_string().contains("no surface questions"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = KnowledgeBase::load(vec![
            Topic::new("t", &["one?"], "a"),
            Topic::new("t", &["two?"], "b"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate topic id"));
    }

    #[test]
    fn rejects_question_shared_between_topics() {
        let err = KnowledgeBase::load(vec![
            Topic::new("a", &["Where are you?"], "a"),
            Topic::new("b", &["where are you?"], "b"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_blank_question() {
        let err = KnowledgeBase::load(vec![Topic::new("a", &["ok?", "   "], "a")]).unwrap_err();
        assert!(matches!(err, ResolverError::Configuration(_)));
    }

    #[test]
    fn loads_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"topics": [{"id": "ask_parking", "surface_questions": ["Is there parking?"], "answer": "Yes, behind the building."}]}"#,
        )
        .unwrap();

        let kb = KnowledgeBase::from_json_file(file.path()).unwrap();
        assert_eq!(kb.topics().len(), 1);
        assert_eq!(kb.topics()[0].answer, "Yes, behind the building.");
    }
}
