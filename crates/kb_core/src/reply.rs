use serde::{Deserialize, Serialize};

use crate::embed::EmbeddingProvider;
use crate::policy::{ResolutionOutcome, Resolver};

pub const CLARIFY_PREAMBLE: &str = "I'm not sure I understood. Did you mean one of these?";

/// One turn handed over by the dialogue engine. Only `utterance` is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender_id: String,
    pub utterance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient_id: String,
    pub text: String,
}

pub fn render(outcome: &ResolutionOutcome) -> String {
    match outcome {
        ResolutionOutcome::DirectAnswer { answer, .. } => answer.clone(),
        ResolutionOutcome::Clarify { suggestions } => {
            let mut text = CLARIFY_PREAMBLE.to_string();
            for (i, suggestion) in suggestions.iter().enumerate() {
                text.push_str(&format!("\n{}. {}", i + 1, suggestion));
            }
            text
        }
        ResolutionOutcome::Fallback { message } => message.clone(),
    }
}

/// Zero messages for an empty utterance, exactly one otherwise.
pub fn respond<E: EmbeddingProvider>(
    resolver: &Resolver<E>,
    inbound: &InboundMessage,
) -> Vec<OutboundMessage> {
    resolver
        .resolve(inbound.utterance.as_deref())
        .map(|outcome| OutboundMessage {
            recipient_id: inbound.sender_id.clone(),
            text: render(&outcome),
        })
        .into_iter()
        .collect()
}
