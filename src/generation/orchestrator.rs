//! Combines a context bundle and turn history into a prompt and asks the LLM.

use std::sync::Arc;

use serde::Serialize;

use super::provider::{ChatMessage, GenerationProvider};
use crate::core::errors::RagError;
use crate::rag::{ContextBundle, Provenance};

const SYSTEM_INSTRUCTIONS: &str = "Answer the question using only the numbered context \
excerpts. Cite excerpts as [n]. If the context does not contain the answer, say so.";

const NO_CONTEXT: &str = "No context was found for this question.";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub provenance: Vec<Provenance>,
    pub degraded: bool,
    pub partial: bool,
}

pub struct GenerationOrchestrator {
    provider: Arc<dyn GenerationProvider>,
}

impl GenerationOrchestrator {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn answer(
        &self,
        question: &str,
        history: &[ChatMessage],
        bundle: &ContextBundle,
    ) -> Result<Answer, RagError> {
        let messages = build_messages(question, history, bundle);
        tracing::debug!(
            provider = self.provider.name(),
            messages = messages.len(),
            excerpts = bundle.excerpts.len(),
            "Requesting answer"
        );
        let answer = self.provider.generate(&messages).await?;

        Ok(Answer {
            answer: answer.trim().to_string(),
            provenance: bundle.provenance.clone(),
            degraded: bundle.degraded,
            partial: bundle.partial,
        })
    }
}

/// System instructions with the context block, prior turns, then the question.
pub fn build_messages(question: &str, history: &[ChatMessage], bundle: &ContextBundle) -> Vec<ChatMessage> {
    let context = if bundle.prompt_text.is_empty() {
        NO_CONTEXT
    } else {
        bundle.prompt_text.as_str()
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\n<context>\n{}\n</context>",
        SYSTEM_INSTRUCTIONS, context
    )));
    messages.extend(
        history
            .iter()
            .filter(|turn| turn.role == "user" || turn.role == "assistant")
            .cloned(),
    );
    messages.push(ChatMessage::user(question.trim()));
    messages
}
