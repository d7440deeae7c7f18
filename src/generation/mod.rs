//! Answer generation over a retrieved context bundle.

mod openai;
mod orchestrator;
mod provider;

pub use openai::OpenAiChatProvider;
pub use orchestrator::{build_messages, Answer, GenerationOrchestrator};
pub use provider::{ChatMessage, GenerationProvider};
