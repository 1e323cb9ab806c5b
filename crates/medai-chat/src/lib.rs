//! Medical chat pipeline for MedAI.
//!
//! Classifies messages, composes profile-aware prompts, calls the hosted
//! model and records conversation turns.

pub mod classifier;
pub mod composer;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod response;

pub use classifier::QueryClassifier;
pub use composer::PromptComposer;
pub use error::ChatError;
pub use llm::{GeminiClient, TextCompletion};
pub use orchestrator::{
    ChatOrchestrator, ChatReply, APOLOGY_RESPONSE, EMPTY_MESSAGE_RESPONSE, REFUSAL_RESPONSE,
};
pub use response::ResponseGenerator;
