//! Chat orchestrator: classify, refuse or compose and generate, then log.
//!
//! Each call is independent; nothing is carried between messages.

use std::sync::Arc;

use medai_core::types::{ConversationTurn, Identity, MedicalProfile, QueryType};
use medai_storage::{ConversationRepository, ProfileRepository};

use crate::classifier::QueryClassifier;
use crate::composer::PromptComposer;
use crate::error::ChatError;
use crate::llm::TextCompletion;
use crate::response::ResponseGenerator;

/// Reply for messages classified as non-medical.
pub const REFUSAL_RESPONSE: &str = "I'm sorry, but I can only answer medical and healthcare-related questions. Please ask me something about medicine, health conditions, treatments, or other healthcare topics.";

/// Reply when generation or processing fails.
pub const APOLOGY_RESPONSE: &str =
    "Sorry, there was an error processing your request. Please try again.";

/// Reply for empty or whitespace-only messages.
pub const EMPTY_MESSAGE_RESPONSE: &str = "Please enter a message";

/// Outcome of one chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub response: String,
    pub query_type: QueryType,
    /// Whether a conversation turn was written.
    pub logged: bool,
}

/// Central coordinator for the chat pipeline.
pub struct ChatOrchestrator {
    classifier: QueryClassifier,
    composer: PromptComposer,
    generator: ResponseGenerator,
    profiles: ProfileRepository,
    conversations: ConversationRepository,
    max_message_chars: usize,
}

impl ChatOrchestrator {
    /// Create an orchestrator sharing one model backend for classification
    /// and generation.
    pub fn new(
        model: Arc<dyn TextCompletion>,
        profiles: ProfileRepository,
        conversations: ConversationRepository,
        max_message_chars: usize,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(Arc::clone(&model)),
            composer: PromptComposer::new(),
            generator: ResponseGenerator::new(model),
            profiles,
            conversations,
            max_message_chars,
        }
    }

    /// Handle one message from an optional authenticated caller.
    ///
    /// Rejected messages reach neither the model nor the store. Anonymous
    /// callers are answered but never logged.
    pub async fn handle_message(
        &self,
        message: &str,
        identity: Option<&Identity>,
    ) -> Result<ChatReply, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > self.max_message_chars {
            return Err(ChatError::MessageTooLong(self.max_message_chars));
        }

        if !self.classifier.is_medical(message).await {
            tracing::info!(query_type = %QueryType::NonMedical, "Refusing non-medical query");
            let logged = self.log_turn(identity, message, REFUSAL_RESPONSE, QueryType::NonMedical);
            return Ok(ChatReply {
                response: REFUSAL_RESPONSE.to_string(),
                query_type: QueryType::NonMedical,
                logged,
            });
        }

        let profile = identity.and_then(|id| self.load_profile(id));
        let prompt = self.composer.compose(message, profile.as_ref());
        let response = self.generator.generate(&prompt).await;

        let logged = self.log_turn(identity, message, &response, QueryType::Medical);
        Ok(ChatReply {
            response,
            query_type: QueryType::Medical,
            logged,
        })
    }

    fn load_profile(&self, identity: &Identity) -> Option<MedicalProfile> {
        match self.profiles.find(identity.user_id) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "Failed to load profile; composing without it");
                None
            }
        }
    }

    /// Append a turn for authenticated callers. Failures are logged only.
    fn log_turn(
        &self,
        identity: Option<&Identity>,
        message: &str,
        response: &str,
        query_type: QueryType,
    ) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        let turn = ConversationTurn::new(identity.user_id, message, response, query_type);
        match self.conversations.append(&turn) {
            Ok(()) => {
                tracing::debug!(user_id = %identity.user_id, query_type = %query_type, "Conversation turn saved");
                true
            }
            Err(e) => {
                tracing::error!(user_id = %identity.user_id, error = %e, "Failed to save conversation turn");
                false
            }
        }
    }
}
