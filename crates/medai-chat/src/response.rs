//! Response generation: one model call with the composed prompt.

use std::sync::Arc;

use crate::llm::TextCompletion;
use crate::orchestrator::APOLOGY_RESPONSE;

/// Invokes the model for medical questions.
#[derive(Clone)]
pub struct ResponseGenerator {
    model: Arc<dyn TextCompletion>,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn TextCompletion>) -> Self {
        Self { model }
    }

    /// Generate a reply for `prompt`. Failures yield the fixed apology.
    pub async fn generate(&self, prompt: &str) -> String {
        match self.model.complete(prompt).await {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                tracing::error!(error = %e, "Response generation failed");
                APOLOGY_RESPONSE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use async_trait::async_trait;

    struct Canned(Result<&'static str, &'static str>);

    #[async_trait]
    impl TextCompletion for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String, ChatError> {
            self.0
                .map(str::to_string)
                .map_err(|e| ChatError::LlmError(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_generate_trims_reply() {
        let generator = ResponseGenerator::new(Arc::new(Canned(Ok("\n  **Rest** and fluids.  \n"))));
        assert_eq!(generator.generate("prompt").await, "**Rest** and fluids.");
    }

    #[tokio::test]
    async fn test_generate_failure_returns_apology() {
        let generator = ResponseGenerator::new(Arc::new(Canned(Err("timeout"))));
        assert_eq!(generator.generate("prompt").await, APOLOGY_RESPONSE);
    }
}
