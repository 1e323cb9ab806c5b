//! Medical query classification.
//!
//! One model call per message. The model is told to answer only YES or NO;
//! anything else, including a failed call, counts as non-medical.

use std::sync::Arc;

use crate::llm::TextCompletion;

/// Topics the classifier accepts as medical.
const MEDICAL_TOPICS: [&str; 11] = [
    "Medicine",
    "Healthcare",
    "Medical conditions and symptoms",
    "Treatments and procedures",
    "Medications and pharmaceuticals",
    "Human anatomy and physiology",
    "Medical devices and equipment",
    "Healthcare systems and policies",
    "Public health",
    "Medical education and careers",
    "Medical research and clinical trials",
];

/// Build the classification instruction for `query`.
pub fn classification_prompt(query: &str) -> String {
    let mut prompt = String::from(
        "You are a strict medical query classifier. \
         Determine if the following query is STRICTLY related to:\n",
    );
    for topic in MEDICAL_TOPICS {
        prompt.push_str("- ");
        prompt.push_str(topic);
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nQuery: \"{}\"\n\n", query));
    prompt.push_str(
        "Respond with ONLY \"YES\" if the query is definitively medical or health-related, \
         and \"NO\" if it is not.\n\
         Be very strict - if the query could be answered by a non-medical assistant, \
         respond with \"NO\".",
    );
    prompt
}

/// True iff the model reply contains "YES", ignoring case and surrounding space.
pub fn is_affirmative(reply: &str) -> bool {
    reply.trim().to_uppercase().contains("YES")
}

/// Decides whether a message is in the medical domain.
#[derive(Clone)]
pub struct QueryClassifier {
    model: Arc<dyn TextCompletion>,
}

impl QueryClassifier {
    pub fn new(model: Arc<dyn TextCompletion>) -> Self {
        Self { model }
    }

    /// Classify a non-empty message. Model failures classify as non-medical.
    pub async fn is_medical(&self, message: &str) -> bool {
        match self.model.complete(&classification_prompt(message)).await {
            Ok(reply) => {
                let medical = is_affirmative(&reply);
                tracing::debug!(medical, "Query classified");
                medical
            }
            Err(e) => {
                tracing::warn!(error = %e, "Classification failed; treating query as non-medical");
                false
            }
        }
    }
}
