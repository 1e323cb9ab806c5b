//! Prompt composition.
//!
//! The generation prompt is: fixed preamble, optional patient block built from
//! the present profile fields, the user message, then a trailing guard.

use medai_core::types::MedicalProfile;

use crate::orchestrator::REFUSAL_RESPONSE;

/// Persona, scope and formatting rules sent ahead of every medical question.
pub const SYSTEM_PREAMBLE: &str = "You are MedAI, a medical assistant specialized in healthcare information.
You can ONLY answer questions related to medicine, healthcare, medical conditions,
treatments, and other health-related topics.

FORMAT YOUR RESPONSE USING MARKDOWN:
- Use **bold** for important terms, drug names, and key points
- Use *italics* for emphasis
- Use bullet points or numbered lists for steps or multiple items
- Use headings with # or ## for sections if needed
- Use tables for comparing options when relevant

Your response should be well-structured, clear, and formatted for easy reading.
Always include appropriate disclaimers about consulting healthcare professionals.
";

const PATIENT_BLOCK_INTRO: &str = "\n\nConsider the following patient information when responding:\n";
const PATIENT_BLOCK_OUTRO: &str = "\n\nNow answer the following question with this context in mind:\n";

/// Builds generation prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    /// Compose the full prompt for `message`, with profile context if any
    /// profile field is present.
    pub fn compose(&self, message: &str, profile: Option<&MedicalProfile>) -> String {
        let mut prompt = String::from(SYSTEM_PREAMBLE);

        let details = profile.map(patient_details).unwrap_or_default();
        if !details.is_empty() {
            prompt.push_str(PATIENT_BLOCK_INTRO);
            prompt.push_str(&details.join("\n"));
            prompt.push_str(PATIENT_BLOCK_OUTRO);
        }

        prompt.push_str(message);
        prompt.push_str(&format!(
            "\n\nIMPORTANT: If this question is not related to medicine or healthcare, \
             respond only with: '{}'",
            REFUSAL_RESPONSE
        ));
        prompt
    }
}

/// One line per present profile field, in fixed order.
pub fn patient_details(profile: &MedicalProfile) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(age) = profile.age {
        lines.push(format!("Age: {}", age));
    }
    if let Some(group) = profile.blood_group {
        lines.push(format!("Blood Group: {}", group));
    }
    if let Some(height) = profile.height {
        lines.push(format!("Height: {} cm", height));
    }
    if let Some(weight) = profile.weight {
        lines.push(format!("Weight: {} kg", weight));
    }

    let text_fields = [
        ("Allergies", &profile.allergies),
        ("Chronic Conditions", &profile.chronic_conditions),
        ("Current Medications", &profile.current_medications),
        ("Previous Surgeries", &profile.previous_surgeries),
    ];
    for (label, value) in text_fields {
        if let Some(text) = value.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            lines.push(format!("{}: {}", label, text));
        }
    }
    lines
}
