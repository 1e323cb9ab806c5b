//! Error types for the chat pipeline.

/// Errors from the chat pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("LLM error: {0}")]
    LlmError(String),
    #[error("invalid chat request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(4000).to_string(),
            "message exceeds maximum length of 4000 characters"
        );
        assert_eq!(
            ChatError::LlmError("quota exhausted".to_string()).to_string(),
            "LLM error: quota exhausted"
        );
        assert_eq!(
            ChatError::InvalidRequest("message must be a string".to_string()).to_string(),
            "invalid chat request: message must be a string"
        );
    }

    #[test]
    fn test_errors_implement_debug() {
        let dbg = format!("{:?}", ChatError::MessageTooLong(1));
        assert!(dbg.contains("MessageTooLong"));
    }
}
