use thiserror::Error;

/// Top-level error type for the MedAI service.
///
/// Subsystem crates define their own error types and implement
/// `From<MedaiError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MedaiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Username already exists")]
    DuplicateUsername,

    #[error("Email already exists")]
    DuplicateEmail,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<toml::de::Error> for MedaiError {
    fn from(err: toml::de::Error) -> Self {
        MedaiError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MedaiError {
    fn from(err: toml::ser::Error) -> Self {
        MedaiError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MedaiError {
    fn from(err: serde_json::Error) -> Self {
        MedaiError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for MedAI operations.
pub type Result<T> = std::result::Result<T, MedaiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MedaiError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            MedaiError::DuplicateUsername.to_string(),
            "Username already exists"
        );
        assert_eq!(MedaiError::DuplicateEmail.to_string(), "Email already exists");
        assert_eq!(
            MedaiError::InvalidCredentials.to_string(),
            "Invalid username or password"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MedaiError = io_err.into();
        assert!(matches!(err, MedaiError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let medai_err: MedaiError = err.unwrap_err().into();
        assert!(matches!(medai_err, MedaiError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let medai_err: MedaiError = err.unwrap_err().into();
        assert!(matches!(medai_err, MedaiError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
