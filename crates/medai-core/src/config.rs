use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MedaiError, Result};

/// Top-level configuration for the MedAI service.
///
/// Loaded from `~/.medai/config.toml` by default. Each section corresponds
/// to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedaiConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl MedaiConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MedaiConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MedaiError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.medai/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS. Empty means same-origin only.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            allowed_origins: vec![
                "http://127.0.0.1:5000".to_string(),
                "http://localhost:5000".to_string(),
            ],
        }
    }
}

/// Hosted generative model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the Generative Language REST API.
    pub api_base: String,
    /// Model used for both classification and generation.
    pub model: String,
    /// API key. `GOOGLE_API_KEY` takes precedence when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: environment first, then the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var("GOOGLE_API_KEY")
            .ok()
            .or_else(|| self.api_key.clone())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Upper bound on conversation turns shown at once.
pub const MAX_HISTORY_LIMIT: u32 = 20;

/// Chat endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum accepted message length in characters (after trimming).
    pub max_message_chars: usize,
    /// Number of conversation turns returned for display, at most
    /// [`MAX_HISTORY_LIMIT`].
    pub history_limit: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4000,
            history_limit: MAX_HISTORY_LIMIT,
        }
    }
}

impl ChatConfig {
    /// The configured history limit held to `1..=MAX_HISTORY_LIMIT`.
    pub fn display_limit(&self) -> u32 {
        self.history_limit.clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// Password hashing and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// PBKDF2-HMAC-SHA256 iteration count for new password hashes.
    pub pbkdf2_iterations: u32,
    /// Lifetime of a login session in hours.
    pub session_ttl_hours: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 600_000,
            session_ttl_hours: 168,
        }
    }
}
