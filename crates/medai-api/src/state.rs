//! Application state shared across all route handlers.
//!
//! AppState holds the config, the database repositories and the chat
//! pipeline. It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use medai_chat::{ChatOrchestrator, TextCompletion};
use medai_core::config::MedaiConfig;
use medai_storage::{
    ConversationRepository, Database, ProfileRepository, SessionRepository, UserRepository,
};

/// Shared application state.
///
/// All fields are `Arc`s or cheap clones of repositories holding one.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (read-only after startup).
    pub config: Arc<MedaiConfig>,
    pub users: UserRepository,
    pub profiles: ProfileRepository,
    pub conversations: ConversationRepository,
    pub sessions: SessionRepository,
    /// Classify / compose / generate / log pipeline.
    pub chat: Arc<ChatOrchestrator>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState over an opened database and a model backend.
    pub fn new(
        config: MedaiConfig,
        database: Arc<Database>,
        model: Arc<dyn TextCompletion>,
    ) -> Self {
        let profiles = ProfileRepository::new(Arc::clone(&database));
        let conversations = ConversationRepository::new(Arc::clone(&database));
        let chat = ChatOrchestrator::new(
            model,
            profiles.clone(),
            conversations.clone(),
            config.chat.max_message_chars,
        );

        Self {
            users: UserRepository::new(Arc::clone(&database)),
            sessions: SessionRepository::new(database),
            profiles,
            conversations,
            chat: Arc::new(chat),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}
