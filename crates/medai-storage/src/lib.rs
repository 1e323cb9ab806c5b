//! MedAI storage crate - SQLite persistence.
//!
//! Provides a WAL-mode SQLite database with migrations and repositories for
//! users, medical profiles, the conversation log and login sessions.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{
    ConversationRepository, ProfileRepository, SessionRepository, UserRepository,
};
