//! MedAI API crate - axum HTTP server, auth and route handlers.
//!
//! Provides registration and login, the profile and conversation history
//! endpoints, and the medical chat endpoint.

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
