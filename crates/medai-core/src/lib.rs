pub mod config;
pub mod error;
pub mod types;

pub use config::MedaiConfig;
pub use error::{MedaiError, Result};
pub use types::*;
