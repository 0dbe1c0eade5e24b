//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the engine:
//! domain types, error handling, configuration and the wiring that turns a
//! configuration into running services.

pub mod types;
pub mod error;
pub mod config;
pub mod app_state;
pub mod factory;

// Re-export commonly used items
pub use types::{LifecycleState, ResourceId, State};
pub use error::{Error, Result};
pub use config::Config;
pub use app_state::AppState;
pub use factory::create_app_state;
