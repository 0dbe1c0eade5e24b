//! VMM Dispatch - elastic job dispatch for VM lifecycle control
//!
//! The control-plane core of a VM manager: lifecycle commands for virtual
//! machines are resolved through a completeness-checked command factory,
//! executed asynchronously by an elastic pool of worker threads, and their
//! outcomes are fed back into the owning resource's state, with failures
//! mapped to corrupted states.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod dispatch;
pub mod commands;
pub mod backends;
pub mod notify;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{create_app_state, AppState, Config, Error, Result, ResourceId, State};
pub use dispatch::{Dispatcher, DispatcherOptions};

use crate::core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing for the process.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(logging.ansi)
        .with_thread_names(true);

    let installed = match logging.format.as_str() {
        "compact" => builder.compact().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!("Initializing {} v{}", NAME, VERSION);
    Ok(())
}
