//! Factory for wiring the engine together
//!
//! Builds every service from a [`Config`] in dependency order and refuses
//! to return an [`AppState`] if any command set fails validation, so a
//! misconfigured service never starts accepting work.

use crate::backends::Backends;
use crate::commands::{
    LifecycleCommandFactory, Operation, OperationFamily, QueryCommandFactory,
};
use crate::core::app_state::AppState;
use crate::core::config::{CommandConfig, Config};
use crate::core::error::Result;
use crate::dispatch::Dispatcher;
use crate::notify::{CompletionNotifier, ResourceHome};
use crate::system::Metrics;
use std::sync::Arc;
use tracing::info;

/// Create the application state with every service initialized
pub fn create_app_state(config: Config, home: Arc<dyn ResourceHome>) -> Result<AppState> {
    config.validate()?;

    let metrics = Arc::new(Metrics::new()?);
    let backends = Backends::new(&config.backend);

    let lifecycle = Arc::new(LifecycleCommandFactory::new("lifecycle"));
    lifecycle.init(
        &config.commands.command_set,
        &backends.lifecycle_sets(),
        &disabled_operations(&config.commands),
    )?;

    let queries = Arc::new(QueryCommandFactory::new("query"));
    queries.init(&config.commands.query_command_set, &backends.query_sets(), &[])?;

    let notifier = Arc::new(CompletionNotifier::new(home).with_metrics(Arc::clone(&metrics)));

    let dispatcher = Arc::new(Dispatcher::with_drain_timeout(
        Arc::clone(&metrics),
        config.dispatcher.drain_timeout,
    ));
    dispatcher.set_options(config.dispatcher.options())?;

    info!(
        command_set = %config.commands.command_set,
        query_command_set = %config.commands.query_command_set,
        initial_threads = config.dispatcher.initial_threads,
        max_threads = config.dispatcher.max_threads,
        "engine wired"
    );

    Ok(AppState::new(
        config, metrics, dispatcher, lifecycle, queries, notifier, backends,
    ))
}

fn disabled_operations(commands: &CommandConfig) -> Vec<Operation> {
    let mut disabled = Vec::new();
    if commands.disable_propagation {
        disabled.extend_from_slice(OperationFamily::Propagation.members());
    }
    if commands.disable_ready_for_transport {
        disabled.extend_from_slice(OperationFamily::ReadyForTransport.members());
    }
    disabled
}
