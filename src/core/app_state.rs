//! Application State Management
//!
//! This module defines the central AppState that holds the engine's
//! services: metrics, both command factories, the completion notifier and
//! the dispatcher. It is built by [`crate::core::factory::create_app_state`].

use crate::backends::Backends;
use crate::commands::{
    LifecycleCommandFactory, Operation, OperationKind, QueryCommandFactory, QueryOperation,
    RequestContext,
};
use crate::core::config::Config;
use crate::core::error::{CommandError, Result};
use crate::core::types::{ResourceId, State};
use crate::dispatch::{CommandJob, Dispatcher};
use crate::notify::{CompletionListener, CompletionNotifier};
use crate::system::Metrics;
use std::sync::Arc;
use tracing::{debug, info};

/// Central application state holding all services and components
pub struct AppState {
    /// Application configuration
    pub config: Config,

    /// Metrics registry shared by every component
    pub metrics: Arc<Metrics>,

    /// Job dispatcher
    pub dispatcher: Arc<Dispatcher>,

    /// Lifecycle command factory, initialized
    pub lifecycle: Arc<LifecycleCommandFactory>,

    /// Query command factory, initialized
    pub queries: Arc<QueryCommandFactory>,

    /// Completion notifier every submitted job reports to
    pub notifier: Arc<CompletionNotifier>,

    /// Built-in backends
    pub backends: Backends,
}

impl AppState {
    /// Create a new AppState from already initialized services.
    /// This is called by the factory after all services are initialized
    pub fn new(
        config: Config,
        metrics: Arc<Metrics>,
        dispatcher: Arc<Dispatcher>,
        lifecycle: Arc<LifecycleCommandFactory>,
        queries: Arc<QueryCommandFactory>,
        notifier: Arc<CompletionNotifier>,
        backends: Backends,
    ) -> Self {
        Self {
            config,
            metrics,
            dispatcher,
            lifecycle,
            queries,
            notifier,
            backends,
        }
    }

    /// Resolve `operation` and queue it for `resource_id`.
    ///
    /// On completion the resource moves to `intended`, or to its corrupted
    /// mirror on failure. Returns `Ok(false)` if the dispatcher is stopped
    /// and the job was dropped. Operations the active command set does not
    /// implement fail with [`CommandError::Unsupported`].
    pub fn submit(
        &self,
        resource_id: ResourceId,
        name: &str,
        operation: Operation,
        intended: State,
    ) -> Result<bool> {
        let Some(command) = self.lifecycle.get(operation)? else {
            return Err(CommandError::Unsupported {
                operation: operation.name(),
                command_set: self.lifecycle.command_set().unwrap_or_default().to_string(),
            }
            .into());
        };

        let context = self.context(resource_id, name, self.lifecycle.command_set());
        debug!(resource = %context.resource_id, %operation, %intended, "submitting job");

        let listener: Arc<dyn CompletionListener> = self.notifier.clone();
        let job = CommandJob::new(operation, intended, command, context, listener)
            .with_metrics(Arc::clone(&self.metrics));
        Ok(self.dispatcher.add_job(Box::new(job)))
    }

    /// Ask the backend for a VM's status, synchronously on this thread
    pub fn query_status(&self, resource_id: ResourceId, name: &str) -> Result<String> {
        let Some(mut command) = self.queries.get(QueryOperation::Status)? else {
            return Err(CommandError::Unsupported {
                operation: QueryOperation::Status.name(),
                command_set: self.queries.command_set().unwrap_or_default().to_string(),
            }
            .into());
        };
        command.set_request_context(self.context(resource_id, name, self.queries.command_set()));
        Ok(command.execute()?)
    }

    /// Start the baseline workers
    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Stop the dispatcher and wait for in-flight jobs to drain
    pub fn shutdown(&self) {
        info!("shutting down");
        self.dispatcher.stop();
    }

    /// Prometheus text export of every metric
    pub fn metrics_report(&self) -> Result<String> {
        self.metrics.gather_text()
    }

    fn context(&self, resource_id: ResourceId, name: &str, command_set: Option<&str>) -> RequestContext {
        let context = RequestContext::new(resource_id, name, self.config.commands.temp_dir.clone());
        match command_set.and_then(|set| self.backends.host_for(set)) {
            Some(host) => context.with_backend(host),
            None => context,
        }
    }
}
