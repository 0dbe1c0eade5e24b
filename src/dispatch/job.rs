//! Units of work executed by the worker pool

use crate::commands::{Operation, OperationKind, RequestContext, WorkspaceCommand};
use crate::core::error::CommandError;
use crate::core::types::{ResourceId, State};
use crate::notify::CompletionListener;
use crate::system::metrics::{Metrics, Timer};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// One unit of enqueued work.
///
/// A job is owned by exactly one worker once dequeued. It must deal with its
/// own failures: the pool calls `execute` and moves on regardless of outcome.
pub trait Job: Send {
    /// Resource the job acts on
    fn resource_id(&self) -> &ResourceId;

    /// Run the job to completion, consuming it
    fn execute(self: Box<Self>);
}

/// Runs one backend command and reports its outcome to a completion listener
pub struct CommandJob {
    resource_id: ResourceId,
    operation: Operation,
    intended_state: State,
    command: Box<dyn WorkspaceCommand>,
    listener: Arc<dyn CompletionListener>,
    metrics: Option<Arc<Metrics>>,
    span: tracing::Span,
}

impl CommandJob {
    /// Bind `command` to its request context and wrap it as a job.
    ///
    /// `intended_state` is the state the resource should reach if the command
    /// succeeds; the listener receives it together with any error.
    pub fn new(
        operation: Operation,
        intended_state: State,
        mut command: Box<dyn WorkspaceCommand>,
        context: RequestContext,
        listener: Arc<dyn CompletionListener>,
    ) -> Self {
        let resource_id = context.resource_id.clone();
        let span = context.span.clone();
        command.set_request_context(context);
        Self {
            resource_id,
            operation,
            intended_state,
            command,
            listener,
            metrics: None,
            span,
        }
    }

    /// Record execution counts and durations into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Operation this job runs
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// State the resource moves to on success
    pub fn intended_state(&self) -> State {
        self.intended_state
    }
}

impl Job for CommandJob {
    fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    fn execute(self: Box<Self>) {
        let CommandJob {
            resource_id,
            operation,
            intended_state,
            mut command,
            listener,
            metrics,
            span,
        } = *self;
        let _entered = span.enter();

        let timer = metrics
            .as_ref()
            .map(|m| Timer::start(m.jobs.duration.clone()));

        let result = match panic::catch_unwind(AssertUnwindSafe(|| command.execute())) {
            Ok(result) => result,
            Err(payload) => Err(CommandError::Panicked {
                operation: operation.name(),
                message: panic_message(payload.as_ref()),
            }),
        };

        if let Some(timer) = timer {
            timer.finish();
        }
        if let Some(metrics) = &metrics {
            metrics.jobs.record(result.is_err());
        }

        match &result {
            Ok(()) => debug!(resource = %resource_id, %operation, "command succeeded"),
            Err(e) => warn!(resource = %resource_id, %operation, error = %e, "command failed"),
        }

        listener.on_complete(&resource_id, intended_state, result.err().as_ref());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
