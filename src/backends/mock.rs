//! In-process simulated backend
//!
//! Sleeps for a configurable time and succeeds, unless the operation is
//! listed for failure injection. Used for demos, tests and benchmarks.

use crate::commands::{
    Operation, OperationKind, QueryCommand, QueryOperation, RequestContext, WorkspaceCommand,
};
use crate::core::config::MockConfig;
use crate::core::error::CommandError;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Behavior shared by every mock command built from one configuration
#[derive(Debug, Default)]
pub struct MockBehavior {
    delay: Duration,
    jitter: Duration,
    fail_operations: HashSet<String>,
    executions: AtomicUsize,
    failures: AtomicUsize,
}

impl MockBehavior {
    /// Behavior described by the `[backend.mock]` section
    pub fn from_config(config: &MockConfig) -> Self {
        Self {
            delay: config.delay,
            jitter: config.jitter,
            fail_operations: config.fail_operations.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Instant, always-succeeding behavior
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Make `operation` fail with an injected backend error
    pub fn failing(mut self, operation: &str) -> Self {
        self.fail_operations.insert(operation.to_string());
        self
    }

    /// Commands executed so far, failed ones included
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Commands that failed by injection
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn simulate(&self, operation: &'static str) -> Result<(), CommandError> {
        let pause = self.pause();
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        self.executions.fetch_add(1, Ordering::SeqCst);

        if self.fail_operations.contains(operation) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CommandError::Backend {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    // delay +/- jitter, never negative
    fn pause(&self) -> Duration {
        let jitter = self.jitter.as_millis() as u64;
        if jitter == 0 {
            return self.delay;
        }
        let offset = rand::rng().random_range(0..=2 * jitter);
        let millis = (self.delay.as_millis() as u64 + offset).saturating_sub(jitter);
        Duration::from_millis(millis)
    }
}

/// Simulated lifecycle command
pub struct MockCommand {
    operation: Operation,
    behavior: Arc<MockBehavior>,
    context: Option<RequestContext>,
}

impl MockCommand {
    /// Command for `operation` using shared `behavior`
    pub fn new(operation: Operation, behavior: Arc<MockBehavior>) -> Self {
        Self {
            operation,
            behavior,
            context: None,
        }
    }
}

impl WorkspaceCommand for MockCommand {
    fn set_request_context(&mut self, context: RequestContext) {
        self.context = Some(context);
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        let operation = self.operation.name();
        let context = self
            .context
            .as_ref()
            .ok_or(CommandError::MissingContext { operation })?;
        debug!(resource = %context.resource_id, operation, "mock backend executing");
        self.behavior.simulate(operation)
    }
}

/// Simulated status query; always reports the VM as running
pub struct MockQuery {
    behavior: Arc<MockBehavior>,
    context: Option<RequestContext>,
}

impl MockQuery {
    /// Query using shared `behavior`
    pub fn new(behavior: Arc<MockBehavior>) -> Self {
        Self {
            behavior,
            context: None,
        }
    }
}

impl QueryCommand for MockQuery {
    fn set_request_context(&mut self, context: RequestContext) {
        self.context = Some(context);
    }

    fn execute(&mut self) -> Result<String, CommandError> {
        let operation = QueryOperation::Status.name();
        let context = self
            .context
            .as_ref()
            .ok_or(CommandError::MissingContext { operation })?;
        self.behavior.simulate(operation)?;
        Ok(format!("{}: running", context.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceId;
    use std::path::PathBuf;
    use std::time::Instant;

    fn context() -> RequestContext {
        RequestContext::new(ResourceId::new("vm-1"), "web-1", PathBuf::from("/tmp"))
    }

    #[test]
    fn injected_failures_hit_only_listed_operations() {
        let behavior = Arc::new(MockBehavior::immediate().failing("reboot"));

        let mut start = MockCommand::new(Operation::Start, Arc::clone(&behavior));
        start.set_request_context(context());
        assert!(start.execute().is_ok());

        let mut reboot = MockCommand::new(Operation::Reboot, Arc::clone(&behavior));
        reboot.set_request_context(context());
        let err = reboot.execute().unwrap_err();
        assert_eq!(err.to_string(), "reboot failed at backend: injected failure");

        assert_eq!(behavior.executions(), 2);
        assert_eq!(behavior.failures(), 1);
    }

    #[test]
    fn context_is_required() {
        let mut command = MockCommand::new(Operation::Pause, Arc::new(MockBehavior::immediate()));
        assert!(matches!(
            command.execute(),
            Err(CommandError::MissingContext { operation: "pause" })
        ));
    }

    #[test]
    fn query_reports_running() {
        let mut query = MockQuery::new(Arc::new(MockBehavior::immediate()));
        query.set_request_context(context());
        assert_eq!(query.execute().unwrap(), "web-1: running");
    }

    #[test]
    fn delay_is_honored_within_jitter() {
        let behavior = MockBehavior::from_config(&MockConfig {
            delay: Duration::from_millis(20),
            jitter: Duration::from_millis(10),
            fail_operations: Vec::new(),
        });
        for _ in 0..20 {
            let pause = behavior.pause();
            assert!(pause >= Duration::from_millis(10) && pause <= Duration::from_millis(30));
        }

        let started = Instant::now();
        behavior.simulate("start").unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
