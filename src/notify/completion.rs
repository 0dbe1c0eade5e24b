//! Turns command outcomes into resource state transitions

use super::resource::ResourceHome;
use crate::core::error::{CommandError, ResourceError};
use crate::core::types::{ResourceId, State};
use crate::system::Metrics;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Receives the outcome of every finished command job.
///
/// Called on a worker thread; implementations must not panic and must not
/// block indefinitely.
pub trait CompletionListener: Send + Sync {
    /// `intended` is the state the job was driving towards; `error` is set
    /// when the command failed
    fn on_complete(&self, resource_id: &ResourceId, intended: State, error: Option<&CommandError>);
}

/// State changes to commit for one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// New current state
    pub state: State,
    /// New target state, for outcomes that also settle the target
    pub target: Option<State>,
    /// The failed job targeted a state with no corrupted mirror
    pub anomaly: bool,
}

/// Decide what a job outcome does to its resource.
///
/// Returns `None` when `intended` is not a legal job target.
pub fn plan_transition(intended: State, failed: bool) -> Option<Transition> {
    if !intended.is_valid_target() {
        return None;
    }
    let transition = match (intended, failed) {
        (State::Destroying, false) => Transition {
            state: State::DestroySucceeded,
            target: Some(State::DestroySucceeded),
            anomaly: false,
        },
        (State::Destroying, true) => Transition {
            state: State::DestroyFailed,
            target: Some(State::DestroyFailed),
            anomaly: false,
        },
        (state, false) => Transition {
            state,
            target: None,
            anomaly: false,
        },
        (state, true) => Transition {
            state: state.corrupted(),
            target: None,
            anomaly: !matches!(state, State::Lifecycle(_)),
        },
    };
    Some(transition)
}

/// Applies job outcomes to resources found through a [`ResourceHome`].
///
/// Every failure on this path is logged and swallowed; delivery is
/// best-effort and never retried.
pub struct CompletionNotifier {
    home: Arc<dyn ResourceHome>,
    metrics: Option<Arc<Metrics>>,
}

impl CompletionNotifier {
    /// Notifier writing to `home`
    pub fn new(home: Arc<dyn ResourceHome>) -> Self {
        Self {
            home,
            metrics: None,
        }
    }

    /// Count applied and dropped notifications in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Variant of [`CompletionListener::on_complete`] for callers holding a
    /// raw state code; unknown codes are logged and dropped
    pub fn on_complete_code(&self, resource_id: &ResourceId, code: i32, error: Option<&CommandError>) {
        match State::from_code(code) {
            Some(intended) => self.on_complete(resource_id, intended, error),
            None => {
                error!(resource = %resource_id, code, "completion for unknown state code dropped");
                self.dropped();
            }
        }
    }

    fn commit(
        &self,
        resource_id: &ResourceId,
        transition: Transition,
        error: Option<&CommandError>,
    ) -> Result<(), ResourceError> {
        let resource = self.home.find(resource_id)?;
        resource.set_state(transition.state, error)?;
        if let Some(target) = transition.target {
            resource.set_target_state(target)?;
        }
        Ok(())
    }

    fn applied(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.jobs.notifications_applied.inc();
        }
    }

    fn dropped(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.jobs.notifications_dropped.inc();
        }
    }
}

impl CompletionListener for CompletionNotifier {
    fn on_complete(&self, resource_id: &ResourceId, intended: State, error: Option<&CommandError>) {
        let Some(transition) = plan_transition(intended, error.is_some()) else {
            error!(resource = %resource_id, %intended, "completion with illegal intended state dropped");
            self.dropped();
            return;
        };
        if transition.anomaly {
            warn!(
                resource = %resource_id,
                %intended,
                "failed job targeted a state with no corrupted mirror, using generic corrupted state"
            );
        }

        match self.commit(resource_id, transition, error) {
            Ok(()) => {
                debug!(resource = %resource_id, state = %transition.state, "state committed");
                self.applied();
            }
            Err(ResourceError::NotFound(_)) => {
                error!(resource = %resource_id, state = %transition.state, "resource vanished before completion");
                self.dropped();
            }
            Err(e) => {
                error!(
                    severity = "fatal",
                    resource = %resource_id,
                    state = %transition.state,
                    error = %e,
                    "could not commit resource state"
                );
                self.dropped();
            }
        }
    }
}
