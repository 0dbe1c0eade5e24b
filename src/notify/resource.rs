//! Resource contracts and an in-memory resource home
//!
//! The completion path only needs two things from the resource layer: find
//! a resource by id, and set its current and target state. Anything that
//! can do that (a persistence-backed home, a cache) plugs in through
//! [`ResourceHome`] and [`Resource`].

use crate::core::error::{CommandError, ResourceError};
use crate::core::types::{ResourceId, State};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How long a state update waits for a contended resource by default
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A VM whose state the completion path can update
pub trait Resource: Send + Sync {
    /// Identifier in its home
    fn id(&self) -> &ResourceId;

    /// Commit the current state, with the error that caused it if any
    fn set_state(&self, state: State, error: Option<&CommandError>) -> Result<(), ResourceError>;

    /// Commit the target state
    fn set_target_state(&self, state: State) -> Result<(), ResourceError>;
}

/// Lookup of resources by id
pub trait ResourceHome: Send + Sync {
    /// The resource, or [`ResourceError::NotFound`] if it no longer exists
    fn find(&self, id: &ResourceId) -> Result<Arc<dyn Resource>, ResourceError>;
}

/// Point-in-time view of a [`VmResource`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Resource identifier
    pub id: ResourceId,
    /// Display name
    pub name: String,
    /// Current state
    pub state: State,
    /// Numeric code of `state`
    pub state_code: i32,
    /// Target state, once one was committed
    pub target: Option<State>,
    /// Message of the error behind the last failed transition
    pub last_error: Option<String>,
    /// State changes committed so far
    pub transitions: u64,
    /// Milliseconds since the epoch of the last change
    pub updated_at_ms: u64,
}

#[derive(Debug)]
struct Status {
    state: State,
    target: Option<State>,
    last_error: Option<String>,
    transitions: u64,
    updated_at_ms: u64,
}

/// In-memory VM resource guarded by a bounded-wait lock
#[derive(Debug)]
pub struct VmResource {
    id: ResourceId,
    name: String,
    lock_timeout: Duration,
    status: Mutex<Status>,
}

impl VmResource {
    /// New resource in `initial` state
    pub fn new(id: ResourceId, name: impl Into<String>, initial: State, lock_timeout: Duration) -> Self {
        Self {
            id,
            name: name.into(),
            lock_timeout,
            status: Mutex::new(Status {
                state: initial,
                target: None,
                last_error: None,
                transitions: 0,
                updated_at_ms: now_ms(),
            }),
        }
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> Result<State, ResourceError> {
        Ok(self.lock()?.state)
    }

    /// Target state, if one was committed
    pub fn target_state(&self) -> Result<Option<State>, ResourceError> {
        Ok(self.lock()?.target)
    }

    /// Copy out the full status
    pub fn snapshot(&self) -> Result<ResourceSnapshot, ResourceError> {
        let status = self.lock()?;
        Ok(ResourceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: status.state,
            state_code: status.state.code(),
            target: status.target,
            last_error: status.last_error.clone(),
            transitions: status.transitions,
            updated_at_ms: status.updated_at_ms,
        })
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, Status>, ResourceError> {
        self.status
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| ResourceError::LockTimeout {
                id: self.id.clone(),
                waited: self.lock_timeout,
            })
    }
}

impl Resource for VmResource {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn set_state(&self, state: State, error: Option<&CommandError>) -> Result<(), ResourceError> {
        let mut status = self.lock()?;
        status.state = state;
        status.last_error = error.map(ToString::to_string);
        status.transitions += 1;
        status.updated_at_ms = now_ms();
        Ok(())
    }

    fn set_target_state(&self, state: State) -> Result<(), ResourceError> {
        let mut status = self.lock()?;
        status.target = Some(state);
        status.updated_at_ms = now_ms();
        Ok(())
    }
}

/// Concurrent map of [`VmResource`]s
pub struct InMemoryResourceHome {
    resources: DashMap<ResourceId, Arc<VmResource>>,
    lock_timeout: Duration,
}

impl InMemoryResourceHome {
    /// Empty home; resources it creates use `lock_timeout`
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            resources: DashMap::new(),
            lock_timeout,
        }
    }

    /// Create and register a resource with a generated id
    pub fn create(&self, name: impl Into<String>, initial: State) -> Arc<VmResource> {
        let resource = Arc::new(VmResource::new(
            ResourceId::generate(),
            name,
            initial,
            self.lock_timeout,
        ));
        self.insert(Arc::clone(&resource));
        resource
    }

    /// Register an existing resource, replacing any with the same id
    pub fn insert(&self, resource: Arc<VmResource>) {
        self.resources.insert(resource.id.clone(), resource);
    }

    /// Forget a resource
    pub fn remove(&self, id: &ResourceId) -> Option<Arc<VmResource>> {
        self.resources.remove(id).map(|(_, r)| r)
    }

    /// Concrete resource by id
    pub fn get(&self, id: &ResourceId) -> Option<Arc<VmResource>> {
        self.resources.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Snapshots of every resource whose lock could be taken
    pub fn snapshots(&self) -> Vec<ResourceSnapshot> {
        let mut all: Vec<ResourceSnapshot> = self
            .resources
            .iter()
            .filter_map(|entry| entry.value().snapshot().ok())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for InMemoryResourceHome {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl ResourceHome for InMemoryResourceHome {
    fn find(&self, id: &ResourceId) -> Result<Arc<dyn Resource>, ResourceError> {
        match self.get(id) {
            Some(resource) => Ok(resource),
            None => Err(ResourceError::NotFound(id.clone())),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LifecycleState;

    #[test]
    fn home_finds_created_resources() {
        let home = InMemoryResourceHome::default();
        let vm = home.create("web-1", LifecycleState::Propagated.into());
        assert_eq!(home.len(), 1);
        assert_eq!(home.find(vm.id()).unwrap().id(), vm.id());

        home.remove(vm.id());
        assert!(matches!(home.find(vm.id()), Err(ResourceError::NotFound(_))));
        assert!(home.is_empty());
    }

    #[test]
    fn contended_lock_times_out() {
        let vm = VmResource::new(
            ResourceId::new("vm-1"),
            "web-1",
            State::RUNNING,
            Duration::from_millis(20),
        );
        let _held = vm.status.lock();
        match vm.set_state(State::DestroySucceeded, None) {
            Err(ResourceError::LockTimeout { id, waited }) => {
                assert_eq!(id.as_str(), "vm-1");
                assert_eq!(waited, Duration::from_millis(20));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn snapshot_serializes() {
        let vm = VmResource::new(ResourceId::new("vm-2"), "db", State::RUNNING, DEFAULT_LOCK_TIMEOUT);
        let err = CommandError::Backend {
            operation: "pause",
            message: "busy".to_string(),
        };
        vm.set_state(State::Corrupted(LifecycleState::Paused), Some(&err)).unwrap();

        let snapshot = vm.snapshot().unwrap();
        assert_eq!(snapshot.state_code, 106);
        assert_eq!(snapshot.transitions, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("pause failed at backend: busy"));

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ResourceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
