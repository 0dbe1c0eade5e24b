//! Completion path: from a finished job to a committed resource state

pub mod completion;
pub mod resource;

pub use completion::{plan_transition, CompletionListener, CompletionNotifier, Transition};
pub use resource::{
    InMemoryResourceHome, Resource, ResourceHome, ResourceSnapshot, VmResource, DEFAULT_LOCK_TIMEOUT,
};
