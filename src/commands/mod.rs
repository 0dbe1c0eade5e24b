//! Backend commands and the factories that resolve them
//!
//! A command is a single-use executable unit for one abstract operation on
//! one VM. The caller obtains a fresh instance from a factory, hands it a
//! [`RequestContext`] and wraps it in a job; the worker runs it.

pub mod operation;
pub mod factory;

pub use factory::{
    BindingTable, CommandFactory, CommandSets, Constructor, LifecycleCommandFactory,
    QueryCommandFactory,
};
pub use operation::{Operation, OperationFamily, OperationKind, QueryOperation};

use crate::core::error::CommandError;
use crate::core::types::ResourceId;
use std::path::PathBuf;

/// Everything a command needs to know about the request it serves
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// VM being acted on
    pub resource_id: ResourceId,
    /// Display name passed to the backend
    pub name: String,
    /// Directory for per-request scratch files
    pub temp_dir: PathBuf,
    /// Backend host or handle, when the command set targets one
    pub backend: Option<String>,
    /// Span the command's log events are recorded under
    pub span: tracing::Span,
}

impl RequestContext {
    /// Build a context with a span tagged by resource id
    pub fn new(resource_id: ResourceId, name: impl Into<String>, temp_dir: PathBuf) -> Self {
        let name = name.into();
        let span = tracing::info_span!("vm", resource = %resource_id, name = %name);
        Self {
            resource_id,
            name,
            temp_dir,
            backend: None,
            span,
        }
    }

    /// Attach a backend handle
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Per-resource scratch file path: `<temp_dir>/<resource_id>-<suffix>`
    pub fn temp_file(&self, suffix: &str) -> PathBuf {
        self.temp_dir.join(format!("{}-{}", self.resource_id, suffix))
    }
}

/// A lifecycle command
pub trait WorkspaceCommand: Send {
    /// Bind the command to its request; called once before `execute`
    fn set_request_context(&mut self, context: RequestContext);

    /// Run against the backend
    fn execute(&mut self) -> Result<(), CommandError>;
}

/// A backend status query
pub trait QueryCommand: Send {
    /// Bind the command to its request; called once before `execute`
    fn set_request_context(&mut self, context: RequestContext);

    /// Run against the backend and return its raw answer
    fn execute(&mut self) -> Result<String, CommandError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_files_are_namespaced_by_resource() {
        let ctx = RequestContext::new(ResourceId::new("vm-7"), "web", PathBuf::from("/var/tmp/vmd"));
        assert_eq!(ctx.temp_file("net"), PathBuf::from("/var/tmp/vmd/vm-7-net"));
        assert_eq!(ctx.backend, None);
        assert_eq!(ctx.with_backend("vmm3").backend.as_deref(), Some("vmm3"));
    }
}
