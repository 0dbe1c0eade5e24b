//! Built-in command sets
//!
//! | keyword    | backend                                         |
//! |------------|-------------------------------------------------|
//! | `mock`     | in-process simulation ([`mock`])                |
//! | `xenlocal` | workspace-control on this host ([`process`])    |
//! | `xenssh`   | workspace-control on a VMM host over ssh        |

pub mod mock;
pub mod process;

pub use mock::{MockBehavior, MockCommand, MockQuery};
pub use process::{ProcessBackend, ProcessCommand, ProcessQuery, Transport};

use crate::commands::{
    BindingTable, CommandSets, Operation, OperationKind, QueryCommand, QueryOperation,
    WorkspaceCommand,
};
use crate::core::config::BackendConfig;
use std::sync::Arc;

/// Simulated backend keyword
pub const MOCK: &str = "mock";
/// Local workspace-control keyword
pub const XEN_LOCAL: &str = "xenlocal";
/// Remote workspace-control keyword
pub const XEN_SSH: &str = "xenssh";

/// Operations that have nothing to act on at a process backend
const NOT_AT_BACKEND: [Operation; 2] = [
    Operation::CancelUnpropagated,
    Operation::CancelReadyForTransport,
];

/// Lifecycle and query catalogs for the built-in backends
pub struct Backends {
    mock: Arc<MockBehavior>,
    local: Arc<ProcessBackend>,
    ssh: Arc<ProcessBackend>,
}

impl Backends {
    /// Build every built-in backend from the `[backend]` section
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            mock: Arc::new(MockBehavior::from_config(&config.mock)),
            local: Arc::new(ProcessBackend::local_from_config(config)),
            ssh: Arc::new(ProcessBackend::ssh_from_config(config)),
        }
    }

    /// Shared state of the mock backend
    pub fn mock(&self) -> &Arc<MockBehavior> {
        &self.mock
    }

    /// Remote host for `keyword`, if it names a remote set
    pub fn host_for(&self, keyword: &str) -> Option<&str> {
        match keyword {
            XEN_SSH => self.ssh.host(),
            _ => None,
        }
    }

    /// Catalog for the lifecycle factory
    pub fn lifecycle_sets(&self) -> CommandSets<Operation, dyn WorkspaceCommand> {
        let mut sets = CommandSets::new();

        let mock = Arc::clone(&self.mock);
        let table = Operation::ALL.iter().fold(BindingTable::new(), |table, op| {
            let op = *op;
            let behavior = Arc::clone(&mock);
            table.bind(op, move || {
                Ok(Box::new(MockCommand::new(op, Arc::clone(&behavior))) as Box<dyn WorkspaceCommand>)
            })
        });
        sets.register(MOCK, table);

        sets.register(XEN_LOCAL, process_table(&self.local));
        sets.register(XEN_SSH, process_table(&self.ssh));
        sets
    }

    /// Catalog for the query factory
    pub fn query_sets(&self) -> CommandSets<QueryOperation, dyn QueryCommand> {
        let mut sets = CommandSets::new();

        let mock = Arc::clone(&self.mock);
        sets.register(
            MOCK,
            BindingTable::new().bind(QueryOperation::Status, move || {
                Ok(Box::new(MockQuery::new(Arc::clone(&mock))) as Box<dyn QueryCommand>)
            }),
        );

        for (keyword, backend) in [(XEN_LOCAL, &self.local), (XEN_SSH, &self.ssh)] {
            let backend = Arc::clone(backend);
            sets.register(
                keyword,
                BindingTable::new().bind(QueryOperation::Status, move || {
                    backend.check()?;
                    Ok(Box::new(ProcessQuery::new(Arc::clone(&backend))) as Box<dyn QueryCommand>)
                }),
            );
        }
        sets
    }
}

fn process_table(backend: &Arc<ProcessBackend>) -> BindingTable<Operation, dyn WorkspaceCommand> {
    let mut table = BindingTable::new();
    for op in Operation::ALL.iter().copied() {
        if NOT_AT_BACKEND.contains(&op) {
            table = table.unsupported(op);
            continue;
        }
        let backend = Arc::clone(backend);
        table = table.bind(op, move || {
            backend.check()?;
            Ok(Box::new(ProcessCommand::new(op, Arc::clone(&backend))) as Box<dyn WorkspaceCommand>)
        });
    }
    table
}
