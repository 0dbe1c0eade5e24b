//! Completeness-checked registry of command constructors
//!
//! A command set is a [`BindingTable`]: for every operation either a
//! constructor or an explicit "unsupported" marker. [`CommandFactory::init`]
//! picks one set by keyword, applies deployment-wide disables, checks that
//! every operation in [`OperationKind::ALL`] is covered and that each
//! constructor actually produces a command, then freezes the result. After
//! that the table never changes.

use super::operation::{Operation, OperationKind, QueryOperation};
use super::{QueryCommand, WorkspaceCommand};
use crate::core::error::{BindingProblem, FactoryError};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Builds a fresh command; `Err` carries a human-readable reason
pub type Constructor<C> = Arc<dyn Fn() -> Result<Box<C>, String> + Send + Sync>;

/// Factory for the twenty lifecycle operations
pub type LifecycleCommandFactory = CommandFactory<Operation, dyn WorkspaceCommand>;

/// Factory for backend status queries
pub type QueryCommandFactory = CommandFactory<QueryOperation, dyn QueryCommand>;

/// Operation bindings for one backend
pub struct BindingTable<O: OperationKind, C: ?Sized> {
    entries: HashMap<O, Option<Constructor<C>>>,
}

impl<O: OperationKind, C: ?Sized> BindingTable<O, C> {
    /// Empty table; every operation starts out missing
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Bind `op` to a constructor
    pub fn bind<F>(mut self, op: O, constructor: F) -> Self
    where
        F: Fn() -> Result<Box<C>, String> + Send + Sync + 'static,
    {
        self.entries.insert(op, Some(Arc::new(constructor)));
        self
    }

    /// Bind several operations to one shared constructor
    pub fn bind_all(mut self, ops: &[O], constructor: Constructor<C>) -> Self {
        for op in ops {
            self.entries.insert(*op, Some(Arc::clone(&constructor)));
        }
        self
    }

    /// Mark `op` as explicitly not implemented by this backend
    pub fn unsupported(mut self, op: O) -> Self {
        self.entries.insert(op, None);
        self
    }

    /// Entry for `op`: `None` if missing, `Some(None)` if unsupported
    pub fn entry(&self, op: O) -> Option<&Option<Constructor<C>>> {
        self.entries.get(&op)
    }

    /// Number of bound or explicitly unsupported operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<O: OperationKind, C: ?Sized> Clone for BindingTable<O, C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<O: OperationKind, C: ?Sized> Default for BindingTable<O, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog of command sets by keyword
pub struct CommandSets<O: OperationKind, C: ?Sized> {
    sets: HashMap<String, BindingTable<O, C>>,
}

impl<O: OperationKind, C: ?Sized> CommandSets<O, C> {
    /// Empty catalog
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Add or replace the set named `keyword`
    pub fn register(&mut self, keyword: impl Into<String>, table: BindingTable<O, C>) -> &mut Self {
        self.sets.insert(keyword.into(), table);
        self
    }

    /// Look a set up
    pub fn get(&self, keyword: &str) -> Option<&BindingTable<O, C>> {
        self.sets.get(keyword)
    }

    /// Registered keywords, sorted
    pub fn keywords(&self) -> Vec<&str> {
        let mut keywords: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        keywords.sort_unstable();
        keywords
    }
}

impl<O: OperationKind, C: ?Sized> Default for CommandSets<O, C> {
    fn default() -> Self {
        Self::new()
    }
}

struct Resolved<O: OperationKind, C: ?Sized> {
    command_set: String,
    table: HashMap<O, Option<Constructor<C>>>,
}

/// Resolves operations to fresh command instances for one command set
pub struct CommandFactory<O: OperationKind, C: ?Sized> {
    label: &'static str,
    init_called: AtomicBool,
    resolved: OnceCell<Resolved<O, C>>,
}

impl<O: OperationKind, C: ?Sized> CommandFactory<O, C> {
    /// Create an uninitialized factory; `label` names it in logs and errors
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            init_called: AtomicBool::new(false),
            resolved: OnceCell::new(),
        }
    }

    /// Select and validate the command set named `keyword`.
    ///
    /// `disabled` operations are rebound to "unsupported" before the check.
    /// All problems are collected and reported in one error. May be called
    /// once; later calls fail with [`FactoryError::AlreadyInitialized`].
    pub fn init(
        &self,
        keyword: &str,
        sets: &CommandSets<O, C>,
        disabled: &[O],
    ) -> Result<(), FactoryError> {
        if self.init_called.swap(true, Ordering::SeqCst) {
            return Err(FactoryError::AlreadyInitialized {
                factory: self.label,
            });
        }

        let Some(table) = sets.get(keyword) else {
            error!(
                severity = "fatal",
                factory = self.label,
                command_set = keyword,
                known = ?sets.keywords(),
                "unknown command set"
            );
            return Err(FactoryError::UnknownCommandSet(keyword.to_string()));
        };

        let mut entries = table.entries.clone();
        for op in disabled {
            debug!(factory = self.label, operation = op.name(), "operation disabled");
            entries.insert(*op, None);
        }

        let problems = validate_bindings(&entries);
        if !problems.is_empty() {
            for problem in &problems {
                error!(
                    severity = "fatal",
                    factory = self.label,
                    command_set = keyword,
                    %problem,
                    "command set validation failed"
                );
            }
            return Err(FactoryError::Validation {
                command_set: keyword.to_string(),
                problems,
            });
        }

        let supported = entries.values().filter(|e| e.is_some()).count();
        let resolved = Resolved {
            command_set: keyword.to_string(),
            table: entries,
        };
        if self.resolved.set(resolved).is_err() {
            return Err(FactoryError::AlreadyInitialized {
                factory: self.label,
            });
        }

        info!(
            factory = self.label,
            command_set = keyword,
            supported,
            total = O::ALL.len(),
            "command factory initialized"
        );
        Ok(())
    }

    /// A fresh command for `op`, or `None` if the set does not support it
    pub fn get(&self, op: O) -> Result<Option<Box<C>>, FactoryError> {
        let resolved = self.resolved()?;
        match resolved.table.get(&op) {
            Some(Some(constructor)) => constructor()
                .map(Some)
                .map_err(|reason| FactoryError::Instantiation {
                    operation: op.name(),
                    reason,
                }),
            _ => Ok(None),
        }
    }

    /// Whether `op` has an implementation; false before init
    pub fn is_supported(&self, op: O) -> bool {
        self.resolved
            .get()
            .and_then(|r| r.table.get(&op))
            .map_or(false, Option::is_some)
    }

    /// Keyword of the active set, once initialized
    pub fn command_set(&self) -> Option<&str> {
        self.resolved.get().map(|r| r.command_set.as_str())
    }

    /// Name used in logs
    pub fn label(&self) -> &'static str {
        self.label
    }

    fn resolved(&self) -> Result<&Resolved<O, C>, FactoryError> {
        self.resolved.get().ok_or(FactoryError::NotInitialized {
            factory: self.label,
        })
    }
}

/// Check that every operation has an entry and every constructor works.
///
/// Present-but-`None` entries are valid. Checking continues past failures so
/// the result lists every problem in operation order.
pub fn validate_bindings<O: OperationKind, C: ?Sized>(
    entries: &HashMap<O, Option<Constructor<C>>>,
) -> Vec<BindingProblem> {
    let mut problems = Vec::new();
    for op in O::ALL {
        match entries.get(op) {
            None => problems.push(BindingProblem::Missing(op.name())),
            Some(None) => {}
            Some(Some(constructor)) => {
                if let Err(reason) = constructor() {
                    problems.push(BindingProblem::Instantiation {
                        operation: op.name(),
                        reason,
                    });
                }
            }
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{OperationFamily, RequestContext};
    use crate::core::error::CommandError;
    use std::sync::atomic::AtomicUsize;

    struct Noop;

    impl WorkspaceCommand for Noop {
        fn set_request_context(&mut self, _context: RequestContext) {}

        fn execute(&mut self) -> Result<(), CommandError> {
            Ok(())
        }
    }

    fn noop() -> Result<Box<dyn WorkspaceCommand>, String> {
        Ok(Box::new(Noop))
    }

    fn full_table() -> BindingTable<Operation, dyn WorkspaceCommand> {
        Operation::ALL
            .iter()
            .fold(BindingTable::new(), |table, op| table.bind(*op, noop))
    }

    fn catalog(keyword: &str, table: BindingTable<Operation, dyn WorkspaceCommand>)
        -> CommandSets<Operation, dyn WorkspaceCommand>
    {
        let mut sets = CommandSets::new();
        sets.register(keyword, table);
        sets
    }

    #[test]
    fn complete_set_initializes() {
        let factory = LifecycleCommandFactory::new("lifecycle");
        let sets = catalog("full", full_table().unsupported(Operation::CancelUnpropagated));
        factory.init("full", &sets, &[]).unwrap();

        assert_eq!(factory.command_set(), Some("full"));
        for op in Operation::ALL {
            let command = factory.get(*op).unwrap();
            assert_eq!(command.is_some(), *op != Operation::CancelUnpropagated);
        }
        assert!(!factory.is_supported(Operation::CancelUnpropagated));
        assert!(factory.is_supported(Operation::Start));
    }

    #[test]
    fn every_missing_operation_is_reported() {
        let factory = LifecycleCommandFactory::new("lifecycle");
        let sets = catalog("empty", BindingTable::new());
        let err = factory.init("empty", &sets, &[]).unwrap_err();

        match err {
            FactoryError::Validation { command_set, problems } => {
                assert_eq!(command_set, "empty");
                assert_eq!(problems.len(), 20);
                assert_eq!(problems[0], BindingProblem::Missing("cancel-unpropagated"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(factory.command_set(), None);
        assert!(matches!(
            factory.get(Operation::Start),
            Err(FactoryError::NotInitialized { .. })
        ));
    }

    #[test]
    fn broken_constructors_are_collected_with_missing_entries() {
        let mut table = full_table()
            .bind(Operation::Reboot, || Err("driver not loaded".to_string()));
        table.entries.remove(&Operation::Pause);

        let factory = LifecycleCommandFactory::new("lifecycle");
        let err = factory.init("broken", &catalog("broken", table), &[]).unwrap_err();
        let FactoryError::Validation { problems, .. } = err else {
            panic!("expected a validation error");
        };
        assert_eq!(
            problems,
            vec![
                BindingProblem::Instantiation {
                    operation: "reboot",
                    reason: "driver not loaded".to_string(),
                },
                BindingProblem::Missing("pause"),
            ]
        );
    }

    #[test]
    fn disabled_families_report_unsupported() {
        let mut table = full_table();
        // a set that never bound propagation still passes once it is disabled
        for op in OperationFamily::Propagation.members() {
            table.entries.remove(op);
        }
        let mut disabled = OperationFamily::Propagation.members().to_vec();
        disabled.extend_from_slice(OperationFamily::ReadyForTransport.members());

        let factory = LifecycleCommandFactory::new("lifecycle");
        factory.init("set", &catalog("set", table), &disabled).unwrap();

        for op in &disabled {
            assert!(factory.get(*op).unwrap().is_none());
        }
        assert!(factory.get(Operation::Start).unwrap().is_some());
    }

    #[test]
    fn init_is_once_only() {
        let factory = LifecycleCommandFactory::new("lifecycle");
        let sets = catalog("full", full_table());
        factory.init("full", &sets, &[]).unwrap();
        assert!(matches!(
            factory.init("full", &sets, &[]),
            Err(FactoryError::AlreadyInitialized { factory: "lifecycle" })
        ));
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let factory = LifecycleCommandFactory::new("lifecycle");
        let err = factory.init("xenfoo", &catalog("full", full_table()), &[]).unwrap_err();
        assert!(matches!(err, FactoryError::UnknownCommandSet(ref k) if k == "xenfoo"));
    }

    #[test]
    fn each_get_builds_a_new_instance() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let table = full_table().bind(Operation::Start, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Noop) as Box<dyn WorkspaceCommand>)
        });
        let factory = LifecycleCommandFactory::new("lifecycle");
        factory.init("full", &catalog("full", table), &[]).unwrap();
        // one smoke-test instance during validation
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let a = factory.get(Operation::Start).unwrap();
        let b = factory.get(Operation::Start).unwrap();
        assert!(a.is_some() && b.is_some());
        assert_eq!(built.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn query_factory_has_one_operation() {
        struct Status;

        impl QueryCommand for Status {
            fn set_request_context(&mut self, _context: RequestContext) {}

            fn execute(&mut self) -> Result<String, CommandError> {
                Ok("running".to_string())
            }
        }

        let mut sets: CommandSets<QueryOperation, dyn QueryCommand> = CommandSets::new();
        sets.register(
            "mock",
            BindingTable::new().bind(QueryOperation::Status, || {
                Ok(Box::new(Status) as Box<dyn QueryCommand>)
            }),
        );
        let factory = QueryCommandFactory::new("query");
        factory.init("mock", &sets, &[]).unwrap();

        let mut command = factory.get(QueryOperation::Status).unwrap().unwrap();
        assert_eq!(command.execute().unwrap(), "running");
    }
}
