//! Abstract operations known to the command factories

use std::fmt;
use std::hash::Hash;

/// An enumerable set of named operations a factory must bind.
///
/// `ALL` is the coverage list used by the completeness check, so every
/// variant of an implementing enum must appear in it exactly once.
pub trait OperationKind:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Every operation, in a stable order
    const ALL: &'static [Self];

    /// Stable kebab-case name
    fn name(self) -> &'static str;

    /// Look an operation up by its name
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }
}

/// VM lifecycle operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// Discard a request before any image was propagated
    CancelUnpropagated,
    /// Copy the image to the VMM host
    Propagate,
    /// Abort an in-progress propagation
    CancelPropagating,
    /// Propagate, then start
    PropagateAndStart,
    /// Abort a propagate-and-start
    CancelPropagateToStart,
    /// Propagate, then start paused
    PropagateAndPause,
    /// Abort a propagate-and-pause
    CancelPropagateToPause,
    /// Boot the VM
    Start,
    /// Create the VM without running it
    StartPaused,
    /// Resume a paused VM
    Unpause,
    /// Reboot the guest
    Reboot,
    /// Pause a running VM
    Pause,
    /// Clean guest shutdown
    ShutdownNormal,
    /// Save VM memory to disk and stop
    ShutdownSerialize,
    /// Restore a serialized VM
    Unserialize,
    /// Destroy the VM and its files
    ShutdownTrash,
    /// Tear down everything the backend holds for the VM
    CancelAllAtBackend,
    /// Stage the VM files for transfer off the host
    ReadyForTransport,
    /// Abort staging for transport
    CancelReadyingForTransport,
    /// Undo a completed staging for transport
    CancelReadyForTransport,
}

impl OperationKind for Operation {
    const ALL: &'static [Operation] = &[
        Operation::CancelUnpropagated,
        Operation::Propagate,
        Operation::CancelPropagating,
        Operation::PropagateAndStart,
        Operation::CancelPropagateToStart,
        Operation::PropagateAndPause,
        Operation::CancelPropagateToPause,
        Operation::Start,
        Operation::StartPaused,
        Operation::Unpause,
        Operation::Reboot,
        Operation::Pause,
        Operation::ShutdownNormal,
        Operation::ShutdownSerialize,
        Operation::Unserialize,
        Operation::ShutdownTrash,
        Operation::CancelAllAtBackend,
        Operation::ReadyForTransport,
        Operation::CancelReadyingForTransport,
        Operation::CancelReadyForTransport,
    ];

    fn name(self) -> &'static str {
        match self {
            Operation::CancelUnpropagated => "cancel-unpropagated",
            Operation::Propagate => "propagate",
            Operation::CancelPropagating => "cancel-propagating",
            Operation::PropagateAndStart => "propagate-and-start",
            Operation::CancelPropagateToStart => "cancel-propagate-to-start",
            Operation::PropagateAndPause => "propagate-and-pause",
            Operation::CancelPropagateToPause => "cancel-propagate-to-pause",
            Operation::Start => "start",
            Operation::StartPaused => "start-paused",
            Operation::Unpause => "unpause",
            Operation::Reboot => "reboot",
            Operation::Pause => "pause",
            Operation::ShutdownNormal => "shutdown-normal",
            Operation::ShutdownSerialize => "shutdown-serialize",
            Operation::Unserialize => "unserialize",
            Operation::ShutdownTrash => "shutdown-trash",
            Operation::CancelAllAtBackend => "cancel-all-at-backend",
            Operation::ReadyForTransport => "ready-for-transport",
            Operation::CancelReadyingForTransport => "cancel-readying-for-transport",
            Operation::CancelReadyForTransport => "cancel-ready-for-transport",
        }
    }
}

impl Operation {
    /// Family this operation belongs to, if any
    pub fn family(self) -> Option<OperationFamily> {
        OperationFamily::ALL
            .iter()
            .copied()
            .find(|family| family.members().contains(&self))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Backend status polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryOperation {
    /// Ask the backend for the VM's current status
    Status,
}

impl OperationKind for QueryOperation {
    const ALL: &'static [QueryOperation] = &[QueryOperation::Status];

    fn name(self) -> &'static str {
        match self {
            QueryOperation::Status => "query",
        }
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Groups of operations switched off together when a deployment disables a
/// feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationFamily {
    /// Image propagation and everything composed with it
    Propagation,
    /// Ready-for-transport and its cancellations
    ReadyForTransport,
}

impl OperationFamily {
    /// Both families
    pub const ALL: [OperationFamily; 2] =
        [OperationFamily::Propagation, OperationFamily::ReadyForTransport];

    /// Operations in this family
    pub fn members(self) -> &'static [Operation] {
        match self {
            OperationFamily::Propagation => &[
                Operation::Propagate,
                Operation::CancelPropagating,
                Operation::PropagateAndStart,
                Operation::CancelPropagateToStart,
                Operation::PropagateAndPause,
                Operation::CancelPropagateToPause,
            ],
            OperationFamily::ReadyForTransport => &[
                Operation::ReadyForTransport,
                Operation::CancelReadyingForTransport,
                Operation::CancelReadyForTransport,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn twenty_distinct_lifecycle_operations() {
        assert_eq!(Operation::ALL.len(), 20);
        let names: HashSet<_> = Operation::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(*op));
        }
        assert_eq!(QueryOperation::from_name("query"), Some(QueryOperation::Status));
        assert_eq!(Operation::from_name("hibernate"), None);
    }

    #[test]
    fn families_do_not_overlap() {
        assert_eq!(Operation::Propagate.family(), Some(OperationFamily::Propagation));
        assert_eq!(
            Operation::CancelReadyForTransport.family(),
            Some(OperationFamily::ReadyForTransport)
        );
        assert_eq!(Operation::Start.family(), None);
        assert_eq!(Operation::CancelUnpropagated.family(), None);
    }
}
