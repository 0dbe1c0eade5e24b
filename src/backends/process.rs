//! Backends that drive the workspace-control program
//!
//! `xenlocal` runs it directly on this host; `xenssh` runs it on a VMM host
//! through `ssh`. Either way one command is one process:
//!
//! ```text
//! <control_path> --action <operation> --id <resource id> --name <name>
//! ```

use crate::commands::{
    Operation, OperationKind, QueryCommand, QueryOperation, RequestContext, WorkspaceCommand,
};
use crate::core::config::BackendConfig;
use crate::core::error::CommandError;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use tracing::{debug, trace};

/// Where the control program runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// On this host
    Local,
    /// On a remote host over ssh
    Ssh {
        /// `user@host` or an ssh config alias; `None` is a configuration error
        target: Option<String>,
        /// Extra arguments placed before the target
        options: Vec<String>,
    },
}

/// How to reach the control program; shared by all commands of a set
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    control_path: PathBuf,
    transport: Transport,
}

impl ProcessBackend {
    /// Run `control_path` locally
    pub fn local(control_path: impl Into<PathBuf>) -> Self {
        Self {
            control_path: control_path.into(),
            transport: Transport::Local,
        }
    }

    /// Run `control_path` on `target` over ssh
    pub fn ssh(control_path: impl Into<PathBuf>, target: Option<String>, options: Vec<String>) -> Self {
        Self {
            control_path: control_path.into(),
            transport: Transport::Ssh { target, options },
        }
    }

    /// Local backend from the `[backend]` section
    pub fn local_from_config(config: &BackendConfig) -> Self {
        Self::local(config.control_path.clone())
    }

    /// Ssh backend from the `[backend]` section
    pub fn ssh_from_config(config: &BackendConfig) -> Self {
        Self::ssh(
            config.control_path.clone(),
            config.ssh_target.clone(),
            config.ssh_options.clone(),
        )
    }

    /// Whether commands can be built at all
    pub fn check(&self) -> Result<(), String> {
        match &self.transport {
            Transport::Ssh { target: None, .. } => Err("backend.ssh_target is not set".to_string()),
            Transport::Ssh { target: Some(t), .. } if t.trim().is_empty() => {
                Err("backend.ssh_target is empty".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Host name commands are sent to, if remote
    pub fn host(&self) -> Option<&str> {
        match &self.transport {
            Transport::Ssh { target, .. } => target.as_deref(),
            Transport::Local => None,
        }
    }

    fn command_line(&self, action: &str, context: &RequestContext) -> (String, Vec<String>) {
        let control = vec![
            "--action".to_string(),
            action.to_string(),
            "--id".to_string(),
            context.resource_id.to_string(),
            "--name".to_string(),
            context.name.clone(),
        ];
        match &self.transport {
            Transport::Local => (self.control_path.display().to_string(), control),
            Transport::Ssh { target, options } => {
                // ssh hands the remote side one string for its login shell
                let mut remote = vec![shell_quote(&self.control_path.display().to_string())];
                remote.extend(control.iter().map(|arg| shell_quote(arg)));

                let mut args = options.clone();
                args.extend(target.iter().cloned());
                args.push(remote.join(" "));
                ("ssh".to_string(), args)
            }
        }
    }

    fn run(&self, operation: &'static str, context: &RequestContext) -> Result<Output, CommandError> {
        let (program, args) = self.command_line(operation, context);
        debug!(resource = %context.resource_id, operation, %program, ?args, "running control program");

        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn { operation, source })?;

        trace!(
            resource = %context.resource_id,
            operation,
            stdout = %String::from_utf8_lossy(&output.stdout),
            "control program finished"
        );

        if output.status.success() {
            Ok(output)
        } else {
            Err(CommandError::Exited {
                operation,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// A lifecycle command carried out by one control program invocation
pub struct ProcessCommand {
    operation: Operation,
    backend: Arc<ProcessBackend>,
    context: Option<RequestContext>,
}

impl ProcessCommand {
    /// Command for `operation` through `backend`
    pub fn new(operation: Operation, backend: Arc<ProcessBackend>) -> Self {
        Self {
            operation,
            backend,
            context: None,
        }
    }
}

impl WorkspaceCommand for ProcessCommand {
    fn set_request_context(&mut self, context: RequestContext) {
        self.context = Some(context);
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        let operation = self.operation.name();
        let context = self
            .context
            .as_ref()
            .ok_or(CommandError::MissingContext { operation })?;
        self.backend.run(operation, context).map(|_| ())
    }
}

/// Status query; returns the control program's trimmed stdout
pub struct ProcessQuery {
    backend: Arc<ProcessBackend>,
    context: Option<RequestContext>,
}

impl ProcessQuery {
    /// Query through `backend`
    pub fn new(backend: Arc<ProcessBackend>) -> Self {
        Self {
            backend,
            context: None,
        }
    }
}

impl QueryCommand for ProcessQuery {
    fn set_request_context(&mut self, context: RequestContext) {
        self.context = Some(context);
    }

    fn execute(&mut self) -> Result<String, CommandError> {
        let operation = QueryOperation::Status.name();
        let context = self
            .context
            .as_ref()
            .ok_or(CommandError::MissingContext { operation })?;
        let output = self.backend.run(operation, context)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Single-quote `s` for a POSIX shell; embedded quotes become `'\''`
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceId;

    fn context() -> RequestContext {
        RequestContext::new(ResourceId::new("vm-9"), "db", PathBuf::from("/tmp"))
    }

    #[test]
    fn ssh_wraps_the_control_program() {
        let backend = ProcessBackend::ssh(
            "/opt/ctl",
            Some("vmm@host-3".to_string()),
            vec!["-o".to_string(), "BatchMode=yes".to_string()],
        );
        let (program, args) = backend.command_line("reboot", &context());
        assert_eq!(program, "ssh");
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "vmm@host-3",
                "'/opt/ctl' '--action' 'reboot' '--id' 'vm-9' '--name' 'db'"
            ]
        );
        assert_eq!(backend.host(), Some("vmm@host-3"));
    }

    #[test]
    fn ssh_remote_line_keeps_hostile_names_inert() {
        let backend = ProcessBackend::ssh("/opt/ctl", Some("vmm@host-3".to_string()), Vec::new());
        let context = RequestContext::new(
            ResourceId::new("vm-1"),
            "web; touch /tmp/owned",
            PathBuf::from("/tmp"),
        );
        let (_, args) = backend.command_line("start", &context);
        assert_eq!(
            args.last().map(String::as_str),
            Some("'/opt/ctl' '--action' 'start' '--id' 'vm-1' '--name' 'web; touch /tmp/owned'")
        );

        let context = RequestContext::new(ResourceId::new("vm-2"), "it's $(id)", PathBuf::from("/tmp"));
        let (_, args) = backend.command_line("stop", &context);
        assert!(args[1].ends_with(r"'--name' 'it'\''s $(id)'"));
    }

    #[cfg(unix)]
    #[test]
    fn quoted_words_survive_a_real_shell() {
        let hostile = "web; echo owned";
        let out = Command::new("sh")
            .arg("-c")
            .arg(format!("printf '%s' {}", shell_quote(hostile)))
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), hostile);
    }

    #[test]
    fn local_arguments_are_passed_verbatim() {
        let (program, args) = ProcessBackend::local("/opt/ctl").command_line("start", &context());
        assert_eq!(program, "/opt/ctl");
        assert_eq!(args, vec!["--action", "start", "--id", "vm-9", "--name", "db"]);
    }

    #[test]
    fn ssh_without_target_fails_check() {
        let backend = ProcessBackend::ssh("/opt/ctl", None, Vec::new());
        assert!(backend.check().is_err());
        assert!(ProcessBackend::local("/opt/ctl").check().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_outcome() {
        let mut ok = ProcessCommand::new(Operation::Start, Arc::new(ProcessBackend::local("true")));
        ok.set_request_context(context());
        assert!(ok.execute().is_ok());

        let mut bad = ProcessCommand::new(Operation::Start, Arc::new(ProcessBackend::local("false")));
        bad.set_request_context(context());
        match bad.execute() {
            Err(CommandError::Exited { operation, code, .. }) => {
                assert_eq!(operation, "start");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_is_a_spawn_error() {
        let backend = Arc::new(ProcessBackend::local("/nonexistent/workspace-control"));
        let mut command = ProcessCommand::new(Operation::Pause, backend);
        command.set_request_context(context());
        assert!(matches!(
            command.execute(),
            Err(CommandError::Spawn { operation: "pause", .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn query_returns_stdout() {
        let mut query = ProcessQuery::new(Arc::new(ProcessBackend::local("echo")));
        query.set_request_context(context());
        assert_eq!(
            query.execute().unwrap(),
            "--action query --id vm-9 --name db"
        );
    }
}
