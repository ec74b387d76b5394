use crate::config::IsolationConfig;
use crate::{HandlerError, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// Kind of privileged operation a handler asks the agent to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    TrafficControlBootstrap,
    TrafficControlModifyState,
    TrafficControlReadStats,
    AddPidToCgroup,
}

impl OperationType {
    /// Flag understood by the setuid helper
    pub fn helper_flag(self) -> &'static str {
        match self {
            OperationType::TrafficControlBootstrap => "--tc-modify-state",
            OperationType::TrafficControlModifyState => "--tc-modify-state",
            OperationType::TrafficControlReadStats => "--tc-read-stats",
            OperationType::AddPidToCgroup => "--add-pid-to-cgroup",
        }
    }

    fn is_traffic_control(self) -> bool {
        !matches!(self, OperationType::AddPidToCgroup)
    }
}

/// A privileged operation described by a handler.
///
/// Traffic control operations carry `tc -batch` lines as arguments.
/// `AddPidToCgroup` carries the target tasks file followed by the pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedOperation {
    pub op_type: OperationType,
    pub args: Vec<String>,
}

impl PrivilegedOperation {
    pub fn new(op_type: OperationType) -> Self {
        Self {
            op_type,
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(op_type: OperationType, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op_type,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn append_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }
}

/// Runs privileged operations, either through a setuid helper or directly
#[derive(Debug)]
pub struct PrivilegedOperationExecutor {
    helper: Option<PathBuf>,
}

impl PrivilegedOperationExecutor {
    /// Create the executor, checking the configured helper exists
    pub fn new(config: &IsolationConfig) -> Result<Self> {
        if let Some(helper) = &config.executor.path {
            let metadata = std::fs::metadata(helper).map_err(|e| {
                HandlerError::construction("privileged executor", format!("{:?}: {}", helper, e))
            })?;
            if !metadata.is_file() {
                return Err(HandlerError::construction(
                    "privileged executor",
                    format!("{:?} is not a file", helper),
                ));
            }
        }

        Ok(Self {
            helper: config.executor.path.clone(),
        })
    }

    pub fn helper(&self) -> Option<&PathBuf> {
        self.helper.as_ref()
    }

    /// Command line the helper would be invoked with
    pub fn helper_command_line(&self, op: &PrivilegedOperation) -> Option<Vec<String>> {
        let helper = self.helper.as_ref()?;
        let mut line = vec![
            helper.display().to_string(),
            op.op_type.helper_flag().to_string(),
        ];
        line.extend(op.args.iter().cloned());
        Some(line)
    }

    /// Execute an operation, returning its stdout
    pub fn execute(&self, op: &PrivilegedOperation) -> Result<String> {
        debug!("Executing privileged operation {:?}", op.op_type);

        if let Some(helper) = &self.helper {
            let output = Command::new(helper)
                .arg(op.op_type.helper_flag())
                .args(&op.args)
                .output()
                .map_err(|e| {
                    HandlerError::PrivilegedOperation(format!("Failed to run {:?}: {}", helper, e))
                })?;
            return Self::check_output(op, output);
        }

        if op.op_type.is_traffic_control() {
            return self.run_tc_batch(op);
        }

        match op.args.as_slice() {
            [tasks_file, pid] => {
                std::fs::write(tasks_file, pid).map_err(|e| {
                    HandlerError::PrivilegedOperation(format!(
                        "Failed to add pid {} to {}: {}",
                        pid, tasks_file, e
                    ))
                })?;
                Ok(String::new())
            }
            _ => Err(HandlerError::PrivilegedOperation(format!(
                "Malformed {:?} arguments: {:?}",
                op.op_type, op.args
            ))),
        }
    }

    fn run_tc_batch(&self, op: &PrivilegedOperation) -> Result<String> {
        let mut command = Command::new("tc");
        command.args(["-s", "-batch", "-"]);
        Self::run_batch(command, op)
    }

    /// Feed the op args as stdin lines to `command`
    fn run_batch(mut command: Command, op: &PrivilegedOperation) -> Result<String> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| {
            HandlerError::PrivilegedOperation(format!("Failed to run {:?}: {}", command, e))
        })?;

        let written = match child.stdin.take() {
            Some(mut stdin) => {
                let batch = op.args.join("\n") + "\n";
                stdin.write_all(batch.as_bytes())
            }
            None => Ok(()),
        };

        // Reap the child before reporting a failed write
        let output = child.wait_with_output()?;
        let stdout = Self::check_output(op, output)?;
        written?;
        Ok(stdout)
    }

    fn check_output(op: &PrivilegedOperation, output: std::process::Output) -> Result<String> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HandlerError::PrivilegedOperation(format!(
                "{:?} exited with {}: {}",
                op.op_type,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
