use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::debug;

/// What happens to a tool's standard output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdoutPolicy {
    /// Share the orchestrator's terminal. Used for interactive tools.
    #[default]
    Inherit,
    /// Drop everything the tool prints.
    Discard,
    /// Collect the output into [`ToolOutput::stdout`].
    Capture,
}

/// A fully described external process call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(OsString, OsString)>,
    pub working_dir: Option<PathBuf>,
    pub stdout: StdoutPolicy,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,
            stdout: StdoutPolicy::Inherit,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, envs: &[(OsString, OsString)]) -> Self {
        self.envs.extend(envs.iter().cloned());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdout(mut self, policy: StdoutPolicy) -> Self {
        self.stdout = policy;
        self
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Failed(String),
}

impl ToolStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: ToolStatus,
    pub stdout: Vec<u8>,
}

impl ToolOutput {
    pub fn success() -> Self {
        Self {
            status: ToolStatus::Success,
            stdout: Vec::new(),
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failed(description.into()),
            stdout: Vec::new(),
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Errors raised before a tool got the chance to run.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("program `{program}` not found")]
    NotFound { program: String },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs external tools on behalf of a pipeline.
///
/// Pipelines never touch `std::process` directly, so tests can substitute a
/// runner that records invocations and fakes the tools' side effects.
pub trait ToolRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;
}

/// Spawns real child processes and blocks until they exit.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        ProcessRunner
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Terminated by signal {signal}");
        }
    }
    "Exited abnormally".to_string()
}

impl ToolRunner for ProcessRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        debug!(command = %invocation, "spawning");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.envs {
            cmd.env(key, value);
        }
        if let Some(cwd) = &invocation.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdout(match invocation.stdout {
            StdoutPolicy::Inherit => Stdio::inherit(),
            StdoutPolicy::Discard => Stdio::null(),
            StdoutPolicy::Capture => Stdio::piped(),
        });

        let spawn_error = |e: std::io::Error| {
            if e.kind() == ErrorKind::NotFound {
                ToolError::NotFound {
                    program: invocation.program.clone(),
                }
            } else {
                ToolError::Spawn {
                    program: invocation.program.clone(),
                    source: e,
                }
            }
        };

        let child = cmd.spawn().map_err(spawn_error)?;
        let output = child.wait_with_output().map_err(|e| ToolError::Spawn {
            program: invocation.program.clone(),
            source: e,
        })?;

        let status = if output.status.success() {
            ToolStatus::Success
        } else {
            ToolStatus::Failed(describe_exit(&output.status))
        };
        Ok(ToolOutput {
            status,
            stdout: output.stdout,
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    type Handler = Box<dyn FnMut(&ToolInvocation) -> Result<ToolOutput, ToolError>>;

    /// Records every invocation and answers through a user supplied handler.
    pub struct RecordingRunner {
        pub calls: Vec<ToolInvocation>,
        handler: Handler,
    }

    impl RecordingRunner {
        pub fn new<F>(handler: F) -> Self
        where
            F: FnMut(&ToolInvocation) -> Result<ToolOutput, ToolError> + 'static,
        {
            Self {
                calls: Vec::new(),
                handler: Box::new(handler),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(|_| Ok(ToolOutput::success()))
        }

        pub fn programs(&self) -> Vec<&str> {
            self.calls.iter().map(|c| c.program.as_str()).collect()
        }
    }

    impl ToolRunner for RecordingRunner {
        fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
            self.calls.push(invocation.clone());
            (self.handler)(invocation)
        }
    }
}
