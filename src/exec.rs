//! External command execution.
//!
//! Every stage that shells out (git, the coding agent, the installer) goes
//! through [`run`], so timeout and kill semantics live in one place. On
//! timeout the child is killed and [`ExecError::TimedOut`] is returned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::ExecError;

/// A command line plus its working directory, extra environment, and limit.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `None` waits indefinitely.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command line for log output. Long arguments (prompts) are truncated.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if arg.chars().count() > 60 {
                let head: String = arg.chars().take(57).collect();
                parts.push(format!("'{}...'", head.replace('\n', " ")));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// stdout followed by stderr.
    pub combined_output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command to completion, killing it if it exceeds its timeout.
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    tracing::debug!(command = %spec.display(), cwd = ?spec.cwd, "Running command");

    let child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let wait = child.wait_with_output();
    let output = match spec.timeout {
        Some(limit) => match timeout(limit, wait).await {
            Ok(result) => result,
            // Dropping the wait future drops the child, and kill_on_drop kills it.
            Err(_) => {
                return Err(ExecError::TimedOut {
                    program: spec.program.clone(),
                    secs: limit.as_secs(),
                });
            }
        },
        None => wait.await,
    }
    .map_err(|source| ExecError::Wait {
        program: spec.program.clone(),
        source,
    })?;

    let mut combined_output = String::from_utf8_lossy(&output.stdout).into_owned();
    combined_output.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        combined_output,
    })
}
