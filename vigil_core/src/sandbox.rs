//! Command execution against a target.
//!
//! [`Sandbox`] is the only way the core runs processes. Implementations decide
//! where the command runs (local shell, ssh, container); the core only hands
//! over one opaque command line and reads back captured stdout.

use std::process::Command;
use std::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
}

pub trait Sandbox: Send + Sync {
    /// Runs one command line and returns its captured standard output.
    fn run(&self, command: &str) -> Result<String, SandboxError>;

    /// Substitutes `{name}` placeholders verbatim, then runs the result.
    ///
    /// No shell escaping is applied; callers own the safety of substituted values.
    fn exec(&self, template: &str, substitutions: &[(&str, &str)]) -> Result<String, SandboxError> {
        let command = render_template(template, substitutions);
        log::debug!("[SANDBOX] exec: {}", command);
        self.run(&command)
    }
}

pub fn render_template(template: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .fold(template.to_string(), |command, (name, value)| {
            command.replace(&format!("{{{}}}", name), value)
        })
}

/// Runs commands through the local shell (`sh -c`).
pub struct LocalSandbox {
    shell: String,
}

impl Default for LocalSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSandbox {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Sandbox for LocalSandbox {
    fn run(&self, command: &str) -> Result<String, SandboxError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|source| SandboxError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SandboxError::CommandFailed {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

enum MockReply {
    Output(String),
    Fail(String),
}

/// Scripted sandbox for tests.
///
/// Replies are matched by substring against the rendered command, first
/// registered match wins. Unmatched commands succeed with empty output.
pub struct MockSandbox {
    replies: Mutex<Vec<(String, MockReply)>>,
    commands: Mutex<Vec<String>>,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSandbox {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, needle: &str, output: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push((needle.to_string(), MockReply::Output(output.to_string())));
        self
    }

    pub fn fail(&self, needle: &str, stderr: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push((needle.to_string(), MockReply::Fail(stderr.to_string())));
        self
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn get_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

impl Sandbox for MockSandbox {
    fn run(&self, command: &str) -> Result<String, SandboxError> {
        self.commands.lock().unwrap().push(command.to_string());

        let replies = self.replies.lock().unwrap();
        match replies.iter().find(|(needle, _)| command.contains(needle.as_str())) {
            Some((_, MockReply::Output(output))) => Ok(output.clone()),
            Some((_, MockReply::Fail(stderr))) => Err(SandboxError::CommandFailed {
                command: command.to_string(),
                status: 1,
                stderr: stderr.clone(),
            }),
            None => Ok(String::new()),
        }
    }
}
