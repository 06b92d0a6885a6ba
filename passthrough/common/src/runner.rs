//! Process execution for probes and mutating actions.
//!
//! `CommandRunner` is the seam every probe and action goes through.
//! `ShellRunner` spawns `sh -c` with a hard timeout, `MockRunner` replays scripted results.

use std::cell::RefCell;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was killed by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stderr for diagnostics, or a placeholder when the command printed nothing.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            match self.status {
                Some(code) => format!("No stderr output (exit status {})", code),
                None => "No stderr output (killed by signal)".to_owned(),
            }
        } else {
            stderr.to_owned()
        }
    }
}

pub trait CommandRunner {
    /// Runs `command` through the shell. No retries.
    /// Returns `Err` only if the command could not be run to completion at all,
    /// a non-zero exit is reported through [`CommandOutput::status`].
    fn run(&self, command: &str, limit: Duration) -> io::Result<CommandOutput>;
}

pub struct ShellRunner {
    rt: Runtime,
}

impl ShellRunner {
    pub fn new() -> io::Result<ShellRunner> {
        let rt = Builder::new_current_thread().enable_all().build()?;
        Ok(ShellRunner { rt })
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, limit: Duration) -> io::Result<CommandOutput> {
        trace!("sh -c {:?} (timeout {}s)", command, limit.as_secs());
        self.rt.block_on(async {
            let child = Command::new("sh").arg("-c").arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;

            // dropping the future on timeout drops the child, which kills it
            match timeout(limit, child.wait_with_output()).await {
                Ok(output) => {
                    let output = output?;
                    Ok(CommandOutput {
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        status: output.status.code(),
                    })
                }
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut,
                                             format!("timed out after {}s", limit.as_secs()))),
            }
        })
    }
}

enum Scripted {
    Output(CommandOutput),
    Error(io::ErrorKind),
}

/// Test double. Commands are matched against scripted patterns (substring, first match wins);
/// anything unmatched succeeds with empty output.
#[derive(Default)]
pub struct MockRunner {
    rules: Vec<(String, Scripted)>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> MockRunner {
        MockRunner::default()
    }

    pub fn on(mut self, pattern: &str, stdout: &str) -> MockRunner {
        let output = CommandOutput { stdout: stdout.to_owned(), stderr: String::new(), status: Some(0) };
        self.rules.push((pattern.to_owned(), Scripted::Output(output)));
        self
    }

    pub fn fail_on(mut self, pattern: &str, stderr: &str) -> MockRunner {
        let output = CommandOutput { stdout: String::new(), stderr: stderr.to_owned(), status: Some(1) };
        self.rules.push((pattern.to_owned(), Scripted::Output(output)));
        self
    }

    pub fn error_on(mut self, pattern: &str, kind: io::ErrorKind) -> MockRunner {
        self.rules.push((pattern.to_owned(), Scripted::Error(kind)));
        self
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, command: &str, _limit: Duration) -> io::Result<CommandOutput> {
        self.commands.borrow_mut().push(command.to_owned());
        match self.rules.iter().find(|(pattern, _)| command.contains(pattern.as_str())) {
            Some((_, Scripted::Output(output))) => Ok(output.clone()),
            Some((_, Scripted::Error(kind))) => Err(io::Error::new(*kind, "scripted error")),
            None => Ok(CommandOutput { status: Some(0), ..CommandOutput::default() }),
        }
    }
}
