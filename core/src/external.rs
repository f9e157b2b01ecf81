//! Narrow seam for command-line tools (`rtl_test`, `rtl_sdr`, `rtl_power`).
//!
//! The core only ever sees parsed records; process plumbing stays behind
//! [`ExternalToolRunner`] so tests can substitute canned output.

use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::prelude::{SigintError, SigintResult};

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

pub trait ExternalToolRunner: Send + Sync {
    /// Runs `command` to completion. A missing executable is reported as
    /// [`SigintError::ToolUnavailable`].
    fn run(&self, command: &str, args: &[String]) -> SigintResult<ToolOutput>;
}

/// Runs tools as child processes with a wall-clock timeout.
pub struct ProcessToolRunner {
    timeout: Duration,
}

impl ProcessToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessToolRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Reads `pipe` to the end. A read error keeps whatever arrived before it.
fn drain_pipe<R: Read>(mut pipe: R, label: &str) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(err) = pipe.read_to_end(&mut buffer) {
        debug!("{} read stopped after {} bytes: {}", label, buffer.len(), err);
    }
    buffer
}

impl ExternalToolRunner for ProcessToolRunner {
    fn run(&self, command: &str, args: &[String]) -> SigintResult<ToolOutput> {
        debug!("running {} {}", command, args.join(" "));
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => SigintError::ToolUnavailable(command.to_string()),
                _ => SigintError::ToolFailed(format!("{}: {}", command, err)),
            })?;

        // Drain pipes on helper threads so a chatty tool cannot fill them and stall.
        let stdout_reader = child
            .stdout
            .take()
            .map(|pipe| thread::spawn(move || drain_pipe(pipe, "stdout")));
        let stderr_reader = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || drain_pipe(pipe, "stderr")));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SigintError::ToolFailed(format!(
                        "{} timed out after {:?}",
                        command, self.timeout
                    )));
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(err) => {
                    return Err(SigintError::ToolFailed(format!("{}: {}", command, err)));
                }
            }
        };

        let stdout = stdout_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    }
}
