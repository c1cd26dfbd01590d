//! External command execution
//!
//! The allocator drives the debug-bridge and fastboot binaries through the
//! [`CommandRunner`] capability so tests can script their output.
//! [`SystemRunner`] is the real implementation: it spawns the process with
//! piped stdio and enforces the timeout by polling, killing the child when
//! the deadline passes.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How often the runner polls a child for completion.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Terminal status of an executed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exited with a zero status
    Success,
    /// Exited with a non-zero status
    Failed,
    /// Killed after the timeout elapsed
    TimedOut,
    /// Could not be spawned or its output could not be collected
    Exception,
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    fn exception(message: String) -> Self {
        Self {
            status: CommandStatus::Exception,
            stdout: String::new(),
            stderr: message,
        }
    }
}

/// Capability for running external binaries with a timeout.
///
/// `argv[0]` is the program. The runner never raises for a misbehaving
/// command; failures are reported through [`CommandResult::status`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, timeout: Duration, argv: &[&str]) -> CommandResult;

    /// Pause the calling thread. Scripted runners override this to keep
    /// retry loops instantaneous in tests.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, timeout: Duration, argv: &[&str]) -> CommandResult {
        let Some((program, args)) = argv.split_first() else {
            return CommandResult::exception("empty command line".to_string());
        };
        debug!(command = %argv.join(" "), "running command");

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %program, error = %err, "failed to spawn command");
                return CommandResult::exception(format!("failed to spawn {program}: {err}"));
            }
        };

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        warn!(command = %argv.join(" "), "command timed out");
                        return CommandResult {
                            status: CommandStatus::TimedOut,
                            stdout: String::new(),
                            stderr: String::new(),
                        };
                    }
                    std::thread::sleep(EXIT_POLL_INTERVAL);
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return CommandResult::exception(format!("failed to poll {program}: {err}"));
                }
            }
        }

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(err) => {
                return CommandResult::exception(format!(
                    "failed to collect output of {program}: {err}"
                ));
            }
        };

        CommandResult {
            status: if output.status.success() {
                CommandStatus::Success
            } else {
                CommandStatus::Failed
            },
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}
