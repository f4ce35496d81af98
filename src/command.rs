//! Real command execution implementation.

use crate::error::{Error, Result};
use crate::traits::{CommandOutput, CommandRunner};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// ETXTBSY error code (errno 26 on Linux).
/// This error occurs when trying to execute a file that is currently being written.
const ETXTBSY: i32 = 26;

/// How often to poll a child process when a timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Spawn a command with retry logic for ETXTBSY errors.
///
/// ETXTBSY ("Text file busy") can occur on overlay filesystems (like Docker)
/// when executing a script that was just created. The file may still be held
/// open by the filesystem layer. A brief retry usually succeeds.
fn spawn_with_etxtbsy_retry<F>(mut spawn_fn: F) -> std::io::Result<Child>
where
    F: FnMut() -> std::io::Result<Child>,
{
    loop {
        match spawn_fn() {
            Ok(child) => return Ok(child),
            Err(e) if e.raw_os_error() == Some(ETXTBSY) => {
                // ETXTBSY - wait briefly and retry
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Real command runner that executes shell commands.
#[derive(Debug, Default, Clone)]
pub struct RealCommandRunner;

impl RealCommandRunner {
    /// Create a new command runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Drain a pipe on a background thread so the child never blocks on a full
/// pipe buffer while we poll for its exit.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Wait for a child with a deadline, polling `try_wait`.
///
/// On timeout the child is killed and reaped so no zombie is left behind.
fn wait_with_timeout(mut child: Child, program: &str, timeout: Duration) -> Result<CommandOutput> {
    let stdout_handle = drain_pipe(child.stdout.take());
    let stderr_handle = drain_pipe(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::CommandTimeout {
                command: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(CommandOutput { exit_code: status.code().unwrap_or(-1), stdout, stderr })
}

impl CommandRunner for RealCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = spawn_with_etxtbsy_retry(|| command.spawn())?;

        match timeout {
            Some(limit) => wait_with_timeout(child, program, limit),
            None => {
                let output = child.wait_with_output()?;
                Ok(CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }

    fn is_available(&self, program: &str) -> bool {
        Command::new("which")
            .arg(program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_echo() {
        let runner = RealCommandRunner::new();
        let output = runner.run("echo", &["hello"], None).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_failing_command() {
        let runner = RealCommandRunner::new();
        let output = runner.run("false", &[], None).unwrap();
        assert!(!output.success());
        assert_ne!(output.exit_code, 0);
    }

    #[test]
    fn test_run_with_generous_timeout_succeeds() {
        let runner = RealCommandRunner::new();
        let output = runner.run("echo", &["quick"], Some(Duration::from_secs(10))).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "quick");
    }

    #[test]
    fn test_run_times_out() {
        let runner = RealCommandRunner::new();
        let result = runner.run("sleep", &["5"], Some(Duration::from_millis(100)));
        match result {
            Err(Error::CommandTimeout { command, .. }) => assert_eq!(command, "sleep"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_is_available() {
        let runner = RealCommandRunner::new();
        assert!(runner.is_available("echo"));
        assert!(!runner.is_available("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_run_nonexistent_command() {
        let runner = RealCommandRunner::new();
        let result = runner.run("definitely_not_a_real_command_12345", &[], None);
        assert!(result.is_err());
    }

    #[test]
    fn test_spawn_with_etxtbsy_retry_retries_on_etxtbsy() {
        let mut call_count = 0;
        let mut command = Command::new("true");
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let result = spawn_with_etxtbsy_retry(|| {
            call_count += 1;
            if call_count < 3 {
                Err(std::io::Error::from_raw_os_error(ETXTBSY))
            } else {
                command.spawn()
            }
        });

        assert!(result.is_ok());
        assert_eq!(call_count, 3);
    }

    #[test]
    fn test_spawn_with_etxtbsy_retry_propagates_other_errors() {
        let mut call_count = 0;

        let result = spawn_with_etxtbsy_retry(|| {
            call_count += 1;
            // ENOENT - should not retry
            Err(std::io::Error::from_raw_os_error(2))
        });

        assert!(result.is_err());
        assert_eq!(call_count, 1);
    }
}
