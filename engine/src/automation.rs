//! The UI automation collaborator.
//!
//! Driving the router's web console (login, navigation, clicking the
//! download button) is delegated to an `AutomationDriver`. The engine only
//! needs to know that a download was initiated into a given directory.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use crate::error::EngineError;

/// Lines of stderr kept in failure messages.
const STDERR_TAIL_LINES: usize = 5;

/// Triggers the remote download action.
///
/// Implementations are expected to be already authenticated or to log in as
/// part of the trigger. Any failure is fatal to the run; the engine does not
/// retry.
pub trait AutomationDriver {
    fn trigger_download(&mut self, download_dir: &Path) -> Result<(), EngineError>;
}

/// Runs an external program (typically a headless browser script) that logs
/// into the console and clicks the download button.
///
/// The program receives the download directory as `DOWNLOAD_DIR` in its
/// environment and must not exit until the browser has finished writing, as
/// exiting usually tears the browser down with it. Exit status 0 means the
/// download was initiated.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    envs: Vec<(String, String)>,
}

impl CommandDriver {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        CommandDriver {
            program: program.into(),
            args,
            timeout,
            envs: Vec::new(),
        }
    }

    /// Add an environment variable for the child process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn failure(&self, detail: impl std::fmt::Display) -> EngineError {
        EngineError::AutomationFailure {
            message: format!("'{}' {}", self.program, detail),
        }
    }

    fn wait_with_deadline(&self, child: &mut Child) -> Result<std::process::ExitStatus, EngineError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.failure(format_args!(
                        "did not finish within {}s and was killed",
                        self.timeout.as_secs_f64()
                    )));
                }
                Ok(None) => thread::sleep(Duration::from_millis(100)),
                Err(e) => return Err(self.failure(format_args!("could not be waited on: {}", e))),
            }
        }
    }
}

impl AutomationDriver for CommandDriver {
    fn trigger_download(&mut self, download_dir: &Path) -> Result<(), EngineError> {
        info!(program = %self.program, "Triggering download");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("DOWNLOAD_DIR", download_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(format_args!("could not be started: {}", e)))?;

        // Drain stderr on a thread so a chatty child cannot fill the pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer);
                buffer
            })
        });

        // On timeout the reader is left detached: grandchildren may still
        // hold the pipe open.
        let status = self.wait_with_deadline(&mut child)?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            debug!(program = %self.program, "Automation finished");
            Ok(())
        } else {
            Err(self.failure(format_args!(
                "exited with {}{}",
                status,
                stderr_tail(&stderr)
            )))
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!(": {}", lines[start..].join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        assert_eq!(stderr_tail(""), "");
        assert_eq!(stderr_tail("\n  \n"), "");
        let many: String = (1..=8).map(|i| format!("line {}\n", i)).collect();
        assert_eq!(
            stderr_tail(&many),
            ": line 4 | line 5 | line 6 | line 7 | line 8"
        );
    }

    #[test]
    fn test_missing_program_is_automation_failure() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut driver = CommandDriver::new(
            "definitely-not-a-real-program-cfgbackup",
            Vec::new(),
            Duration::from_secs(5),
        );
        let result = driver.trigger_download(temp_dir.path());
        assert!(matches!(result, Err(EngineError::AutomationFailure { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_downloads_into_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut driver = CommandDriver::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf '<pfsense/>' > \"$DOWNLOAD_DIR/config.xml\"".to_string(),
            ],
            Duration::from_secs(10),
        );
        driver.trigger_download(temp_dir.path()).expect("Trigger failed");
        assert_eq!(
            std::fs::read(temp_dir.path().join("config.xml")).unwrap(),
            b"<pfsense/>"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut driver = CommandDriver::new(
            "sh",
            vec!["-c".to_string(), "echo 'login rejected' >&2; exit 3".to_string()],
            Duration::from_secs(10),
        );
        match driver.trigger_download(temp_dir.path()) {
            Err(EngineError::AutomationFailure { message }) => {
                assert!(message.contains("login rejected"), "message: {}", message);
            }
            other => panic!("Expected AutomationFailure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_script_is_killed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut driver = CommandDriver::new(
            "sh",
            vec!["-c".to_string(), "exec sleep 30".to_string()],
            Duration::from_millis(300),
        );
        let started = Instant::now();
        let result = driver.trigger_download(temp_dir.path());
        assert!(matches!(result, Err(EngineError::AutomationFailure { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_extra_env_is_passed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut driver = CommandDriver::new(
            "sh",
            vec!["-c".to_string(), "printf \"$TARGET_URL\" > \"$DOWNLOAD_DIR/url.txt\"".to_string()],
            Duration::from_secs(10),
        )
        .env("TARGET_URL", "https://192.168.1.1");
        driver.trigger_download(temp_dir.path()).expect("Trigger failed");
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("url.txt")).unwrap(),
            "https://192.168.1.1"
        );
    }
}
