//! Supervised child processes.
//!
//! [`ChildProcess`] owns a spawned OS process for its whole life. The
//! process is sent `SIGTERM` and reaped exactly once, either by an explicit
//! [`terminate`](ChildProcess::terminate) or when the handle is dropped.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, Command};
use std::thread;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::error::Result;

#[derive(Debug)]
pub struct ChildProcess {
    name: String,
    child: Option<Child>,
}

impl ChildProcess {
    /// Spawn `command`. `name` is only used for logging.
    pub fn spawn(name: &str, command: &mut Command) -> Result<Self> {
        let child = command.spawn()?;
        tracing::info!(process = name, pid = child.id(), "spawned child process");
        Ok(Self {
            name: name.to_string(),
            child: Some(child),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, or `None` once terminated.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Non-blocking liveness probe. Reaps the process if it has exited.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::debug!(process = %self.name, pid = child.id(), %status, "child process exited");
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!(process = %self.name, error = %e, "liveness probe failed");
                false
            }
        }
    }

    /// Take the piped stderr stream, if the command was spawned with one.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.as_mut().and_then(|c| c.stderr.take())
    }

    /// Send `SIGTERM` and block until the process exits.
    ///
    /// There is no timeout: a process that ignores `SIGTERM` blocks the
    /// caller. Calling this again after the first time is a no-op.
    pub fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        if let Ok(Some(_)) = child.try_wait() {
            tracing::debug!(process = %self.name, pid, "child process already exited");
            return;
        }

        tracing::info!(process = %self.name, pid, "stopping child process");
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(process = %self.name, pid, error = %e, "SIGTERM failed");
        }
        if let Err(e) = child.wait() {
            tracing::warn!(process = %self.name, pid, error = %e, "wait failed");
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Relay each line of a child's stderr into the log at debug level.
pub fn forward_stderr(name: &str, stderr: ChildStderr) {
    let name = name.to_string();
    spawn_line_reader(stderr, move |line| {
        tracing::debug!(process = %name, "{line}");
    });
}

/// Read `stream` line by line on a background thread until EOF.
pub(crate) fn spawn_line_reader<R, F>(stream: R, mut on_line: F)
where
    R: Read + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => on_line(line),
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    fn sleeper() -> ChildProcess {
        ChildProcess::spawn(
            "sleep",
            Command::new("sleep").arg("30").stdout(Stdio::null()),
        )
        .unwrap()
    }

    #[test]
    fn terminate_stops_running_process() {
        let mut proc = sleeper();
        assert!(proc.is_alive());
        assert!(proc.pid().is_some());
        proc.terminate();
        assert!(!proc.is_alive());
        assert!(proc.pid().is_none());
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut proc = sleeper();
        proc.terminate();
        proc.terminate();
        assert!(!proc.is_alive());
    }

    #[test]
    fn exited_process_is_not_alive() {
        let mut proc = ChildProcess::spawn("true", &mut Command::new("true")).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!proc.is_alive());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let result = ChildProcess::spawn(
            "missing",
            &mut Command::new("/nonexistent/aes67-test-binary"),
        );
        assert!(result.is_err());
    }
}
