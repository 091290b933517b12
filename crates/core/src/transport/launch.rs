//! Pipelines run as `gst-launch-1.0` child processes.
//!
//! No GStreamer libraries are linked: each transport is one supervised
//! process, health is process liveness, and stderr lines become
//! diagnostics. There is no byte counter, so send transports on this
//! backend are never stall-checked.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    Capability, Diagnostic, HealthState, MediaBackend, MediaPipeline, REQUIRED_ELEMENTS,
    pipeline_description,
};
use crate::config::{Direction, Instance};
use crate::error::{Aes67Error, Result};
use crate::process::{ChildProcess, spawn_line_reader};

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Launcher executable; a bare name is looked up on `PATH`.
    pub program: PathBuf,
    /// Element inspector used for capability probes.
    pub inspect_program: PathBuf,
    /// A launcher that exits within this window failed to start.
    pub startup_grace: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gst-launch-1.0"),
            inspect_program: PathBuf::from("gst-inspect-1.0"),
            startup_grace: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchBackend {
    settings: LaunchSettings,
}

impl LaunchBackend {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }
}

impl MediaBackend for LaunchBackend {
    fn name(&self) -> &'static str {
        "gst-launch"
    }

    fn create(&self, instance: &Instance, direction: Direction) -> Result<Box<dyn MediaPipeline>> {
        let description = pipeline_description(instance, direction);
        tracing::info!(instance_id = instance.id, %direction, "launch pipeline: {description}");

        let mut pipeline = LaunchPipeline {
            label: instance.node_name(direction),
            program: self.settings.program.clone(),
            args: split_description(&description),
            grace: self.settings.startup_grace,
            child: None,
            diagnostics: Arc::new(Mutex::new(Vec::new())),
        };

        pipeline.launch().map_err(|reason| Aes67Error::TransportCreate {
            instance_id: instance.id,
            direction: direction.as_str(),
            reason,
        })?;
        Ok(Box::new(pipeline))
    }

    fn capabilities(&self) -> Vec<Capability> {
        let launcher = find_program(&self.settings.program);
        let inspector = find_program(&self.settings.inspect_program);

        let mut caps = vec![Capability {
            name: self.settings.program.display().to_string(),
            available: launcher.is_some(),
        }];

        for element in REQUIRED_ELEMENTS {
            let available = inspector.as_ref().is_some_and(|inspect| {
                Command::new(inspect)
                    .args(["--exists", element])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .is_ok_and(|s| s.success())
            });
            caps.push(Capability {
                name: format!("element_{element}"),
                available,
            });
        }
        caps
    }
}

struct LaunchPipeline {
    label: String,
    program: PathBuf,
    args: Vec<String>,
    grace: Duration,
    child: Option<ChildProcess>,
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl LaunchPipeline {
    /// Spawn the launcher and wait out the startup grace period.
    fn launch(&mut self) -> std::result::Result<(), String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = ChildProcess::spawn(&self.label, &mut command).map_err(|e| e.to_string())?;
        if let Some(stderr) = child.take_stderr() {
            let diagnostics = self.diagnostics.clone();
            spawn_line_reader(stderr, move |line| {
                diagnostics.lock().push(classify(line));
            });
        }

        thread::sleep(self.grace);
        if !child.is_alive() {
            let last_error = self.diagnostics.lock().iter().rev().find_map(|d| match d {
                Diagnostic::Error(msg) => Some(msg.clone()),
                _ => None,
            });
            return Err(last_error.unwrap_or_else(|| "launcher exited during startup".to_string()));
        }

        self.child = Some(child);
        Ok(())
    }
}

impl MediaPipeline for LaunchPipeline {
    fn health(&mut self) -> HealthState {
        match self.child.as_mut().map(ChildProcess::is_alive) {
            Some(true) => HealthState::Running,
            Some(false) => HealthState::Failed,
            None => HealthState::Stopped,
        }
    }

    fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock())
    }

    fn bytes_emitted(&mut self) -> Option<u64> {
        None
    }

    fn restart(&mut self) -> Result<()> {
        self.stop();
        self.launch().map_err(Aes67Error::TransportRestart)
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.terminate();
        }
    }
}

fn classify(line: String) -> Diagnostic {
    if line.starts_with("ERROR") {
        Diagnostic::Error(line)
    } else if line.starts_with("WARNING") {
        Diagnostic::Warning(line)
    } else {
        Diagnostic::Info(line)
    }
}

/// Split a launch description into arguments on whitespace outside double
/// quotes. Quotes are kept: the launcher re-joins its arguments and parses
/// quoted property values itself.
pub fn split_description(description: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in description.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Resolve `program` the way a shell would.
pub fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn backend(program: PathBuf) -> LaunchBackend {
        LaunchBackend::new(LaunchSettings {
            program,
            startup_grace: Duration::from_millis(200),
            ..LaunchSettings::default()
        })
    }

    #[test]
    fn split_keeps_quoted_values_whole() {
        let args = split_description(
            "a ! b x=\"props,node.description=Main Mix (Receive)\"  ! c",
        );
        assert_eq!(
            args,
            vec!["a", "!", "b", "x=\"props,node.description=Main Mix (Receive)\"", "!", "c"]
        );
    }

    #[test]
    fn long_running_launcher_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "launch", "exec sleep 30");
        let mut pipeline = backend(program)
            .create(&Instance::default(), Direction::Send)
            .unwrap();
        assert_eq!(pipeline.health(), HealthState::Running);
        assert_eq!(pipeline.bytes_emitted(), None);
        pipeline.stop();
        assert_eq!(pipeline.health(), HealthState::Stopped);
    }

    #[test]
    fn launcher_dying_after_startup_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "launch", "sleep 0.5\nexit 1");
        let mut pipeline = backend(program)
            .create(&Instance::default(), Direction::Send)
            .unwrap();
        assert_eq!(pipeline.health(), HealthState::Running);
        std::thread::sleep(Duration::from_millis(800));
        assert_eq!(pipeline.health(), HealthState::Failed);
        pipeline.stop();
        assert_eq!(pipeline.health(), HealthState::Stopped);
    }

    #[test]
    fn exiting_launcher_fails_create() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "launch", "echo 'ERROR: no element pipewiresrc' >&2\nexit 1");
        let err = match backend(program).create(&Instance::default(), Direction::Receive) {
            Ok(_) => panic!("create should fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            Aes67Error::TransportCreate { direction: "receive", .. }
        ));
    }

    #[test]
    fn stderr_becomes_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(
            dir.path(),
            "launch",
            "echo 'WARNING: clock drift' >&2\necho 'Setting pipeline to PLAYING' >&2\nexec sleep 30",
        );
        let mut pipeline = backend(program)
            .create(&Instance::default(), Direction::Send)
            .unwrap();
        let diagnostics = pipeline.drain_diagnostics();
        assert!(diagnostics.contains(&Diagnostic::Warning("WARNING: clock drift".to_string())));
        assert!(pipeline.drain_diagnostics().is_empty());
        pipeline.stop();
    }

    #[test]
    fn find_program_paths() {
        assert!(find_program(Path::new("sh")).is_some());
        assert!(find_program(Path::new("/nonexistent/gst-launch-1.0")).is_none());
    }
}
