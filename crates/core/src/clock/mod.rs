//! PTP clock supervision (IEEE 1588).
//!
//! The device clock is disciplined by an external PTP daemon (linuxptp's
//! `ptp4l`) running the AES67 profile, plus an optional helper (`phc2sys`)
//! that steers the system clock to the NIC's hardware clock so media
//! pipelines running on the system clock inherit PTP time.
//!
//! ## Start-up sequence
//!
//! ```text
//! daemon binary present? ── no ──▶ ClockBinaryMissing
//!        │ yes
//! write profile (hardware) ▶ spawn ▶ grace ▶ alive? ── yes ──▶ helper ▶ ok
//!        │ no
//! write profile (software) ▶ spawn ▶ grace ▶ alive? ── no ──▶ ClockSyncUnavailable
//!                                              │ yes
//!                                              ▼
//!                                     helper ▶ ok
//! ```
//!
//! Neither failure is fatal to the session manager; it proceeds without
//! synchronized timestamps.

pub mod profile;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Aes67Error, Result};
use crate::net;
use crate::process::{self, ChildProcess};
pub use profile::Timestamping;

/// Reported when the interface hardware address cannot be read.
pub const UNKNOWN_CLOCK_ID: &str = "00-00-00-FF-FE-00-00-00";

/// Paths and timings for the clock processes.
#[derive(Debug, Clone)]
pub struct ClockSettings {
    pub daemon_path: PathBuf,
    pub helper_path: PathBuf,
    /// PTP hardware clock device; the helper only runs when it exists.
    pub phc_device: PathBuf,
    /// Generated daemon profile, removed again on stop.
    pub conf_path: PathBuf,
    /// How long the daemon must survive before it counts as started.
    pub startup_grace: Duration,
    pub sysfs_net_root: PathBuf,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            daemon_path: PathBuf::from("/usr/sbin/ptp4l"),
            helper_path: PathBuf::from("/usr/sbin/phc2sys"),
            phc_device: PathBuf::from("/dev/ptp0"),
            conf_path: PathBuf::from("/tmp/aes67-ptp4l.conf"),
            startup_grace: Duration::from_millis(500),
            sysfs_net_root: PathBuf::from(net::SYSFS_NET_ROOT),
        }
    }
}

/// Snapshot of the supervisor, as reported in status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub initialized: bool,
    /// `-1` when the daemon is not running.
    pub daemon_pid: i64,
    pub using_hardware_timestamping: bool,
    pub conf_file_path: String,
}

/// Owns the PTP daemon and helper processes.
pub struct ClockSupervisor {
    settings: ClockSettings,
    interface: String,
    daemon: Option<ChildProcess>,
    helper: Option<ChildProcess>,
    timestamping: Option<Timestamping>,
}

impl ClockSupervisor {
    pub fn new(settings: ClockSettings) -> Self {
        Self {
            settings,
            interface: String::new(),
            daemon: None,
            helper: None,
            timestamping: None,
        }
    }

    pub fn settings(&self) -> &ClockSettings {
        &self.settings
    }

    /// Whether the daemon is up. A daemon found dead is reaped here, which
    /// returns the supervisor to the uninitialized state.
    pub fn is_initialized(&mut self) -> bool {
        self.is_daemon_running()
    }

    /// Interface the running daemon is bound to (empty when stopped).
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn daemon_installed(&self) -> bool {
        self.settings.daemon_path.exists()
    }

    /// Start the daemon on `interface`. No-op when already initialized.
    pub fn start(&mut self, interface: &str) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        if !self.daemon_installed() {
            tracing::error!(
                path = %self.settings.daemon_path.display(),
                "PTP daemon not found, install linuxptp"
            );
            return Err(Aes67Error::ClockBinaryMissing(self.settings.daemon_path.clone()));
        }

        tracing::info!(interface, "starting PTP daemon (AES67 profile, domain 0)");

        let mut daemon = None;
        for timestamping in [Timestamping::Hardware, Timestamping::Software] {
            if let Some(proc) = self.launch_daemon(interface, timestamping)? {
                self.timestamping = Some(timestamping);
                daemon = Some(proc);
                break;
            }
            tracing::warn!(interface, %timestamping, "PTP daemon exited immediately");
        }

        let Some(daemon) = daemon else {
            self.remove_conf();
            tracing::error!(interface, "PTP daemon failed with software timestamping too");
            return Err(Aes67Error::ClockSyncUnavailable {
                interface: interface.to_string(),
            });
        };

        tracing::info!(
            interface,
            pid = daemon.pid(),
            timestamping = ?self.timestamping,
            "PTP initialized"
        );
        self.daemon = Some(daemon);
        self.interface = interface.to_string();
        self.helper = self.launch_helper();
        Ok(())
    }

    /// Terminate both processes and remove the generated profile.
    ///
    /// Safe to call when not initialized.
    pub fn stop(&mut self) {
        if let Some(mut helper) = self.helper.take() {
            helper.terminate();
        }
        if let Some(mut daemon) = self.daemon.take() {
            daemon.terminate();
        }
        self.remove_conf();
        self.timestamping = None;
        self.interface.clear();
    }

    pub fn is_daemon_running(&mut self) -> bool {
        let Some(daemon) = self.daemon.as_mut() else {
            return false;
        };
        if daemon.is_alive() {
            return true;
        }
        tracing::warn!(interface = %self.interface, "PTP daemon exited");
        self.stop();
        false
    }

    /// Human-readable daemon state for status reporting.
    pub fn daemon_state(&mut self) -> &'static str {
        if self.is_daemon_running() {
            "running"
        } else {
            "not running"
        }
    }

    pub fn state(&mut self) -> ClockState {
        let initialized = self.is_initialized();
        let daemon_pid = self
            .daemon
            .as_ref()
            .and_then(ChildProcess::pid)
            .map_or(-1, i64::from);
        ClockState {
            initialized,
            daemon_pid,
            using_hardware_timestamping: self.timestamping == Some(Timestamping::Hardware),
            conf_file_path: self.settings.conf_path.display().to_string(),
        }
    }

    /// EUI-64 clock identity of `interface`; see [`derive_clock_id`].
    pub fn clock_id(&self, interface: &str) -> String {
        derive_clock_id(&self.settings.sysfs_net_root, interface)
    }

    fn launch_daemon(
        &self,
        interface: &str,
        timestamping: Timestamping,
    ) -> Result<Option<ChildProcess>> {
        std::fs::write(&self.settings.conf_path, profile::render(timestamping))?;

        let mut command = Command::new(&self.settings.daemon_path);
        command
            .arg("-i")
            .arg(interface)
            .arg("-f")
            .arg(&self.settings.conf_path)
            .arg("-m")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut daemon = ChildProcess::spawn("ptp4l", &mut command)?;
        if let Some(stderr) = daemon.take_stderr() {
            process::forward_stderr("ptp4l", stderr);
        }

        thread::sleep(self.settings.startup_grace);

        if daemon.is_alive() {
            Ok(Some(daemon))
        } else {
            Ok(None)
        }
    }

    fn launch_helper(&self) -> Option<ChildProcess> {
        if !self.settings.phc_device.exists() || !self.settings.helper_path.exists() {
            return None;
        }

        let mut command = Command::new(&self.settings.helper_path);
        command
            .arg("-s")
            .arg(&self.settings.phc_device)
            .args(["-c", "CLOCK_REALTIME", "-O", "0", "-m"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        match ChildProcess::spawn("phc2sys", &mut command) {
            Ok(mut helper) => {
                if let Some(stderr) = helper.take_stderr() {
                    process::forward_stderr("phc2sys", stderr);
                }
                Some(helper)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start clock steering helper");
                None
            }
        }
    }

    fn remove_conf(&self) {
        match std::fs::remove_file(&self.settings.conf_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.settings.conf_path.display(), error = %e, "cannot remove PTP config")
            }
        }
    }
}

impl Drop for ClockSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map a 6-byte MAC to its EUI-64 form by inserting `FF-FE` in the middle.
///
/// `aa:bb:cc:dd:ee:ff` → `AA-BB-CC-FF-FE-DD-EE-FF`
pub fn eui64_from_mac(mac: [u8; 6]) -> String {
    format!(
        "{:02X}-{:02X}-{:02X}-FF-FE-{:02X}-{:02X}-{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// PTP clock identity for `interface`, or [`UNKNOWN_CLOCK_ID`].
pub fn derive_clock_id(sysfs_root: &Path, interface: &str) -> String {
    net::read_mac_address(sysfs_root, interface)
        .map(eui64_from_mac)
        .unwrap_or_else(|| UNKNOWN_CLOCK_ID.to_string())
}
