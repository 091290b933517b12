//! Transport health checks.
//!
//! Runs on the SAP announcer thread once per announce cycle. Per running
//! handle:
//!
//! ```text
//! drain diagnostics ─▶ healthy? ── no ──▶ restart ── fails ──▶ rebuild
//!                          │ yes
//!                          ▼
//!                   send direction with a byte counter?
//!                          │ yes
//!                          ▼
//!              counter unchanged for 2 polls ──▶ rebuild
//! ```
//!
//! The registry never repairs itself beyond the single in-place restart;
//! [`WatchdogReport::rebuild_required`] tells the owner to re-apply the whole
//! configuration.

use super::registry::TransportRegistry;
use super::{Diagnostic, TransportHandle};
use crate::config::Direction;

/// Consecutive polls with an unchanged byte counter before a send transport
/// counts as stalled.
pub const STALL_THRESHOLD: u32 = 2;

pub const STALLED_ERROR: &str = "Watchdog: pipeline stalled";
pub const RESTART_FAILED_ERROR: &str = "Watchdog recovery failed";
const PIPELINE_ERROR: &str = "Pipeline error";

/// Outcome of one watchdog scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    /// Handles that were still marked running.
    pub scanned: usize,
    /// Successful in-place restarts.
    pub restarted: Vec<(u32, Direction)>,
    /// Restarts that failed.
    pub failed: Vec<(u32, Direction)>,
    /// Send transports whose byte counter stopped moving.
    pub stalled: Vec<(u32, Direction)>,
    pub rebuild_required: bool,
}

impl TransportRegistry {
    /// Scan every running transport once. Holds the registry lock for the
    /// whole scan.
    pub fn poll_watchdog(&self) -> WatchdogReport {
        let mut report = WatchdogReport::default();
        let mut guard = self.maps.lock();
        let maps = &mut *guard;

        for handle in maps.send.values_mut().chain(maps.recv.values_mut()) {
            if handle.running {
                check_handle(handle, &mut report);
            }
        }

        if report.rebuild_required {
            tracing::warn!(
                failed = report.failed.len(),
                stalled = report.stalled.len(),
                "watchdog: full transport rebuild required"
            );
        }
        report
    }
}

fn check_handle(handle: &mut TransportHandle, report: &mut WatchdogReport) {
    report.scanned += 1;
    let id = handle.instance_id;
    let direction = handle.direction;

    for diagnostic in handle.pipeline.drain_diagnostics() {
        match diagnostic {
            Diagnostic::Error(msg) => {
                tracing::error!(instance_id = id, %direction, "pipeline error: {msg}");
                handle.last_error = PIPELINE_ERROR.to_string();
            }
            Diagnostic::Warning(msg) => {
                tracing::warn!(instance_id = id, %direction, "pipeline warning: {msg}");
            }
            Diagnostic::Info(msg) => {
                tracing::debug!(instance_id = id, %direction, "pipeline: {msg}");
            }
        }
    }

    let health = handle.pipeline.health();
    if !health.is_healthy() {
        tracing::warn!(instance_id = id, %direction, %health, "transport not running, restarting");
        match handle.pipeline.restart() {
            Ok(()) => {
                tracing::info!(instance_id = id, %direction, "transport restarted in place");
                report.restarted.push((id, direction));
            }
            Err(e) => {
                tracing::error!(instance_id = id, %direction, error = %e, "transport restart failed");
                handle.running = false;
                handle.last_error = RESTART_FAILED_ERROR.to_string();
                report.failed.push((id, direction));
                report.rebuild_required = true;
            }
        }
        return;
    }

    if direction != Direction::Send {
        return;
    }
    let Some(bytes) = handle.pipeline.bytes_emitted() else {
        return;
    };

    if bytes == handle.last_byte_count {
        handle.stall_count += 1;
        if handle.stall_count >= STALL_THRESHOLD {
            tracing::warn!(
                instance_id = id,
                bytes,
                polls = handle.stall_count,
                "send transport stalled"
            );
            handle.running = false;
            handle.last_error = STALLED_ERROR.to_string();
            report.stalled.push((id, direction));
            report.rebuild_required = true;
        }
    } else {
        handle.stall_count = 0;
    }
    handle.last_byte_count = bytes;
}
