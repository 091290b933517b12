//! Shared fixtures: a scripted media backend and scratch manager settings.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use aes67::clock::ClockSettings;
use aes67::sap::{AnnouncerSettings, ReceiverSettings};
use aes67::{
    Diagnostic, Direction, HealthState, Instance, ManagerSettings, MediaBackend, MediaPipeline,
    Result,
};
use parking_lot::Mutex;

/// Behaviour of every pipeline created for one (instance, direction).
#[derive(Default)]
pub struct Script {
    /// Bytes added per `bytes_emitted` call; `None` reports no counter.
    pub byte_step: Mutex<Option<u64>>,
    pub creates: AtomicUsize,
    pub stops: AtomicUsize,
    bytes: AtomicU64,
}

impl Script {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<BTreeMap<(u32, &'static str), Arc<Script>>>,
}

impl ScriptedBackend {
    pub fn script(&self, id: u32, direction: Direction) -> Arc<Script> {
        self.scripts
            .lock()
            .entry((id, direction.as_str()))
            .or_default()
            .clone()
    }
}

impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, instance: &Instance, direction: Direction) -> Result<Box<dyn MediaPipeline>> {
        let script = self.script(instance.id, direction);
        script.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPipeline { script }))
    }
}

struct ScriptedPipeline {
    script: Arc<Script>,
}

impl MediaPipeline for ScriptedPipeline {
    fn health(&mut self) -> HealthState {
        HealthState::Running
    }

    fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        Vec::new()
    }

    fn bytes_emitted(&mut self) -> Option<u64> {
        let step = (*self.script.byte_step.lock())?;
        Some(self.script.bytes.fetch_add(step, Ordering::SeqCst) + step)
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {
        self.script.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Settings rooted in `dir`: no PTP daemon, loopback SAP on the given ports.
pub fn settings(dir: &Path, announce_port: u16, receive_port: u16) -> ManagerSettings {
    ManagerSettings {
        config_path: dir.join("instances.json"),
        clock: ClockSettings {
            daemon_path: dir.join("ptp4l"),
            helper_path: dir.join("phc2sys"),
            phc_device: dir.join("ptp0"),
            conf_path: dir.join("ptp4l.conf"),
            sysfs_net_root: dir.join("sys"),
            ..ClockSettings::default()
        },
        announcer: AnnouncerSettings {
            destination: SocketAddrV4::new(Ipv4Addr::LOCALHOST, announce_port),
            multicast_if: Some(Ipv4Addr::LOCALHOST),
            ..AnnouncerSettings::default()
        },
        receiver: ReceiverSettings {
            port: receive_port,
            interface_addr: Ipv4Addr::LOCALHOST,
            recv_timeout: Duration::from_millis(200),
            ..ReceiverSettings::default()
        },
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}
